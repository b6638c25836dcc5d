// Copyright 2024 the Strand Raster Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use strand_raster_encoding::{BufferSizes, Budgets};

use crate::recording::{BufferProxy, Recording};
use crate::stage::{FrameContext, Stage};

/// Budget sized pools written by segment setup.
#[derive(Clone, Copy, Debug)]
pub struct SegmentBuffers {
    pub vertex_output: BufferProxy,
    /// Candidate index of every live segment.
    pub segment_output: BufferProxy,
    pub segment_headers: BufferProxy,
    pub segment_data: BufferProxy,
    /// Frame counters of every stage, see
    /// [`BumpAllocators`](strand_raster_encoding::BumpAllocators).
    pub bump: BufferProxy,
}

impl SegmentBuffers {
    fn new(budgets: &Budgets) -> Self {
        // None of these pools depend on the resolution.
        let sizes = BufferSizes::new(budgets, 0, 0, 0, 0);
        Self {
            vertex_output: BufferProxy::new(
                sizes.vertex_output.size_in_bytes().into(),
                "vertex_output",
            ),
            segment_output: BufferProxy::new(
                sizes.segment_output.size_in_bytes().into(),
                "segment_output",
            ),
            segment_headers: BufferProxy::new(
                sizes.segment_headers.size_in_bytes().into(),
                "segment_headers",
            ),
            segment_data: BufferProxy::new(
                sizes.segment_data.size_in_bytes().into(),
                "segment_data",
            ),
            bump: BufferProxy::new(sizes.bump_alloc.size_in_bytes().into(), "bump"),
        }
    }
}

/// Vertex setup followed by segment culling and compaction.
pub struct SegmentSetup {
    buffers: SegmentBuffers,
}

impl SegmentSetup {
    pub fn new(budgets: &Budgets) -> Self {
        Self {
            buffers: SegmentBuffers::new(budgets),
        }
    }

    pub fn buffers(&self) -> SegmentBuffers {
        self.buffers
    }
}

impl Stage for SegmentSetup {
    fn clear(&mut self, ctx: &mut FrameContext<'_>) {
        // Every counter of the frame starts from zero, including those of
        // the later stages.
        ctx.recording.clear_all(self.buffers.bump);
    }

    fn execute(&mut self, ctx: &mut FrameContext<'_>) {
        let config = ctx.config;
        let config_buf = ctx.config_buf;
        let shaders = ctx.shaders;
        let strands = ctx.strands;
        let buffers = self.buffers;
        let wg_counts = &config.workgroup_counts;
        log::debug!(
            "segment setup: {} vertices in {} workgroups, {} candidates in {} workgroups, {} slots",
            config.gpu.vertex_count,
            wg_counts.vertex_setup.0,
            config.gpu.segment_count,
            wg_counts.segment_setup.0,
            config.gpu.segments_size,
        );
        ctx.recording.debug_group("VertexSetup", |recording| {
            recording.dispatch(
                shaders.vertex_setup,
                wg_counts.vertex_setup,
                [
                    config_buf,
                    strands.vertices,
                    strands.positions,
                    buffers.vertex_output,
                ],
            );
        });
        ctx.recording.debug_group("SegmentSetupPass", |recording| {
            recording.dispatch(
                shaders.segment_setup,
                wg_counts.segment_setup,
                [
                    config_buf,
                    buffers.vertex_output,
                    strands.indices,
                    buffers.bump,
                    buffers.segment_output,
                    buffers.segment_headers,
                    buffers.segment_data,
                ],
            );
        });
    }

    fn free(&mut self, recording: &mut Recording) {
        recording.free_buffer(self.buffers.vertex_output);
        recording.free_buffer(self.buffers.segment_output);
        recording.free_buffer(self.buffers.segment_headers);
        recording.free_buffer(self.buffers.segment_data);
        recording.free_buffer(self.buffers.bump);
    }
}
