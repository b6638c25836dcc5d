// Copyright 2024 the Strand Raster Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The brute force rasterization path: per-pixel fragment lists, sorted and
//! composited by a resolve pass.

use strand_raster_encoding::{Budgets, BufferSizes, HEAD_EMPTY};

use crate::recording::{BufferProxy, Recording, ResourceProxy};
use crate::stage::{FrameContext, Stage};

#[derive(Clone, Copy, Debug)]
struct HeadPointers {
    width: u32,
    height: u32,
    buf: BufferProxy,
}

pub struct BruteRasterizer {
    budgets: Budgets,
    fragments: BufferProxy,
    heads: Option<HeadPointers>,
}

impl BruteRasterizer {
    pub fn new(budgets: &Budgets) -> Self {
        let sizes = BufferSizes::new(budgets, 0, 0, 0, 0);
        Self {
            budgets: *budgets,
            fragments: BufferProxy::new(sizes.fragments.size_in_bytes().into(), "fragments"),
            heads: None,
        }
    }
}

impl Stage for BruteRasterizer {
    fn update_buffers(&mut self, ctx: &mut FrameContext<'_>) {
        let (mut width, mut height) = (ctx.params.width, ctx.params.height);
        if let Some(heads) = self.heads {
            if width <= heads.width && height <= heads.height {
                return;
            }
            width = width.max(heads.width);
            height = height.max(heads.height);
            ctx.recording.free_buffer(heads.buf);
        }
        log::debug!("allocating head pointers for {width}x{height}");
        let sizes = BufferSizes::new(&self.budgets, width, height, 0, 0);
        self.heads = Some(HeadPointers {
            width,
            height,
            buf: BufferProxy::new(
                sizes.head_pointers.size_in_bytes().into(),
                "head_pointers",
            ),
        });
    }

    fn clear(&mut self, ctx: &mut FrameContext<'_>) {
        if let Some(heads) = self.heads {
            ctx.fill_u32(heads.buf, HEAD_EMPTY, 0, heads.width * heads.height);
        }
    }

    fn execute(&mut self, ctx: &mut FrameContext<'_>) {
        let Some(heads) = self.heads else {
            log::error!("brute force rasterizer executed before its buffers were allocated");
            return;
        };
        let config = ctx.config;
        let config_buf = ctx.config_buf;
        let shaders = ctx.shaders;
        let segments = ctx.segments;
        let fragments = self.fragments;
        ctx.recording.debug_group("Coverage", |recording| {
            recording.dispatch(
                shaders.raster_coverage,
                config.workgroup_counts.coverage,
                [
                    config_buf,
                    segments.segment_headers,
                    segments.segment_data,
                    segments.vertex_output,
                    segments.bump,
                    heads.buf,
                    fragments,
                ],
            );
        });
        let bindings: [ResourceProxy; 4] = [
            config_buf.into(),
            heads.buf.into(),
            fragments.into(),
            ctx.target.into(),
        ];
        ctx.recording.debug_group("Resolve", |recording| {
            recording.dispatch(
                shaders.raster_resolve,
                config.workgroup_counts.resolve,
                bindings,
            );
        });
    }

    fn free(&mut self, recording: &mut Recording) {
        recording.free_buffer(self.fragments);
        if let Some(heads) = self.heads.take() {
            recording.free_buffer(heads.buf);
        }
    }
}
