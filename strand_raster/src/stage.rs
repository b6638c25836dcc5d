// Copyright 2024 the Strand Raster Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use bytemuck::bytes_of;
use strand_raster_encoding::{ClearParams, RenderConfig, CLEAR_WG};

use crate::recording::{BufferProxy, ImageProxy, Recording};
use crate::segment_setup::SegmentBuffers;
use crate::shaders::{FineVariant, FullShaders, UnsupportedMode};
use crate::{RenderParams, StrandBuffers};

/// Everything a stage needs to record its part of one frame.
pub struct FrameContext<'a> {
    /// The frame's command stream.
    pub recording: &'a mut Recording,
    pub shaders: &'a FullShaders,
    pub strands: &'a StrandBuffers,
    pub params: &'a RenderParams,
    pub config: &'a RenderConfig,
    /// Uniform holding `config.gpu`.
    pub config_buf: BufferProxy,
    /// Outputs of segment setup, read by the rasterization stages.
    pub segments: SegmentBuffers,
    /// Fine rasterization kernel for the frame's mode flags.
    pub fine: Result<FineVariant, UnsupportedMode>,
    pub target: ImageProxy,
}

impl FrameContext<'_> {
    /// Records a fill of `count` `u32`s of `buf`, starting at element
    /// `offset`, with `value`.
    pub fn fill_u32(&mut self, buf: BufferProxy, value: u32, offset: u32, count: u32) {
        let params = ClearParams {
            value,
            offset,
            count,
            _padding: 0,
        };
        let params_buf = self
            .recording
            .upload_uniform("clear_params", bytes_of(&params));
        self.recording.dispatch(
            self.shaders.clear_u32,
            (count.div_ceil(CLEAR_WG), 1, 1),
            [params_buf, buf],
        );
        self.recording.free_buffer(params_buf);
    }
}

/// One stage of the per-frame dispatch chain.
///
/// For every frame, each stage first updates its buffers, then clears its
/// accumulators, then records its dispatches.
pub trait Stage {
    /// Reallocates buffers that depend on the frame's resolution.
    fn update_buffers(&mut self, ctx: &mut FrameContext<'_>) {
        let _ = ctx;
    }

    /// Resets the state the stage accumulates into during a frame.
    fn clear(&mut self, ctx: &mut FrameContext<'_>);

    fn execute(&mut self, ctx: &mut FrameContext<'_>);

    /// Records the release of every buffer the stage owns.
    fn free(&mut self, recording: &mut Recording);
}
