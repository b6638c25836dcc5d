// Copyright 2024 the Strand Raster Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::sync::atomic::{AtomicBool, Ordering};

use bytemuck::bytes_of;
use strand_raster_encoding::RenderConfig;

use crate::binned::BinnedRasterizer;
use crate::brute::BruteRasterizer;
use crate::recording::{ImageProxy, Recording};
use crate::segment_setup::SegmentSetup;
use crate::shaders::{FineVariant, FullShaders, UnsupportedMode};
use crate::stage::{FrameContext, Stage};
use crate::stats::StatsCapture;
use crate::{Error, RasterMode, RasterizerOptions, RenderParams, Result, StrandBuffers};

/// The rasterization stages following segment setup.
pub enum Pipeline {
    Binned(BinnedRasterizer),
    Brute(BruteRasterizer),
}

impl Stage for Pipeline {
    fn update_buffers(&mut self, ctx: &mut FrameContext<'_>) {
        match self {
            Self::Binned(stage) => stage.update_buffers(ctx),
            Self::Brute(stage) => stage.update_buffers(ctx),
        }
    }

    fn clear(&mut self, ctx: &mut FrameContext<'_>) {
        match self {
            Self::Binned(stage) => stage.clear(ctx),
            Self::Brute(stage) => stage.clear(ctx),
        }
    }

    fn execute(&mut self, ctx: &mut FrameContext<'_>) {
        match self {
            Self::Binned(stage) => stage.execute(ctx),
            Self::Brute(stage) => stage.execute(ctx),
        }
    }

    fn free(&mut self, recording: &mut Recording) {
        match self {
            Self::Binned(stage) => stage.free(recording),
            Self::Brute(stage) => stage.free(recording),
        }
    }
}

/// Handles produced by recording one frame.
#[derive(Clone, Copy, Debug)]
pub struct RecordedFrame {
    /// The image the frame is drawn into. Engines allocate it on first use,
    /// or bind an external texture to it.
    pub target: ImageProxy,
    /// Present when [`RenderParams::capture_stats`] was set.
    pub stats: Option<StatsCapture>,
    /// Set when the requested modes have no fine rasterization kernel. The
    /// target is left untouched for such frames.
    pub unsupported: Option<UnsupportedMode>,
}

/// Records the dispatch chain of a frame.
///
/// Budget sized pools are created with the rasterizer and live until
/// [`StrandRasterizer::free`]. Buffers depending on the resolution grow with
/// the largest target seen and are never shrunk.
pub struct StrandRasterizer {
    options: RasterizerOptions,
    setup: SegmentSetup,
    pipeline: Pipeline,
}

impl StrandRasterizer {
    pub fn new(options: RasterizerOptions) -> Self {
        let pipeline = match options.mode {
            RasterMode::Binned => Pipeline::Binned(BinnedRasterizer::new(&options.budgets)),
            RasterMode::Brute => Pipeline::Brute(BruteRasterizer::new(&options.budgets)),
        };
        Self {
            options,
            setup: SegmentSetup::new(&options.budgets),
            pipeline,
        }
    }

    pub fn options(&self) -> &RasterizerOptions {
        &self.options
    }

    /// Records one frame of `strands` into `recording`.
    pub fn record_frame(
        &mut self,
        recording: &mut Recording,
        shaders: &FullShaders,
        strands: &StrandBuffers,
        params: &RenderParams,
    ) -> Result<RecordedFrame> {
        if params.width == 0 || params.height == 0 {
            return Err(Error::EmptyTarget);
        }
        let config = RenderConfig::new(
            &strands.layout,
            &self.options.budgets,
            &self.options.style,
            params.width,
            params.height,
            &params.view,
            &params.projection,
            params.tessellation.samples(),
        );
        let fine = FineVariant::resolve(params.tessellation, params.oit);
        let unsupported = match (fine, &self.pipeline) {
            (Err(err), Pipeline::Binned(_)) => {
                static HAS_WARNED: AtomicBool = AtomicBool::new(false);
                if !HAS_WARNED.swap(true, Ordering::Release) {
                    log::warn!("{err}, fine rasterization is skipped for such frames");
                }
                Some(err)
            }
            _ => None,
        };
        log::debug!(
            "recording {}x{} frame, {} tiles of {}px, {} candidate segments",
            params.width,
            params.height,
            config.tile_count(),
            config.gpu.tile_size,
            config.gpu.segment_count,
        );

        let config_buf = recording.upload_uniform("config", bytes_of(&config.gpu));
        let target = ImageProxy::new(params.width, params.height);
        let mut ctx = FrameContext {
            recording: &mut *recording,
            shaders,
            strands,
            params,
            config: &config,
            config_buf,
            segments: self.setup.buffers(),
            fine,
            target,
        };
        self.setup.update_buffers(&mut ctx);
        self.pipeline.update_buffers(&mut ctx);
        self.setup.clear(&mut ctx);
        self.pipeline.clear(&mut ctx);
        self.setup.execute(&mut ctx);
        self.pipeline.execute(&mut ctx);

        let stats = params.capture_stats.then(|| {
            let capture = StatsCapture {
                total_segments: config.gpu.segment_count,
                n_tiles: config.tile_count(),
                bump: self.setup.buffers().bump,
                tile_counts: match &self.pipeline {
                    Pipeline::Binned(binned) => binned.tile_counts(),
                    Pipeline::Brute(_) => None,
                },
            };
            recording.download(capture.bump);
            if let Some(tile_counts) = capture.tile_counts {
                recording.download(tile_counts);
            }
            capture
        });
        recording.free_buffer(config_buf);
        Ok(RecordedFrame {
            target,
            stats,
            unsupported,
        })
    }

    /// Records the release of every buffer the rasterizer owns.
    ///
    /// The rasterizer can still record frames afterwards; its pools are
    /// materialized again on first use.
    pub fn free(&mut self, recording: &mut Recording) {
        self.setup.free(recording);
        self.pipeline.free(recording);
    }
}

#[cfg(test)]
mod tests {
    use glam::Mat4;
    use strand_raster_encoding::{Budgets, MemoryLayout, StrandGeometry, StrandLayout};

    use super::StrandRasterizer;
    use crate::low_level::{Command, FullShaders, Recording};
    use crate::{CpuEngine, Error, RasterizerOptions, RenderParams, StrandBuffers, Tessellation};

    fn small_options() -> RasterizerOptions {
        RasterizerOptions {
            budgets: Budgets {
                max_segments: 64,
                bin_record_pool_bytes: 64 * 8,
                work_queue_pool_bytes: 64 * 4,
                fragment_pool_bytes: 64 * 32,
                vertex_output_pool_bytes: 64 * 16,
                ..Budgets::DEFAULT
            },
            ..RasterizerOptions::default()
        }
    }

    fn strands(recording: &mut Recording, options: &RasterizerOptions) -> StrandBuffers {
        let layout = StrandLayout {
            strand_count: 1,
            strand_particle_count: 2,
        };
        let geometry =
            StrandGeometry::new(layout, MemoryLayout::Sequential, vec![[0.0; 3]; 2]).unwrap();
        StrandBuffers::upload(recording, &geometry, &options.budgets).unwrap()
    }

    fn debug_groups(recording: &Recording) -> Vec<&'static str> {
        recording
            .commands
            .iter()
            .filter_map(|command| match command {
                Command::PushDebugGroup(label) => Some(*label),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn stages_record_in_order() {
        let mut engine = CpuEngine::new();
        let shaders = FullShaders::cpu(&mut engine);
        let options = small_options();
        let mut recording = Recording::default();
        let strands = strands(&mut recording, &options);
        let mut rasterizer = StrandRasterizer::new(options);
        let params = RenderParams::new(32, 32, Mat4::IDENTITY, Mat4::IDENTITY);
        rasterizer
            .record_frame(&mut recording, &shaders, &strands, &params)
            .unwrap();
        assert_eq!(
            debug_groups(&recording),
            [
                "VertexSetup",
                "SegmentSetupPass",
                "BinPass",
                "PrefixSum",
                "BuildWorkQueue",
                "FinePass"
            ]
        );
        engine.run_recording(&recording).unwrap();
    }

    #[test]
    fn unsupported_modes_skip_fine_pass() {
        let mut engine = CpuEngine::new();
        let shaders = FullShaders::cpu(&mut engine);
        let options = small_options();
        let mut recording = Recording::default();
        let strands = strands(&mut recording, &options);
        let mut rasterizer = StrandRasterizer::new(options);
        let params = RenderParams {
            tessellation: Tessellation::On { samples: 4 },
            oit: true,
            ..RenderParams::new(32, 32, Mat4::IDENTITY, Mat4::IDENTITY)
        };
        let frame = rasterizer
            .record_frame(&mut recording, &shaders, &strands, &params)
            .unwrap();
        assert!(frame.unsupported.is_some());
        assert!(!debug_groups(&recording).contains(&"FinePass"));
        assert!(debug_groups(&recording).contains(&"BinPass"));
    }

    #[test]
    fn empty_targets_are_rejected() {
        let mut engine = CpuEngine::new();
        let shaders = FullShaders::cpu(&mut engine);
        let options = small_options();
        let mut recording = Recording::default();
        let strands = strands(&mut recording, &options);
        let mut rasterizer = StrandRasterizer::new(options);
        let params = RenderParams::new(0, 32, Mat4::IDENTITY, Mat4::IDENTITY);
        let result = rasterizer.record_frame(&mut recording, &shaders, &strands, &params);
        assert!(matches!(result, Err(Error::EmptyTarget)));
    }
}
