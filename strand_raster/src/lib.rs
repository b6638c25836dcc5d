// Copyright 2024 the Strand Raster Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Strand Raster draws many thousands of hair strands, given as poly-lines
//! of particles, with a deferred and tile-binned compute pipeline.
//!
//! Every frame runs a fixed chain of dispatches on a single command stream:
//!
//! 1. Vertex setup projects every particle.
//! 2. Segment setup culls the segments between adjacent particles and
//!    compacts the survivors into a capacity-bounded pool.
//! 3. In [`RasterMode::Binned`], the bin stage scatters each segment into
//!    the screen tiles it touches, a prefix sum turns the per-tile counts
//!    into offsets, an indirectly dispatched scatter builds a tile
//!    contiguous work queue, and fine rasterization shades each tile from
//!    its slice of that queue.
//! 4. In [`RasterMode::Brute`], a coverage pass appends one fragment per
//!    covered pixel to per-pixel linked lists, and a resolve pass sorts and
//!    composites each list.
//!
//! The amount of work after segment setup is only known to the device. All
//! pools are sized up front by [`Budgets`] and saturate when full: excess
//! work is dropped for the frame and reported in [`FrameStats`], never
//! written out of bounds.
//!
//! The pipeline is expressed as [`low_level::Recording`]s of commands over
//! buffer and image proxies. [`CpuEngine`] executes them on the host with
//! the reference kernels from `strand_raster_shaders`. With the `wgpu`
//! feature, [`Renderer`] executes them on a [`wgpu::Device`] using kernel
//! sources supplied through [`KernelSources`].
//!
//! ```no_run
//! use strand_raster::glam::Mat4;
//! use strand_raster::low_level::{FullShaders, Recording};
//! use strand_raster::{
//!     CpuEngine, MemoryLayout, RasterizerOptions, RenderParams, StrandBuffers, StrandGeometry,
//!     StrandLayout, StrandRasterizer,
//! };
//!
//! # fn main() -> Result<(), strand_raster::Error> {
//! let layout = StrandLayout { strand_count: 1, strand_particle_count: 2 };
//! let positions = vec![[-0.5, 0.0, 0.5], [0.5, 0.0, 0.5]];
//! let geometry = StrandGeometry::new(layout, MemoryLayout::Sequential, positions).unwrap();
//!
//! let mut engine = CpuEngine::new();
//! let shaders = FullShaders::cpu(&mut engine);
//! let options = RasterizerOptions::default();
//! let mut recording = Recording::default();
//! let strands = StrandBuffers::upload(&mut recording, &geometry, &options.budgets)?;
//! let mut rasterizer = StrandRasterizer::new(options);
//! let params = RenderParams::new(64, 64, Mat4::IDENTITY, Mat4::IDENTITY);
//! let frame = rasterizer.record_frame(&mut recording, &shaders, &strands, &params)?;
//! engine.run_recording(&recording)?;
//! let image = engine.image(frame.target);
//! # Ok(())
//! # }
//! ```

// LINEBENDER LINT SET - lib.rs - v2
// See https://linebender.org/wiki/canonical-lints/
// These lints aren't included in Cargo.toml because they
// shouldn't apply to examples and tests
#![warn(unused_crate_dependencies)]
#![warn(clippy::print_stdout, clippy::print_stderr)]
// Targeting e.g. 32-bit means structs containing usize can give false positives for 64-bit.
#![cfg_attr(target_pointer_width = "64", warn(clippy::trivially_copy_pass_by_ref))]
// END LINEBENDER LINT SET
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![allow(missing_docs, reason = "We have many as-yet undocumented items.")]
#![allow(
    missing_debug_implementations,
    clippy::cast_possible_truncation,
    clippy::missing_errors_doc,
    reason = "Deferred"
)]

mod binned;
mod brute;
mod cpu_engine;
mod prefix_sum;
mod rasterizer;
mod recording;
mod segment_setup;
mod shaders;
mod stage;
mod stats;
mod strands;

#[cfg(feature = "wgpu")]
mod wgpu_engine;

/// Styling and transform types.
pub use glam;
pub use peniko;
/// `wgpu` used by the [`Renderer`].
#[cfg(feature = "wgpu")]
pub use wgpu;

pub use strand_raster_encoding::{
    Budgets, BumpAllocators, MemoryLayout, StrandGeometry, StrandLayout, StrandStyle,
};

pub use cpu_engine::CpuEngine;
pub use rasterizer::{Pipeline, RecordedFrame, StrandRasterizer};
pub use shaders::{FineVariant, UnsupportedMode};
pub use stats::{FrameStats, StatsCapture};
pub use strands::StrandBuffers;

#[cfg(feature = "wgpu")]
pub use wgpu_engine::KernelSources;

/// Internal structures which are exposed for advanced use and testing.
///
/// These have no stability guarantees.
pub mod low_level {
    pub use crate::binned::BinnedRasterizer;
    pub use crate::brute::BruteRasterizer;
    pub use crate::prefix_sum::PrefixSumArgs;
    pub use crate::recording::{
        BufferProxy, Command, ImageProxy, Recording, ResourceId, ResourceProxy, ShaderId,
    };
    pub use crate::segment_setup::{SegmentBuffers, SegmentSetup};
    pub use crate::shaders::{CpuKernelFn, FullShaders};
    pub use crate::stage::{FrameContext, Stage};
}

#[cfg(feature = "wgpu")]
use std::sync::atomic::AtomicBool;

use glam::Mat4;
use thiserror::Error;

#[cfg(feature = "wgpu")]
use wgpu::{Device, Queue, TextureView};
#[cfg(feature = "wgpu")]
use wgpu_engine::{ExternalResource, WgpuEngine};

/// Errors that can occur in Strand Raster.
///
/// Pool exhaustion is not an error: it is reported through [`FrameStats`].
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Used a buffer inside a recording while it was not available.
    /// Check if you have created it and not freed before its last usage.
    #[error("Buffer '{0}' is not available but used for {1}")]
    UnavailableBufferUsed(&'static str, &'static str),
    /// Used an image inside a recording while it was not available.
    #[error("Image is not available but used for {0}")]
    UnavailableImageUsed(&'static str),
    /// An engine was asked to run a kernel it has no code for.
    #[error("No kernel available for '{0}'")]
    MissingKernel(&'static str),
    /// An input stream doesn't fit in the pool reserved for it.
    #[error("{what} needs {needed} elements but the budget only allows {capacity}")]
    GeometryExceedsBudget {
        what: &'static str,
        needed: u64,
        capacity: u64,
    },
    /// The render target has no pixels.
    #[error("Render target has a zero dimension")]
    EmptyTarget,

    /// There is no available device with the features required by Strand Raster.
    #[cfg(feature = "wgpu")]
    #[error("Couldn't find suitable device")]
    NoCompatibleDevice,
    /// Failed to async map a buffer.
    /// See [`wgpu::BufferAsyncError`] for more information.
    #[cfg(feature = "wgpu")]
    #[error("Failed to async map a buffer")]
    BufferAsyncError(#[from] wgpu::BufferAsyncError),
    #[cfg(feature = "wgpu")]
    #[error("wgpu Error from scope")]
    WgpuErrorFromScope(#[from] wgpu::Error),
}

pub(crate) type Result<T, E = Error> = std::result::Result<T, E>;

/// Which pipeline variant rasterizes the segments.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RasterMode {
    /// Tile binning, work queue compaction and per-tile fine rasterization.
    #[default]
    Binned,
    /// Per-pixel fragment lists resolved by sorting.
    Brute,
}

/// Whether segments are drawn as straight lines or as curves through their
/// neighbouring particles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Tessellation {
    #[default]
    Off,
    /// Catmull-Rom curves with `samples` subdivisions per segment.
    ///
    /// Zero samples behaves like [`Tessellation::Off`].
    On { samples: u32 },
}

impl Tessellation {
    /// Curve subdivisions per segment, zero when disabled.
    pub fn samples(self) -> u32 {
        match self {
            Self::Off => 0,
            Self::On { samples } => samples,
        }
    }

    pub fn is_enabled(self) -> bool {
        self.samples() > 0
    }
}

/// Options fixed for the lifetime of a [`StrandRasterizer`].
#[derive(Clone, Copy, Debug)]
pub struct RasterizerOptions {
    pub mode: RasterMode,
    /// Pool sizes and hardware constants.
    pub budgets: Budgets,
    pub style: StrandStyle,
}

impl Default for RasterizerOptions {
    fn default() -> Self {
        Self {
            mode: RasterMode::Binned,
            budgets: Budgets::DEFAULT,
            style: StrandStyle::default(),
        }
    }
}

/// Parameters of a single frame.
#[derive(Clone, Copy, Debug)]
pub struct RenderParams {
    /// Dimensions of the rasterization target
    pub width: u32,
    pub height: u32,
    pub view: Mat4,
    pub projection: Mat4,
    pub tessellation: Tessellation,
    /// Blend overlapping strands instead of keeping the nearest.
    pub oit: bool,
    /// Download the counters needed for [`FrameStats`].
    pub capture_stats: bool,
}

impl RenderParams {
    pub fn new(width: u32, height: u32, view: Mat4, projection: Mat4) -> Self {
        Self {
            width,
            height,
            view,
            projection,
            tessellation: Tessellation::Off,
            oit: false,
            capture_stats: false,
        }
    }
}

/// Renders strands into a texture.
#[cfg(feature = "wgpu")]
pub struct Renderer {
    engine: WgpuEngine,
    shaders: low_level::FullShaders,
    rasterizer: StrandRasterizer,
}
// This is not `Send` (or `Sync`) on WebAssembly as the
// underlying wgpu types are not.
#[cfg(all(feature = "wgpu", not(target_arch = "wasm32")))]
static_assertions::assert_impl_all!(Renderer: Send);

#[cfg(feature = "wgpu")]
impl Renderer {
    /// Creates a new renderer for the specified device.
    ///
    /// `sources` must hold the WGSL of every kernel listed in
    /// [`strand_raster_shaders::KERNELS`].
    pub fn new(
        device: &Device,
        sources: &KernelSources,
        options: RasterizerOptions,
    ) -> Result<Self> {
        let storage_buffers = strand_raster_shaders::KERNELS
            .iter()
            .map(|kernel| kernel.bindings.iter().filter(|b| b.is_storage()).count())
            .max()
            .unwrap_or(0) as u32;
        if device.limits().max_storage_buffers_per_shader_stage < storage_buffers {
            return Err(Error::NoCompatibleDevice);
        }
        if options.budgets.num_lane_per_wave != strand_raster_shaders::LANES {
            static HAS_WARNED: AtomicBool = AtomicBool::new(false);
            if !HAS_WARNED.swap(true, std::sync::atomic::Ordering::Release) {
                log::warn!(
                    "Budgets use {} lanes per wave but the kernels are built for {}.",
                    options.budgets.num_lane_per_wave,
                    strand_raster_shaders::LANES,
                );
            }
        }
        let mut engine = WgpuEngine::default();
        let shaders = low_level::FullShaders::new(|kernel, _| {
            engine.add_compute_shader(device, kernel, sources)
        })?;
        Ok(Self {
            engine,
            shaders,
            rasterizer: StrandRasterizer::new(options),
        })
    }

    /// Uploads the geometry streams of a strand group.
    pub fn upload_strands(
        &mut self,
        device: &Device,
        queue: &Queue,
        geometry: &StrandGeometry,
    ) -> Result<StrandBuffers> {
        let mut recording = low_level::Recording::default();
        let strands =
            StrandBuffers::upload(&mut recording, geometry, &self.rasterizer.options().budgets)?;
        self.engine
            .run_recording(device, queue, &recording, &[], "upload_strands")?;
        Ok(strands)
    }

    /// Releases the geometry streams of a strand group.
    pub fn free_strands(
        &mut self,
        device: &Device,
        queue: &Queue,
        strands: StrandBuffers,
    ) -> Result<()> {
        let mut recording = low_level::Recording::default();
        strands.free(&mut recording);
        self.engine
            .run_recording(device, queue, &recording, &[], "free_strands")
    }

    /// Renders strands to the target texture.
    ///
    /// The texture is assumed to be of the specified dimensions and have been created with
    /// the [`wgpu::TextureFormat::Rgba8Unorm`] format and the [`wgpu::TextureUsages::STORAGE_BINDING`]
    /// flag set.
    pub fn render_to_texture(
        &mut self,
        device: &Device,
        queue: &Queue,
        strands: &StrandBuffers,
        texture: &TextureView,
        params: &RenderParams,
    ) -> Result<()> {
        let params = RenderParams {
            capture_stats: false,
            ..*params
        };
        let mut recording = low_level::Recording::default();
        let frame = self
            .rasterizer
            .record_frame(&mut recording, &self.shaders, strands, &params)?;
        let external_resources = [ExternalResource::Image(frame.target, texture)];
        self.engine.run_recording(
            device,
            queue,
            &recording,
            &external_resources,
            "render_to_texture",
        )
    }

    /// Renders strands to the target texture and reads back [`FrameStats`].
    ///
    /// Validation errors raised by the device during the frame are returned.
    pub async fn render_to_texture_async(
        &mut self,
        device: &Device,
        queue: &Queue,
        strands: &StrandBuffers,
        texture: &TextureView,
        params: &RenderParams,
    ) -> Result<Option<FrameStats>> {
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let mut recording = low_level::Recording::default();
        let frame = self
            .rasterizer
            .record_frame(&mut recording, &self.shaders, strands, params)?;
        let external_resources = [ExternalResource::Image(frame.target, texture)];
        self.engine.run_recording(
            device,
            queue,
            &recording,
            &external_resources,
            "render_to_texture_async",
        )?;
        if let Some(error) = device.pop_error_scope().await {
            return Err(error.into());
        }
        let Some(capture) = frame.stats else {
            return Ok(None);
        };
        let bump = self.read_download(device, capture.bump).await?;
        let tile_counts = match capture.tile_counts {
            Some(proxy) => Some(self.read_download(device, proxy).await?),
            None => None,
        };
        self.engine.free_download(capture.bump);
        if let Some(proxy) = capture.tile_counts {
            self.engine.free_download(proxy);
        }
        let stats = capture.resolve(&bump, tile_counts.as_deref())?;
        stats.warn_if_exhausted();
        Ok(Some(stats))
    }

    async fn read_download(
        &self,
        device: &Device,
        proxy: low_level::BufferProxy,
    ) -> Result<Vec<u8>> {
        let buf = self
            .engine
            .get_download(proxy)
            .ok_or(Error::UnavailableBufferUsed(proxy.name, "download"))?;
        let buf_slice = buf.slice(..proxy.size);
        let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
        buf_slice.map_async(wgpu::MapMode::Read, move |v| {
            // The receiver is only gone if the frame was abandoned.
            let _ = sender.send(v);
        });
        let _ = device.poll(wgpu::Maintain::Wait);
        receiver
            .receive()
            .await
            .unwrap_or(Err(wgpu::BufferAsyncError))?;
        let bytes = buf_slice.get_mapped_range().to_vec();
        buf.unmap();
        Ok(bytes)
    }
}
