// Copyright 2024 the Strand Raster Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Registration of the pipeline kernels with an engine.

use std::convert::Infallible;

use strand_raster_shaders::{self as kernels, cpu, cpu::CpuBinding, Kernel};

use crate::recording::ShaderId;
use crate::{CpuEngine, Tessellation};

/// Signature shared by all CPU kernels.
pub type CpuKernelFn = fn(u32, &[CpuBinding<'_>]);

/// Handles of every kernel of the pipeline, as registered with one engine.
#[derive(Clone, Copy, Debug)]
pub struct FullShaders {
    pub clear_u32: ShaderId,
    pub vertex_setup: ShaderId,
    pub segment_setup: ShaderId,
    pub raster_bin: ShaderId,
    pub raster_bin_curve: ShaderId,
    pub prefix_sum_reduce: ShaderId,
    pub prefix_sum_scan_partials: ShaderId,
    pub prefix_sum_downsweep: ShaderId,
    pub work_queue_args: ShaderId,
    pub work_queue: ShaderId,
    pub raster_fine: ShaderId,
    pub raster_fine_curve: ShaderId,
    pub raster_fine_oit: ShaderId,
    pub raster_coverage: ShaderId,
    pub raster_resolve: ShaderId,
}

impl FullShaders {
    /// Registers every kernel through `add`, which receives the kernel
    /// contract and its CPU implementation.
    pub fn new<E, F>(mut add: F) -> Result<Self, E>
    where
        F: FnMut(Kernel, CpuKernelFn) -> Result<ShaderId, E>,
    {
        Ok(Self {
            clear_u32: add(kernels::CLEAR_U32, cpu::clear_u32)?,
            vertex_setup: add(kernels::VERTEX_SETUP, cpu::vertex_setup)?,
            segment_setup: add(kernels::SEGMENT_SETUP, cpu::segment_setup)?,
            raster_bin: add(kernels::RASTER_BIN, cpu::raster_bin)?,
            raster_bin_curve: add(kernels::RASTER_BIN_CURVE, cpu::raster_bin_curve)?,
            prefix_sum_reduce: add(kernels::PREFIX_SUM_REDUCE, cpu::prefix_sum_reduce)?,
            prefix_sum_scan_partials: add(
                kernels::PREFIX_SUM_SCAN_PARTIALS,
                cpu::prefix_sum_scan_partials,
            )?,
            prefix_sum_downsweep: add(kernels::PREFIX_SUM_DOWNSWEEP, cpu::prefix_sum_downsweep)?,
            work_queue_args: add(kernels::WORK_QUEUE_ARGS, cpu::work_queue_args)?,
            work_queue: add(kernels::WORK_QUEUE, cpu::work_queue)?,
            raster_fine: add(kernels::RASTER_FINE, cpu::raster_fine)?,
            raster_fine_curve: add(kernels::RASTER_FINE_CURVE, cpu::raster_fine_curve)?,
            raster_fine_oit: add(kernels::RASTER_FINE_OIT, cpu::raster_fine_oit)?,
            raster_coverage: add(kernels::RASTER_COVERAGE, cpu::raster_coverage)?,
            raster_resolve: add(kernels::RASTER_RESOLVE, cpu::raster_resolve)?,
        })
    }

    /// Registers the CPU implementation of every kernel with `engine`.
    pub fn cpu(engine: &mut CpuEngine) -> Self {
        let shaders = Self::new(|kernel, f| Ok::<_, Infallible>(engine.add_kernel(kernel, f)));
        match shaders {
            Ok(shaders) => shaders,
            Err(never) => match never {},
        }
    }

    /// The binning kernel matching the tessellation mode.
    pub fn bin(&self, tessellation: Tessellation) -> ShaderId {
        if tessellation.is_enabled() {
            self.raster_bin_curve
        } else {
            self.raster_bin
        }
    }

    pub fn fine(&self, variant: FineVariant) -> ShaderId {
        match variant {
            FineVariant::Nearest => self.raster_fine,
            FineVariant::Curve => self.raster_fine_curve,
            FineVariant::Blended => self.raster_fine_oit,
        }
    }
}

/// Fine rasterization kernel selected by the frame's mode flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FineVariant {
    /// Straight segments, nearest strand wins.
    Nearest,
    /// Tessellated curves, nearest strand wins.
    Curve,
    /// Straight segments, weighted blended transparency.
    Blended,
}

/// The requested combination of fine rasterization modes has no kernel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("order independent transparency can't be combined with tessellation")]
pub struct UnsupportedMode;

impl FineVariant {
    pub fn resolve(tessellation: Tessellation, oit: bool) -> Result<Self, UnsupportedMode> {
        match (tessellation.is_enabled(), oit) {
            (false, false) => Ok(Self::Nearest),
            (true, false) => Ok(Self::Curve),
            (false, true) => Ok(Self::Blended),
            (true, true) => Err(UnsupportedMode),
        }
    }
}
