// Copyright 2024 the Strand Raster Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Data layout shared between the host and the strand rasterization kernels.
//!
//! Everything in this crate that is `#[repr(C)]` and [`bytemuck::Pod`] is
//! read or written by a kernel, and must be kept in sync with the kernel
//! contracts in `strand_raster_shaders`.

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
    clippy::missing_panics_doc,
    reason = "Deferred"
)]

mod bin;
mod budgets;
mod bump;
mod config;
mod fragment;
mod geometry;
mod segment;

pub use bin::{BinRecord, TILE_MAX_Z_CLEAR, TILE_MIN_Z_CLEAR};
pub use budgets::Budgets;
pub use bump::BumpAllocator;
pub use config::{
    BufferSize, BufferSizes, BumpAllocators, ClearParams, ConfigUniform, IndirectCount,
    RenderConfig, ScanParams, StrandStyle, WorkgroupCounts, WorkgroupSize, CLEAR_WG,
    MAX_BIN_EXTENT, MAX_LIST_DEPTH, MAX_TESSELLATION_SAMPLES, MIN_LIST_DEPTH, PREFIX_SUM_WG,
    RESOLVE_WG,
};
pub use fragment::{FragmentRecord, HEAD_EMPTY};
pub use geometry::{MemoryLayout, StrandGeometry, StrandLayout, VertexInput, VertexOutput};
pub use segment::{SegmentData, SegmentHeader};
