// Copyright 2024 the Strand Raster Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Kernel contracts of the strand rasterization pipeline.
//!
//! Each kernel is described by a [`Kernel`]: its label, its workgroup size
//! and the ordered list of resources it binds. A GPU backend supplies the
//! kernel source for every label and binds resources in exactly this order.
//! With the `cpu` feature, [`cpu`] provides a reference implementation of
//! every kernel operating on host memory.

// LINEBENDER LINT SET - lib.rs - v2
// See https://linebender.org/wiki/canonical-lints/
// These lints aren't included in Cargo.toml because they
// shouldn't apply to examples and tests
#![warn(unused_crate_dependencies)]
#![warn(clippy::print_stdout, clippy::print_stderr)]
// Targeting e.g. 32-bit means structs containing usize can give false positives for 64-bit.
#![cfg_attr(target_pointer_width = "64", warn(clippy::trivially_copy_pass_by_ref))]
// END LINEBENDER LINT SET
#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs, reason = "We have many as-yet undocumented items.")]
#![allow(
    missing_debug_implementations,
    clippy::cast_possible_truncation,
    clippy::missing_assert_message,
    reason = "Deferred, only apply in some feature sets so not expect"
)]

mod types;

#[cfg(feature = "cpu")]
pub mod cpu;

pub use types::BindType;

use BindType::{Buffer, BufReadOnly, Image, Uniform};

/// Static description of one compute kernel.
#[derive(Clone, Copy, Debug)]
pub struct Kernel {
    /// Label used for pipeline lookup, debug output and source selection.
    pub label: &'static str,
    pub workgroup_size: [u32; 3],
    /// Resources in binding order.
    pub bindings: &'static [BindType],
}

/// Workgroup size of the one-thread-per-item stages.
///
/// GPU backends must be given budgets whose `num_lane_per_wave` matches
/// this, or the launch sizes won't cover every item.
pub const LANES: u32 = 64;
const SCAN_WG: u32 = 256;
const CLEAR_WG: u32 = 64;
const RESOLVE_WG: u32 = 8;

pub const CLEAR_U32: Kernel = Kernel {
    label: "clear_u32",
    workgroup_size: [CLEAR_WG, 1, 1],
    bindings: &[Uniform, Buffer],
};

pub const VERTEX_SETUP: Kernel = Kernel {
    label: "vertex_setup",
    workgroup_size: [LANES, 1, 1],
    bindings: &[Uniform, BufReadOnly, BufReadOnly, Buffer],
};

pub const SEGMENT_SETUP: Kernel = Kernel {
    label: "segment_setup",
    workgroup_size: [LANES, 1, 1],
    bindings: &[
        Uniform,
        BufReadOnly,
        BufReadOnly,
        Buffer,
        Buffer,
        Buffer,
        Buffer,
    ],
};

const BIN_BINDINGS: &[BindType] = &[
    Uniform,
    BufReadOnly,
    BufReadOnly,
    BufReadOnly,
    Buffer,
    Buffer,
    Buffer,
    Buffer,
];

pub const RASTER_BIN: Kernel = Kernel {
    label: "raster_bin",
    workgroup_size: [LANES, 1, 1],
    bindings: BIN_BINDINGS,
};

pub const RASTER_BIN_CURVE: Kernel = Kernel {
    label: "raster_bin_curve",
    workgroup_size: [LANES, 1, 1],
    bindings: BIN_BINDINGS,
};

pub const PREFIX_SUM_REDUCE: Kernel = Kernel {
    label: "prefix_sum_reduce",
    workgroup_size: [SCAN_WG, 1, 1],
    bindings: &[Uniform, BufReadOnly, Buffer],
};

pub const PREFIX_SUM_SCAN_PARTIALS: Kernel = Kernel {
    label: "prefix_sum_scan_partials",
    workgroup_size: [SCAN_WG, 1, 1],
    bindings: &[Uniform, Buffer],
};

pub const PREFIX_SUM_DOWNSWEEP: Kernel = Kernel {
    label: "prefix_sum_downsweep",
    workgroup_size: [SCAN_WG, 1, 1],
    bindings: &[Uniform, BufReadOnly, BufReadOnly, Buffer],
};

pub const WORK_QUEUE_ARGS: Kernel = Kernel {
    label: "work_queue_args",
    workgroup_size: [1, 1, 1],
    bindings: &[Uniform, BufReadOnly, Buffer],
};

pub const WORK_QUEUE: Kernel = Kernel {
    label: "work_queue",
    workgroup_size: [LANES, 1, 1],
    bindings: &[Uniform, Buffer, BufReadOnly, Buffer, Buffer],
};

const FINE_BINDINGS: &[BindType] = &[
    Uniform,
    BufReadOnly,
    BufReadOnly,
    BufReadOnly,
    BufReadOnly,
    BufReadOnly,
    BufReadOnly,
    Image,
];

pub const RASTER_FINE: Kernel = Kernel {
    label: "raster_fine",
    workgroup_size: [16, 16, 1],
    bindings: FINE_BINDINGS,
};

pub const RASTER_FINE_CURVE: Kernel = Kernel {
    label: "raster_fine_curve",
    workgroup_size: [16, 16, 1],
    bindings: FINE_BINDINGS,
};

pub const RASTER_FINE_OIT: Kernel = Kernel {
    label: "raster_fine_oit",
    workgroup_size: [16, 16, 1],
    bindings: FINE_BINDINGS,
};

pub const RASTER_COVERAGE: Kernel = Kernel {
    label: "raster_coverage",
    workgroup_size: [LANES, 1, 1],
    bindings: &[
        Uniform,
        BufReadOnly,
        BufReadOnly,
        BufReadOnly,
        Buffer,
        Buffer,
        Buffer,
    ],
};

pub const RASTER_RESOLVE: Kernel = Kernel {
    label: "raster_resolve",
    workgroup_size: [RESOLVE_WG, RESOLVE_WG, 1],
    bindings: &[Uniform, BufReadOnly, BufReadOnly, Image],
};

/// Every kernel of the pipeline.
pub const KERNELS: &[Kernel] = &[
    CLEAR_U32,
    VERTEX_SETUP,
    SEGMENT_SETUP,
    RASTER_BIN,
    RASTER_BIN_CURVE,
    PREFIX_SUM_REDUCE,
    PREFIX_SUM_SCAN_PARTIALS,
    PREFIX_SUM_DOWNSWEEP,
    WORK_QUEUE_ARGS,
    WORK_QUEUE,
    RASTER_FINE,
    RASTER_FINE_CURVE,
    RASTER_FINE_OIT,
    RASTER_COVERAGE,
    RASTER_RESOLVE,
];

#[cfg(test)]
mod tests {
    use super::KERNELS;

    #[test]
    fn labels_are_unique() {
        let mut labels: Vec<_> = KERNELS.iter().map(|k| k.label).collect();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(labels.len(), KERNELS.len());
    }

    #[test]
    fn at_most_eight_storage_buffers() {
        // The default wgpu limit for storage buffers per stage.
        for kernel in KERNELS {
            let storage = kernel
                .bindings
                .iter()
                .filter(|ty| ty.is_storage())
                .count();
            assert!(storage <= 8, "{} binds {storage} storage buffers", kernel.label);
        }
    }
}
