// Copyright 2024 the Strand Raster Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use bytemuck::{Pod, Zeroable};

/// Clear value of the per-tile minimum depth.
///
/// Depths are stored as the bit pattern of a non-negative `f32`, which
/// orders the same way as the float itself, so this is the largest finite
/// value representable in the atomic min.
pub const TILE_MIN_Z_CLEAR: u32 = 0x7fff_ffff;
/// Clear value of the per-tile maximum depth.
pub const TILE_MAX_Z_CLEAR: u32 = 0;

/// Membership of one segment in one tile, written by the bin stage.
///
/// A segment covering several tiles yields one record per tile, all
/// pointing at the same segment slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct BinRecord {
    /// Row-major tile index.
    pub tile: u32,
    /// Slot of the segment in the segment pools.
    pub segment: u32,
}
