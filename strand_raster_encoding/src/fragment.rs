// Copyright 2024 the Strand Raster Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use bytemuck::{Pod, Zeroable};

/// Head pointer and `next` value marking the end of a fragment list.
pub const HEAD_EMPTY: u32 = u32::MAX;

/// One translucent strand sample in a per-pixel linked list.
#[derive(Clone, Copy, Debug, Default, PartialEq, Zeroable, Pod)]
#[repr(C)]
pub struct FragmentRecord {
    /// Straight (not premultiplied) color.
    pub color: [f32; 4],
    /// Antialiased coverage in `[0, 1]`.
    pub coverage: f32,
    /// Normalized device depth.
    pub depth: f32,
    /// Slot of the next fragment of the same pixel, or [`HEAD_EMPTY`].
    pub next: u32,
    pub _padding: u32,
}
