// Copyright 2024 the Strand Raster Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use crate::{BinRecord, FragmentRecord, VertexInput, VertexOutput};

/// Number of whole `T` elements that fit in `bytes`.
const fn elements<T>(bytes: u32) -> u32 {
    bytes / size_of::<T>() as u32
}

/// GPU memory allocation budgets and hardware limits.
///
/// Every pool is allocated once at its full budget. Changing any of these
/// values requires reallocating all dependent pools, which is why the table
/// is fixed for the lifetime of a rasterizer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Budgets {
    /// Packed vertex stream (`VertexInput`), in bytes.
    pub vertex_pool_bytes: u32,
    /// Strand connectivity stream (`u32` pairs), in bytes.
    pub index_pool_bytes: u32,
    /// Strand particle positions (`[f32; 3]`), in bytes.
    pub strand_data_pool_bytes: u32,
    /// Output of the vertex setup stage, in bytes.
    pub vertex_output_pool_bytes: u32,
    /// Maximum number of live segments after culling.
    pub max_segments: u32,
    /// Pool of (tile, segment) records written by the bin stage, in bytes.
    pub bin_record_pool_bytes: u32,
    /// Tile-contiguous work queue, in bytes.
    pub work_queue_pool_bytes: u32,
    /// Per-pixel linked list fragment pool of the brute force path, in bytes.
    pub fragment_pool_bytes: u32,
    /// Edge length of a square screen tile, in pixels.
    pub tile_size: u32,
    /// Number of compute units.
    pub num_cu: u32,
    /// Number of resident waves per compute unit.
    pub num_wave_per_cu: u32,
    /// Number of lanes in a wave; this is the workgroup size of every
    /// one-thread-per-item stage.
    pub num_lane_per_wave: u32,
}

impl Budgets {
    /// Budgets tuned for an AMD Radeon Pro 460 at 1920x1080.
    pub const DEFAULT: Self = Self {
        vertex_pool_bytes: 32 * 1024 * 1024,
        index_pool_bytes: 32 * 1024 * 1024,
        strand_data_pool_bytes: 32 * 1024 * 1024,
        vertex_output_pool_bytes: 16 * 1024 * 1024,
        max_segments: 1 << 22,
        bin_record_pool_bytes: 64 * 1024 * 1024,
        work_queue_pool_bytes: 32 * 1024 * 1024,
        // Allow roughly 4 fragment list depth for every pixel in a 1920x1080 window.
        fragment_pool_bytes: 200 * 1024 * 1024,
        tile_size: 16,
        num_cu: 16,
        num_wave_per_cu: 40,
        num_lane_per_wave: 64,
    };

    pub const fn vertex_capacity(&self) -> u32 {
        elements::<VertexInput>(self.vertex_pool_bytes)
    }

    pub const fn index_capacity(&self) -> u32 {
        elements::<u32>(self.index_pool_bytes)
    }

    pub const fn strand_data_capacity(&self) -> u32 {
        elements::<[f32; 3]>(self.strand_data_pool_bytes)
    }

    pub const fn vertex_output_capacity(&self) -> u32 {
        elements::<VertexOutput>(self.vertex_output_pool_bytes)
    }

    /// Capacity of the segment header and data pools, in segments.
    pub const fn segment_capacity(&self) -> u32 {
        self.max_segments
    }

    pub const fn bin_record_capacity(&self) -> u32 {
        elements::<BinRecord>(self.bin_record_pool_bytes)
    }

    pub const fn work_queue_capacity(&self) -> u32 {
        elements::<u32>(self.work_queue_pool_bytes)
    }

    pub const fn fragment_capacity(&self) -> u32 {
        elements::<FragmentRecord>(self.fragment_pool_bytes)
    }
}

impl Default for Budgets {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::Budgets;

    #[test]
    fn default_capacities() {
        let budgets = Budgets::DEFAULT;
        assert_eq!(budgets.segment_capacity(), 1 << 22);
        assert_eq!(budgets.bin_record_capacity(), 8 * 1024 * 1024);
        assert_eq!(budgets.work_queue_capacity(), 8 * 1024 * 1024);
        assert_eq!(budgets.fragment_capacity(), 200 * 1024 * 1024 / 32);
    }

    #[test]
    fn partial_elements_are_not_counted() {
        let budgets = Budgets {
            fragment_pool_bytes: 4 * 32 + 31,
            bin_record_pool_bytes: 7,
            ..Budgets::DEFAULT
        };
        assert_eq!(budgets.fragment_capacity(), 4);
        assert_eq!(budgets.bin_record_capacity(), 0);
    }
}
