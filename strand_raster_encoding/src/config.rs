// Copyright 2024 the Strand Raster Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use peniko::Color;

use super::{
    BinRecord, Budgets, FragmentRecord, SegmentData, SegmentHeader, StrandLayout, VertexOutput,
};

/// Workgroup size of the buffer fill kernel.
pub const CLEAR_WG: u32 = 64;
/// Workgroup size of the prefix-sum kernels, and the number of elements each
/// workgroup of the reduction covers.
pub const PREFIX_SUM_WG: u32 = 256;
/// Edge length of the square pixel block covered by one resolve workgroup.
pub const RESOLVE_WG: u32 = 8;

/// Largest tile-space extent (per axis) a single segment may be binned into.
pub const MAX_BIN_EXTENT: u32 = 64;
/// Upper bound on the number of curve samples per segment.
pub const MAX_TESSELLATION_SAMPLES: u32 = 16;

/// Bounds on the per-pixel fragment list depth walked by the resolve pass.
pub const MIN_LIST_DEPTH: u32 = 8;
pub const MAX_LIST_DEPTH: u32 = 64;

/// Counters for tracking dynamic allocation on the GPU.
///
/// Every counter saturates at the capacity of its pool, so after a frame
/// each value is exactly the number of elements stored. Overflow is reported
/// through the `failed` stage bits instead.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct BumpAllocators {
    pub failed: u32,
    /// Live segments written by segment setup.
    pub segments: u32,
    /// (tile, segment) records written by the bin stage.
    pub bin_records: u32,
    /// Fragments allocated by the brute force coverage pass.
    pub fragments: u32,
}

impl BumpAllocators {
    pub const STAGE_SEGMENT_SETUP: u32 = 0x1;
    pub const STAGE_BINNING: u32 = 0x2;
    pub const STAGE_WORK_QUEUE: u32 = 0x4;
    pub const STAGE_COVERAGE: u32 = 0x8;
    /// A segment touched more tiles than [`MAX_BIN_EXTENT`] along an axis and
    /// was only binned into the first ones.
    pub const STAGE_BIN_EXTENT: u32 = 0x10;
}

/// Storage of indirect dispatch size values.
///
/// This is kept apart from [`BumpAllocators`] because a buffer can't be
/// used as indirect arguments while also bound as writable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct IndirectCount {
    pub count_x: u32,
    pub count_y: u32,
    pub count_z: u32,
    pub pad0: u32,
}

/// Parameters of the buffer fill kernel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct ClearParams {
    /// Value written to every element.
    pub value: u32,
    /// First element to fill.
    pub offset: u32,
    /// Number of elements to fill.
    pub count: u32,
    pub _padding: u32,
}

/// Parameters of the prefix-sum kernels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct ScanParams {
    /// Number of elements in the input.
    pub count: u32,
    /// Nonzero for an inclusive scan.
    pub inclusive: u32,
    pub _padding: [u32; 2],
}

/// Appearance of the strands, fixed for the lifetime of a rasterizer.
#[derive(Clone, Copy, Debug)]
pub struct StrandStyle {
    /// Half width of a strand, in pixels.
    pub radius: f32,
    /// Opacity of a fully covered strand sample.
    pub opacity: f32,
    pub root_color: Color,
    pub tip_color: Color,
    /// Color of pixels not covered by any strand.
    pub base_color: Color,
}

impl Default for StrandStyle {
    fn default() -> Self {
        Self {
            radius: 0.75,
            opacity: 0.6,
            root_color: Color::from_rgb8(0x3b, 0x22, 0x14),
            tip_color: Color::from_rgb8(0xc8, 0x9b, 0x5e),
            base_color: Color::BLACK,
        }
    }
}

/// Uniform render configuration data used by all stages.
///
/// This data structure must be kept in sync with the kernels' definition of
/// the configuration block.
#[derive(Clone, Copy, Debug, Default, Zeroable, Pod)]
#[repr(C)]
pub struct ConfigUniform {
    /// Column-major view transform.
    pub view: [[f32; 4]; 4],
    /// Column-major projection transform.
    pub projection: [[f32; 4]; 4],
    /// Width of the target in pixels.
    pub target_width: u32,
    /// Height of the target in pixels.
    pub target_height: u32,
    /// Edge length of a tile in pixels.
    pub tile_size: u32,
    /// Width of the target in tiles.
    pub width_in_tiles: u32,
    /// Height of the target in tiles.
    pub height_in_tiles: u32,
    /// Workgroup size of the one-thread-per-item stages.
    pub lanes_per_wave: u32,
    pub strand_count: u32,
    pub strand_particle_count: u32,
    /// Number of particles, and therefore vertices.
    pub vertex_count: u32,
    /// Number of candidate segments before culling.
    pub segment_count: u32,
    /// Curve samples per segment, zero when tessellation is off.
    pub tessellation_samples: u32,
    /// Size of the vertex output buffer (in [`VertexOutput`]s).
    pub vertex_output_size: u32,
    /// Size of the segment pools (in segments).
    pub segments_size: u32,
    /// Size of the bin record pool (in [`BinRecord`]s).
    pub bin_records_size: u32,
    /// Size of the work queue (in `u32`s).
    pub work_queue_size: u32,
    /// Size of the fragment pool (in [`FragmentRecord`]s).
    pub fragments_size: u32,
    /// Longest per-pixel fragment list the resolve pass walks.
    pub max_list_depth: u32,
    /// Largest per-axis tile extent of a single segment.
    pub max_bin_extent: u32,
    /// Packed RGBA8 background color.
    pub base_color: u32,
    /// Packed RGBA8 color at the strand root.
    pub root_color: u32,
    /// Packed RGBA8 color at the strand tip.
    pub tip_color: u32,
    pub strand_radius: f32,
    pub strand_opacity: f32,
    pub _padding: u32,
}

/// CPU side setup and configuration.
#[derive(Default)]
pub struct RenderConfig {
    /// GPU side configuration.
    pub gpu: ConfigUniform,
    /// Workgroup counts for all compute pipelines.
    pub workgroup_counts: WorkgroupCounts,
    /// Sizes of all buffer resources.
    pub buffer_sizes: BufferSizes,
}

impl RenderConfig {
    #[expect(
        clippy::too_many_arguments,
        reason = "Mirrors the frame context contract one field at a time"
    )]
    pub fn new(
        layout: &StrandLayout,
        budgets: &Budgets,
        style: &StrandStyle,
        width: u32,
        height: u32,
        view: &Mat4,
        projection: &Mat4,
        tessellation_samples: u32,
    ) -> Self {
        let tile_size = budgets.tile_size.max(1);
        let width_in_tiles = width.div_ceil(tile_size);
        let height_in_tiles = height.div_ceil(tile_size);
        let lanes_per_wave = budgets.num_lane_per_wave.max(1);
        let vertex_count = layout.vertex_count();
        let segment_count = layout.segment_count();
        let workgroup_counts = WorkgroupCounts::new(
            vertex_count,
            segment_count,
            lanes_per_wave,
            width,
            height,
            width_in_tiles,
            height_in_tiles,
        );
        let buffer_sizes =
            BufferSizes::new(budgets, width, height, width_in_tiles, height_in_tiles);
        let pixels = (width as u64 * height as u64).max(1);
        let max_list_depth = (budgets.fragment_capacity() as u64 / pixels)
            .clamp(MIN_LIST_DEPTH as u64, MAX_LIST_DEPTH as u64) as u32;
        Self {
            gpu: ConfigUniform {
                view: view.to_cols_array_2d(),
                projection: projection.to_cols_array_2d(),
                target_width: width,
                target_height: height,
                tile_size,
                width_in_tiles,
                height_in_tiles,
                lanes_per_wave,
                strand_count: layout.strand_count,
                strand_particle_count: layout.strand_particle_count,
                vertex_count,
                segment_count,
                tessellation_samples: tessellation_samples.min(MAX_TESSELLATION_SAMPLES),
                vertex_output_size: budgets.vertex_output_capacity(),
                segments_size: budgets.segment_capacity(),
                bin_records_size: budgets.bin_record_capacity(),
                work_queue_size: budgets.work_queue_capacity(),
                fragments_size: budgets.fragment_capacity(),
                max_list_depth,
                max_bin_extent: MAX_BIN_EXTENT,
                base_color: style.base_color.to_rgba8().to_u32(),
                root_color: style.root_color.to_rgba8().to_u32(),
                tip_color: style.tip_color.to_rgba8().to_u32(),
                strand_radius: style.radius.max(0.0),
                strand_opacity: style.opacity.clamp(0.0, 1.0),
                _padding: 0,
            },
            workgroup_counts,
            buffer_sizes,
        }
    }

    /// Number of tiles covering the target.
    pub fn tile_count(&self) -> u32 {
        self.gpu.width_in_tiles * self.gpu.height_in_tiles
    }
}

/// Type alias for a workgroup size.
pub type WorkgroupSize = (u32, u32, u32);

/// Computed sizes for all dispatches.
#[derive(Copy, Clone, Debug, Default)]
pub struct WorkgroupCounts {
    pub vertex_setup: WorkgroupSize,
    pub segment_setup: WorkgroupSize,
    pub bin: WorkgroupSize,
    pub work_queue_args: WorkgroupSize,
    // Note: `work_queue` must use an indirect dispatch
    pub fine: WorkgroupSize,
    pub coverage: WorkgroupSize,
    pub resolve: WorkgroupSize,
}

impl WorkgroupCounts {
    pub fn new(
        vertex_count: u32,
        segment_count: u32,
        lanes_per_wave: u32,
        width: u32,
        height: u32,
        width_in_tiles: u32,
        height_in_tiles: u32,
    ) -> Self {
        let segment_wgs = segment_count.div_ceil(lanes_per_wave);
        Self {
            vertex_setup: (vertex_count.div_ceil(lanes_per_wave), 1, 1),
            segment_setup: (segment_wgs, 1, 1),
            // Launched for every candidate segment; lanes past the live count exit.
            bin: (segment_wgs, 1, 1),
            work_queue_args: (1, 1, 1),
            fine: (width_in_tiles, height_in_tiles, 1),
            coverage: (segment_wgs, 1, 1),
            resolve: (width.div_ceil(RESOLVE_WG), height.div_ceil(RESOLVE_WG), 1),
        }
    }
}

/// Typed buffer size primitive.
#[derive(Copy, Clone, Eq, Default, Debug)]
pub struct BufferSize<T: Sized> {
    len: u32,
    _phantom: std::marker::PhantomData<T>,
}

impl<T: Sized> BufferSize<T> {
    /// Creates a new buffer size from number of elements.
    pub const fn new(len: u32) -> Self {
        Self {
            // Each buffer binding must be large enough to hold at least one element to avoid
            // triggering validation errors.
            len: if len > 0 { len } else { 1 },
            _phantom: std::marker::PhantomData,
        }
    }

    /// Returns the number of elements.
    #[expect(clippy::len_without_is_empty, reason = "The buffer can never be empty")]
    pub const fn len(self) -> u32 {
        self.len
    }

    /// Returns the size in bytes.
    pub const fn size_in_bytes(self) -> u32 {
        size_of::<T>() as u32 * self.len
    }
}

impl<T: Sized> PartialEq for BufferSize<T> {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len
    }
}

impl<T: Sized> PartialOrd for BufferSize<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.len.partial_cmp(&other.len)
    }
}

/// Computed sizes for all buffers.
#[derive(Copy, Clone, Debug, Default)]
pub struct BufferSizes {
    // Budget sized pools
    pub vertex_output: BufferSize<VertexOutput>,
    pub segment_output: BufferSize<u32>,
    pub segment_headers: BufferSize<SegmentHeader>,
    pub segment_data: BufferSize<SegmentData>,
    pub bin_records: BufferSize<BinRecord>,
    pub work_queue: BufferSize<u32>,
    pub fragments: BufferSize<FragmentRecord>,
    pub bump_alloc: BufferSize<BumpAllocators>,
    pub indirect_count: BufferSize<IndirectCount>,
    // Resolution dependent buffers
    pub tile_counts: BufferSize<u32>,
    /// Per-tile minimum depths followed by per-tile maximum depths.
    pub tile_depths: BufferSize<u32>,
    pub tile_offsets: BufferSize<u32>,
    pub tile_cursors: BufferSize<u32>,
    pub head_pointers: BufferSize<u32>,
}

impl BufferSizes {
    pub fn new(
        budgets: &Budgets,
        width: u32,
        height: u32,
        width_in_tiles: u32,
        height_in_tiles: u32,
    ) -> Self {
        let n_tiles = width_in_tiles * height_in_tiles;
        let segments = budgets.segment_capacity();
        Self {
            vertex_output: BufferSize::new(budgets.vertex_output_capacity()),
            segment_output: BufferSize::new(segments),
            segment_headers: BufferSize::new(segments),
            segment_data: BufferSize::new(segments),
            bin_records: BufferSize::new(budgets.bin_record_capacity()),
            work_queue: BufferSize::new(budgets.work_queue_capacity()),
            fragments: BufferSize::new(budgets.fragment_capacity()),
            bump_alloc: BufferSize::new(1),
            indirect_count: BufferSize::new(1),
            tile_counts: BufferSize::new(n_tiles),
            tile_depths: BufferSize::new(2 * n_tiles),
            tile_offsets: BufferSize::new(n_tiles),
            tile_cursors: BufferSize::new(n_tiles),
            head_pointers: BufferSize::new(width * height),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(width: u32, height: u32, strands: u32, particles: u32) -> RenderConfig {
        RenderConfig::new(
            &StrandLayout {
                strand_count: strands,
                strand_particle_count: particles,
            },
            &Budgets::DEFAULT,
            &StrandStyle::default(),
            width,
            height,
            &Mat4::IDENTITY,
            &Mat4::IDENTITY,
            0,
        )
    }

    #[test]
    fn uniform_is_block_aligned() {
        assert_eq!(size_of::<ConfigUniform>() % 16, 0);
        assert_eq!(size_of::<IndirectCount>(), 16);
    }

    #[test]
    fn tile_grid_rounds_up() {
        let config = config(1920, 1080, 10, 8);
        assert_eq!(config.gpu.width_in_tiles, 120);
        assert_eq!(config.gpu.height_in_tiles, 68);
        assert_eq!(config.tile_count(), 120 * 68);
        assert_eq!(config.workgroup_counts.fine, (120, 68, 1));
        assert_eq!(config.workgroup_counts.resolve, (240, 135, 1));
    }

    #[test]
    fn launch_sizes_cover_every_item() {
        let config = config(64, 64, 100, 8);
        assert_eq!(config.gpu.vertex_count, 800);
        assert_eq!(config.gpu.segment_count, 700);
        assert_eq!(config.workgroup_counts.vertex_setup, (13, 1, 1));
        assert_eq!(config.workgroup_counts.segment_setup, (11, 1, 1));
        assert_eq!(config.workgroup_counts.bin, (11, 1, 1));
    }

    #[test]
    fn list_depth_follows_fragment_budget() {
        // 6.5M fragments over 2M pixels is ~3 per pixel, below the minimum.
        assert_eq!(config(1920, 1080, 1, 2).gpu.max_list_depth, MIN_LIST_DEPTH);
        assert_eq!(config(16, 16, 1, 2).gpu.max_list_depth, MAX_LIST_DEPTH);
    }

    #[test]
    fn empty_sizes_hold_one_element() {
        assert_eq!(BufferSize::<u32>::new(3).size_in_bytes(), 12);
        assert_eq!(BufferSize::<u32>::new(0).size_in_bytes(), 4);
    }
}
