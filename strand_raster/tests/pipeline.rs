// Copyright 2024 the Strand Raster Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Whole frames recorded by the rasterizer and run on the CPU engine.

use strand_raster::glam::Mat4;
use strand_raster::low_level::{Command, FullShaders, Recording};
use strand_raster::{
    Budgets, BumpAllocators, CpuEngine, FrameStats, MemoryLayout, RasterMode, RasterizerOptions,
    RecordedFrame, RenderParams, StrandBuffers, StrandGeometry, StrandLayout, StrandRasterizer,
    Tessellation,
};

const SIZE: u32 = 32;
/// Packed opaque black, the default base color.
const BASE: u32 = 0xff00_0000;

/// Segment endpoints in pixels of a `SIZE` x `SIZE` target.
type Segment = [[f32; 2]; 2];

const FIRST_TILE: [Segment; 3] = [
    [[2.0, 4.0], [10.0, 4.0]],
    [[2.0, 8.0], [10.0, 8.0]],
    [[2.0, 12.0], [10.0, 12.0]],
];
const ACROSS: [Segment; 1] = [[[2.0, 8.0], [30.0, 8.0]]];

fn options(mode: RasterMode) -> RasterizerOptions {
    RasterizerOptions {
        mode,
        budgets: Budgets {
            max_segments: 64,
            bin_record_pool_bytes: 64 * 8,
            work_queue_pool_bytes: 64 * 4,
            fragment_pool_bytes: 4096 * 32,
            vertex_output_pool_bytes: 64 * 16,
            ..Budgets::DEFAULT
        },
        ..RasterizerOptions::default()
    }
}

fn params(width: u32, height: u32) -> RenderParams {
    RenderParams {
        capture_stats: true,
        ..RenderParams::new(width, height, Mat4::IDENTITY, Mat4::IDENTITY)
    }
}

/// One two-particle strand per segment, at mid depth.
fn geometry(segments: &[Segment]) -> StrandGeometry {
    let size = SIZE as f32;
    let to_ndc = |[x, y]: [f32; 2]| [x / size * 2.0 - 1.0, 1.0 - y / size * 2.0, 0.5];
    let layout = StrandLayout {
        strand_count: segments.len() as u32,
        strand_particle_count: 2,
    };
    let positions = segments
        .iter()
        .flat_map(|[a, b]| [to_ndc(*a), to_ndc(*b)])
        .collect();
    StrandGeometry::new(layout, MemoryLayout::Sequential, positions).unwrap()
}

struct Harness {
    engine: CpuEngine,
    shaders: FullShaders,
    rasterizer: StrandRasterizer,
    strands: StrandBuffers,
}

impl Harness {
    fn new(options: RasterizerOptions, segments: &[Segment]) -> Self {
        let mut engine = CpuEngine::new();
        let shaders = FullShaders::cpu(&mut engine);
        let mut recording = Recording::default();
        let strands =
            StrandBuffers::upload(&mut recording, &geometry(segments), &options.budgets).unwrap();
        engine.run_recording(&recording).unwrap();
        Self {
            engine,
            shaders,
            rasterizer: StrandRasterizer::new(options),
            strands,
        }
    }

    fn frame(&mut self, params: &RenderParams) -> (RecordedFrame, FrameStats, Recording) {
        let mut recording = Recording::default();
        let frame = self
            .rasterizer
            .record_frame(&mut recording, &self.shaders, &self.strands, params)
            .unwrap();
        self.engine.run_recording(&recording).unwrap();
        let stats = frame.stats.unwrap().take(&mut self.engine).unwrap();
        (frame, stats, recording)
    }

    fn pixel(&self, frame: &RecordedFrame, x: usize, y: usize) -> u32 {
        self.engine.image(frame.target).unwrap().get(x, y).unwrap()
    }
}

fn freed(recording: &Recording, name: &str) -> bool {
    recording
        .commands
        .iter()
        .any(|command| matches!(command, Command::FreeBuffer(proxy) if proxy.name == name))
}

#[test]
fn segments_in_one_tile_are_counted_there() {
    let mut harness = Harness::new(options(RasterMode::Binned), &FIRST_TILE);
    let (_, stats, _) = harness.frame(&params(SIZE, SIZE));
    assert_eq!(stats.total_segments, 3);
    assert_eq!(stats.segments_passed_cull, 3);
    assert_eq!(stats.bin_records, 3);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.tile_counts.as_deref(), Some(&[3, 0, 0, 0][..]));
    assert_eq!(stats.occupied_tiles(), Some(1));
}

#[test]
fn spanning_segment_gets_a_record_per_tile() {
    let mut harness = Harness::new(options(RasterMode::Binned), &[[[8.0, 4.0], [24.0, 4.0]]]);
    let (_, stats, _) = harness.frame(&params(SIZE, SIZE));
    assert_eq!(stats.segments_passed_cull, 1);
    assert_eq!(stats.bin_records, 2);
    assert_eq!(stats.tile_counts.as_deref(), Some(&[1, 1, 0, 0][..]));
}

#[test]
fn binned_frame_shades_covered_pixels() {
    let mut harness = Harness::new(options(RasterMode::Binned), &ACROSS);
    let (frame, _, _) = harness.frame(&params(SIZE, SIZE));
    assert_ne!(harness.pixel(&frame, 16, 8), BASE);
    assert_eq!(harness.pixel(&frame, 16, 24), BASE);
}

#[test]
fn full_bin_pool_truncates_the_frame() {
    let mut options = options(RasterMode::Binned);
    options.budgets.bin_record_pool_bytes = 2 * 8;
    let mut harness = Harness::new(options, &FIRST_TILE);
    let (_, stats, _) = harness.frame(&params(SIZE, SIZE));
    assert_eq!(stats.bin_records, 2);
    assert_ne!(stats.failed & BumpAllocators::STAGE_BINNING, 0);
    assert_eq!(stats.tile_counts.as_deref(), Some(&[2, 0, 0, 0][..]));
    assert_eq!(stats.exhausted_pools(), ["bin_records"]);
}

#[test]
fn full_segment_pool_truncates_the_frame() {
    let mut options = options(RasterMode::Binned);
    options.budgets.max_segments = 2;
    let mut harness = Harness::new(options, &FIRST_TILE);
    let (_, stats, _) = harness.frame(&params(SIZE, SIZE));
    assert_eq!(stats.total_segments, 3);
    assert_eq!(stats.segments_passed_cull, 2);
    assert_eq!(stats.failed, BumpAllocators::STAGE_SEGMENT_SETUP);
}

#[test]
fn counters_start_over_every_frame() {
    let mut harness = Harness::new(options(RasterMode::Binned), &FIRST_TILE);
    let (_, first, _) = harness.frame(&params(SIZE, SIZE));
    let (_, second, _) = harness.frame(&params(SIZE, SIZE));
    assert_eq!(first, second);
}

#[test]
fn unsupported_modes_leave_the_target_untouched() {
    let mut harness = Harness::new(options(RasterMode::Binned), &FIRST_TILE);
    let params = RenderParams {
        tessellation: Tessellation::On { samples: 4 },
        oit: true,
        ..params(SIZE, SIZE)
    };
    let (frame, stats, _) = harness.frame(&params);
    assert!(frame.unsupported.is_some());
    assert!(harness.engine.image(frame.target).is_none());
    // Binning still ran.
    assert!(stats.bin_records > 0);
}

#[test]
fn tile_buffers_grow_but_never_shrink() {
    let mut harness = Harness::new(options(RasterMode::Binned), &FIRST_TILE);
    let (_, _, recording) = harness.frame(&params(SIZE, SIZE));
    assert!(!freed(&recording, "tile_counts"));

    let (_, stats, recording) = harness.frame(&params(2 * SIZE, SIZE / 2));
    assert!(freed(&recording, "tile_counts"));
    assert_eq!(stats.tile_counts.map(|counts| counts.len()), Some(4));

    let (_, stats, recording) = harness.frame(&params(SIZE / 2, SIZE / 2));
    assert!(!freed(&recording, "tile_counts"));
    assert_eq!(stats.tile_counts.map(|counts| counts.len()), Some(1));
}

#[test]
fn brute_frame_composites_fragment_lists() {
    let mut harness = Harness::new(options(RasterMode::Brute), &ACROSS);
    let (frame, stats, _) = harness.frame(&params(SIZE, SIZE));
    assert!(stats.fragments > 0);
    assert_eq!(stats.tile_counts, None);
    assert_ne!(harness.pixel(&frame, 16, 8), BASE);
    assert_eq!(harness.pixel(&frame, 16, 24), BASE);
}

#[test]
fn brute_frame_saturates_fragment_pool() {
    let mut options = options(RasterMode::Brute);
    options.budgets.fragment_pool_bytes = 4 * 32;
    let mut harness = Harness::new(options, &ACROSS);
    let (_, stats, _) = harness.frame(&params(SIZE, SIZE));
    assert_eq!(stats.fragments, 4);
    assert_eq!(stats.exhausted_pools(), ["fragments"]);
}

#[test]
fn freeing_releases_every_buffer() {
    let mut harness = Harness::new(options(RasterMode::Binned), &FIRST_TILE);
    harness.frame(&params(SIZE, SIZE));
    let mut recording = Recording::default();
    harness.rasterizer.free(&mut recording);
    harness.strands.free(&mut recording);
    harness.engine.run_recording(&recording).unwrap();
    assert_eq!(harness.engine.buffer_count(), 0);
}
