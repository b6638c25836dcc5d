// Copyright 2024 the Strand Raster Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Fine rasterization over hand built work queues.

use std::cell::RefCell;

use bytemuck::{bytes_of, cast_slice};
use glam::Mat4;
use peniko::Color;
use strand_raster_encoding::{
    Budgets, RenderConfig, SegmentData, StrandLayout, StrandStyle, VertexOutput,
    TILE_MAX_Z_CLEAR, TILE_MIN_Z_CLEAR,
};
use strand_raster_shaders::cpu::{
    raster_fine, raster_fine_curve, raster_fine_oit, CpuBinding, CpuTexture,
};

const SIZE: u32 = 16;
const RED: u32 = 0xff00_00ff;
const BLACK: u32 = 0xff00_0000;

fn config(layout: StrandLayout, samples: u32) -> RenderConfig {
    let style = StrandStyle {
        radius: 1.0,
        opacity: 1.0,
        root_color: Color::from_rgb8(255, 0, 0),
        tip_color: Color::from_rgb8(0, 0, 255),
        base_color: Color::from_rgb8(0, 0, 0),
    };
    RenderConfig::new(
        &layout,
        &Budgets::DEFAULT,
        &style,
        SIZE,
        SIZE,
        &Mat4::IDENTITY,
        &Mat4::IDENTITY,
        samples,
    )
}

fn vertex(x: f32, y: f32, depth: f32, t: f32) -> VertexOutput {
    VertexOutput {
        position: [x / SIZE as f32 * 2.0 - 1.0, 1.0 - y / SIZE as f32 * 2.0],
        depth,
        t,
    }
}

struct Tile {
    work_queue: Vec<u32>,
    counts: Vec<u32>,
    data: Vec<SegmentData>,
    vertices: Vec<VertexOutput>,
    depths: Vec<u32>,
}

impl Tile {
    /// A horizontal root colored strand over a vertical tip colored strand.
    fn crossing() -> Self {
        Self {
            work_queue: vec![0, 1],
            counts: vec![2],
            data: vec![
                SegmentData {
                    vertex0: 0,
                    vertex1: 1,
                },
                SegmentData {
                    vertex0: 2,
                    vertex1: 3,
                },
            ],
            vertices: vec![
                vertex(2.0, 8.5, 0.2, 0.0),
                vertex(14.0, 8.5, 0.2, 0.0),
                vertex(8.5, 2.0, 0.6, 1.0),
                vertex(8.5, 14.0, 0.6, 1.0),
            ],
            depths: vec![0.2_f32.to_bits(), 0.6_f32.to_bits()],
        }
    }

    fn run(&self, config: &RenderConfig, kernel: fn(u32, &[CpuBinding<'_>])) -> CpuTexture {
        let offsets = [0_u32];
        let mut vertices = self.vertices.clone();
        vertices.resize(
            config.buffer_sizes.vertex_output.len() as usize,
            VertexOutput::default(),
        );
        let target = RefCell::new(CpuTexture::new(SIZE as usize, SIZE as usize));
        kernel(
            config.tile_count(),
            &[
                CpuBinding::Buffer(bytes_of(&config.gpu)),
                CpuBinding::Buffer(cast_slice(&self.work_queue)),
                CpuBinding::Buffer(cast_slice(&offsets)),
                CpuBinding::Buffer(cast_slice(&self.counts)),
                CpuBinding::Buffer(cast_slice(&self.data)),
                CpuBinding::Buffer(cast_slice(&vertices)),
                CpuBinding::Buffer(cast_slice(&self.depths)),
                CpuBinding::Texture(&target),
            ],
        );
        target.into_inner()
    }
}

fn channel(pixel: u32, ix: u32) -> u32 {
    (pixel >> (8 * ix)) & 0xff
}

#[test]
fn nearest_strand_wins() {
    let config = config(
        StrandLayout {
            strand_count: 2,
            strand_particle_count: 2,
        },
        0,
    );
    let out = Tile::crossing().run(&config, raster_fine);
    assert_eq!(out.get(8, 8), Some(RED));
    // The far strand alone is darkened by the depth cue.
    let far = out.get(8, 3).unwrap();
    assert_eq!(channel(far, 0), 0);
    assert_eq!(channel(far, 2), 128);
    assert_eq!(out.get(0, 0), Some(BLACK));
}

#[test]
fn blended_mode_mixes_overlapping_strands() {
    let config = config(
        StrandLayout {
            strand_count: 2,
            strand_particle_count: 2,
        },
        0,
    );
    let out = Tile::crossing().run(&config, raster_fine_oit);
    let crossing = out.get(8, 8).unwrap();
    // Both contribute, the nearer one more.
    assert!(channel(crossing, 2) > 0);
    assert!(channel(crossing, 0) > channel(crossing, 2));
    assert_eq!(out.get(0, 0), Some(BLACK));
    assert_eq!(out.get(4, 8), Some(RED));
}

#[test]
fn empty_tile_is_rejected() {
    let config = config(
        StrandLayout {
            strand_count: 2,
            strand_particle_count: 2,
        },
        0,
    );
    let mut tile = Tile::crossing();
    tile.counts = vec![0];
    tile.depths = vec![TILE_MIN_Z_CLEAR, TILE_MAX_Z_CLEAR];
    let out = tile.run(&config, raster_fine);
    assert!(out.pixels.iter().all(|&p| p == BLACK));
}

/// One straight strand of three segments, all at the same depth.
fn collinear_strand() -> Tile {
    Tile {
        work_queue: vec![0, 1, 2],
        counts: vec![3],
        data: (0..3)
            .map(|i| SegmentData {
                vertex0: i,
                vertex1: i + 1,
            })
            .collect(),
        vertices: (0..4)
            .map(|i| vertex(1.5 + 4.0 * i as f32, 8.5, 0.5, 0.0))
            .collect(),
        depths: vec![0.5_f32.to_bits(), 0.5_f32.to_bits()],
    }
}

fn strand_config(samples: u32) -> RenderConfig {
    config(
        StrandLayout {
            strand_count: 1,
            strand_particle_count: 4,
        },
        samples,
    )
}

#[test]
fn curve_follows_collinear_strand() {
    let out = collinear_strand().run(&strand_config(4), raster_fine_curve);
    for x in 2..13 {
        assert_eq!(out.get(x, 8), Some(RED), "x = {x}");
    }
    assert_eq!(out.get(7, 12), Some(BLACK));
}

#[test]
fn joints_are_covered_whatever_the_queue_order() {
    let kernels: [(fn(u32, &[CpuBinding<'_>]), u32); 2] =
        [(raster_fine, 0), (raster_fine_curve, 4)];
    for (kernel, samples) in kernels {
        let config = strand_config(samples);
        let forward = collinear_strand().run(&config, kernel);
        let mut tile = collinear_strand();
        tile.work_queue.reverse();
        let reversed = tile.run(&config, kernel);
        assert_eq!(forward.pixels, reversed.pixels, "samples = {samples}");
        // Next to the joint at x = 5.5, the segment passing through wins.
        assert_eq!(forward.get(6, 8), Some(RED), "samples = {samples}");
        assert_eq!(forward.get(9, 8), Some(RED), "samples = {samples}");
    }
}
