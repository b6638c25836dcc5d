// Copyright 2024 the Strand Raster Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Fine rasterization: one workgroup per tile walking its work queue slice.

use glam::{Vec2, Vec4};
use strand_raster_encoding::{ConfigUniform, SegmentData, VertexOutput};

use super::util::{
    coverage, curve_controls, pack4x8unorm, sample_curve, segment_distance, strand_color,
    unpack4x8unorm, StrandPoint,
};
use super::{CpuBinding, CpuTexture};

/// Strength of the per-tile depth cue. The farthest strand of a tile is
/// darkened by this fraction.
const DEPTH_CUE: f32 = 0.5;

#[derive(Clone, Copy, PartialEq, Eq)]
enum FineMode {
    /// Nearest covering strand wins.
    Nearest,
    /// Nearest covering strand wins, evaluated along the tessellated curve.
    Curve,
    /// Weighted blended order independent transparency.
    Blended,
}

struct FineInputs<'a> {
    work_queue: &'a [u32],
    tile_offsets: &'a [u32],
    tile_counts: &'a [u32],
    segment_data: &'a [SegmentData],
    vertex_output: &'a [VertexOutput],
    tile_depths: &'a [u32],
}

/// Closest point of a polyline to `p`, with its distance.
fn closest_point(polyline: &[StrandPoint], p: Vec2) -> Option<(f32, StrandPoint)> {
    let mut best: Option<(f32, StrandPoint)> = None;
    for pair in polyline.windows(2) {
        let (distance, h) = segment_distance(p, pair[0].position, pair[1].position);
        if best.is_none_or(|(d, _)| distance < d) {
            best = Some((distance, pair[0].lerp(pair[1], h)));
        }
    }
    best
}

/// Depths closer than this are the same surface, e.g. two segments of one
/// strand meeting at their shared particle.
const DEPTH_TOLERANCE: f32 = 1e-5;

/// Whether a sample with coverage `cov` at `depth` replaces the current
/// pick. Equally near samples are ordered by coverage so the result doesn't
/// depend on the order of the work queue slice.
fn replaces(cov: f32, depth: f32, current: Option<(f32, f32)>) -> bool {
    let Some((current_cov, current_depth)) = current else {
        return true;
    };
    if (depth - current_depth).abs() <= DEPTH_TOLERANCE {
        cov > current_cov
    } else {
        depth < current_depth
    }
}

/// Weight of a blended sample; nearer samples count more.
fn blend_weight(alpha: f32, depth: f32) -> f32 {
    let closeness = 1.0 - depth.clamp(0.0, 1.0);
    alpha * (3e3 * closeness * closeness * closeness).clamp(1e-2, 3e3)
}

fn fine_main(
    n_wg: u32,
    config: &ConfigUniform,
    inputs: &FineInputs<'_>,
    target: &mut CpuTexture,
    mode: FineMode,
) {
    let tile_size = config.tile_size;
    let n_tiles = config.width_in_tiles * config.height_in_tiles;
    let base = unpack4x8unorm(config.base_color);
    let radius = config.strand_radius;
    let last_vertex = config
        .vertex_count
        .min(config.vertex_output_size)
        .saturating_sub(1);
    let mut polylines: Vec<Vec<StrandPoint>> = Vec::new();
    for tile_ix in 0..n_wg.min(n_tiles) {
        let x0 = (tile_ix % config.width_in_tiles) * tile_size;
        let y0 = (tile_ix / config.width_in_tiles) * tile_size;
        let x1 = (x0 + tile_size).min(config.target_width).min(target.width as u32);
        let y1 = (y0 + tile_size).min(config.target_height).min(target.height as u32);

        let tile = tile_ix as usize;
        let count = inputs.tile_counts[tile];
        let min_z = f32::from_bits(inputs.tile_depths[tile]);
        let max_z = f32::from_bits(inputs.tile_depths[n_tiles as usize + tile]);
        // Tile level reject: nothing was binned here.
        if count == 0 || min_z > max_z {
            for y in y0..y1 {
                for x in x0..x1 {
                    target.pixels[(y * target.width as u32 + x) as usize] = pack4x8unorm(base);
                }
            }
            continue;
        }

        // Load this tile's slice of the work queue.
        let start = inputs.tile_offsets[tile].min(config.work_queue_size);
        let end = inputs.tile_offsets[tile]
            .saturating_add(count)
            .min(config.work_queue_size);
        polylines.clear();
        for &segment in &inputs.work_queue[start as usize..end as usize] {
            let Some(data) = inputs.segment_data.get(segment as usize) else {
                continue;
            };
            let point = |ix: u32| {
                StrandPoint::new(config, &inputs.vertex_output[ix.min(last_vertex) as usize])
            };
            let mut polyline = Vec::new();
            if mode == FineMode::Curve {
                let controls = curve_controls(config, data.vertex0, data.vertex1).map(point);
                sample_curve(controls, config.tessellation_samples, &mut polyline);
            } else {
                polyline.extend([point(data.vertex0), point(data.vertex1)]);
            }
            polylines.push(polyline);
        }

        let depth_range = max_z - min_z;
        let shade = |depth: f32| {
            if depth_range > 0.0 {
                1.0 - DEPTH_CUE * ((depth - min_z) / depth_range).clamp(0.0, 1.0)
            } else {
                1.0
            }
        };

        for y in y0..y1 {
            for x in x0..x1 {
                let center = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
                let color = match mode {
                    FineMode::Nearest | FineMode::Curve => {
                        let mut nearest: Option<(f32, StrandPoint)> = None;
                        for polyline in &polylines {
                            let Some((distance, point)) = closest_point(polyline, center) else {
                                continue;
                            };
                            let cov = coverage(distance, radius);
                            let current = nearest.map(|(c, n)| (c, n.depth));
                            if cov > 0.0 && replaces(cov, point.depth, current) {
                                nearest = Some((cov, point));
                            }
                        }
                        match nearest {
                            Some((cov, point)) => {
                                let rgb = strand_color(config, point.t) * shade(point.depth);
                                base.lerp(rgb.with_w(1.0), cov)
                            }
                            None => base,
                        }
                    }
                    FineMode::Blended => {
                        let mut accum = Vec4::ZERO;
                        let mut revealage = 1.0;
                        for polyline in &polylines {
                            let Some((distance, point)) = closest_point(polyline, center) else {
                                continue;
                            };
                            let alpha = coverage(distance, radius) * config.strand_opacity;
                            if alpha <= 0.0 {
                                continue;
                            }
                            let rgb = strand_color(config, point.t) * shade(point.depth);
                            let weight = blend_weight(alpha, point.depth);
                            accum += rgb.with_w(1.0) * weight;
                            revealage *= 1.0 - alpha;
                        }
                        if accum.w > 0.0 {
                            let average = accum / accum.w.max(1e-5);
                            let resolved = average.with_w(1.0) * (1.0 - revealage)
                                + base * revealage;
                            resolved.with_w(1.0)
                        } else {
                            base
                        }
                    }
                };
                target.pixels[(y * target.width as u32 + x) as usize] = pack4x8unorm(color);
            }
        }
    }
}

fn fine(n_wg: u32, resources: &[CpuBinding<'_>], mode: FineMode) {
    let config = resources[0].as_typed();
    let work_queue = resources[1].as_slice();
    let tile_offsets = resources[2].as_slice();
    let tile_counts = resources[3].as_slice();
    let segment_data = resources[4].as_slice();
    let vertex_output = resources[5].as_slice();
    let tile_depths = resources[6].as_slice();
    let mut target = resources[7].as_tex_mut();
    let inputs = FineInputs {
        work_queue: &work_queue,
        tile_offsets: &tile_offsets,
        tile_counts: &tile_counts,
        segment_data: &segment_data,
        vertex_output: &vertex_output,
        tile_depths: &tile_depths,
    };
    fine_main(n_wg, &config, &inputs, &mut target, mode);
}

pub fn raster_fine(n_wg: u32, resources: &[CpuBinding<'_>]) {
    fine(n_wg, resources, FineMode::Nearest);
}

pub fn raster_fine_curve(n_wg: u32, resources: &[CpuBinding<'_>]) {
    fine(n_wg, resources, FineMode::Curve);
}

pub fn raster_fine_oit(n_wg: u32, resources: &[CpuBinding<'_>]) {
    fine(n_wg, resources, FineMode::Blended);
}
