// Copyright 2024 the Strand Raster Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use glam::Vec2;
use strand_raster_encoding::{
    BumpAllocator, BumpAllocators, ConfigUniform, FragmentRecord, SegmentData, SegmentHeader,
    VertexOutput,
};

use super::util::{coverage, segment_distance, strand_color, StrandPoint};
use super::CpuBinding;

/// Appends one fragment per covered pixel to that pixel's list.
///
/// When the fragment pool runs out the newest fragments are dropped: the
/// failing claim leaves both the pool and the head pointer untouched.
fn raster_coverage_main(
    n_wg: u32,
    config: &ConfigUniform,
    segment_headers: &[SegmentHeader],
    segment_data: &[SegmentData],
    vertex_output: &[VertexOutput],
    bump: &mut BumpAllocators,
    head_pointers: &mut [u32],
    fragments: &mut [FragmentRecord],
) {
    let n_segments = bump.segments.min(config.segments_size);
    let width = config.target_width as i64;
    let height = config.target_height as i64;
    let slots = BumpAllocator::new(bump.fragments, config.fragments_size);
    for global_ix in 0..n_wg * config.lanes_per_wave {
        if global_ix >= n_segments {
            break;
        }
        let [x0, y0, x1, y1] = segment_headers[global_ix as usize].bbox;
        let data = segment_data[global_ix as usize];
        let a = StrandPoint::new(config, &vertex_output[data.vertex0 as usize]);
        let b = StrandPoint::new(config, &vertex_output[data.vertex1 as usize]);
        let px0 = (x0.floor() as i64).clamp(0, width);
        let py0 = (y0.floor() as i64).clamp(0, height);
        let px1 = (x1.ceil() as i64).clamp(0, width);
        let py1 = (y1.ceil() as i64).clamp(0, height);
        'pixels: for y in py0..py1 {
            for x in px0..px1 {
                let center = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
                let (distance, h) = segment_distance(center, a.position, b.position);
                let cov = coverage(distance, config.strand_radius);
                if cov <= 0.0 {
                    continue;
                }
                let Some(slot) = slots.claim(1) else {
                    break 'pixels;
                };
                let point = a.lerp(b, h);
                let mut color = strand_color(config, point.t);
                color.w = config.strand_opacity;
                // Insert at head.
                let pixel = (y * width + x) as usize;
                let next = head_pointers[pixel];
                head_pointers[pixel] = slot;
                fragments[slot as usize] = FragmentRecord {
                    color: color.to_array(),
                    coverage: cov,
                    depth: point.depth,
                    next,
                    _padding: 0,
                };
            }
        }
    }
    slots.store(
        &mut bump.fragments,
        &mut bump.failed,
        BumpAllocators::STAGE_COVERAGE,
    );
}

pub fn raster_coverage(n_wg: u32, resources: &[CpuBinding<'_>]) {
    let config = resources[0].as_typed();
    let segment_headers = resources[1].as_slice();
    let segment_data = resources[2].as_slice();
    let vertex_output = resources[3].as_slice();
    let mut bump = resources[4].as_typed_mut();
    let mut head_pointers = resources[5].as_slice_mut();
    let mut fragments = resources[6].as_slice_mut();
    raster_coverage_main(
        n_wg,
        &config,
        &segment_headers,
        &segment_data,
        &vertex_output,
        &mut bump,
        &mut head_pointers,
        &mut fragments,
    );
}
