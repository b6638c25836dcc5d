// Copyright 2024 the Strand Raster Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use strand_raster_encoding::{
    BumpAllocator, BumpAllocators, ConfigUniform, SegmentData, SegmentHeader, VertexOutput,
};

use super::util::{ndc_to_pixel, MIN_SEGMENT_LENGTH};
use super::CpuBinding;

/// Whether the segment `a`-`b` can touch the target.
///
/// `margin` is the strand footprint in normalized device units per axis.
/// Segments are not clipped against the depth range: one with either
/// endpoint outside `[0, 1]` is culled whole, so a strand crossing the near
/// or far plane loses the entire crossing segment.
fn is_visible(a: &VertexOutput, b: &VertexOutput, margin: [f32; 2]) -> bool {
    let in_depth = |v: &VertexOutput| (0.0..=1.0).contains(&v.depth);
    if !in_depth(a) || !in_depth(b) {
        return false;
    }
    for axis in 0..2 {
        let lo = -1.0 - margin[axis];
        let hi = 1.0 + margin[axis];
        if (a.position[axis] < lo && b.position[axis] < lo)
            || (a.position[axis] > hi && b.position[axis] > hi)
        {
            return false;
        }
    }
    true
}

fn segment_setup_main(
    n_wg: u32,
    config: &ConfigUniform,
    vertex_output: &[VertexOutput],
    indices: &[u32],
    bump: &mut BumpAllocators,
    segment_output: &mut [u32],
    segment_headers: &mut [SegmentHeader],
    segment_data: &mut [SegmentData],
) {
    let extent = config.strand_radius + 0.5;
    let margin = [
        2.0 * extent / config.target_width.max(1) as f32,
        2.0 * extent / config.target_height.max(1) as f32,
    ];
    let n_vertices = config.vertex_count.min(config.vertex_output_size);
    let slots = BumpAllocator::new(bump.segments, config.segments_size);
    for global_ix in 0..n_wg * config.lanes_per_wave {
        if global_ix >= config.segment_count {
            break;
        }
        let ix = 2 * global_ix as usize;
        let (Some(&vertex0), Some(&vertex1)) = (indices.get(ix), indices.get(ix + 1)) else {
            break;
        };
        if vertex0 >= n_vertices || vertex1 >= n_vertices {
            continue;
        }
        let a = &vertex_output[vertex0 as usize];
        let b = &vertex_output[vertex1 as usize];
        if !is_visible(a, b, margin) {
            continue;
        }
        let p0 = ndc_to_pixel(config, a.position);
        let p1 = ndc_to_pixel(config, b.position);
        let length = p0.distance(p1);
        if !length.is_finite() || length < MIN_SEGMENT_LENGTH {
            continue;
        }

        // Saturates at the pool capacity.
        let Some(slot) = slots.claim(1) else {
            continue;
        };
        let slot = slot as usize;

        let min = p0.min(p1) - extent;
        let max = p0.max(p1) + extent;
        segment_output[slot] = global_ix;
        segment_headers[slot] = SegmentHeader {
            bbox: [min.x, min.y, max.x, max.y],
        };
        segment_data[slot] = SegmentData { vertex0, vertex1 };
    }
    slots.store(
        &mut bump.segments,
        &mut bump.failed,
        BumpAllocators::STAGE_SEGMENT_SETUP,
    );
}

pub fn segment_setup(n_wg: u32, resources: &[CpuBinding<'_>]) {
    let config = resources[0].as_typed();
    let vertex_output = resources[1].as_slice();
    let indices = resources[2].as_slice();
    let mut bump = resources[3].as_typed_mut();
    let mut segment_output = resources[4].as_slice_mut();
    let mut segment_headers = resources[5].as_slice_mut();
    let mut segment_data = resources[6].as_slice_mut();
    segment_setup_main(
        n_wg,
        &config,
        &vertex_output,
        &indices,
        &mut bump,
        &mut segment_output,
        &mut segment_headers,
        &mut segment_data,
    );
}
