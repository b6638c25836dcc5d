// Copyright 2024 the Strand Raster Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Scatter of live segments into the tiles they touch.

use strand_raster_encoding::{
    BinRecord, BumpAllocator, BumpAllocators, ConfigUniform, SegmentData, SegmentHeader,
    VertexOutput,
};

use super::util::{curve_controls, sample_curve, StrandPoint};
use super::CpuBinding;

/// Per-tile accumulation targets of the bin stage.
struct BinTargets<'a> {
    bump: &'a mut BumpAllocators,
    /// Slots of the bin record pool.
    records: BumpAllocator,
    bin_records: &'a mut [BinRecord],
    tile_counts: &'a mut [u32],
    /// Minimum depths of all tiles, followed by the maximum depths.
    tile_depths: &'a mut [u32],
}

impl BinTargets<'_> {
    /// Emits one record per tile of `rect` for `segment`.
    ///
    /// Stops at the first record the pool can't hold, leaving the counters
    /// consistent with what was actually stored.
    fn emit(&mut self, config: &ConfigUniform, rect: [u32; 4], segment: u32, depth: [f32; 2]) {
        let [x0, y0, x1, y1] = rect;
        // Clamp pathological extents.
        let extent = config.max_bin_extent.max(1);
        if x1.saturating_sub(x0) >= extent || y1.saturating_sub(y0) >= extent {
            self.bump.failed |= BumpAllocators::STAGE_BIN_EXTENT;
        }
        let x1 = x1.min(x0 + extent - 1);
        let y1 = y1.min(y0 + extent - 1);
        let n_tiles = (config.width_in_tiles * config.height_in_tiles) as usize;
        // Non-negative depths order like their bit patterns.
        let min_z = depth[0].max(0.0).to_bits();
        let max_z = depth[1].max(0.0).to_bits();
        for y in y0..=y1 {
            for x in x0..=x1 {
                let Some(record_ix) = self.records.claim(1) else {
                    return;
                };
                let tile = y * config.width_in_tiles + x;
                self.bin_records[record_ix as usize] = BinRecord { tile, segment };
                let tile = tile as usize;
                self.tile_counts[tile] += 1;
                self.tile_depths[tile] = self.tile_depths[tile].min(min_z);
                self.tile_depths[n_tiles + tile] = self.tile_depths[n_tiles + tile].max(max_z);
            }
        }
    }

    fn finish(self) {
        self.records.store(
            &mut self.bump.bin_records,
            &mut self.bump.failed,
            BumpAllocators::STAGE_BINNING,
        );
    }
}

fn raster_bin_main(
    n_wg: u32,
    config: &ConfigUniform,
    segment_headers: &[SegmentHeader],
    segment_data: &[SegmentData],
    vertex_output: &[VertexOutput],
    targets: &mut BinTargets<'_>,
) {
    let n_segments = targets.bump.segments.min(config.segments_size);
    for global_ix in 0..n_wg * config.lanes_per_wave {
        if global_ix >= n_segments {
            break;
        }
        let header = &segment_headers[global_ix as usize];
        let Some(rect) = header.tile_rect(
            config.tile_size,
            config.width_in_tiles,
            config.height_in_tiles,
        ) else {
            continue;
        };
        let data = segment_data[global_ix as usize];
        let d0 = vertex_output[data.vertex0 as usize].depth;
        let d1 = vertex_output[data.vertex1 as usize].depth;
        targets.emit(config, rect, global_ix, [d0.min(d1), d0.max(d1)]);
    }
}

fn raster_bin_curve_main(
    n_wg: u32,
    config: &ConfigUniform,
    segment_data: &[SegmentData],
    vertex_output: &[VertexOutput],
    targets: &mut BinTargets<'_>,
) {
    let n_segments = targets.bump.segments.min(config.segments_size);
    let n_vertices = config.vertex_count.min(config.vertex_output_size);
    let extent = config.strand_radius + 0.5;
    let mut samples = Vec::new();
    for global_ix in 0..n_wg * config.lanes_per_wave {
        if global_ix >= n_segments {
            break;
        }
        let data = segment_data[global_ix as usize];
        let last_vertex = n_vertices.saturating_sub(1);
        let controls = curve_controls(config, data.vertex0, data.vertex1)
            .map(|ix| StrandPoint::new(config, &vertex_output[ix.min(last_vertex) as usize]));
        sample_curve(controls, config.tessellation_samples, &mut samples);

        // The box and depth range cover every sample of the curve.
        let mut bbox = [f32::MAX, f32::MAX, f32::MIN, f32::MIN];
        let mut depth = [f32::MAX, f32::MIN];
        for sample in &samples {
            bbox[0] = bbox[0].min(sample.position.x - extent);
            bbox[1] = bbox[1].min(sample.position.y - extent);
            bbox[2] = bbox[2].max(sample.position.x + extent);
            bbox[3] = bbox[3].max(sample.position.y + extent);
            depth[0] = depth[0].min(sample.depth);
            depth[1] = depth[1].max(sample.depth);
        }
        let header = SegmentHeader { bbox };
        let Some(rect) = header.tile_rect(
            config.tile_size,
            config.width_in_tiles,
            config.height_in_tiles,
        ) else {
            continue;
        };
        targets.emit(config, rect, global_ix, depth);
    }
}

pub fn raster_bin(n_wg: u32, resources: &[CpuBinding<'_>]) {
    let config = resources[0].as_typed::<ConfigUniform>();
    let segment_headers = resources[1].as_slice();
    let segment_data = resources[2].as_slice();
    let vertex_output = resources[3].as_slice();
    let mut bump = resources[4].as_typed_mut::<BumpAllocators>();
    let mut bin_records = resources[5].as_slice_mut();
    let mut tile_counts = resources[6].as_slice_mut();
    let mut tile_depths = resources[7].as_slice_mut();
    let records = BumpAllocator::new(bump.bin_records, config.bin_records_size);
    let mut targets = BinTargets {
        bump: &mut bump,
        records,
        bin_records: &mut bin_records,
        tile_counts: &mut tile_counts,
        tile_depths: &mut tile_depths,
    };
    raster_bin_main(
        n_wg,
        &config,
        &segment_headers,
        &segment_data,
        &vertex_output,
        &mut targets,
    );
    targets.finish();
}

pub fn raster_bin_curve(n_wg: u32, resources: &[CpuBinding<'_>]) {
    let config = resources[0].as_typed::<ConfigUniform>();
    let segment_data = resources[2].as_slice();
    let vertex_output = resources[3].as_slice();
    let mut bump = resources[4].as_typed_mut::<BumpAllocators>();
    let mut bin_records = resources[5].as_slice_mut();
    let mut tile_counts = resources[6].as_slice_mut();
    let mut tile_depths = resources[7].as_slice_mut();
    let records = BumpAllocator::new(bump.bin_records, config.bin_records_size);
    let mut targets = BinTargets {
        bump: &mut bump,
        records,
        bin_records: &mut bin_records,
        tile_counts: &mut tile_counts,
        tile_depths: &mut tile_depths,
    };
    raster_bin_curve_main(n_wg, &config, &segment_data, &vertex_output, &mut targets);
    targets.finish();
}
