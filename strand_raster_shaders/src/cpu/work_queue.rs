// Copyright 2024 the Strand Raster Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use strand_raster_encoding::{BinRecord, BumpAllocators, ConfigUniform, IndirectCount};

use super::CpuBinding;

fn work_queue_args_main(
    config: &ConfigUniform,
    bump: &BumpAllocators,
    indirect: &mut IndirectCount,
) {
    let records = bump.bin_records.min(config.bin_records_size);
    indirect.count_x = records.div_ceil(config.lanes_per_wave.max(1));
    indirect.count_y = 1;
    indirect.count_z = 1;
}

/// Scatters every bin record to the next free slot of its tile's range.
///
/// `cursors` holds the exclusive prefix sum of the tile counts when the
/// pass starts, and the end of each tile's range when it finishes.
fn work_queue_main(
    n_wg: u32,
    config: &ConfigUniform,
    bump: &mut BumpAllocators,
    bin_records: &[BinRecord],
    cursors: &mut [u32],
    work_queue: &mut [u32],
) {
    let n_records = bump.bin_records.min(config.bin_records_size);
    let n_tiles = config.width_in_tiles * config.height_in_tiles;
    for global_ix in 0..n_wg * config.lanes_per_wave {
        if global_ix >= n_records {
            break;
        }
        let record = bin_records[global_ix as usize];
        if record.tile >= n_tiles {
            continue;
        }
        let cursor = &mut cursors[record.tile as usize];
        let slot = *cursor;
        *cursor += 1;
        if slot < config.work_queue_size {
            work_queue[slot as usize] = record.segment;
        } else {
            bump.failed |= BumpAllocators::STAGE_WORK_QUEUE;
        }
    }
}

pub fn work_queue_args(_n_wg: u32, resources: &[CpuBinding<'_>]) {
    let config = resources[0].as_typed();
    let bump = resources[1].as_typed();
    let mut indirect = resources[2].as_typed_mut();
    work_queue_args_main(&config, &bump, &mut indirect);
}

pub fn work_queue(n_wg: u32, resources: &[CpuBinding<'_>]) {
    let config = resources[0].as_typed();
    let mut bump = resources[1].as_typed_mut();
    let bin_records = resources[2].as_slice();
    let mut cursors = resources[3].as_slice_mut();
    let mut work_queue = resources[4].as_slice_mut();
    work_queue_main(
        n_wg,
        &config,
        &mut bump,
        &bin_records,
        &mut cursors,
        &mut work_queue,
    );
}
