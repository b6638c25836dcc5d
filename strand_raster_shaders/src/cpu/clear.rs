// Copyright 2024 the Strand Raster Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use strand_raster_encoding::{ClearParams, CLEAR_WG};

use super::CpuBinding;

fn clear_u32_main(n_wg: u32, params: &ClearParams, target: &mut [u32]) {
    for global_ix in 0..n_wg * CLEAR_WG {
        if global_ix >= params.count {
            break;
        }
        // Writes past the end of the binding are dropped, as on the GPU.
        if let Some(slot) = target.get_mut((params.offset + global_ix) as usize) {
            *slot = params.value;
        }
    }
}

pub fn clear_u32(n_wg: u32, resources: &[CpuBinding<'_>]) {
    let params = resources[0].as_typed();
    let mut target = resources[1].as_slice_mut();
    clear_u32_main(n_wg, &params, &mut target);
}
