// Copyright 2024 the Strand Raster Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Three pass reduce-then-scan prefix sum over `u32`s.
//!
//! The reduce pass sums each block of [`PREFIX_SUM_WG`] inputs, a single
//! workgroup scans the block sums, and the downsweep pass scans each block
//! seeded with its scanned block sum.

use strand_raster_encoding::{ScanParams, PREFIX_SUM_WG};

use super::CpuBinding;

const WG_SIZE: usize = PREFIX_SUM_WG as usize;

fn block(params: &ScanParams, wg: usize) -> std::ops::Range<usize> {
    let count = params.count as usize;
    (wg * WG_SIZE).min(count)..((wg + 1) * WG_SIZE).min(count)
}

fn prefix_sum_reduce_main(n_wg: u32, params: &ScanParams, input: &[u32], partials: &mut [u32]) {
    for wg in 0..n_wg as usize {
        partials[wg] = input[block(params, wg)]
            .iter()
            .fold(0_u32, |sum, x| sum.wrapping_add(*x));
    }
}

fn prefix_sum_scan_partials_main(params: &ScanParams, partials: &mut [u32]) {
    let n_partials = params.count.div_ceil(PREFIX_SUM_WG) as usize;
    let mut sum = 0_u32;
    for partial in &mut partials[..n_partials] {
        let value = *partial;
        *partial = sum;
        sum = sum.wrapping_add(value);
    }
}

fn prefix_sum_downsweep_main(
    n_wg: u32,
    params: &ScanParams,
    input: &[u32],
    partials: &[u32],
    output: &mut [u32],
) {
    for wg in 0..n_wg as usize {
        let mut running = partials[wg];
        for ix in block(params, wg) {
            if params.inclusive != 0 {
                running = running.wrapping_add(input[ix]);
                output[ix] = running;
            } else {
                output[ix] = running;
                running = running.wrapping_add(input[ix]);
            }
        }
    }
}

pub fn prefix_sum_reduce(n_wg: u32, resources: &[CpuBinding<'_>]) {
    let params = resources[0].as_typed();
    let input = resources[1].as_slice();
    let mut partials = resources[2].as_slice_mut();
    prefix_sum_reduce_main(n_wg, &params, &input, &mut partials);
}

pub fn prefix_sum_scan_partials(_n_wg: u32, resources: &[CpuBinding<'_>]) {
    let params = resources[0].as_typed();
    let mut partials = resources[1].as_slice_mut();
    prefix_sum_scan_partials_main(&params, &mut partials);
}

pub fn prefix_sum_downsweep(n_wg: u32, resources: &[CpuBinding<'_>]) {
    let params = resources[0].as_typed();
    let input = resources[1].as_slice();
    let partials = resources[2].as_slice();
    let mut output = resources[3].as_slice_mut();
    prefix_sum_downsweep_main(n_wg, &params, &input, &partials, &mut output);
}
