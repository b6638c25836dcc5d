// Copyright 2024 the Strand Raster Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Recording of the three pass prefix sum over `u32` buffers.

use bytemuck::bytes_of;
use strand_raster_encoding::{ScanParams, PREFIX_SUM_WG};

use crate::recording::{BufferProxy, Recording};
use crate::shaders::FullShaders;

/// Scratch state of a prefix sum over up to `capacity` elements.
///
/// The block sums buffer is allocated once and reused by every scan that
/// fits in it.
#[derive(Clone, Copy, Debug)]
pub struct PrefixSumArgs {
    capacity: u32,
    partials: BufferProxy,
}

impl PrefixSumArgs {
    pub fn allocate(capacity: u32) -> Self {
        let blocks = capacity.div_ceil(PREFIX_SUM_WG).max(1);
        Self {
            capacity,
            partials: BufferProxy::new(u64::from(blocks) * 4, "prefix_sum_partials"),
        }
    }

    /// Largest element count a scan can cover.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn free(&self, recording: &mut Recording) {
        recording.free_buffer(self.partials);
    }

    /// Records `output[i] = input[0] + .. + input[i - 1]` for the first
    /// `count` elements.
    pub fn record_exclusive(
        &self,
        recording: &mut Recording,
        shaders: &FullShaders,
        input: BufferProxy,
        output: BufferProxy,
        count: u32,
    ) {
        self.record(recording, shaders, input, output, count, false);
    }

    /// Records `output[i] = input[0] + .. + input[i]` for the first `count`
    /// elements.
    pub fn record_inclusive(
        &self,
        recording: &mut Recording,
        shaders: &FullShaders,
        input: BufferProxy,
        output: BufferProxy,
        count: u32,
    ) {
        self.record(recording, shaders, input, output, count, true);
    }

    fn record(
        &self,
        recording: &mut Recording,
        shaders: &FullShaders,
        input: BufferProxy,
        output: BufferProxy,
        count: u32,
        inclusive: bool,
    ) {
        let count = if count > self.capacity {
            log::warn!(
                "prefix sum of {count} elements truncated to capacity {}",
                self.capacity
            );
            self.capacity
        } else {
            count
        };
        let params = ScanParams {
            count,
            inclusive: u32::from(inclusive),
            _padding: [0; 2],
        };
        let n_wg = count.div_ceil(PREFIX_SUM_WG);
        let params_buf = recording.upload_uniform("scan_params", bytes_of(&params));
        recording.dispatch(
            shaders.prefix_sum_reduce,
            (n_wg, 1, 1),
            [params_buf, input, self.partials],
        );
        recording.dispatch(
            shaders.prefix_sum_scan_partials,
            (1, 1, 1),
            [params_buf, self.partials],
        );
        recording.dispatch(
            shaders.prefix_sum_downsweep,
            (n_wg, 1, 1),
            [params_buf, input, self.partials, output],
        );
        recording.free_buffer(params_buf);
    }
}

#[cfg(test)]
mod tests {
    use bytemuck::cast_slice;

    use super::PrefixSumArgs;
    use crate::low_level::{FullShaders, Recording};
    use crate::CpuEngine;

    fn scan(values: &[u32], inclusive: bool) -> Vec<u32> {
        let mut engine = CpuEngine::new();
        let shaders = FullShaders::cpu(&mut engine);
        let args = PrefixSumArgs::allocate(values.len() as u32);
        let mut recording = Recording::default();
        let input = recording.upload("input", cast_slice(values));
        let output = crate::low_level::BufferProxy::new(input.size, "output");
        if inclusive {
            args.record_inclusive(&mut recording, &shaders, input, output, values.len() as u32);
        } else {
            args.record_exclusive(&mut recording, &shaders, input, output, values.len() as u32);
        }
        recording.download(output);
        engine.run_recording(&recording).unwrap();
        bytemuck::pod_collect_to_vec(engine.get_download(output).unwrap())
    }

    #[test]
    fn exclusive_scan_across_blocks() {
        let values: Vec<u32> = (0..600).map(|i| i % 7).collect();
        let out = scan(&values, false);
        let mut sum = 0;
        for (value, scanned) in values.iter().zip(&out) {
            assert_eq!(*scanned, sum);
            sum += value;
        }
    }

    #[test]
    fn inclusive_scan() {
        assert_eq!(scan(&[3, 0, 0, 1], true), [3, 3, 3, 4]);
        assert_eq!(scan(&[3, 0, 0, 1], false), [0, 3, 3, 3]);
    }

    #[test]
    fn partials_cover_every_block() {
        assert_eq!(PrefixSumArgs::allocate(0).partials.size, 4);
        assert_eq!(PrefixSumArgs::allocate(257).partials.size, 8);
    }
}
