// Copyright 2024 the Strand Raster Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Read-back of the frame counters for diagnostics.

use std::sync::atomic::{AtomicBool, Ordering};

use strand_raster_encoding::BumpAllocators;

use crate::recording::BufferProxy;
use crate::{CpuEngine, Error, Result};

/// Counters of one rendered frame.
///
/// Every count is the number of elements actually stored; work dropped
/// because a pool was full shows up in [`FrameStats::failed`] only.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Candidate segments of the strand group.
    pub total_segments: u32,
    /// Segments that survived culling and found a pool slot.
    pub segments_passed_cull: u32,
    pub bin_records: u32,
    /// Fragments appended by the brute force path.
    pub fragments: u32,
    /// Stage bits of the pools that overflowed, see [`BumpAllocators`].
    pub failed: u32,
    /// Number of segments binned into each tile, row major. Only captured
    /// by the binned path.
    pub tile_counts: Option<Vec<u32>>,
}

impl FrameStats {
    /// Names of the pools that ran out of space during the frame, and
    /// `"bin_extent"` if a segment spanned more tiles than can be binned.
    pub fn exhausted_pools(&self) -> Vec<&'static str> {
        [
            (BumpAllocators::STAGE_SEGMENT_SETUP, "segments"),
            (BumpAllocators::STAGE_BINNING, "bin_records"),
            (BumpAllocators::STAGE_WORK_QUEUE, "work_queue"),
            (BumpAllocators::STAGE_COVERAGE, "fragments"),
            (BumpAllocators::STAGE_BIN_EXTENT, "bin_extent"),
        ]
        .into_iter()
        .filter(|(bit, _)| self.failed & bit != 0)
        .map(|(_, name)| name)
        .collect()
    }

    /// Logs a warning, once per process, if any pool was exhausted.
    pub fn warn_if_exhausted(&self) {
        static HAS_WARNED: AtomicBool = AtomicBool::new(false);
        if self.failed == 0 {
            return;
        }
        if !HAS_WARNED.swap(true, Ordering::Release) {
            log::warn!(
                "Frame truncated, exhausted pools: {}. Consider raising the budgets.",
                self.exhausted_pools().join(", ")
            );
        }
    }

    /// Number of tiles with at least one segment.
    pub fn occupied_tiles(&self) -> Option<usize> {
        let counts = self.tile_counts.as_ref()?;
        Some(counts.iter().filter(|&&count| count > 0).count())
    }
}

/// Downloads recorded for a frame's [`FrameStats`].
#[derive(Clone, Copy, Debug)]
pub struct StatsCapture {
    pub total_segments: u32,
    pub n_tiles: u32,
    pub bump: BufferProxy,
    pub tile_counts: Option<BufferProxy>,
}

impl StatsCapture {
    /// Builds the stats from the downloaded bytes of [`Self::bump`] and
    /// [`Self::tile_counts`].
    pub fn resolve(&self, bump: &[u8], tile_counts: Option<&[u8]>) -> Result<FrameStats> {
        let bump: BumpAllocators = bump
            .get(..size_of::<BumpAllocators>())
            .map(bytemuck::pod_read_unaligned)
            .ok_or(Error::UnavailableBufferUsed(self.bump.name, "stats"))?;
        let tile_counts = match (self.tile_counts, tile_counts) {
            (Some(proxy), Some(bytes)) => {
                let mut counts: Vec<u32> = bytemuck::pod_collect_to_vec(bytes);
                if counts.len() < self.n_tiles as usize {
                    return Err(Error::UnavailableBufferUsed(proxy.name, "stats"));
                }
                // The buffer may be sized for a larger, earlier resolution.
                counts.truncate(self.n_tiles as usize);
                Some(counts)
            }
            (Some(proxy), None) => return Err(Error::UnavailableBufferUsed(proxy.name, "stats")),
            (None, _) => None,
        };
        Ok(FrameStats {
            total_segments: self.total_segments,
            segments_passed_cull: bump.segments,
            bin_records: bump.bin_records,
            fragments: bump.fragments,
            failed: bump.failed,
            tile_counts,
        })
    }

    /// Reads the downloads from a [`CpuEngine`] that ran the frame, and
    /// releases them.
    pub fn take(self, engine: &mut CpuEngine) -> Result<FrameStats> {
        let bump = engine
            .get_download(self.bump)
            .ok_or(Error::UnavailableBufferUsed(self.bump.name, "stats"))?;
        let tile_counts = self
            .tile_counts
            .and_then(|proxy| engine.get_download(proxy));
        let stats = self.resolve(bump, tile_counts)?;
        engine.free_download(self.bump);
        if let Some(proxy) = self.tile_counts {
            engine.free_download(proxy);
        }
        stats.warn_if_exhausted();
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use bytemuck::{bytes_of, cast_slice};
    use strand_raster_encoding::BumpAllocators;

    use super::{FrameStats, StatsCapture};
    use crate::low_level::BufferProxy;
    use crate::Error;

    fn capture(tiles: bool) -> StatsCapture {
        StatsCapture {
            total_segments: 10,
            n_tiles: 4,
            bump: BufferProxy::new(16, "bump"),
            tile_counts: tiles.then(|| BufferProxy::new(36, "tile_counts")),
        }
    }

    #[test]
    fn counters_map_to_stats() {
        let bump = BumpAllocators {
            failed: BumpAllocators::STAGE_BINNING | BumpAllocators::STAGE_COVERAGE,
            segments: 7,
            bin_records: 9,
            fragments: 3,
        };
        let counts = [3_u32, 0, 1, 0, 5, 5, 5, 5, 5];
        let stats = capture(true)
            .resolve(bytes_of(&bump), Some(cast_slice(&counts)))
            .unwrap();
        assert_eq!(stats.segments_passed_cull, 7);
        assert_eq!(stats.total_segments, 10);
        // Entries past the current tile grid are dropped.
        assert_eq!(stats.tile_counts.as_deref(), Some(&[3, 0, 1, 0][..]));
        assert_eq!(stats.occupied_tiles(), Some(2));
        assert_eq!(stats.exhausted_pools(), ["bin_records", "fragments"]);
    }

    #[test]
    fn missing_tile_counts_fail() {
        let bump = BumpAllocators::default();
        let result = capture(true).resolve(bytes_of(&bump), None);
        assert!(matches!(result, Err(Error::UnavailableBufferUsed("tile_counts", "stats"))));
        let stats = capture(false).resolve(bytes_of(&bump), None).unwrap();
        assert_eq!(stats.occupied_tiles(), None);
    }

    #[test]
    fn clamped_bin_extent_is_named() {
        let stats = FrameStats {
            failed: BumpAllocators::STAGE_BIN_EXTENT,
            ..FrameStats::default()
        };
        assert_eq!(stats.exhausted_pools(), ["bin_extent"]);
    }

    #[test]
    fn healthy_frames_exhaust_nothing() {
        assert!(FrameStats::default().exhausted_pools().is_empty());
    }
}
