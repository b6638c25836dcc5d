// Copyright 2024 the Strand Raster Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The tile binned rasterization path.

use strand_raster_encoding::{Budgets, BufferSizes, TILE_MIN_Z_CLEAR};

use crate::prefix_sum::PrefixSumArgs;
use crate::recording::{BufferProxy, Recording, ResourceProxy};
use crate::stage::{FrameContext, Stage};

/// Per-tile buffers, sized for the largest resolution seen so far.
#[derive(Clone, Copy, Debug)]
struct TileBuffers {
    /// Pixel dimensions the buffers were allocated for.
    width: u32,
    height: u32,
    counts: BufferProxy,
    /// Minimum depths of every tile, then maximum depths.
    depths: BufferProxy,
    offsets: BufferProxy,
    cursors: BufferProxy,
    prefix_sum: PrefixSumArgs,
}

impl TileBuffers {
    fn new(budgets: &Budgets, width: u32, height: u32) -> Self {
        let tile_size = budgets.tile_size.max(1);
        let (width_in_tiles, height_in_tiles) =
            (width.div_ceil(tile_size), height.div_ceil(tile_size));
        let sizes = BufferSizes::new(budgets, width, height, width_in_tiles, height_in_tiles);
        Self {
            width,
            height,
            counts: BufferProxy::new(sizes.tile_counts.size_in_bytes().into(), "tile_counts"),
            depths: BufferProxy::new(sizes.tile_depths.size_in_bytes().into(), "tile_depths"),
            offsets: BufferProxy::new(sizes.tile_offsets.size_in_bytes().into(), "tile_offsets"),
            cursors: BufferProxy::new(sizes.tile_cursors.size_in_bytes().into(), "tile_cursors"),
            prefix_sum: PrefixSumArgs::allocate(sizes.tile_counts.len()),
        }
    }

    fn covers(&self, width: u32, height: u32) -> bool {
        width <= self.width && height <= self.height
    }

    fn free(&self, recording: &mut Recording) {
        recording.free_buffer(self.counts);
        recording.free_buffer(self.depths);
        recording.free_buffer(self.offsets);
        recording.free_buffer(self.cursors);
        self.prefix_sum.free(recording);
    }
}

/// Bins segments into screen tiles, compacts them into a tile-contiguous
/// work queue and rasterizes each tile's list.
pub struct BinnedRasterizer {
    budgets: Budgets,
    bin_records: BufferProxy,
    work_queue: BufferProxy,
    indirect: BufferProxy,
    tiles: Option<TileBuffers>,
}

impl BinnedRasterizer {
    pub fn new(budgets: &Budgets) -> Self {
        let sizes = BufferSizes::new(budgets, 0, 0, 0, 0);
        Self {
            budgets: *budgets,
            bin_records: BufferProxy::new(sizes.bin_records.size_in_bytes().into(), "bin_records"),
            work_queue: BufferProxy::new(sizes.work_queue.size_in_bytes().into(), "work_queue"),
            indirect: BufferProxy::new(
                sizes.indirect_count.size_in_bytes().into(),
                "indirect_count",
            ),
            tiles: None,
        }
    }

    /// Per-tile segment counts of the last recorded frame, once a frame has
    /// been recorded.
    pub fn tile_counts(&self) -> Option<BufferProxy> {
        self.tiles.map(|tiles| tiles.counts)
    }
}

impl Stage for BinnedRasterizer {
    fn update_buffers(&mut self, ctx: &mut FrameContext<'_>) {
        let (width, height) = (ctx.params.width, ctx.params.height);
        match self.tiles {
            Some(tiles) if tiles.covers(width, height) => {}
            Some(tiles) => {
                // Never shrink along either axis.
                let (width, height) = (width.max(tiles.width), height.max(tiles.height));
                log::debug!(
                    "growing tile buffers from {}x{} to {width}x{height}",
                    tiles.width,
                    tiles.height
                );
                tiles.free(ctx.recording);
                self.tiles = Some(TileBuffers::new(&self.budgets, width, height));
            }
            None => {
                log::debug!("allocating tile buffers for {width}x{height}");
                self.tiles = Some(TileBuffers::new(&self.budgets, width, height));
            }
        }
    }

    fn clear(&mut self, ctx: &mut FrameContext<'_>) {
        let Some(tiles) = self.tiles else {
            return;
        };
        let n_tiles = ctx.config.tile_count();
        ctx.recording.clear_all(tiles.counts);
        ctx.recording.clear_all(tiles.depths);
        ctx.fill_u32(tiles.depths, TILE_MIN_Z_CLEAR, 0, n_tiles);
    }

    fn execute(&mut self, ctx: &mut FrameContext<'_>) {
        let Some(tiles) = self.tiles else {
            log::error!("binned rasterizer executed before its buffers were allocated");
            return;
        };
        let config = ctx.config;
        let config_buf = ctx.config_buf;
        let shaders = ctx.shaders;
        let segments = ctx.segments;
        let wg_counts = &config.workgroup_counts;
        let tessellation = ctx.params.tessellation;
        let n_tiles = config.tile_count();
        let (bin_records, work_queue, indirect) =
            (self.bin_records, self.work_queue, self.indirect);

        ctx.recording.debug_group("BinPass", |recording| {
            recording.dispatch(
                shaders.bin(tessellation),
                wg_counts.bin,
                [
                    config_buf,
                    segments.segment_headers,
                    segments.segment_data,
                    segments.vertex_output,
                    segments.bump,
                    bin_records,
                    tiles.counts,
                    tiles.depths,
                ],
            );
        });
        ctx.recording.debug_group("PrefixSum", |recording| {
            tiles
                .prefix_sum
                .record_exclusive(recording, shaders, tiles.counts, tiles.offsets, n_tiles);
        });
        ctx.recording.debug_group("BuildWorkQueue", |recording| {
            recording.copy_buffer(tiles.offsets, tiles.cursors);
            recording.dispatch(
                shaders.work_queue_args,
                wg_counts.work_queue_args,
                [config_buf, segments.bump, indirect],
            );
            recording.dispatch_indirect(
                shaders.work_queue,
                indirect,
                0,
                [
                    config_buf,
                    segments.bump,
                    bin_records,
                    tiles.cursors,
                    work_queue,
                ],
            );
        });
        let variant = match ctx.fine {
            Ok(variant) => variant,
            Err(_) => {
                log::debug!("skipping fine rasterization, no kernel for the requested modes");
                return;
            }
        };
        let bindings: [ResourceProxy; 8] = [
            config_buf.into(),
            work_queue.into(),
            tiles.offsets.into(),
            tiles.counts.into(),
            segments.segment_data.into(),
            segments.vertex_output.into(),
            tiles.depths.into(),
            ctx.target.into(),
        ];
        ctx.recording.debug_group("FinePass", |recording| {
            recording.dispatch(shaders.fine(variant), wg_counts.fine, bindings);
        });
    }

    fn free(&mut self, recording: &mut Recording) {
        recording.free_buffer(self.bin_records);
        recording.free_buffer(self.work_queue);
        recording.free_buffer(self.indirect);
        if let Some(tiles) = self.tiles.take() {
            tiles.free(recording);
        }
    }
}
