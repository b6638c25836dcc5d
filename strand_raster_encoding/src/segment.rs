// Copyright 2024 the Strand Raster Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use bytemuck::{Pod, Zeroable};

/// Bounding information of a live segment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Zeroable, Pod)]
#[repr(C)]
pub struct SegmentHeader {
    /// Pixel space bounding box `[x0, y0, x1, y1]` of the segment, grown by
    /// the strand radius plus half a pixel for antialiasing.
    pub bbox: [f32; 4],
}

impl SegmentHeader {
    /// The inclusive tile rectangle `[x0, y0, x1, y1]` covered by the box,
    /// clipped to a `width_in_tiles` x `height_in_tiles` grid.
    ///
    /// Returns `None` if the box misses the grid.
    pub fn tile_rect(
        &self,
        tile_size: u32,
        width_in_tiles: u32,
        height_in_tiles: u32,
    ) -> Option<[u32; 4]> {
        let [x0, y0, x1, y1] = self.bbox;
        let size = tile_size as f32;
        if x1 < 0.0 || y1 < 0.0 || width_in_tiles == 0 || height_in_tiles == 0 {
            return None;
        }
        let tx0 = (x0 / size).floor().max(0.0) as u32;
        let ty0 = (y0 / size).floor().max(0.0) as u32;
        if tx0 >= width_in_tiles || ty0 >= height_in_tiles {
            return None;
        }
        // Saturating float to int conversion keeps huge boxes in range.
        let tx1 = ((x1 / size).floor() as u32).min(width_in_tiles - 1);
        let ty1 = ((y1 / size).floor() as u32).min(height_in_tiles - 1);
        Some([tx0, ty0, tx1, ty1])
    }
}

/// Endpoint payload of a live segment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct SegmentData {
    /// Index into the vertex output buffer of the first endpoint.
    pub vertex0: u32,
    /// Index into the vertex output buffer of the second endpoint.
    pub vertex1: u32,
}

#[cfg(test)]
mod tests {
    use super::SegmentHeader;

    #[test]
    fn tile_rect_clips_to_grid() {
        let header = SegmentHeader {
            bbox: [-5.0, 3.0, 17.0, 40.0],
        };
        assert_eq!(header.tile_rect(16, 2, 2), Some([0, 0, 1, 1]));
    }

    #[test]
    fn tile_rect_rejects_offscreen() {
        let left = SegmentHeader {
            bbox: [-10.0, 0.0, -1.0, 8.0],
        };
        assert_eq!(left.tile_rect(16, 4, 4), None);
        let below = SegmentHeader {
            bbox: [0.0, 64.0, 8.0, 80.0],
        };
        assert_eq!(below.tile_rect(16, 4, 4), None);
    }
}
