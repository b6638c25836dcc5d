// Copyright 2024 the Strand Raster Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Utility functions shared by the kernels.

use glam::{Vec2, Vec4};
use strand_raster_encoding::{ConfigUniform, VertexOutput};

/// Segments shorter than this many pixels are treated as degenerate.
pub(crate) const MIN_SEGMENT_LENGTH: f32 = 1e-4;

/// Equivalent of WGSL's `unpack4x8unorm`.
pub(crate) fn unpack4x8unorm(x: u32) -> Vec4 {
    Vec4::new(
        (x & 0xff) as f32,
        ((x >> 8) & 0xff) as f32,
        ((x >> 16) & 0xff) as f32,
        (x >> 24) as f32,
    ) * (1.0 / 255.0)
}

/// Equivalent of WGSL's `pack4x8unorm`.
pub(crate) fn pack4x8unorm(x: Vec4) -> u32 {
    let [r, g, b, a] = (x.clamp(Vec4::ZERO, Vec4::ONE) * 255.0 + 0.5)
        .to_array()
        .map(|c| c as u32);
    r | (g << 8) | (b << 16) | (a << 24)
}

/// Maps a point in normalized device coordinates to pixel space, with the
/// origin at the top left corner of the target.
pub(crate) fn ndc_to_pixel(config: &ConfigUniform, ndc: [f32; 2]) -> Vec2 {
    Vec2::new(
        (ndc[0] * 0.5 + 0.5) * config.target_width as f32,
        (0.5 - ndc[1] * 0.5) * config.target_height as f32,
    )
}

/// Distance from `p` to the segment `a`-`b`, and the parameter of the
/// closest point along the segment.
pub(crate) fn segment_distance(p: Vec2, a: Vec2, b: Vec2) -> (f32, f32) {
    let ab = b - a;
    let len2 = ab.length_squared();
    let h = if len2 > 0.0 {
        ((p - a).dot(ab) / len2).clamp(0.0, 1.0)
    } else {
        0.0
    };
    ((p - (a + ab * h)).length(), h)
}

/// Antialiased coverage of a pixel whose center lies `distance` pixels away
/// from the strand axis.
pub(crate) fn coverage(distance: f32, radius: f32) -> f32 {
    (radius + 0.5 - distance).clamp(0.0, 1.0)
}

/// Uniform Catmull-Rom interpolation between `p1` and `p2`.
pub(crate) fn catmull_rom(p0: Vec4, p1: Vec4, p2: Vec4, p3: Vec4, t: f32) -> Vec4 {
    let t2 = t * t;
    let t3 = t2 * t;
    0.5 * ((2.0 * p1)
        + (p2 - p0) * t
        + (2.0 * p0 - 5.0 * p1 + 4.0 * p2 - p3) * t2
        + (3.0 * p1 - p0 - 3.0 * p2 + p3) * t3)
}

/// Straight (not premultiplied) strand color at parameter `t`.
pub(crate) fn strand_color(config: &ConfigUniform, t: f32) -> Vec4 {
    let root = unpack4x8unorm(config.root_color);
    let tip = unpack4x8unorm(config.tip_color);
    root.lerp(tip, t.clamp(0.0, 1.0))
}

/// One evaluated point of a strand, in pixel space.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct StrandPoint {
    pub(crate) position: Vec2,
    pub(crate) depth: f32,
    pub(crate) t: f32,
}

impl StrandPoint {
    pub(crate) fn new(config: &ConfigUniform, vertex: &VertexOutput) -> Self {
        Self {
            position: ndc_to_pixel(config, vertex.position),
            depth: vertex.depth,
            t: vertex.t,
        }
    }

    fn to_vec4(self) -> Vec4 {
        Vec4::new(self.position.x, self.position.y, self.depth, self.t)
    }

    fn from_vec4(v: Vec4) -> Self {
        Self {
            position: Vec2::new(v.x, v.y),
            depth: v.z,
            t: v.w,
        }
    }

    pub(crate) fn lerp(self, other: Self, h: f32) -> Self {
        Self::from_vec4(self.to_vec4().lerp(other.to_vec4(), h))
    }
}

/// The four control vertices of the curve through the segment
/// `vertex0`-`vertex1`, clamped to the ends of the strand.
pub(crate) fn curve_controls(config: &ConfigUniform, vertex0: u32, vertex1: u32) -> [u32; 4] {
    let particles = config.strand_particle_count.max(1);
    let first = vertex0 / particles * particles;
    let last = first + particles - 1;
    let prev = if vertex0 > first { vertex0 - 1 } else { vertex0 };
    let next = if vertex1 < last { vertex1 + 1 } else { vertex1 };
    [prev, vertex0, vertex1, next]
}

/// Samples the Catmull-Rom curve through `controls` at `samples + 1`
/// uniformly spaced parameters, writing them to `out`.
pub(crate) fn sample_curve(controls: [StrandPoint; 4], samples: u32, out: &mut Vec<StrandPoint>) {
    out.clear();
    let [p0, p1, p2, p3] = controls.map(StrandPoint::to_vec4);
    let samples = samples.max(1);
    for i in 0..=samples {
        let s = i as f32 / samples as f32;
        out.push(StrandPoint::from_vec4(catmull_rom(p0, p1, p2, p3, s)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_round_trip() {
        let packed = 0x80ff_4000;
        assert_eq!(pack4x8unorm(unpack4x8unorm(packed)), packed);
    }

    #[test]
    fn distance_to_segment() {
        let a = Vec2::new(0.0, 0.0);
        let b = Vec2::new(10.0, 0.0);
        assert_eq!(segment_distance(Vec2::new(5.0, 3.0), a, b), (3.0, 0.5));
        assert_eq!(segment_distance(Vec2::new(-4.0, 3.0), a, b), (5.0, 0.0));
    }

    #[test]
    fn catmull_rom_interpolates_endpoints() {
        let p = [
            Vec4::new(0.0, 0.0, 0.0, 0.0),
            Vec4::new(1.0, 2.0, 0.0, 0.0),
            Vec4::new(3.0, 1.0, 0.0, 1.0),
            Vec4::new(4.0, 4.0, 0.0, 1.0),
        ];
        assert!(catmull_rom(p[0], p[1], p[2], p[3], 0.0).abs_diff_eq(p[1], 1e-6));
        assert!(catmull_rom(p[0], p[1], p[2], p[3], 1.0).abs_diff_eq(p[2], 1e-6));
    }

    #[test]
    fn curve_controls_stay_in_strand() {
        let config = ConfigUniform {
            strand_particle_count: 4,
            ..Default::default()
        };
        assert_eq!(curve_controls(&config, 4, 5), [4, 4, 5, 6]);
        assert_eq!(curve_controls(&config, 6, 7), [5, 6, 7, 7]);
    }
}
