// Copyright 2024 the Strand Raster Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use bytemuck::{Pod, Zeroable};

/// Packed per-particle vertex attributes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct VertexInput {
    /// Index of the particle in the strand position stream.
    pub particle: u32,
    /// Two unorm16 texture coordinates, `u` in the low half and `v` in the
    /// high half. `v` runs from 0 at the root to 1 at the tip.
    pub uv: u32,
}

impl VertexInput {
    /// The root to tip strand parameter encoded in `uv`.
    pub fn t(self) -> f32 {
        (self.uv >> 16) as f32 / 65535.0
    }
}

/// Output of the vertex setup stage, one per particle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Zeroable, Pod)]
#[repr(C)]
pub struct VertexOutput {
    /// Normalized device coordinates.
    pub position: [f32; 2],
    /// Normalized device depth. Negative for vertices behind the eye.
    pub depth: f32,
    /// Root to tip strand parameter.
    pub t: f32,
}

/// Shape of the strand group being drawn.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StrandLayout {
    pub strand_count: u32,
    /// Particles per strand. Every strand has the same count.
    pub strand_particle_count: u32,
}

impl StrandLayout {
    pub const fn vertex_count(&self) -> u32 {
        self.strand_count.saturating_mul(self.strand_particle_count)
    }

    /// Number of candidate segments, one per pair of adjacent particles.
    pub const fn segment_count(&self) -> u32 {
        self.strand_count
            .saturating_mul(self.strand_particle_count.saturating_sub(1))
    }
}

/// Order of the particles in the strand position stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MemoryLayout {
    /// All particles of strand 0, then all particles of strand 1, and so on.
    #[default]
    Sequential,
    /// Particle 0 of every strand, then particle 1 of every strand, and so on.
    Interleaved,
}

impl MemoryLayout {
    /// Position stream indices of the particles of `strand`, root first.
    pub fn strand_particles(
        self,
        strand: u32,
        layout: &StrandLayout,
    ) -> impl Iterator<Item = u32> {
        let (begin, stride) = match self {
            Self::Sequential => (strand * layout.strand_particle_count, 1),
            Self::Interleaved => (strand, layout.strand_count),
        };
        (0..layout.strand_particle_count).map(move |k| begin + k * stride)
    }
}

/// Host copy of the three geometry input streams.
#[derive(Clone, Debug, Default)]
pub struct StrandGeometry {
    pub layout: StrandLayout,
    /// One packed vertex per particle, grouped by strand.
    pub vertices: Vec<VertexInput>,
    /// Two vertex indices per candidate segment.
    pub indices: Vec<u32>,
    /// Particle positions, in the order given by the memory layout.
    pub positions: Vec<[f32; 3]>,
}

impl StrandGeometry {
    /// Builds the vertex and index streams for `positions`.
    ///
    /// Returns `None` if the number of positions doesn't match the layout.
    pub fn new(
        layout: StrandLayout,
        memory: MemoryLayout,
        positions: Vec<[f32; 3]>,
    ) -> Option<Self> {
        if positions.len() != layout.vertex_count() as usize {
            return None;
        }
        let per_strand_segments = layout.strand_particle_count.saturating_sub(1);
        let unorm_u = 65535 / 2;
        let unorm_v_step = 65535 / per_strand_segments.max(1);

        let mut vertices = Vec::with_capacity(positions.len());
        for strand in 0..layout.strand_count {
            for (k, particle) in memory.strand_particles(strand, &layout).enumerate() {
                let unorm_v = (unorm_v_step * k as u32).min(65535);
                vertices.push(VertexInput {
                    particle,
                    uv: (unorm_v << 16) | unorm_u,
                });
            }
        }

        let mut indices = Vec::with_capacity(2 * layout.segment_count() as usize);
        for strand in 0..layout.strand_count {
            let first = strand * layout.strand_particle_count;
            for k in 0..per_strand_segments {
                indices.extend([first + k, first + k + 1]);
            }
        }

        Some(Self {
            layout,
            vertices,
            indices,
            positions,
        })
    }
}
