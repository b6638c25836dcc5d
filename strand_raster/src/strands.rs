// Copyright 2024 the Strand Raster Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use bytemuck::Pod;
use strand_raster_encoding::{Budgets, StrandGeometry, StrandLayout};

use crate::recording::{BufferProxy, Recording};
use crate::{Error, Result};

/// Device copies of the geometry input streams of one strand group.
///
/// The streams are uploaded once and read by every frame until freed.
#[derive(Clone, Copy, Debug)]
pub struct StrandBuffers {
    pub layout: StrandLayout,
    /// Packed [`VertexInput`](strand_raster_encoding::VertexInput)s, one per particle.
    pub vertices: BufferProxy,
    /// Pairs of vertex indices, one pair per candidate segment.
    pub indices: BufferProxy,
    /// Particle positions.
    pub positions: BufferProxy,
}

impl StrandBuffers {
    /// Records the upload of `geometry`.
    ///
    /// Fails if a stream is larger than the pool `budgets` reserve for it.
    pub fn upload(
        recording: &mut Recording,
        geometry: &StrandGeometry,
        budgets: &Budgets,
    ) -> Result<Self> {
        let layout = geometry.layout;
        check_budget("vertices", geometry.vertices.len(), budgets.vertex_capacity())?;
        check_budget("indices", geometry.indices.len(), budgets.index_capacity())?;
        check_budget(
            "positions",
            geometry.positions.len(),
            budgets.strand_data_capacity(),
        )?;
        check_budget(
            "vertex outputs",
            layout.vertex_count() as usize,
            budgets.vertex_output_capacity(),
        )?;
        log::debug!(
            "uploading {} strands of {} particles",
            layout.strand_count,
            layout.strand_particle_count
        );
        Ok(Self {
            layout,
            vertices: upload_stream(recording, "vertices", &geometry.vertices),
            indices: upload_stream(recording, "indices", &geometry.indices),
            positions: upload_stream(recording, "positions", &geometry.positions),
        })
    }

    pub fn free(&self, recording: &mut Recording) {
        recording.free_buffer(self.vertices);
        recording.free_buffer(self.indices);
        recording.free_buffer(self.positions);
    }
}

fn check_budget(what: &'static str, needed: usize, capacity: u32) -> Result<()> {
    if needed > capacity as usize {
        return Err(Error::GeometryExceedsBudget {
            what,
            needed: needed as u64,
            capacity: capacity.into(),
        });
    }
    Ok(())
}

/// Uploads `data`, padded to one zeroed element when empty.
fn upload_stream<T: Pod>(
    recording: &mut Recording,
    name: &'static str,
    data: &[T],
) -> BufferProxy {
    if data.is_empty() {
        recording.upload(name, vec![0; size_of::<T>()])
    } else {
        recording.upload(name, bytemuck::cast_slice(data))
    }
}

#[cfg(test)]
mod tests {
    use strand_raster_encoding::{Budgets, MemoryLayout, StrandGeometry, StrandLayout};

    use super::StrandBuffers;
    use crate::low_level::Recording;
    use crate::Error;

    fn geometry(strand_count: u32) -> StrandGeometry {
        let layout = StrandLayout {
            strand_count,
            strand_particle_count: 4,
        };
        let positions = vec![[0.0; 3]; layout.vertex_count() as usize];
        StrandGeometry::new(layout, MemoryLayout::Sequential, positions).unwrap()
    }

    #[test]
    fn uploads_every_stream() {
        let mut recording = Recording::default();
        let strands =
            StrandBuffers::upload(&mut recording, &geometry(3), &Budgets::DEFAULT).unwrap();
        assert_eq!(recording.commands.len(), 3);
        assert_eq!(strands.vertices.size, 12 * 8);
        assert_eq!(strands.indices.size, 9 * 2 * 4);
        assert_eq!(strands.positions.size, 12 * 12);
    }

    #[test]
    fn empty_groups_upload_placeholders() {
        let mut recording = Recording::default();
        let strands =
            StrandBuffers::upload(&mut recording, &geometry(0), &Budgets::DEFAULT).unwrap();
        assert!(strands.indices.size > 0);
    }

    #[test]
    fn oversized_streams_are_rejected() {
        let budgets = Budgets {
            vertex_output_pool_bytes: 16 * 16,
            ..Budgets::DEFAULT
        };
        let mut recording = Recording::default();
        let result = StrandBuffers::upload(&mut recording, &geometry(5), &budgets);
        assert!(matches!(
            result,
            Err(Error::GeometryExceedsBudget {
                what: "vertex outputs",
                needed: 20,
                capacity: 16,
            })
        ));
        assert!(recording.commands.is_empty());
    }
}
