// Copyright 2024 the Strand Raster Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use glam::{Mat4, Vec3};
use strand_raster_encoding::{ConfigUniform, VertexInput, VertexOutput};

use super::CpuBinding;

/// Depth written for vertices that can't be projected.
const INVALID_DEPTH: f32 = -1.0;

fn vertex_setup_main(
    n_wg: u32,
    config: &ConfigUniform,
    vertices: &[VertexInput],
    positions: &[[f32; 3]],
    vertex_output: &mut [VertexOutput],
) {
    let clip_from_world = Mat4::from_cols_array_2d(&config.projection)
        * Mat4::from_cols_array_2d(&config.view);
    let n = config.vertex_count.min(config.vertex_output_size) as usize;
    for global_ix in 0..(n_wg * config.lanes_per_wave) as usize {
        if global_ix >= n {
            break;
        }
        let Some(vertex) = vertices.get(global_ix) else {
            break;
        };
        let t = vertex.t();
        let clip = positions
            .get(vertex.particle as usize)
            .map(|p| clip_from_world * Vec3::from_array(*p).extend(1.0));
        vertex_output[global_ix] = match clip {
            Some(clip) if clip.w > 0.0 => {
                let ndc = clip.truncate() / clip.w;
                VertexOutput {
                    position: [ndc.x, ndc.y],
                    depth: ndc.z,
                    t,
                }
            }
            // Behind the eye, or a dangling particle reference.
            _ => VertexOutput {
                position: [0.0, 0.0],
                depth: INVALID_DEPTH,
                t,
            },
        };
    }
}

pub fn vertex_setup(n_wg: u32, resources: &[CpuBinding<'_>]) {
    let config = resources[0].as_typed();
    let vertices = resources[1].as_slice();
    let positions = resources[2].as_slice();
    let mut vertex_output = resources[3].as_slice_mut();
    vertex_setup_main(n_wg, &config, &vertices, &positions, &mut vertex_output);
}
