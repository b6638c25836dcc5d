// Copyright 2024 the Strand Raster Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::cell::RefCell;

use bytemuck::{bytes_of, cast_slice};
use glam::{Mat4, Vec3};
use strand_raster_encoding::{
    Budgets, ClearParams, MemoryLayout, RenderConfig, StrandGeometry, StrandLayout, StrandStyle,
    VertexOutput,
};
use strand_raster_shaders::cpu::{clear_u32, vertex_setup, CpuBinding};

fn run_vertex_setup(
    geometry: &StrandGeometry,
    view: &Mat4,
    projection: &Mat4,
) -> Vec<VertexOutput> {
    let config = RenderConfig::new(
        &geometry.layout,
        &Budgets::DEFAULT,
        &StrandStyle::default(),
        64,
        64,
        view,
        projection,
        0,
    );
    let output = RefCell::new(vec![0_u8; 16 * geometry.vertices.len()]);
    vertex_setup(
        config.workgroup_counts.vertex_setup.0,
        &[
            CpuBinding::Buffer(bytes_of(&config.gpu)),
            CpuBinding::Buffer(cast_slice(&geometry.vertices)),
            CpuBinding::Buffer(cast_slice(&geometry.positions)),
            CpuBinding::BufferRW(&output),
        ],
    );
    let vertices = bytemuck::pod_collect_to_vec(&output.borrow());
    vertices
}

#[test]
fn identity_transform_passes_positions_through() {
    let layout = StrandLayout {
        strand_count: 2,
        strand_particle_count: 3,
    };
    // Interleaved: particle k of strand s is at k * 2 + s.
    let positions = vec![
        [0.0, 0.0, 0.1],
        [0.5, 0.0, 0.2],
        [0.0, 0.1, 0.3],
        [0.5, 0.1, 0.4],
        [0.0, 0.2, 0.5],
        [0.5, 0.2, 0.6],
    ];
    let geometry = StrandGeometry::new(layout, MemoryLayout::Interleaved, positions).unwrap();
    let out = run_vertex_setup(&geometry, &Mat4::IDENTITY, &Mat4::IDENTITY);
    assert_eq!(out.len(), 6);
    // Vertex 3 is the root of the second strand.
    assert_eq!(out[3].position, [0.5, 0.0]);
    assert_eq!(out[3].depth, 0.2);
    assert_eq!(out[3].t, 0.0);
    assert_eq!(out[5].position, [0.5, 0.2]);
    assert!((out[5].t - 1.0).abs() < 1e-4);
}

#[test]
fn vertices_behind_the_eye_get_negative_depth() {
    let layout = StrandLayout {
        strand_count: 1,
        strand_particle_count: 2,
    };
    let positions = vec![[0.0, 0.0, -5.0], [0.0, 0.0, 5.0]];
    let geometry = StrandGeometry::new(layout, MemoryLayout::Sequential, positions).unwrap();
    let view = Mat4::look_to_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
    let projection = Mat4::perspective_rh(1.0, 1.0, 0.1, 100.0);
    let out = run_vertex_setup(&geometry, &view, &projection);
    assert!((0.0..=1.0).contains(&out[0].depth));
    assert!(out[1].depth < 0.0);
}

#[test]
fn clear_fills_requested_range() {
    let params = ClearParams {
        value: 0x7fff_ffff,
        offset: 3,
        count: 100,
        _padding: 0,
    };
    let target = RefCell::new(vec![0_u8; 4 * 200]);
    clear_u32(
        params.count.div_ceil(64),
        &[
            CpuBinding::Buffer(bytes_of(&params)),
            CpuBinding::BufferRW(&target),
        ],
    );
    let values: Vec<u32> = bytemuck::pod_collect_to_vec(&target.borrow());
    assert!(values[..3].iter().all(|&v| v == 0));
    assert!(values[3..103].iter().all(|&v| v == 0x7fff_ffff));
    assert!(values[103..].iter().all(|&v| v == 0));
}
