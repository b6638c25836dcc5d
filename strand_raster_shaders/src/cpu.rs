// Copyright 2024 the Strand Raster Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! CPU implementations of the pipeline kernels.
//!
//! Every kernel has the signature `fn(n_wg: u32, resources: &[CpuBinding])`
//! and sees its bindings in the order listed by the matching
//! [`Kernel`](crate::Kernel). Workgroups run one after another and lanes
//! within a workgroup run in order, which is one valid interleaving of the
//! GPU execution. Atomics therefore become plain reads and writes.

// Allow un-idiomatic Rust to more closely match shaders
#![expect(
    clippy::needless_range_loop,
    reason = "Keeps code easily comparable to GPU shaders"
)]

mod clear;
mod coverage;
mod fine;
mod prefix_sum;
mod raster_bin;
mod resolve;
mod segment_setup;
mod util;
mod vertex_setup;
mod work_queue;

pub use clear::clear_u32;
pub use coverage::raster_coverage;
pub use fine::{raster_fine, raster_fine_curve, raster_fine_oit};
pub use prefix_sum::{prefix_sum_downsweep, prefix_sum_reduce, prefix_sum_scan_partials};
pub use raster_bin::{raster_bin, raster_bin_curve};
pub use resolve::raster_resolve;
pub use segment_setup::segment_setup;
pub use vertex_setup::vertex_setup;
pub use work_queue::{work_queue, work_queue_args};

use std::cell::{Ref, RefCell, RefMut};
use std::ops::{Deref, DerefMut};

use bytemuck::Pod;

#[derive(Clone, Copy)]
pub enum CpuBinding<'a> {
    Buffer(&'a [u8]),
    BufferRW(&'a RefCell<Vec<u8>>),
    Texture(&'a RefCell<CpuTexture>),
}

pub enum TypedBufGuard<'a, T: ?Sized> {
    Slice(&'a T),
    Interior(Ref<'a, T>),
}

pub enum TypedBufGuardMut<'a, T: ?Sized> {
    Slice(&'a mut T),
    Interior(RefMut<'a, T>),
}

impl<T: ?Sized> Deref for TypedBufGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        match self {
            TypedBufGuard::Slice(s) => s,
            TypedBufGuard::Interior(r) => r,
        }
    }
}

impl<T: ?Sized> Deref for TypedBufGuardMut<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        match self {
            TypedBufGuardMut::Slice(s) => s,
            TypedBufGuardMut::Interior(r) => r,
        }
    }
}

impl<T: ?Sized> DerefMut for TypedBufGuardMut<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self {
            TypedBufGuardMut::Slice(s) => s,
            TypedBufGuardMut::Interior(r) => r,
        }
    }
}

impl CpuBinding<'_> {
    pub fn as_typed<T: Pod>(&self) -> TypedBufGuard<'_, T> {
        match self {
            CpuBinding::Buffer(b) => TypedBufGuard::Slice(bytemuck::from_bytes(b)),
            CpuBinding::BufferRW(b) => {
                TypedBufGuard::Interior(Ref::map(b.borrow(), |buf| bytemuck::from_bytes(buf)))
            }
            _ => panic!("resource type mismatch"),
        }
    }

    pub fn as_typed_mut<T: Pod>(&self) -> TypedBufGuardMut<'_, T> {
        match self {
            CpuBinding::Buffer(_) => panic!("can't borrow external buffer mutably"),
            CpuBinding::BufferRW(b) => {
                TypedBufGuardMut::Interior(RefMut::map(b.borrow_mut(), |buf| {
                    bytemuck::from_bytes_mut(buf)
                }))
            }
            _ => panic!("resource type mismatch"),
        }
    }

    pub fn as_slice<T: Pod>(&self) -> TypedBufGuard<'_, [T]> {
        match self {
            CpuBinding::Buffer(b) => TypedBufGuard::Slice(bytemuck::cast_slice(b)),
            CpuBinding::BufferRW(b) => {
                TypedBufGuard::Interior(Ref::map(b.borrow(), |buf| bytemuck::cast_slice(buf)))
            }
            _ => panic!("resource type mismatch"),
        }
    }

    pub fn as_slice_mut<T: Pod>(&self) -> TypedBufGuardMut<'_, [T]> {
        match self {
            CpuBinding::Buffer(_) => panic!("can't borrow external buffer mutably"),
            CpuBinding::BufferRW(b) => {
                TypedBufGuardMut::Interior(RefMut::map(b.borrow_mut(), |buf| {
                    bytemuck::cast_slice_mut(buf)
                }))
            }
            _ => panic!("resource type mismatch"),
        }
    }

    pub fn as_tex_mut(&self) -> RefMut<'_, CpuTexture> {
        match self {
            CpuBinding::Texture(t) => t.borrow_mut(),
            _ => panic!("resource type mismatch"),
        }
    }
}

/// Structure used for binding render targets to CPU kernels.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CpuTexture {
    pub width: usize,
    pub height: usize,
    /// Packed RGBA8, red in the lowest byte.
    pub pixels: Vec<u32>,
}

impl CpuTexture {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width * height],
        }
    }

    /// The pixel at `(x, y)`, or `None` outside the texture.
    pub fn get(&self, x: usize, y: usize) -> Option<u32> {
        if x < self.width {
            self.pixels.get(y * self.width + x).copied()
        } else {
            None
        }
    }
}
