// Copyright 2024 the Strand Raster Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

/// The type of resource that will be bound to a slot in a kernel.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum BindType {
    /// A storage buffer with read/write access.
    Buffer,
    /// A storage buffer with read only access.
    BufReadOnly,
    /// A small storage buffer to be used as uniforms.
    Uniform,
    /// A write only storage image holding the render target.
    Image,
}

impl BindType {
    pub fn is_mutable(self) -> bool {
        matches!(self, Self::Buffer | Self::Image)
    }

    /// Whether the binding counts against the storage buffer limit of a stage.
    pub fn is_storage(self) -> bool {
        matches!(self, Self::Buffer | Self::BufReadOnly)
    }
}
