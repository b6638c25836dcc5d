// Copyright 2024 the Strand Raster Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct ShaderId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResourceId(pub NonZeroU64);

impl ResourceId {
    pub fn next() -> Self {
        static ID_COUNTER: AtomicU64 = AtomicU64::new(1);
        let id = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        // The counter starts at one and would take centuries to wrap.
        Self(NonZeroU64::new(id).unwrap_or(NonZeroU64::MIN))
    }
}

/// List of [`Command`]s for an engine to execute in order.
///
/// Every command observes the completed effects of the commands before it.
#[derive(Default)]
pub struct Recording {
    pub commands: Vec<Command>,
}

/// Proxy used as a handle to a buffer.
///
/// An engine materializes the buffer the first time a command touches it and
/// keeps it, across recordings, until a [`Command::FreeBuffer`].
#[derive(Clone, Copy, Debug)]
pub struct BufferProxy {
    pub size: u64,
    pub id: ResourceId,
    pub name: &'static str,
}

/// Proxy used as a handle to an RGBA8 storage image.
#[derive(Clone, Copy, Debug)]
pub struct ImageProxy {
    pub width: u32,
    pub height: u32,
    pub id: ResourceId,
}

#[derive(Clone, Copy, Debug)]
pub enum ResourceProxy {
    Buffer(BufferProxy),
    Image(ImageProxy),
}

/// Single command inside a [`Recording`] to get executed by an engine.
pub enum Command {
    /// Commands the data to be uploaded to the given buffer.
    Upload(BufferProxy, Vec<u8>),
    /// Commands the data to be uploaded to the given buffer as a uniform.
    UploadUniform(BufferProxy, Vec<u8>),
    /// Copies the buffer contents out for reading back on the host.
    Download(BufferProxy),
    /// Commands to clear the buffer from an offset on for a length of the given size.
    /// If the size is [None], it clears until the end.
    Clear(BufferProxy, u64, Option<u64>),
    /// Copies the first buffer into the start of the second.
    Copy(BufferProxy, BufferProxy),
    /// Commands to free the buffer.
    FreeBuffer(BufferProxy),
    /// Commands to free the image.
    FreeImage(ImageProxy),
    Dispatch(ShaderId, (u32, u32, u32), Vec<ResourceProxy>),
    DispatchIndirect(ShaderId, BufferProxy, u64, Vec<ResourceProxy>),
    /// Opens a named group of commands, for debuggers and logs.
    PushDebugGroup(&'static str),
    PopDebugGroup,
}

impl Recording {
    /// Appends a [`Command`] to the back of the [`Recording`].
    pub fn push(&mut self, cmd: Command) {
        self.commands.push(cmd);
    }

    /// Commands to upload the given data to a new buffer with the given name.
    /// Returns a [`BufferProxy`] to the buffer.
    pub fn upload(&mut self, name: &'static str, data: impl Into<Vec<u8>>) -> BufferProxy {
        let data = data.into();
        let buf_proxy = BufferProxy::new(data.len() as u64, name);
        self.push(Command::Upload(buf_proxy, data));
        buf_proxy
    }

    /// Commands to upload the given data to a new buffer as a uniform with the given name.
    /// Returns a [`BufferProxy`] to the buffer.
    pub fn upload_uniform(&mut self, name: &'static str, data: impl Into<Vec<u8>>) -> BufferProxy {
        let data = data.into();
        let buf_proxy = BufferProxy::new(data.len() as u64, name);
        self.push(Command::UploadUniform(buf_proxy, data));
        buf_proxy
    }

    pub fn dispatch<R>(&mut self, shader: ShaderId, wg_size: (u32, u32, u32), resources: R)
    where
        R: IntoIterator,
        R::Item: Into<ResourceProxy>,
    {
        let r = resources.into_iter().map(|r| r.into()).collect();
        self.push(Command::Dispatch(shader, wg_size, r));
    }

    /// Do an indirect dispatch.
    ///
    /// Dispatch a compute shader where the size is determined dynamically.
    /// The `buf` argument contains the dispatch size, 3 `u32` values beginning
    /// at the given byte `offset`.
    pub fn dispatch_indirect<R>(
        &mut self,
        shader: ShaderId,
        buf: BufferProxy,
        offset: u64,
        resources: R,
    ) where
        R: IntoIterator,
        R::Item: Into<ResourceProxy>,
    {
        let r = resources.into_iter().map(|r| r.into()).collect();
        self.push(Command::DispatchIndirect(shader, buf, offset, r));
    }

    /// Prepare a buffer for downloading.
    ///
    /// The contents are copied out when the command executes, so the buffer
    /// can be reused or freed right after.
    pub fn download(&mut self, buf: BufferProxy) {
        self.push(Command::Download(buf));
    }

    /// Commands to clear the whole buffer.
    pub fn clear_all(&mut self, buf: BufferProxy) {
        self.push(Command::Clear(buf, 0, None));
    }

    /// Commands to clear `size` bytes of the buffer starting at byte `offset`.
    pub fn clear_range(&mut self, buf: BufferProxy, offset: u64, size: u64) {
        self.push(Command::Clear(buf, offset, Some(size)));
    }

    pub fn copy_buffer(&mut self, src: BufferProxy, dst: BufferProxy) {
        self.push(Command::Copy(src, dst));
    }

    /// Commands to free the given buffer.
    pub fn free_buffer(&mut self, buf: BufferProxy) {
        self.push(Command::FreeBuffer(buf));
    }

    /// Commands to free the given image.
    pub fn free_image(&mut self, image: ImageProxy) {
        self.push(Command::FreeImage(image));
    }

    /// Commands to free the given resource.
    pub fn free_resource(&mut self, resource: ResourceProxy) {
        match resource {
            ResourceProxy::Buffer(buf) => self.free_buffer(buf),
            ResourceProxy::Image(image) => self.free_image(image),
        }
    }

    pub fn push_debug_group(&mut self, label: &'static str) {
        self.push(Command::PushDebugGroup(label));
    }

    pub fn pop_debug_group(&mut self) {
        self.push(Command::PopDebugGroup);
    }

    /// Records the commands added by `f` inside a debug group named `label`.
    pub fn debug_group<T>(&mut self, label: &'static str, f: impl FnOnce(&mut Self) -> T) -> T {
        self.push_debug_group(label);
        let result = f(self);
        self.pop_debug_group();
        result
    }

    /// Returns a [`Vec`] containing all the [`Command`]s in order.
    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }
}

impl BufferProxy {
    pub fn new(size: u64, name: &'static str) -> Self {
        let id = ResourceId::next();
        debug_assert!(size > 0);
        Self { id, size, name }
    }
}

impl ImageProxy {
    pub fn new(width: u32, height: u32) -> Self {
        let id = ResourceId::next();
        Self { width, height, id }
    }
}

impl ResourceProxy {
    pub fn new_buf(size: u64, name: &'static str) -> Self {
        Self::Buffer(BufferProxy::new(size, name))
    }

    pub fn new_image(width: u32, height: u32) -> Self {
        Self::Image(ImageProxy::new(width, height))
    }

    pub fn as_buf(&self) -> Option<&BufferProxy> {
        match self {
            Self::Buffer(proxy) => Some(proxy),
            Self::Image(_) => None,
        }
    }

    pub fn as_image(&self) -> Option<&ImageProxy> {
        match self {
            Self::Image(proxy) => Some(proxy),
            Self::Buffer(_) => None,
        }
    }
}

impl From<BufferProxy> for ResourceProxy {
    fn from(value: BufferProxy) -> Self {
        Self::Buffer(value)
    }
}

impl From<ImageProxy> for ResourceProxy {
    fn from(value: ImageProxy) -> Self {
        Self::Image(value)
    }
}

#[cfg(test)]
mod tests {
    use super::{Command, Recording, ResourceId};

    #[test]
    fn resource_ids_are_distinct() {
        let a = ResourceId::next();
        let b = ResourceId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn debug_group_brackets_commands() {
        let mut recording = Recording::default();
        let buf = recording.debug_group("Upload", |r| r.upload("data", vec![0_u8; 16]));
        assert_eq!(buf.size, 16);
        let commands = recording.into_commands();
        assert!(matches!(commands[0], Command::PushDebugGroup("Upload")));
        assert!(matches!(commands[1], Command::Upload(..)));
        assert!(matches!(commands[2], Command::PopDebugGroup));
    }
}
