// Copyright 2024 the Strand Raster Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Host executor for [`Recording`]s.

use std::cell::{Ref, RefCell};
use std::collections::{HashMap, HashSet};

use strand_raster_encoding::IndirectCount;
use strand_raster_shaders::cpu::{CpuBinding, CpuTexture};
use strand_raster_shaders::Kernel;

use crate::recording::{
    BufferProxy, Command, ImageProxy, Recording, ResourceId, ResourceProxy, ShaderId,
};
use crate::shaders::CpuKernelFn;
use crate::{Error, Result};

struct CpuShader {
    label: &'static str,
    shader: CpuKernelFn,
}

/// Runs recordings command by command with the CPU kernels.
///
/// Workgroups of a dispatch run one after another, and every dispatch sees
/// the completed writes of the commands before it. Buffers and images are
/// materialized, zeroed, the first time a command uses them and live until
/// they are freed, so a recording can build on the results of earlier ones.
#[derive(Default)]
pub struct CpuEngine {
    shaders: Vec<CpuShader>,
    buffers: HashMap<ResourceId, RefCell<Vec<u8>>>,
    images: HashMap<ResourceId, RefCell<CpuTexture>>,
    downloads: HashMap<ResourceId, Vec<u8>>,
    debug_groups: Vec<&'static str>,
}

impl CpuEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the CPU implementation of a kernel.
    pub fn add_kernel(&mut self, kernel: Kernel, shader: CpuKernelFn) -> ShaderId {
        let id = self.shaders.len();
        self.shaders.push(CpuShader {
            label: kernel.label,
            shader,
        });
        ShaderId(id)
    }

    pub fn run_recording(&mut self, recording: &Recording) -> Result<()> {
        let mut free_bufs: HashSet<ResourceId> = HashSet::default();
        let mut free_images: HashSet<ResourceId> = HashSet::default();
        for command in &recording.commands {
            match command {
                Command::Upload(proxy, bytes) | Command::UploadUniform(proxy, bytes) => {
                    self.buffers.insert(proxy.id, RefCell::new(bytes.clone()));
                }
                Command::Download(proxy) => {
                    let buf = self
                        .buffers
                        .get(&proxy.id)
                        .ok_or(Error::UnavailableBufferUsed(proxy.name, "download"))?;
                    self.downloads.insert(proxy.id, buf.borrow().clone());
                }
                Command::Clear(proxy, offset, size) => {
                    let mut buf = self.materialize_buf(proxy).borrow_mut();
                    let start = (*offset as usize).min(buf.len());
                    let end = match size {
                        Some(size) => (start + *size as usize).min(buf.len()),
                        None => buf.len(),
                    };
                    buf[start..end].fill(0);
                }
                Command::Copy(src, dst) => {
                    let data = self
                        .buffers
                        .get(&src.id)
                        .ok_or(Error::UnavailableBufferUsed(src.name, "copy"))?
                        .borrow()
                        .clone();
                    let mut dst = self.materialize_buf(dst).borrow_mut();
                    let len = data.len().min(dst.len());
                    dst[..len].copy_from_slice(&data[..len]);
                }
                Command::FreeBuffer(proxy) => {
                    free_bufs.insert(proxy.id);
                }
                Command::FreeImage(proxy) => {
                    free_images.insert(proxy.id);
                }
                Command::Dispatch(shader_id, (x, y, z), bindings) => {
                    self.dispatch(*shader_id, x * y * z, bindings)?;
                }
                Command::DispatchIndirect(shader_id, proxy, offset, bindings) => {
                    let count = self.read_indirect(proxy, *offset)?;
                    let n_wg = count.count_x * count.count_y * count.count_z;
                    self.dispatch(*shader_id, n_wg, bindings)?;
                }
                Command::PushDebugGroup(label) => {
                    log::trace!("{:indent$}begin {label}", "", indent = self.debug_groups.len());
                    self.debug_groups.push(*label);
                }
                Command::PopDebugGroup => {
                    if let Some(label) = self.debug_groups.pop() {
                        log::trace!("{:indent$}end {label}", "", indent = self.debug_groups.len());
                    }
                }
            }
        }
        for id in free_bufs {
            self.buffers.remove(&id);
        }
        for id in free_images {
            self.images.remove(&id);
        }
        Ok(())
    }

    /// Contents of `buf` at the time its [`Command::Download`] executed.
    pub fn get_download(&self, buf: BufferProxy) -> Option<&[u8]> {
        self.downloads.get(&buf.id).map(Vec::as_slice)
    }

    pub fn free_download(&mut self, buf: BufferProxy) {
        self.downloads.remove(&buf.id);
    }

    /// The current contents of an image written by a dispatch.
    pub fn image(&self, image: ImageProxy) -> Option<Ref<'_, CpuTexture>> {
        self.images.get(&image.id).map(RefCell::borrow)
    }

    /// Number of live buffers.
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    fn materialize_buf(&mut self, proxy: &BufferProxy) -> &RefCell<Vec<u8>> {
        self.buffers
            .entry(proxy.id)
            .or_insert_with(|| RefCell::new(vec![0; proxy.size as usize]))
    }

    fn read_indirect(&self, proxy: &BufferProxy, offset: u64) -> Result<IndirectCount> {
        let buf = self
            .buffers
            .get(&proxy.id)
            .ok_or(Error::UnavailableBufferUsed(proxy.name, "indirect dispatch"))?
            .borrow();
        let start = offset as usize;
        let bytes = buf
            .get(start..start + size_of::<IndirectCount>())
            .ok_or(Error::UnavailableBufferUsed(proxy.name, "indirect dispatch"))?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    fn dispatch(
        &mut self,
        shader_id: ShaderId,
        n_wg: u32,
        bindings: &[ResourceProxy],
    ) -> Result<()> {
        let shader = self
            .shaders
            .get(shader_id.0)
            .ok_or(Error::MissingKernel("unregistered shader"))?;
        let (label, shader) = (shader.label, shader.shader);
        for resource in bindings {
            match resource {
                ResourceProxy::Buffer(proxy) => {
                    self.materialize_buf(proxy);
                }
                ResourceProxy::Image(proxy) => {
                    self.images.entry(proxy.id).or_insert_with(|| {
                        RefCell::new(CpuTexture::new(proxy.width as usize, proxy.height as usize))
                    });
                }
            }
        }
        let resources = bindings
            .iter()
            .map(|resource| match resource {
                ResourceProxy::Buffer(proxy) => self
                    .buffers
                    .get(&proxy.id)
                    .map(CpuBinding::BufferRW)
                    .ok_or(Error::UnavailableBufferUsed(proxy.name, label)),
                ResourceProxy::Image(proxy) => self
                    .images
                    .get(&proxy.id)
                    .map(CpuBinding::Texture)
                    .ok_or(Error::UnavailableImageUsed(label)),
            })
            .collect::<Result<Vec<_>>>()?;
        log::trace!("dispatch {label} over {n_wg} workgroups");
        shader(n_wg, &resources);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytemuck::{bytes_of, cast_slice};
    use strand_raster_encoding::{ClearParams, IndirectCount};

    use super::CpuEngine;
    use crate::low_level::{BufferProxy, Command, FullShaders, Recording};
    use crate::Error;

    #[test]
    fn buffers_persist_across_recordings() {
        let mut engine = CpuEngine::new();
        let mut recording = Recording::default();
        let buf = recording.upload("data", cast_slice(&[1_u32, 2, 3, 4]).to_vec());
        engine.run_recording(&recording).unwrap();

        let mut recording = Recording::default();
        recording.clear_range(buf, 4, 8);
        recording.download(buf);
        engine.run_recording(&recording).unwrap();
        let values: Vec<u32> = bytemuck::pod_collect_to_vec(engine.get_download(buf).unwrap());
        assert_eq!(values, [1, 0, 0, 4]);

        let mut recording = Recording::default();
        recording.free_buffer(buf);
        engine.run_recording(&recording).unwrap();
        assert_eq!(engine.buffer_count(), 0);
        // The download outlives the buffer.
        assert!(engine.get_download(buf).is_some());
        engine.free_download(buf);
        assert!(engine.get_download(buf).is_none());
    }

    #[test]
    fn downloading_an_unknown_buffer_fails() {
        let mut engine = CpuEngine::new();
        let mut recording = Recording::default();
        recording.download(BufferProxy::new(16, "missing"));
        let result = engine.run_recording(&recording);
        assert!(matches!(result, Err(Error::UnavailableBufferUsed("missing", "download"))));
    }

    #[test]
    fn indirect_dispatch_reads_count_when_executed() {
        let mut engine = CpuEngine::new();
        let shaders = FullShaders::cpu(&mut engine);
        let mut recording = Recording::default();
        let params = ClearParams {
            value: 7,
            offset: 0,
            count: 256,
            _padding: 0,
        };
        let params = recording.upload_uniform("params", bytes_of(&params).to_vec());
        let target = BufferProxy::new(4 * 256, "target");
        let indirect = recording.upload("indirect", bytes_of(&IndirectCount::default()).to_vec());
        recording.dispatch_indirect(shaders.clear_u32, indirect, 0, [params, target]);
        // Two workgroups of 64 lanes, written after the first dispatch was recorded.
        let count = IndirectCount {
            count_x: 2,
            count_y: 1,
            count_z: 1,
            pad0: 0,
        };
        recording.push(Command::Upload(indirect, bytes_of(&count).to_vec()));
        recording.dispatch_indirect(shaders.clear_u32, indirect, 0, [params, target]);
        recording.download(target);
        engine.run_recording(&recording).unwrap();
        let values: Vec<u32> = bytemuck::pod_collect_to_vec(engine.get_download(target).unwrap());
        assert!(values[..128].iter().all(|&v| v == 7));
        assert!(values[128..].iter().all(|&v| v == 0));
    }
}
