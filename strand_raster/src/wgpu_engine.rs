// Copyright 2024 the Strand Raster Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::borrow::Cow;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use strand_raster_shaders::{BindType, Kernel};
use wgpu::{
    BindGroup, BindGroupLayout, Buffer, BufferUsages, CommandEncoder, CommandEncoderDescriptor,
    ComputePassDescriptor, ComputePipeline, Device, PipelineCompilationOptions, Queue, Texture,
    TextureFormat, TextureUsages, TextureView, TextureViewDimension,
};

use crate::recording::{
    BufferProxy, Command, ImageProxy, Recording, ResourceId, ResourceProxy, ShaderId,
};
use crate::{Error, Result};

/// Format of every image a kernel writes.
const IMAGE_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

/// WGSL source of each kernel, keyed by [`Kernel::label`].
///
/// Every source must have a compute entry point named `main` whose bindings
/// follow the order of [`Kernel::bindings`].
#[derive(Clone, Debug, Default)]
pub struct KernelSources {
    sources: HashMap<&'static str, Cow<'static, str>>,
}

impl KernelSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, label: &'static str, wgsl: impl Into<Cow<'static, str>>) {
        self.sources.insert(label, wgsl.into());
    }

    pub fn get(&self, label: &str) -> Option<&Cow<'static, str>> {
        self.sources.get(label)
    }
}

struct WgpuShader {
    label: &'static str,
    pipeline: ComputePipeline,
    bind_group_layout: BindGroupLayout,
}

pub(crate) enum ExternalResource<'a> {
    Image(ImageProxy, &'a TextureView),
}

/// Buffers and images materialized on the device, kept across recordings
/// until freed.
#[derive(Default)]
struct BindMap {
    buf_map: HashMap<ResourceId, Buffer>,
    image_map: HashMap<ResourceId, (Texture, TextureView)>,
}

#[derive(Hash, PartialEq, Eq)]
struct BufferProperties {
    size: u64,
    usages: BufferUsages,
}

#[derive(Default)]
struct ResourcePool {
    bufs: HashMap<BufferProperties, Vec<Buffer>>,
}

/// Resources scoped to a single call of `run_recording()`.
#[derive(Default)]
struct TransientBindMap<'a> {
    images: HashMap<ResourceId, &'a TextureView>,
}

/// Runs recordings on a wgpu device.
#[derive(Default)]
pub(crate) struct WgpuEngine {
    shaders: Vec<WgpuShader>,
    pool: ResourcePool,
    bind_map: BindMap,
    downloads: HashMap<ResourceId, Buffer>,
}

impl WgpuEngine {
    /// Builds the compute pipeline of `kernel` from its entry in `sources`.
    pub fn add_compute_shader(
        &mut self,
        device: &Device,
        kernel: Kernel,
        sources: &KernelSources,
    ) -> Result<ShaderId> {
        let wgsl = sources
            .get(kernel.label)
            .ok_or(Error::MissingKernel(kernel.label))?;
        let entries = Self::create_bind_group_layout_entries(kernel.bindings);
        let shader = Self::create_compute_pipeline(device, kernel.label, wgsl.clone(), &entries);
        let id = self.shaders.len();
        self.shaders.push(shader);
        Ok(ShaderId(id))
    }

    pub fn run_recording(
        &mut self,
        device: &Device,
        queue: &Queue,
        recording: &Recording,
        external_resources: &[ExternalResource<'_>],
        label: &'static str,
    ) -> Result<()> {
        let mut free_bufs: HashSet<ResourceId> = HashSet::default();
        let mut free_images: HashSet<ResourceId> = HashSet::default();
        let transient_map = TransientBindMap::new(external_resources);

        let mut encoder =
            device.create_command_encoder(&CommandEncoderDescriptor { label: Some(label) });
        for command in &recording.commands {
            match command {
                Command::Upload(buf_proxy, bytes) => {
                    let usage = BufferUsages::COPY_SRC
                        | BufferUsages::COPY_DST
                        | BufferUsages::STORAGE
                        | BufferUsages::INDIRECT;
                    let buf = self
                        .pool
                        .get_buf(buf_proxy.size, buf_proxy.name, usage, device);
                    queue.write_buffer(&buf, 0, bytes);
                    self.bind_map.insert_buf(buf_proxy, buf);
                }
                Command::UploadUniform(buf_proxy, bytes) => {
                    let usage = BufferUsages::UNIFORM | BufferUsages::COPY_DST;
                    let buf = self
                        .pool
                        .get_buf(buf_proxy.size, buf_proxy.name, usage, device);
                    queue.write_buffer(&buf, 0, bytes);
                    self.bind_map.insert_buf(buf_proxy, buf);
                }
                Command::Dispatch(shader_id, wg_size, bindings) => {
                    let (x, y, z) = *wg_size;
                    if x == 0 || y == 0 || z == 0 {
                        continue;
                    }
                    let shader = self
                        .shaders
                        .get(shader_id.0)
                        .ok_or(Error::MissingKernel("unregistered shader"))?;
                    let bind_group = transient_map.create_bind_group(
                        &mut self.bind_map,
                        &mut self.pool,
                        device,
                        &mut encoder,
                        &shader.bind_group_layout,
                        bindings,
                    )?;
                    let mut cpass = encoder.begin_compute_pass(&ComputePassDescriptor {
                        label: Some(shader.label),
                        timestamp_writes: None,
                    });
                    cpass.set_pipeline(&shader.pipeline);
                    cpass.set_bind_group(0, &bind_group, &[]);
                    cpass.dispatch_workgroups(x, y, z);
                }
                Command::DispatchIndirect(shader_id, proxy, offset, bindings) => {
                    let shader = self
                        .shaders
                        .get(shader_id.0)
                        .ok_or(Error::MissingKernel("unregistered shader"))?;
                    let bind_group = transient_map.create_bind_group(
                        &mut self.bind_map,
                        &mut self.pool,
                        device,
                        &mut encoder,
                        &shader.bind_group_layout,
                        bindings,
                    )?;
                    let buf = self
                        .bind_map
                        .get_gpu_buf(proxy.id)
                        .ok_or(Error::UnavailableBufferUsed(proxy.name, "indirect dispatch"))?;
                    let mut cpass = encoder.begin_compute_pass(&ComputePassDescriptor {
                        label: Some(shader.label),
                        timestamp_writes: None,
                    });
                    cpass.set_pipeline(&shader.pipeline);
                    cpass.set_bind_group(0, &bind_group, &[]);
                    cpass.dispatch_workgroups_indirect(buf, *offset);
                }
                Command::Download(proxy) => {
                    let src_buf = self
                        .bind_map
                        .get_gpu_buf(proxy.id)
                        .ok_or(Error::UnavailableBufferUsed(proxy.name, "download"))?;
                    let usage = BufferUsages::MAP_READ | BufferUsages::COPY_DST;
                    let buf = self.pool.get_buf(proxy.size, "download", usage, device);
                    encoder.copy_buffer_to_buffer(src_buf, 0, &buf, 0, proxy.size);
                    self.downloads.insert(proxy.id, buf);
                }
                Command::Clear(proxy, offset, size) => {
                    let buf =
                        self.bind_map
                            .materialize_buf(proxy, &mut self.pool, device, &mut encoder);
                    encoder.clear_buffer(buf, *offset, *size);
                }
                Command::Copy(src, dst) => {
                    self.bind_map
                        .materialize_buf(dst, &mut self.pool, device, &mut encoder);
                    let src_buf = self
                        .bind_map
                        .get_gpu_buf(src.id)
                        .ok_or(Error::UnavailableBufferUsed(src.name, "copy"))?;
                    let dst_buf = self
                        .bind_map
                        .get_gpu_buf(dst.id)
                        .ok_or(Error::UnavailableBufferUsed(dst.name, "copy"))?;
                    encoder.copy_buffer_to_buffer(src_buf, 0, dst_buf, 0, src.size.min(dst.size));
                }
                Command::FreeBuffer(proxy) => {
                    free_bufs.insert(proxy.id);
                }
                Command::FreeImage(proxy) => {
                    free_images.insert(proxy.id);
                }
                Command::PushDebugGroup(group) => encoder.push_debug_group(group),
                Command::PopDebugGroup => encoder.pop_debug_group(),
            }
        }
        queue.submit(Some(encoder.finish()));
        for id in free_bufs {
            if let Some(buf) = self.bind_map.buf_map.remove(&id) {
                let props = BufferProperties {
                    size: buf.size(),
                    usages: buf.usage(),
                };
                self.pool.bufs.entry(props).or_default().push(buf);
            }
        }
        for id in free_images {
            self.bind_map.image_map.remove(&id);
        }
        Ok(())
    }

    /// The mapped-readable copy of `buf` made by its [`Command::Download`].
    pub fn get_download(&self, buf: BufferProxy) -> Option<&Buffer> {
        self.downloads.get(&buf.id)
    }

    pub fn free_download(&mut self, buf: BufferProxy) {
        self.downloads.remove(&buf.id);
    }

    fn create_bind_group_layout_entries(layout: &[BindType]) -> Vec<wgpu::BindGroupLayoutEntry> {
        let visibility = wgpu::ShaderStages::COMPUTE;
        layout
            .iter()
            .enumerate()
            .map(|(i, bind_type)| match bind_type {
                BindType::Buffer | BindType::BufReadOnly => wgpu::BindGroupLayoutEntry {
                    binding: i as u32,
                    visibility,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage {
                            read_only: *bind_type == BindType::BufReadOnly,
                        },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                BindType::Uniform => wgpu::BindGroupLayoutEntry {
                    binding: i as u32,
                    visibility,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                BindType::Image => wgpu::BindGroupLayoutEntry {
                    binding: i as u32,
                    visibility,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: IMAGE_FORMAT,
                        view_dimension: TextureViewDimension::D2,
                    },
                    count: None,
                },
            })
            .collect()
    }

    fn create_compute_pipeline(
        device: &Device,
        label: &'static str,
        wgsl: Cow<'static, str>,
        entries: &[wgpu::BindGroupLayoutEntry],
    ) -> WgpuShader {
        let shader_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(wgsl),
        });
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries,
        });
        let compute_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: None,
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(label),
            layout: Some(&compute_pipeline_layout),
            module: &shader_module,
            entry_point: Some("main"),
            compilation_options: PipelineCompilationOptions {
                zero_initialize_workgroup_memory: false,
                ..Default::default()
            },
            cache: None,
        });
        WgpuShader {
            label,
            pipeline,
            bind_group_layout,
        }
    }
}

impl BindMap {
    fn insert_buf(&mut self, proxy: &BufferProxy, buffer: Buffer) {
        self.buf_map.insert(proxy.id, buffer);
    }

    fn get_gpu_buf(&self, id: ResourceId) -> Option<&Buffer> {
        self.buf_map.get(&id)
    }

    /// Returns the buffer of `proxy`, creating it zeroed on first use.
    fn materialize_buf(
        &mut self,
        proxy: &BufferProxy,
        pool: &mut ResourcePool,
        device: &Device,
        encoder: &mut CommandEncoder,
    ) -> &Buffer {
        match self.buf_map.entry(proxy.id) {
            Entry::Occupied(occupied) => occupied.into_mut(),
            Entry::Vacant(vacant) => {
                let usage = BufferUsages::COPY_SRC
                    | BufferUsages::COPY_DST
                    | BufferUsages::STORAGE
                    | BufferUsages::INDIRECT;
                let buf = pool.get_buf(proxy.size, proxy.name, usage, device);
                // Pooled buffers keep the contents of their previous owner.
                encoder.clear_buffer(&buf, 0, None);
                vacant.insert(buf)
            }
        }
    }

    fn get_or_create_image(&mut self, proxy: ImageProxy, device: &Device) -> &TextureView {
        let (_, view) = self.image_map.entry(proxy.id).or_insert_with(|| {
            let texture = device.create_texture(&wgpu::TextureDescriptor {
                label: None,
                size: wgpu::Extent3d {
                    width: proxy.width,
                    height: proxy.height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                usage: TextureUsages::STORAGE_BINDING
                    | TextureUsages::TEXTURE_BINDING
                    | TextureUsages::COPY_SRC,
                format: IMAGE_FORMAT,
                view_formats: &[],
            });
            let view = texture.create_view(&wgpu::TextureViewDescriptor {
                dimension: Some(TextureViewDimension::D2),
                format: Some(IMAGE_FORMAT),
                ..Default::default()
            });
            (texture, view)
        });
        view
    }
}

const SIZE_CLASS_BITS: u32 = 1;

impl ResourcePool {
    /// Get a buffer from the pool or create one.
    ///
    /// Pooled buffers are shared by size class and usage, and keep the label
    /// they were created with.
    fn get_buf(
        &mut self,
        size: u64,
        name: &'static str,
        usage: BufferUsages,
        device: &Device,
    ) -> Buffer {
        let rounded_size = Self::size_class(size, SIZE_CLASS_BITS);
        let props = BufferProperties {
            size: rounded_size,
            usages: usage,
        };
        if let Some(buf) = self.bufs.get_mut(&props).and_then(Vec::pop) {
            return buf;
        }
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(name),
            size: rounded_size,
            usage,
            mapped_at_creation: false,
        })
    }

    /// Quantize a size up to the nearest size class.
    fn size_class(x: u64, bits: u32) -> u64 {
        if x > 1 << bits {
            let a = (x - 1).leading_zeros();
            let b = (x - 1) | (((u64::MAX / 2) >> bits) >> a);
            b + 1
        } else {
            1 << bits
        }
    }
}

impl<'a> TransientBindMap<'a> {
    /// Create new transient bind map, seeded from external resources
    fn new(external_resources: &'a [ExternalResource<'_>]) -> Self {
        let mut images = HashMap::default();
        for resource in external_resources {
            match resource {
                ExternalResource::Image(proxy, gpu_image) => {
                    images.insert(proxy.id, *gpu_image);
                }
            }
        }
        TransientBindMap { images }
    }

    fn create_bind_group(
        &self,
        bind_map: &mut BindMap,
        pool: &mut ResourcePool,
        device: &Device,
        encoder: &mut CommandEncoder,
        layout: &BindGroupLayout,
        bindings: &[ResourceProxy],
    ) -> Result<BindGroup> {
        for proxy in bindings {
            match proxy {
                ResourceProxy::Buffer(proxy) => {
                    bind_map.materialize_buf(proxy, pool, device, encoder);
                }
                ResourceProxy::Image(proxy) => {
                    if !self.images.contains_key(&proxy.id) {
                        bind_map.get_or_create_image(*proxy, device);
                    }
                }
            }
        }
        let entries = bindings
            .iter()
            .enumerate()
            .map(|(i, proxy)| {
                let resource = match proxy {
                    ResourceProxy::Buffer(proxy) => bind_map
                        .get_gpu_buf(proxy.id)
                        .ok_or(Error::UnavailableBufferUsed(proxy.name, "bind group"))?
                        .as_entire_binding(),
                    ResourceProxy::Image(proxy) => {
                        let view = self
                            .images
                            .get(&proxy.id)
                            .copied()
                            .or_else(|| bind_map.image_map.get(&proxy.id).map(|v| &v.1))
                            .ok_or(Error::UnavailableImageUsed("bind group"))?;
                        wgpu::BindingResource::TextureView(view)
                    }
                };
                Ok(wgpu::BindGroupEntry {
                    binding: i as u32,
                    resource,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout,
            entries: &entries,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::{KernelSources, ResourcePool};

    #[test]
    fn size_classes_round_up() {
        assert_eq!(ResourcePool::size_class(1, 1), 2);
        assert_eq!(ResourcePool::size_class(16, 1), 16);
        assert_eq!(ResourcePool::size_class(17, 1), 24);
        assert_eq!(ResourcePool::size_class(100, 1), 128);
    }

    #[test]
    fn sources_by_label() {
        let mut sources = KernelSources::new();
        sources.insert(strand_raster_shaders::CLEAR_U32.label, "@compute fn main() {}");
        assert!(sources.get("clear_u32").is_some());
        assert!(sources.get("raster_fine").is_none());
    }
}
