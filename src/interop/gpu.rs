//! # GPU runtime
//!
//! `ComputeRuntime` on the renderer's own wgpu device. Compute and graphics
//! share one device and queue, so the sprite texture is written in place:
//!
//! - mapping creates a read/write storage view of the texture
//! - the surface object is a bind group over that view
//! - a launch encodes one compute pass and submits it to the render queue
//! - synchronize waits for the last submission of the stream
//!
//! Validation errors are captured with error scopes instead of reaching
//! wgpu's uncaptured error handler.

use std::collections::HashMap;
use std::fmt;

use bevy::prelude::*;
use bevy::render::render_resource::*;
use bevy::render::renderer::{RenderAdapter, RenderDevice, RenderQueue};

use crate::error::RuntimeError;
use crate::interop::{
    ArrayId, ComputeRuntime, DeviceId, MappedArray, RegisterFlags, ResourceDesc, ResourceId,
    StreamId, SurfaceId,
};
use crate::simulation::{Kernel, LaunchGeometry};

/// Texel format of the grid texture
pub const GRID_FORMAT: TextureFormat = TextureFormat::Rgba32Float;

/// The one device bevy created the renderer on
const CONTEXT_DEVICE: DeviceId = DeviceId(0);

/// Check that a device can run the kernels on a `GRID_FORMAT` texture and
/// that the sprite can sample it
///
/// Read-write storage of `Rgba32Float` is an adapter-specific format
/// feature, and sampling it through the sprite's filterable binding needs
/// `FLOAT32_FILTERABLE`.
pub fn check_grid_support(
    format: wgpu::TextureFormatFeatures,
    device: wgpu::Features,
) -> Result<(), RuntimeError> {
    if !format
        .flags
        .contains(wgpu::TextureFormatFeatureFlags::STORAGE_READ_WRITE)
        || !format.allowed_usages.contains(TextureUsages::STORAGE_BINDING)
    {
        return Err(RuntimeError::Unsupported(format!(
            "adapter cannot read-write {GRID_FORMAT:?} storage textures"
        )));
    }
    if !device.contains(wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES) {
        return Err(RuntimeError::Unsupported(
            "render device was created without adapter-specific format features".to_string(),
        ));
    }
    if !device.contains(wgpu::Features::FLOAT32_FILTERABLE) {
        return Err(RuntimeError::Unsupported(format!(
            "render device cannot filter {GRID_FORMAT:?} textures"
        )));
    }
    Ok(())
}

/// A graphics texture offered for registration
#[derive(Clone)]
pub struct GpuTexture(pub Texture);

impl fmt::Debug for GpuTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let size = self.0.size();
        write!(
            f,
            "GpuTexture({:?}, {}x{} {:?})",
            self.0.id(),
            size.width,
            size.height,
            self.0.format()
        )
    }
}

/// Compiled kernel pair and the layout of its single storage binding
#[derive(Clone)]
pub struct GpuKernels {
    pub layout: BindGroupLayout,
    pub calculate_step: ComputePipeline,
    pub update_texture: ComputePipeline,
}

impl GpuKernels {
    fn pipeline(&self, kernel: Kernel) -> &ComputePipeline {
        match kernel {
            Kernel::CalculateStep => &self.calculate_step,
            Kernel::UpdateTexture => &self.update_texture,
        }
    }
}

struct GpuResource {
    texture: Texture,
    view: Option<TextureView>,
}

pub struct GpuRuntime {
    device: RenderDevice,
    queue: RenderQueue,
    adapter: RenderAdapter,
    kernels: GpuKernels,
    current_device: Option<DeviceId>,
    /// Last submission of each stream
    streams: HashMap<StreamId, Option<wgpu::SubmissionIndex>>,
    resources: HashMap<ResourceId, GpuResource>,
    arrays: HashMap<ArrayId, ResourceId>,
    surfaces: HashMap<SurfaceId, BindGroup>,
    next_handle: u32,
}

impl GpuRuntime {
    pub fn new(
        device: RenderDevice,
        queue: RenderQueue,
        adapter: RenderAdapter,
        kernels: GpuKernels,
    ) -> Self {
        Self {
            device,
            queue,
            adapter,
            kernels,
            current_device: None,
            streams: HashMap::new(),
            resources: HashMap::new(),
            arrays: HashMap::new(),
            surfaces: HashMap::new(),
            next_handle: 1,
        }
    }

    fn next_handle(&mut self) -> u32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    /// Run `f` inside a validation error scope
    fn scoped<T>(&self, f: impl FnOnce(&Self) -> T) -> Result<T, RuntimeError> {
        let device = self.device.wgpu_device();
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f(self);
        match bevy::tasks::block_on(device.pop_error_scope()) {
            None => Ok(value),
            Some(e) => Err(RuntimeError::Device(e.to_string())),
        }
    }

    fn resource(&self, resource: ResourceId) -> Result<&GpuResource, RuntimeError> {
        self.resources
            .get(&resource)
            .ok_or(RuntimeError::InvalidHandle {
                kind: "resource",
                id: resource.0,
            })
    }

    fn resource_mut(&mut self, resource: ResourceId) -> Result<&mut GpuResource, RuntimeError> {
        self.resources
            .get_mut(&resource)
            .ok_or(RuntimeError::InvalidHandle {
                kind: "resource",
                id: resource.0,
            })
    }
}

impl ComputeRuntime for GpuRuntime {
    type Texture = GpuTexture;

    fn context_devices(&mut self) -> Result<Vec<DeviceId>, RuntimeError> {
        let info = self.adapter.get_info();
        debug!(
            "Graphics context adapter: {} ({:?}, {:?})",
            info.name, info.device_type, info.backend
        );
        Ok(vec![CONTEXT_DEVICE])
    }

    fn set_device(&mut self, device: DeviceId) -> Result<(), RuntimeError> {
        if device != CONTEXT_DEVICE {
            return Err(RuntimeError::ForeignDevice(device.0));
        }

        check_grid_support(
            self.adapter.get_texture_format_features(GRID_FORMAT),
            self.device.features(),
        )?;

        self.current_device = Some(device);
        Ok(())
    }

    fn create_stream(&mut self) -> Result<StreamId, RuntimeError> {
        if self.current_device.is_none() {
            return Err(RuntimeError::NoDeviceSelected);
        }
        let id = StreamId(self.next_handle());
        self.streams.insert(id, None);
        Ok(id)
    }

    fn destroy_stream(&mut self, stream: StreamId) -> Result<(), RuntimeError> {
        match self.streams.remove(&stream) {
            Some(Some(index)) => {
                // Never free a stream with work in flight
                self.device
                    .wgpu_device()
                    .poll(wgpu::Maintain::wait_for(index));
                Ok(())
            }
            Some(None) => Ok(()),
            None => Err(RuntimeError::InvalidHandle {
                kind: "stream",
                id: stream.0,
            }),
        }
    }

    fn register_texture(
        &mut self,
        texture: &GpuTexture,
        flags: RegisterFlags,
    ) -> Result<ResourceId, RuntimeError> {
        if self.current_device.is_none() {
            return Err(RuntimeError::NoDeviceSelected);
        }
        if flags.contains(RegisterFlags::READ_ONLY) {
            return Err(RuntimeError::Unsupported(
                "kernels write the grid in place".to_string(),
            ));
        }

        let inner = &texture.0;
        if inner.dimension() != TextureDimension::D2 || inner.depth_or_array_layers() != 1 {
            return Err(RuntimeError::Unsupported(format!(
                "expected a single 2D texture, got {:?} with {} layer(s)",
                inner.dimension(),
                inner.depth_or_array_layers()
            )));
        }
        if inner.format() != GRID_FORMAT {
            return Err(RuntimeError::Unsupported(format!(
                "expected {GRID_FORMAT:?}, got {:?}",
                inner.format()
            )));
        }
        if !inner.usage().contains(TextureUsages::STORAGE_BINDING) {
            return Err(RuntimeError::Unsupported(
                "texture was created without STORAGE_BINDING usage".to_string(),
            ));
        }

        let id = ResourceId(self.next_handle());
        self.resources.insert(
            id,
            GpuResource {
                texture: texture.0.clone(),
                view: None,
            },
        );
        Ok(id)
    }

    fn map_resource(&mut self, resource: ResourceId) -> Result<(), RuntimeError> {
        let entry = self.resource(resource)?;
        if entry.view.is_some() {
            return Err(RuntimeError::AlreadyMapped(resource.0));
        }
        let texture = entry.texture.clone();
        let view = self.scoped(|_| {
            texture.create_view(&TextureViewDescriptor {
                label: Some("life_grid_storage_view"),
                format: Some(GRID_FORMAT),
                dimension: Some(TextureViewDimension::D2),
                ..default()
            })
        })?;
        self.resource_mut(resource)?.view = Some(view);
        Ok(())
    }

    fn mapped_array(&mut self, resource: ResourceId) -> Result<MappedArray, RuntimeError> {
        let entry = self.resource(resource)?;
        if entry.view.is_none() {
            return Err(RuntimeError::NotMapped(resource.0));
        }
        let extent = UVec2::new(entry.texture.width(), entry.texture.height());
        let id = ArrayId(self.next_handle());
        self.arrays.insert(id, resource);
        Ok(MappedArray { id, extent })
    }

    fn create_surface(&mut self, desc: &ResourceDesc) -> Result<SurfaceId, RuntimeError> {
        let ResourceDesc::Array(array) = *desc;
        let resource = *self.arrays.get(&array).ok_or(RuntimeError::InvalidHandle {
            kind: "array",
            id: array.0,
        })?;
        let view = self
            .resource(resource)?
            .view
            .clone()
            .ok_or(RuntimeError::NotMapped(resource.0))?;

        let bind_group = self.scoped(|runtime| {
            runtime.device.create_bind_group(
                "life_grid_bind_group",
                &runtime.kernels.layout,
                &BindGroupEntries::single(&view),
            )
        })?;

        let id = SurfaceId(self.next_handle());
        self.surfaces.insert(id, bind_group);
        Ok(id)
    }

    fn destroy_surface(&mut self, surface: SurfaceId) -> Result<(), RuntimeError> {
        self.surfaces
            .remove(&surface)
            .map(|_| ())
            .ok_or(RuntimeError::InvalidHandle {
                kind: "surface",
                id: surface.0,
            })
    }

    fn unmap_resource(&mut self, resource: ResourceId) -> Result<(), RuntimeError> {
        let entry = self.resource_mut(resource)?;
        if entry.view.take().is_none() {
            return Err(RuntimeError::NotMapped(resource.0));
        }
        self.arrays.retain(|_, owner| *owner != resource);
        Ok(())
    }

    fn unregister_resource(&mut self, resource: ResourceId) -> Result<(), RuntimeError> {
        if self.resource(resource)?.view.is_some() {
            return Err(RuntimeError::StillMapped(resource.0));
        }
        self.resources.remove(&resource);
        Ok(())
    }

    fn launch(
        &mut self,
        stream: StreamId,
        kernel: Kernel,
        geometry: LaunchGeometry,
        surface: SurfaceId,
    ) -> Result<(), RuntimeError> {
        if !self.streams.contains_key(&stream) {
            return Err(RuntimeError::InvalidHandle {
                kind: "stream",
                id: stream.0,
            });
        }
        let bind_group = self.surfaces.get(&surface).ok_or(RuntimeError::InvalidHandle {
            kind: "surface",
            id: surface.0,
        })?;

        let index = self
            .scoped(|runtime| {
                let mut encoder = runtime
                    .device
                    .create_command_encoder(&CommandEncoderDescriptor {
                        label: Some(kernel.label()),
                    });
                {
                    let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
                        label: Some(kernel.label()),
                        timestamp_writes: None,
                    });
                    pass.set_pipeline(runtime.kernels.pipeline(kernel));
                    pass.set_bind_group(0, bind_group, &[]);
                    pass.dispatch_workgroups(geometry.workgroups.x, geometry.workgroups.y, 1);
                }
                // One submission per kernel: the queue orders them with a full barrier
                runtime.queue.submit([encoder.finish()])
            })
            .map_err(|e| RuntimeError::LaunchFailed {
                kernel,
                reason: e.to_string(),
            })?;

        self.streams.insert(stream, Some(index));
        Ok(())
    }

    fn synchronize(&mut self, stream: StreamId) -> Result<(), RuntimeError> {
        let pending = self
            .streams
            .get_mut(&stream)
            .ok_or(RuntimeError::InvalidHandle {
                kind: "stream",
                id: stream.0,
            })?
            .take();
        let Some(index) = pending else {
            return Ok(());
        };

        self.scoped(|runtime| {
            runtime
                .device
                .wgpu_device()
                .poll(wgpu::Maintain::wait_for(index));
        })
    }
}
