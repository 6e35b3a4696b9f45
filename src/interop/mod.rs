//! # Compute/graphics interop
//!
//! The simulation never copies the grid through host memory. The texture
//! the renderer draws is registered with a compute runtime, mapped, and
//! exposed to the kernels as a surface object. `ComputeRuntime` is the
//! seam between that lifecycle and a concrete runtime:
//!
//! - `GpuRuntime` drives the renderer's own wgpu device and queue
//! - `HostRuntime` executes the kernels on the CPU with rayon
//!
//! Setup (`device::acquire`, `surface::bind`) is all-or-nothing and its
//! failures are fatal. Teardown (`surface::unbind`, `device::release`) is
//! best effort and only logs.

pub mod device;
pub mod gpu;
pub mod host;
pub mod session;
pub mod surface;

pub use device::*;
pub use gpu::*;
pub use host::*;
pub use session::*;
pub use surface::*;

use bevy::prelude::*;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use crate::error::{InteropError, RuntimeError};
use crate::simulation::{Kernel, LaunchGeometry};

/// Device reported for the active graphics context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArrayId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceId(pub u32);

/// Access hints for registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegisterFlags(u32);

impl RegisterFlags {
    /// Kernels both read and write the resource
    pub const NONE: RegisterFlags = RegisterFlags(0);
    pub const READ_ONLY: RegisterFlags = RegisterFlags(1);

    pub fn contains(&self, other: RegisterFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Mapped memory of a registered resource, with its texel extent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedArray {
    pub id: ArrayId,
    pub extent: UVec2,
}

/// Description of the memory a surface object wraps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceDesc {
    Array(ArrayId),
}

/// The compute side of a graphics/compute interop
///
/// Handles are plain ids; a runtime owns the objects behind them and
/// rejects ids it does not know. Calls that a kernel launch depends on
/// must be made in order: register, map, mapped array, create surface.
pub trait ComputeRuntime {
    /// Graphics-owned texture handle accepted by `register_texture`
    type Texture: Clone + fmt::Debug;

    /// Devices backing the currently active graphics context
    fn context_devices(&mut self) -> Result<Vec<DeviceId>, RuntimeError>;

    /// Pin all following work to `device`
    fn set_device(&mut self, device: DeviceId) -> Result<(), RuntimeError>;

    fn create_stream(&mut self) -> Result<StreamId, RuntimeError>;

    fn destroy_stream(&mut self, stream: StreamId) -> Result<(), RuntimeError>;

    fn register_texture(
        &mut self,
        texture: &Self::Texture,
        flags: RegisterFlags,
    ) -> Result<ResourceId, RuntimeError>;

    fn map_resource(&mut self, resource: ResourceId) -> Result<(), RuntimeError>;

    fn mapped_array(&mut self, resource: ResourceId) -> Result<MappedArray, RuntimeError>;

    fn create_surface(&mut self, desc: &ResourceDesc) -> Result<SurfaceId, RuntimeError>;

    fn destroy_surface(&mut self, surface: SurfaceId) -> Result<(), RuntimeError>;

    fn unmap_resource(&mut self, resource: ResourceId) -> Result<(), RuntimeError>;

    fn unregister_resource(&mut self, resource: ResourceId) -> Result<(), RuntimeError>;

    /// Enqueue a kernel; execution errors surface at `synchronize`
    fn launch(
        &mut self,
        stream: StreamId,
        kernel: Kernel,
        geometry: LaunchGeometry,
        surface: SurfaceId,
    ) -> Result<(), RuntimeError>;

    /// Block until all work queued on `stream` has finished
    fn synchronize(&mut self, stream: StreamId) -> Result<(), RuntimeError>;
}

impl<R: ComputeRuntime + ?Sized> ComputeRuntime for &mut R {
    type Texture = R::Texture;

    fn context_devices(&mut self) -> Result<Vec<DeviceId>, RuntimeError> {
        (**self).context_devices()
    }

    fn set_device(&mut self, device: DeviceId) -> Result<(), RuntimeError> {
        (**self).set_device(device)
    }

    fn create_stream(&mut self) -> Result<StreamId, RuntimeError> {
        (**self).create_stream()
    }

    fn destroy_stream(&mut self, stream: StreamId) -> Result<(), RuntimeError> {
        (**self).destroy_stream(stream)
    }

    fn register_texture(
        &mut self,
        texture: &Self::Texture,
        flags: RegisterFlags,
    ) -> Result<ResourceId, RuntimeError> {
        (**self).register_texture(texture, flags)
    }

    fn map_resource(&mut self, resource: ResourceId) -> Result<(), RuntimeError> {
        (**self).map_resource(resource)
    }

    fn mapped_array(&mut self, resource: ResourceId) -> Result<MappedArray, RuntimeError> {
        (**self).mapped_array(resource)
    }

    fn create_surface(&mut self, desc: &ResourceDesc) -> Result<SurfaceId, RuntimeError> {
        (**self).create_surface(desc)
    }

    fn destroy_surface(&mut self, surface: SurfaceId) -> Result<(), RuntimeError> {
        (**self).destroy_surface(surface)
    }

    fn unmap_resource(&mut self, resource: ResourceId) -> Result<(), RuntimeError> {
        (**self).unmap_resource(resource)
    }

    fn unregister_resource(&mut self, resource: ResourceId) -> Result<(), RuntimeError> {
        (**self).unregister_resource(resource)
    }

    fn launch(
        &mut self,
        stream: StreamId,
        kernel: Kernel,
        geometry: LaunchGeometry,
        surface: SurfaceId,
    ) -> Result<(), RuntimeError> {
        (**self).launch(stream, kernel, geometry, surface)
    }

    fn synchronize(&mut self, stream: StreamId) -> Result<(), RuntimeError> {
        (**self).synchronize(stream)
    }
}

/// Interop operations, used to label failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    EnumerateDevices,
    SetDevice,
    CreateStream,
    DestroyStream,
    RegisterResource,
    MapResource,
    GetMappedArray,
    CreateSurface,
    DestroySurface,
    UnmapResource,
    UnregisterResource,
    LoadKernels,
    Launch,
    Synchronize,
}

impl Operation {
    pub const ALL: [Operation; 14] = [
        Operation::EnumerateDevices,
        Operation::SetDevice,
        Operation::CreateStream,
        Operation::DestroyStream,
        Operation::RegisterResource,
        Operation::MapResource,
        Operation::GetMappedArray,
        Operation::CreateSurface,
        Operation::DestroySurface,
        Operation::UnmapResource,
        Operation::UnregisterResource,
        Operation::LoadKernels,
        Operation::Launch,
        Operation::Synchronize,
    ];

    /// Setup operations; the run cannot continue without them
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Operation::EnumerateDevices
                | Operation::SetDevice
                | Operation::CreateStream
                | Operation::RegisterResource
                | Operation::MapResource
                | Operation::GetMappedArray
                | Operation::CreateSurface
                | Operation::LoadKernels
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::EnumerateDevices => "enumerate-devices",
            Operation::SetDevice => "set-device",
            Operation::CreateStream => "create-stream",
            Operation::DestroyStream => "destroy-stream",
            Operation::RegisterResource => "register-resource",
            Operation::MapResource => "map-resource",
            Operation::GetMappedArray => "get-mapped-array",
            Operation::CreateSurface => "create-surface",
            Operation::DestroySurface => "destroy-surface",
            Operation::UnmapResource => "unmap-resource",
            Operation::UnregisterResource => "unregister-resource",
            Operation::LoadKernels => "load-kernels",
            Operation::Launch => "launch",
            Operation::Synchronize => "synchronize",
        }
    }

    fn diagnostic(&self) -> &'static str {
        match self {
            Operation::EnumerateDevices => "Failed to enumerate compute devices",
            Operation::SetDevice => "Failed to set compute device",
            Operation::CreateStream => "Failed to create compute stream",
            Operation::DestroyStream => "Failed to destroy compute stream",
            Operation::RegisterResource => "Failed to register texture",
            Operation::MapResource => "Failed to map texture resource",
            Operation::GetMappedArray => "Failed to get mapped array of texture resource",
            Operation::CreateSurface => "Failed to create surface object",
            Operation::DestroySurface => "Failed to destroy surface object",
            Operation::UnmapResource => "Failed to unmap texture resource",
            Operation::UnregisterResource => "Failed to unregister texture resource",
            Operation::LoadKernels => "Failed to load simulation kernels",
            Operation::Launch => "Failed to launch kernel",
            Operation::Synchronize => "Failed to synchronize compute stream",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.diagnostic())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown operation {s:?}"))
    }
}

/// First fatal setup failure of the run
///
/// Shared between the main and render worlds: the render world cannot
/// send `AppExit`, so it records the failure here and the main world
/// turns it into an exit code.
#[derive(Resource, Clone, Default)]
pub struct SetupFailure(Arc<OnceLock<InteropError>>);

impl SetupFailure {
    /// Record a fatal failure; later reports are dropped
    pub fn report(&self, err: InteropError) {
        error!("{err}");
        let _ = self.0.set(err);
    }

    pub fn get(&self) -> Option<&InteropError> {
        self.0.get()
    }

    pub fn is_set(&self) -> bool {
        self.0.get().is_some()
    }
}

/// Exit the app once a setup failure has been recorded
pub fn exit_on_setup_failure(failure: Res<SetupFailure>, mut exits: EventWriter<AppExit>) {
    if let Some(err) = failure.get() {
        exits.write(AppExit::from_code(err.exit_code()));
    }
}
