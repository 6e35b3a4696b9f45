use bevy::prelude::*;

use crate::error::InteropError;
use crate::interop::{
    ArrayId, ComputeRuntime, Operation, RegisterFlags, ResourceDesc, ResourceId, SurfaceId,
};

/// A texture registered, mapped and wrapped in a surface object
///
/// Exclusively owned by whoever called `bind`; `unbind` consumes it, so
/// the handles cannot outlive teardown or be released twice.
#[derive(Debug)]
pub struct Binding<T> {
    texture: T,
    resource: ResourceId,
    array: ArrayId,
    surface: SurfaceId,
    extent: UVec2,
}

impl<T> Binding<T> {
    pub fn texture(&self) -> &T {
        &self.texture
    }

    pub fn resource(&self) -> ResourceId {
        self.resource
    }

    pub fn array(&self) -> ArrayId {
        self.array
    }

    pub fn surface(&self) -> SurfaceId {
        self.surface
    }

    /// Texel extent of the mapped array
    pub fn extent(&self) -> UVec2 {
        self.extent
    }
}

/// Make a graphics texture addressable by the kernels
///
/// Registers the texture for read/write access, maps it, fetches the
/// mapped array and wraps it in a surface object. A failed step undoes
/// the steps before it, so an error never leaves a live mapping behind.
pub fn bind<R: ComputeRuntime>(
    runtime: &mut R,
    texture: R::Texture,
) -> Result<Binding<R::Texture>, InteropError> {
    let resource = runtime
        .register_texture(&texture, RegisterFlags::NONE)
        .map_err(|e| InteropError::new(Operation::RegisterResource, e))?;

    if let Err(e) = runtime.map_resource(resource) {
        unregister(runtime, resource);
        return Err(InteropError::new(Operation::MapResource, e));
    }

    let array = match runtime.mapped_array(resource) {
        Ok(array) => array,
        Err(e) => {
            unmap(runtime, resource);
            unregister(runtime, resource);
            return Err(InteropError::new(Operation::GetMappedArray, e));
        }
    };

    let surface = match runtime.create_surface(&ResourceDesc::Array(array.id)) {
        Ok(surface) => surface,
        Err(e) => {
            unmap(runtime, resource);
            unregister(runtime, resource);
            return Err(InteropError::new(Operation::CreateSurface, e));
        }
    };

    info!(
        "Texture {:?} bound as surface {} ({}x{})",
        texture, surface.0, array.extent.x, array.extent.y
    );

    Ok(Binding {
        texture,
        resource,
        array: array.id,
        surface,
        extent: array.extent,
    })
}

/// Release a binding in reverse order of acquisition
///
/// Destroys the surface, unmaps, then unregisters. Every step runs even
/// if an earlier one failed.
pub fn unbind<R: ComputeRuntime>(runtime: &mut R, binding: Binding<R::Texture>) {
    if let Err(e) = runtime.destroy_surface(binding.surface) {
        error!("{}", InteropError::new(Operation::DestroySurface, e));
    }
    unmap(runtime, binding.resource);
    unregister(runtime, binding.resource);
    debug!("Surface {} unbound", binding.surface.0);
}

fn unmap<R: ComputeRuntime>(runtime: &mut R, resource: ResourceId) {
    if let Err(e) = runtime.unmap_resource(resource) {
        error!("{}", InteropError::new(Operation::UnmapResource, e));
    }
}

fn unregister<R: ComputeRuntime>(runtime: &mut R, resource: ResourceId) {
    if let Err(e) = runtime.unregister_resource(resource) {
        error!("{}", InteropError::new(Operation::UnregisterResource, e));
    }
}
