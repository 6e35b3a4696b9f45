//! # Host runtime
//!
//! A software `ComputeRuntime`. Textures are host grids, kernels run
//! data-parallel with rayon when a stream is synchronized, and every call
//! is journaled so tests can check ordering. Faults can be injected per
//! operation to exercise the error tiers.

use std::collections::{HashMap, HashSet, VecDeque};

use bevy::prelude::*;
use rayon::prelude::*;

use crate::config::EdgePolicy;
use crate::error::RuntimeError;
use crate::interop::{
    ArrayId, ComputeRuntime, DeviceId, MappedArray, Operation, RegisterFlags, ResourceDesc,
    ResourceId, StreamId, SurfaceId,
};
use crate::simulation::{Kernel, LaunchGeometry, rules};
use crate::world::Grid;

/// Handle of a grid uploaded to a `HostRuntime`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostTexture(usize);

#[derive(Debug)]
struct HostResource {
    texture: usize,
    mapped: bool,
}

#[derive(Debug, Clone, Copy)]
struct PendingLaunch {
    kernel: Kernel,
    geometry: LaunchGeometry,
    surface: SurfaceId,
}

pub struct HostRuntime {
    context_devices: Vec<DeviceId>,
    current_device: Option<DeviceId>,
    edge: EdgePolicy,
    faults: HashSet<Operation>,
    textures: Vec<Grid>,
    streams: HashMap<StreamId, VecDeque<PendingLaunch>>,
    resources: HashMap<ResourceId, HostResource>,
    arrays: HashMap<ArrayId, ResourceId>,
    surfaces: HashMap<SurfaceId, ArrayId>,
    next_handle: u32,
    journal: Vec<Operation>,
    executed: Vec<Kernel>,
}

impl Default for HostRuntime {
    fn default() -> Self {
        Self::with_context_devices(vec![DeviceId(0)])
    }
}

impl HostRuntime {
    /// Runtime whose graphics context reports the given devices
    pub fn with_context_devices(devices: Vec<DeviceId>) -> Self {
        Self {
            context_devices: devices,
            current_device: None,
            edge: EdgePolicy::default(),
            faults: HashSet::new(),
            textures: Vec::new(),
            streams: HashMap::new(),
            resources: HashMap::new(),
            arrays: HashMap::new(),
            surfaces: HashMap::new(),
            next_handle: 1,
            journal: Vec::new(),
            executed: Vec::new(),
        }
    }

    pub fn with_edge(mut self, edge: EdgePolicy) -> Self {
        self.edge = edge;
        self
    }

    /// Make every later call of `operation` fail
    pub fn fail_on(&mut self, operation: Operation) {
        self.faults.insert(operation);
    }

    pub fn clear_faults(&mut self) {
        self.faults.clear();
    }

    /// Hand a grid to the runtime as a graphics texture
    pub fn upload(&mut self, grid: Grid) -> HostTexture {
        self.textures.push(grid);
        HostTexture(self.textures.len() - 1)
    }

    /// Current contents of a texture, as the draw step would sample it
    pub fn texture(&self, texture: HostTexture) -> Option<&Grid> {
        self.textures.get(texture.0)
    }

    pub fn current_device(&self) -> Option<DeviceId> {
        self.current_device
    }

    /// Every runtime call made so far, in order
    pub fn journal(&self) -> &[Operation] {
        &self.journal
    }

    pub fn clear_journal(&mut self) {
        self.journal.clear();
    }

    /// Kernels that actually ran, in execution order
    pub fn executed(&self) -> &[Kernel] {
        &self.executed
    }

    pub fn live_streams(&self) -> usize {
        self.streams.len()
    }

    pub fn live_resources(&self) -> usize {
        self.resources.len()
    }

    pub fn live_mappings(&self) -> usize {
        self.resources.values().filter(|r| r.mapped).count()
    }

    pub fn live_surfaces(&self) -> usize {
        self.surfaces.len()
    }

    /// Journal the call and apply any injected fault
    fn enter(&mut self, operation: Operation) -> Result<(), RuntimeError> {
        self.journal.push(operation);
        if self.faults.contains(&operation) {
            return Err(RuntimeError::Injected);
        }
        Ok(())
    }

    fn next_handle(&mut self) -> u32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn require_device(&self) -> Result<(), RuntimeError> {
        match self.current_device {
            Some(_) => Ok(()),
            None => Err(RuntimeError::NoDeviceSelected),
        }
    }

    fn resource_mut(&mut self, resource: ResourceId) -> Result<&mut HostResource, RuntimeError> {
        self.resources
            .get_mut(&resource)
            .ok_or(RuntimeError::InvalidHandle {
                kind: "resource",
                id: resource.0,
            })
    }

    /// Texture index behind a surface, provided it is still mapped
    fn surface_texture(&self, surface: SurfaceId) -> Result<usize, RuntimeError> {
        let array = self.surfaces.get(&surface).ok_or(RuntimeError::InvalidHandle {
            kind: "surface",
            id: surface.0,
        })?;
        let resource_id = self.arrays.get(array).ok_or(RuntimeError::InvalidHandle {
            kind: "array",
            id: array.0,
        })?;
        let resource = self
            .resources
            .get(resource_id)
            .ok_or(RuntimeError::InvalidHandle {
                kind: "resource",
                id: resource_id.0,
            })?;
        if !resource.mapped {
            return Err(RuntimeError::NotMapped(resource_id.0));
        }
        Ok(resource.texture)
    }

    fn execute(&mut self, launch: PendingLaunch) -> Result<(), RuntimeError> {
        let texture = self
            .surface_texture(launch.surface)
            .map_err(|e| RuntimeError::LaunchFailed {
                kernel: launch.kernel,
                reason: e.to_string(),
            })?;
        let edge = self.edge;
        let grid = &mut self.textures[texture];
        let geometry = launch.geometry;

        match launch.kernel {
            Kernel::CalculateStep => {
                // Gather from the pre-launch grid, then write channel 1 only
                let snapshot: &Grid = grid;
                let staged: Vec<(usize, f32)> = (0..snapshot.cells().len())
                    .into_par_iter()
                    .filter_map(|idx| {
                        let pos = snapshot.position(idx);
                        geometry
                            .covers(pos)
                            .then(|| (idx, rules::calculate_step(snapshot, pos, edge).g))
                    })
                    .collect();
                let cells = grid.cells_mut();
                for (idx, g) in staged {
                    cells[idx].g = g;
                }
            }
            Kernel::UpdateTexture => {
                let width = grid.extent().x as usize;
                grid.cells_mut()
                    .par_iter_mut()
                    .enumerate()
                    .filter(|(idx, _)| {
                        geometry.covers(UVec2::new((idx % width) as u32, (idx / width) as u32))
                    })
                    .for_each(|(_, cell)| *cell = rules::update_texture(*cell));
            }
        }

        self.executed.push(launch.kernel);
        Ok(())
    }
}

impl ComputeRuntime for HostRuntime {
    type Texture = HostTexture;

    fn context_devices(&mut self) -> Result<Vec<DeviceId>, RuntimeError> {
        self.enter(Operation::EnumerateDevices)?;
        Ok(self.context_devices.clone())
    }

    fn set_device(&mut self, device: DeviceId) -> Result<(), RuntimeError> {
        self.enter(Operation::SetDevice)?;
        if !self.context_devices.contains(&device) {
            return Err(RuntimeError::ForeignDevice(device.0));
        }
        self.current_device = Some(device);
        Ok(())
    }

    fn create_stream(&mut self) -> Result<StreamId, RuntimeError> {
        self.enter(Operation::CreateStream)?;
        self.require_device()?;
        let id = StreamId(self.next_handle());
        self.streams.insert(id, VecDeque::new());
        Ok(id)
    }

    fn destroy_stream(&mut self, stream: StreamId) -> Result<(), RuntimeError> {
        self.enter(Operation::DestroyStream)?;
        self.streams
            .remove(&stream)
            .map(|_| ())
            .ok_or(RuntimeError::InvalidHandle {
                kind: "stream",
                id: stream.0,
            })
    }

    fn register_texture(
        &mut self,
        texture: &HostTexture,
        flags: RegisterFlags,
    ) -> Result<ResourceId, RuntimeError> {
        self.enter(Operation::RegisterResource)?;
        self.require_device()?;
        if texture.0 >= self.textures.len() {
            return Err(RuntimeError::InvalidHandle {
                kind: "texture",
                id: texture.0 as u32,
            });
        }
        if flags.contains(RegisterFlags::READ_ONLY) {
            return Err(RuntimeError::Unsupported(
                "kernels write the grid in place".to_string(),
            ));
        }
        let id = ResourceId(self.next_handle());
        self.resources.insert(
            id,
            HostResource {
                texture: texture.0,
                mapped: false,
            },
        );
        Ok(id)
    }

    fn map_resource(&mut self, resource: ResourceId) -> Result<(), RuntimeError> {
        self.enter(Operation::MapResource)?;
        let entry = self.resource_mut(resource)?;
        if entry.mapped {
            return Err(RuntimeError::AlreadyMapped(resource.0));
        }
        entry.mapped = true;
        Ok(())
    }

    fn mapped_array(&mut self, resource: ResourceId) -> Result<MappedArray, RuntimeError> {
        self.enter(Operation::GetMappedArray)?;
        let entry = self.resource_mut(resource)?;
        if !entry.mapped {
            return Err(RuntimeError::NotMapped(resource.0));
        }
        let texture = entry.texture;
        let extent = self.textures[texture].extent();
        let id = ArrayId(self.next_handle());
        self.arrays.insert(id, resource);
        Ok(MappedArray { id, extent })
    }

    fn create_surface(&mut self, desc: &ResourceDesc) -> Result<SurfaceId, RuntimeError> {
        self.enter(Operation::CreateSurface)?;
        let ResourceDesc::Array(array) = *desc;
        if !self.arrays.contains_key(&array) {
            return Err(RuntimeError::InvalidHandle {
                kind: "array",
                id: array.0,
            });
        }
        let id = SurfaceId(self.next_handle());
        self.surfaces.insert(id, array);
        Ok(id)
    }

    fn destroy_surface(&mut self, surface: SurfaceId) -> Result<(), RuntimeError> {
        self.enter(Operation::DestroySurface)?;
        self.surfaces
            .remove(&surface)
            .map(|_| ())
            .ok_or(RuntimeError::InvalidHandle {
                kind: "surface",
                id: surface.0,
            })
    }

    fn unmap_resource(&mut self, resource: ResourceId) -> Result<(), RuntimeError> {
        self.enter(Operation::UnmapResource)?;
        let entry = self.resource_mut(resource)?;
        if !entry.mapped {
            return Err(RuntimeError::NotMapped(resource.0));
        }
        entry.mapped = false;
        // Arrays only exist while mapped
        self.arrays.retain(|_, owner| *owner != resource);
        Ok(())
    }

    fn unregister_resource(&mut self, resource: ResourceId) -> Result<(), RuntimeError> {
        self.enter(Operation::UnregisterResource)?;
        if self.resource_mut(resource)?.mapped {
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
        self.enter(Operation::Launch)?;
        if !self.surfaces.contains_key(&surface) {
            return Err(RuntimeError::InvalidHandle {
                kind: "surface",
                id: surface.0,
            });
        }
        let queue = self.streams.get_mut(&stream).ok_or(RuntimeError::InvalidHandle {
            kind: "stream",
            id: stream.0,
        })?;
        queue.push_back(PendingLaunch {
            kernel,
            geometry,
            surface,
        });
        Ok(())
    }

    fn synchronize(&mut self, stream: StreamId) -> Result<(), RuntimeError> {
        let pending: Vec<PendingLaunch> = self
            .streams
            .get_mut(&stream)
            .ok_or(RuntimeError::InvalidHandle {
                kind: "stream",
                id: stream.0,
            })?
            .drain(..)
            .collect();

        // An injected fault loses the queued work, like a device reset would
        self.enter(Operation::Synchronize)?;

        for launch in pending {
            self.execute(launch)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interop::{acquire, bind};
    use crate::world::Pattern;

    fn blinker_grid() -> Grid {
        let mut grid = Grid::new(UVec2::splat(5));
        grid.stamp(Pattern::Blinker, UVec2::new(1, 1));
        grid
    }

    #[test]
    fn test_launch_waits_for_synchronize() {
        let mut runtime = HostRuntime::default();
        let texture = runtime.upload(blinker_grid());
        let stream = acquire(&mut runtime).unwrap();
        let binding = bind(&mut runtime, texture).unwrap();
        let geometry = LaunchGeometry::covering(binding.extent());

        runtime
            .launch(stream.id(), Kernel::CalculateStep, geometry, binding.surface())
            .unwrap();
        assert!(runtime.executed().is_empty());
        assert_eq!(runtime.texture(texture), Some(&blinker_grid()));

        runtime.synchronize(stream.id()).unwrap();
        assert_eq!(runtime.executed(), &[Kernel::CalculateStep]);
    }

    #[test]
    fn test_rule_pass_leaves_display_channels() {
        let mut runtime = HostRuntime::default();
        let texture = runtime.upload(blinker_grid());
        let stream = acquire(&mut runtime).unwrap();
        let binding = bind(&mut runtime, texture).unwrap();
        let geometry = LaunchGeometry::covering(binding.extent());

        runtime
            .launch(stream.id(), Kernel::CalculateStep, geometry, binding.surface())
            .unwrap();
        runtime.synchronize(stream.id()).unwrap();

        let before = blinker_grid();
        let after = runtime.texture(texture).unwrap();
        for (old, new) in before.cells().iter().zip(after.cells()) {
            assert_eq!((old.r, old.b, old.a), (new.r, new.b, new.a));
        }
        // Vertical phase is pending in channel 1
        assert_eq!(
            after.live_positions(),
            vec![UVec2::new(2, 1), UVec2::new(2, 2), UVec2::new(2, 3)]
        );
    }

    #[test]
    fn test_propagation_is_idempotent() {
        let mut runtime = HostRuntime::default();
        let texture = runtime.upload(blinker_grid());
        let stream = acquire(&mut runtime).unwrap();
        let binding = bind(&mut runtime, texture).unwrap();
        let geometry = LaunchGeometry::covering(binding.extent());

        for kernel in [Kernel::CalculateStep, Kernel::UpdateTexture] {
            runtime
                .launch(stream.id(), kernel, geometry, binding.surface())
                .unwrap();
        }
        runtime.synchronize(stream.id()).unwrap();
        let once = runtime.texture(texture).unwrap().clone();

        runtime
            .launch(stream.id(), Kernel::UpdateTexture, geometry, binding.surface())
            .unwrap();
        runtime.synchronize(stream.id()).unwrap();
        assert_eq!(runtime.texture(texture), Some(&once));
    }

    #[test]
    fn test_partial_geometry_skips_uncovered_cells() {
        let mut runtime = HostRuntime::default();
        let mut grid = Grid::new(UVec2::new(16, 8));
        grid.stamp(Pattern::Blinker, UVec2::new(10, 2));
        let texture = runtime.upload(grid.clone());
        let stream = acquire(&mut runtime).unwrap();
        let binding = bind(&mut runtime, texture).unwrap();

        // One 8x8 workgroup covers only the left half
        let geometry = LaunchGeometry::covering(UVec2::splat(8));
        runtime
            .launch(stream.id(), Kernel::CalculateStep, geometry, binding.surface())
            .unwrap();
        runtime.synchronize(stream.id()).unwrap();
        assert_eq!(runtime.texture(texture), Some(&grid));
    }

    #[test]
    fn test_launch_on_unknown_surface_is_rejected() {
        let mut runtime = HostRuntime::default();
        let stream = acquire(&mut runtime).unwrap();
        let err = runtime
            .launch(
                stream.id(),
                Kernel::UpdateTexture,
                LaunchGeometry::covering(UVec2::ONE),
                SurfaceId(99),
            )
            .unwrap_err();
        assert_eq!(
            err,
            RuntimeError::InvalidHandle {
                kind: "surface",
                id: 99
            }
        );
    }

    #[test]
    fn test_unmapped_surface_fails_at_synchronize() {
        let mut runtime = HostRuntime::default();
        let texture = runtime.upload(blinker_grid());
        let stream = acquire(&mut runtime).unwrap();
        let binding = bind(&mut runtime, texture).unwrap();
        let geometry = LaunchGeometry::covering(binding.extent());

        runtime
            .launch(stream.id(), Kernel::UpdateTexture, geometry, binding.surface())
            .unwrap();
        runtime.unmap_resource(binding.resource()).unwrap();

        let err = runtime.synchronize(stream.id()).unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::LaunchFailed {
                kernel: Kernel::UpdateTexture,
                ..
            }
        ));
    }

    #[test]
    fn test_register_requires_selected_device() {
        let mut runtime = HostRuntime::default();
        let texture = runtime.upload(blinker_grid());
        let err = runtime
            .register_texture(&texture, RegisterFlags::NONE)
            .unwrap_err();
        assert_eq!(err, RuntimeError::NoDeviceSelected);
    }

    #[test]
    fn test_read_only_registration_is_rejected() {
        let mut runtime = HostRuntime::default();
        let texture = runtime.upload(blinker_grid());
        acquire(&mut runtime).unwrap();
        let err = runtime
            .register_texture(&texture, RegisterFlags::READ_ONLY)
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Unsupported(_)));
        assert_eq!(runtime.live_resources(), 0);
    }

    #[test]
    fn test_foreign_device_is_rejected() {
        let mut runtime = HostRuntime::default();
        let err = runtime.set_device(DeviceId(7)).unwrap_err();
        assert_eq!(err, RuntimeError::ForeignDevice(7));
    }
}
