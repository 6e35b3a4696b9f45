use bevy::asset::load_internal_asset;
use bevy::prelude::*;
use bevy::render::extract_resource::{ExtractResource, ExtractResourcePlugin};
use bevy::render::render_asset::RenderAssets;
use bevy::render::render_resource::*;
use bevy::render::renderer::{RenderAdapter, RenderDevice, RenderQueue};
use bevy::render::texture::GpuImage;
use bevy::render::{Render, RenderApp, RenderSet};

use crate::config::{LifeSettings, SimulationControl};
use crate::error::{InteropError, RuntimeError};
use crate::interop::{
    GRID_FORMAT, GpuKernels, GpuRuntime, GpuTexture, InteropSession, Operation, SetupFailure,
    check_grid_support,
};
use crate::simulation::{Kernel, LIFE_SHADER_HANDLE};

/// The sprite texture the kernels run on
#[derive(Resource, Clone, ExtractResource)]
pub struct LifeTexture(pub Handle<Image>);

/// Render-world owner of the interop session
#[derive(Resource, Deref, DerefMut)]
pub struct GpuSession(InteropSession<GpuRuntime>);

/// Plugin stepping the grid on the GPU every frame
///
/// The session opens once the sprite texture has been uploaded and both
/// kernels have compiled. Stepping runs while bind groups are prepared,
/// before the render graph draws the sprite from the same texture.
pub struct LifeComputePlugin;

impl Plugin for LifeComputePlugin {
    fn build(&self, app: &mut App) {
        load_internal_asset!(
            app,
            LIFE_SHADER_HANDLE,
            "../../assets/shaders/life.wgsl",
            Shader::from_wgsl
        );

        app.init_resource::<SimulationControl>()
            .init_resource::<SetupFailure>()
            .add_plugins((
                ExtractResourcePlugin::<LifeTexture>::default(),
                ExtractResourcePlugin::<SimulationControl>::default(),
            ));

        let failure = app.world().resource::<SetupFailure>().clone();
        let settings = app
            .world()
            .get_resource::<LifeSettings>()
            .cloned()
            .unwrap_or_default();

        let Some(render_app) = app.get_sub_app_mut(RenderApp) else {
            return;
        };

        render_app
            .insert_resource(failure)
            .insert_resource(settings)
            .add_systems(
                Render,
                (prepare_interop_session, run_frame_step)
                    .chain()
                    .in_set(RenderSet::PrepareBindGroups),
            );

        info!("Life compute plugin initialized");
    }

    fn finish(&self, app: &mut App) {
        let Some(render_app) = app.get_sub_app_mut(RenderApp) else {
            return;
        };
        render_app.init_resource::<LifePipelines>();
    }
}

/// Kernel pipelines queued for compilation
#[derive(Resource)]
enum LifePipelines {
    Queued {
        layout: BindGroupLayout,
        calculate_step: CachedComputePipelineId,
        update_texture: CachedComputePipelineId,
    },
    /// The device cannot run the kernels; the failure has been reported
    Unsupported,
}

impl FromWorld for LifePipelines {
    fn from_world(world: &mut World) -> Self {
        let render_device = world.resource::<RenderDevice>();
        let render_adapter = world.resource::<RenderAdapter>();

        // Creating the read-write layout on an unsupported device would hit
        // wgpu's uncaptured error handler
        if let Err(e) = check_grid_support(
            render_adapter.get_texture_format_features(GRID_FORMAT),
            render_device.features(),
        ) {
            world
                .resource::<SetupFailure>()
                .report(InteropError::new(Operation::SetDevice, e));
            return LifePipelines::Unsupported;
        }

        let edge = world.resource::<LifeSettings>().edge;
        let layout = render_device.create_bind_group_layout(
            "life_grid_bind_group_layout",
            &BindGroupLayoutEntries::single(
                ShaderStages::COMPUTE,
                // Both kernels read and write the one grid texture in place
                texture_storage_2d(GRID_FORMAT, StorageTextureAccess::ReadWrite),
            ),
        );

        let pipeline_cache = world.resource::<PipelineCache>();
        let queue = |kernel: Kernel| {
            pipeline_cache.queue_compute_pipeline(ComputePipelineDescriptor {
                label: Some(kernel.label().into()),
                layout: vec![layout.clone()],
                push_constant_ranges: vec![],
                shader: LIFE_SHADER_HANDLE,
                shader_defs: edge.shader_defs(),
                entry_point: kernel.entry_point().into(),
                zero_initialize_workgroup_memory: false,
            })
        };
        let calculate_step = queue(Kernel::CalculateStep);
        let update_texture = queue(Kernel::UpdateTexture);

        info!("Life pipelines queued ({edge:?} edges)");
        LifePipelines::Queued {
            layout,
            calculate_step,
            update_texture,
        }
    }
}

impl LifePipelines {
    /// Both compiled pipelines, or `None` while either is still compiling
    fn resolve(&self, cache: &PipelineCache) -> Result<Option<GpuKernels>, InteropError> {
        let LifePipelines::Queued {
            layout,
            calculate_step,
            update_texture,
        } = self
        else {
            return Ok(None);
        };

        for id in [*calculate_step, *update_texture] {
            if let CachedPipelineState::Err(e) = cache.get_compute_pipeline_state(id) {
                return Err(InteropError::new(
                    Operation::LoadKernels,
                    RuntimeError::Kernel(e.to_string()),
                ));
            }
        }

        let (Some(calculate_step), Some(update_texture)) = (
            cache.get_compute_pipeline(*calculate_step),
            cache.get_compute_pipeline(*update_texture),
        ) else {
            return Ok(None);
        };

        Ok(Some(GpuKernels {
            layout: layout.clone(),
            calculate_step: calculate_step.clone(),
            update_texture: update_texture.clone(),
        }))
    }
}

/// Open the session once its inputs are ready
fn prepare_interop_session(
    mut commands: Commands,
    session: Option<Res<GpuSession>>,
    failure: Res<SetupFailure>,
    pipelines: Res<LifePipelines>,
    pipeline_cache: Res<PipelineCache>,
    texture: Option<Res<LifeTexture>>,
    gpu_images: Res<RenderAssets<GpuImage>>,
    render_device: Res<RenderDevice>,
    render_queue: Res<RenderQueue>,
    render_adapter: Res<RenderAdapter>,
) {
    if session.is_some() || failure.is_set() {
        return;
    }
    let Some(texture) = texture else {
        return;
    };
    let Some(image) = gpu_images.get(&texture.0) else {
        return;
    };

    let kernels = match pipelines.resolve(&pipeline_cache) {
        Ok(Some(kernels)) => kernels,
        Ok(None) => return,
        Err(e) => {
            failure.report(e);
            return;
        }
    };

    let runtime = GpuRuntime::new(
        render_device.clone(),
        render_queue.clone(),
        render_adapter.clone(),
        kernels,
    );
    match InteropSession::open(runtime, GpuTexture(image.texture.clone())) {
        Ok(session) => commands.insert_resource(GpuSession(session)),
        Err(e) => failure.report(e),
    }
}

/// Advance the grid by one generation unless paused
fn run_frame_step(session: Option<ResMut<GpuSession>>, control: Option<Res<SimulationControl>>) {
    let Some(mut session) = session else {
        return;
    };
    if control.is_some_and(|control| !control.enabled) {
        return;
    }
    session.step();
}

// Helper function for texture storage binding
fn texture_storage_2d(format: TextureFormat, access: StorageTextureAccess) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding: u32::MAX, // Sequential layout will assign this
        visibility: ShaderStages::COMPUTE,
        ty: BindingType::StorageTexture {
            access,
            format,
            view_dimension: TextureViewDimension::D2,
        },
        count: None,
    }
}
