//! Windowless runs on the host runtime

use bevy::prelude::*;

use crate::config::LifeSettings;
use crate::interop::{HostRuntime, HostTexture, InteropSession, SetupFailure};
use crate::simulation::FrameStatus;
use crate::world::seeded_grid;

/// Host-side session and the texture it steps
#[derive(Resource)]
struct HostSession {
    session: InteropSession<HostRuntime>,
    texture: HostTexture,
    degraded: u64,
}

/// Runs `LifeSettings::headless_frames` generations on the CPU, then exits
pub struct HeadlessLifePlugin;

impl Plugin for HeadlessLifePlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<SetupFailure>()
            .add_systems(Startup, open_host_session)
            .add_systems(Update, step_host_session);
    }
}

fn open_host_session(
    mut commands: Commands,
    settings: Res<LifeSettings>,
    failure: Res<SetupFailure>,
) {
    let mut runtime = HostRuntime::default().with_edge(settings.edge);
    if let Some(operation) = settings.host_fault {
        warn!("Injecting host runtime fault: {}", operation.name());
        runtime.fail_on(operation);
    }

    let grid = seeded_grid(&settings);
    info!(
        "Headless grid {}x{} seeded with {} live cell(s)",
        grid.extent().x,
        grid.extent().y,
        grid.population()
    );
    let texture = runtime.upload(grid);

    match InteropSession::open(runtime, texture) {
        Ok(session) => commands.insert_resource(HostSession {
            session,
            texture,
            degraded: 0,
        }),
        Err(e) => failure.report(e),
    }
}

fn step_host_session(
    host: Option<ResMut<HostSession>>,
    settings: Res<LifeSettings>,
    mut exits: EventWriter<AppExit>,
) {
    let Some(mut host) = host else {
        return;
    };
    let target = settings.headless_frames.unwrap_or_default();

    if host.session.frames() < target {
        if host.session.step() == FrameStatus::Degraded {
            host.degraded += 1;
        }
        return;
    }

    let population = host
        .session
        .runtime()
        .texture(host.texture)
        .map(|grid| grid.population())
        .unwrap_or_default();
    info!(
        "Headless run finished: {} frame(s), {} degraded, population {}",
        host.session.frames(),
        host.degraded,
        population
    );
    exits.write(AppExit::Success);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interop::{Operation, exit_on_setup_failure};
    use crate::world::Pattern;

    fn headless_app(settings: LifeSettings) -> App {
        let mut app = App::new();
        app.add_plugins(MinimalPlugins)
            .insert_resource(settings)
            .add_plugins(HeadlessLifePlugin)
            .add_systems(Update, exit_on_setup_failure);
        app
    }

    #[test]
    fn test_headless_runs_configured_frames() {
        let mut app = headless_app(LifeSettings {
            grid_size: 16,
            pattern: Some(Pattern::Blinker),
            headless_frames: Some(3),
            ..default()
        });

        for _ in 0..4 {
            app.update();
        }
        let host = app.world().resource::<HostSession>();
        assert_eq!(host.session.frames(), 3);
        assert_eq!(host.degraded, 0);
        let grid = host.session.runtime().texture(host.texture).unwrap();
        assert_eq!(grid.population(), 3);
        assert!(grid.is_consistent());
    }

    #[test]
    fn test_headless_setup_failure_is_recorded() {
        let mut app = headless_app(LifeSettings {
            grid_size: 16,
            headless_frames: Some(3),
            host_fault: Some(Operation::MapResource),
            ..default()
        });

        app.update();
        assert!(app.world().get_resource::<HostSession>().is_none());
        let failure = app.world().resource::<SetupFailure>();
        assert_eq!(failure.get().unwrap().operation, Operation::MapResource);
    }
}
