use std::time::Duration;

use bevy::{
    app::ScheduleRunnerPlugin,
    diagnostic::{FrameTimeDiagnosticsPlugin, LogDiagnosticsPlugin},
    log::LogPlugin,
    prelude::*,
    window::PresentMode,
};

mod config;
mod error;
mod headless;
mod interop;
mod simulation;
mod world;

use config::{LifeSettings, SimulationControl};
use headless::HeadlessLifePlugin;
use interop::{SetupFailure, exit_on_setup_failure};
use simulation::{LifeComputePlugin, LifeTexture};
use world::{create_grid_texture, seeded_grid};

fn main() -> AppExit {
    let settings = match LifeSettings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{e}");
            return AppExit::from_code(e.exit_code());
        }
    };

    let mut app = App::new();

    if settings.headless_frames.is_some() {
        app.add_plugins((
            MinimalPlugins.set(ScheduleRunnerPlugin::run_loop(Duration::ZERO)),
            LogPlugin::default(),
        ))
        .insert_resource(settings)
        .add_plugins(HeadlessLifePlugin);
    } else {
        let size = settings.grid_size as f32;
        app.add_plugins(DefaultPlugins.set(WindowPlugin {
            primary_window: Some(Window {
                title: "Game of Life".into(),
                resolution: (size, size).into(),
                present_mode: PresentMode::AutoVsync,
                ..default()
            }),
            ..default()
        }))
        .add_plugins((
            FrameTimeDiagnosticsPlugin::default(),
            LogDiagnosticsPlugin::default(),
        ))
        .insert_resource(ClearColor(Color::BLACK))
        .insert_resource(settings)
        .add_plugins(LifeComputePlugin)
        .add_systems(Startup, setup)
        .add_systems(Update, toggle_simulation);
    }

    app.add_systems(Update, exit_on_setup_failure).run()
}

fn setup(
    mut commands: Commands,
    settings: Res<LifeSettings>,
    failure: Res<SetupFailure>,
    mut images: ResMut<Assets<Image>>,
) {
    // The render world rejected the device; drawing the grid would fail too
    if failure.is_set() {
        return;
    }

    commands.spawn(Camera2d);

    let grid = seeded_grid(&settings);
    info!(
        "Grid {}x{} seeded with {} live cell(s)",
        grid.extent().x,
        grid.extent().y,
        grid.population()
    );
    let texture = create_grid_texture(&grid, &mut images);

    commands.spawn(Sprite {
        image: texture.clone(),
        custom_size: Some(grid.extent().as_vec2()),
        ..default()
    });
    commands.insert_resource(LifeTexture(texture));
}

/// Space pauses and resumes the simulation
fn toggle_simulation(keys: Res<ButtonInput<KeyCode>>, mut control: ResMut<SimulationControl>) {
    if keys.just_pressed(KeyCode::Space) {
        control.enabled = !control.enabled;
        info!(
            "Simulation {}",
            if control.enabled { "resumed" } else { "paused" }
        );
    }
}
