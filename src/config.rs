use bevy::prelude::*;
use bevy::render::extract_resource::ExtractResource;
use bevy::render::render_resource::ShaderDefVal;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::interop::Operation;
use crate::world::Pattern;

/// Grid edge length used by the reference deployment
pub const DEFAULT_GRID_SIZE: u32 = 1024;

/// Largest accepted grid edge; wgpu's default 2D texture dimension limit
pub const MAX_GRID_SIZE: u32 = 8192;

/// How neighbour reads outside the grid are resolved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EdgePolicy {
    /// Out-of-range neighbours count as permanently dead
    #[default]
    Dead,
    /// The grid is a torus; reads wrap to the opposite edge
    Wrap,
}

impl EdgePolicy {
    /// Shader defs selecting this policy in `life.wgsl`
    pub fn shader_defs(&self) -> Vec<ShaderDefVal> {
        match self {
            EdgePolicy::Dead => vec![],
            EdgePolicy::Wrap => vec!["EDGE_WRAP".into()],
        }
    }
}

impl FromStr for EdgePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dead" => Ok(EdgePolicy::Dead),
            "wrap" => Ok(EdgePolicy::Wrap),
            _ => Err(ConfigError::Invalid {
                key: "LIFE_EDGE",
                value: s.to_string(),
            }),
        }
    }
}

/// Startup configuration, fixed for the whole run
#[derive(Resource, Debug, Clone)]
pub struct LifeSettings {
    pub grid_size: u32,
    pub edge: EdgePolicy,
    pub seed: u32,
    /// Probability that a noise-filled cell starts alive
    pub live_ratio: f64,
    /// Stamp a pattern at the grid centre instead of noise filling
    pub pattern: Option<Pattern>,
    /// Run without a window for this many frames
    pub headless_frames: Option<u64>,
    /// Operation the host runtime should fail (headless only)
    pub host_fault: Option<Operation>,
}

impl Default for LifeSettings {
    fn default() -> Self {
        Self {
            grid_size: DEFAULT_GRID_SIZE,
            edge: EdgePolicy::Dead,
            seed: 0,
            live_ratio: 0.25, // one cell in four
            pattern: None,
            headless_frames: None,
            host_fault: None,
        }
    }
}

impl LifeSettings {
    /// Defaults overridden by `LIFE_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut settings = Self::default();

        if let Some(value) = lookup("LIFE_GRID_SIZE") {
            settings.grid_size = parse("LIFE_GRID_SIZE", &value)?;
            if !(1..=MAX_GRID_SIZE).contains(&settings.grid_size) {
                return Err(ConfigError::Invalid {
                    key: "LIFE_GRID_SIZE",
                    value,
                });
            }
        }
        if let Some(value) = lookup("LIFE_EDGE") {
            settings.edge = value.parse()?;
        }
        if let Some(value) = lookup("LIFE_SEED") {
            settings.seed = parse("LIFE_SEED", &value)?;
        }
        if let Some(value) = lookup("LIFE_LIVE_RATIO") {
            let ratio: f64 = parse("LIFE_LIVE_RATIO", &value)?;
            if !(0.0..=1.0).contains(&ratio) {
                return Err(ConfigError::Invalid {
                    key: "LIFE_LIVE_RATIO",
                    value,
                });
            }
            settings.live_ratio = ratio;
        }
        if let Some(value) = lookup("LIFE_PATTERN") {
            settings.pattern = Some(value.parse()?);
        }
        if let Some(value) = lookup("LIFE_HEADLESS_FRAMES") {
            settings.headless_frames = Some(parse("LIFE_HEADLESS_FRAMES", &value)?);
        }
        if let Some(value) = lookup("LIFE_HOST_FAULT") {
            let operation = value.parse().map_err(|_| ConfigError::Invalid {
                key: "LIFE_HOST_FAULT",
                value,
            })?;
            settings.host_fault = Some(operation);
        }

        Ok(settings)
    }

    pub fn extent(&self) -> UVec2 {
        UVec2::splat(self.grid_size)
    }
}

fn parse<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}

/// Per-frame simulation toggle, mirrored into the render world
#[derive(Resource, Clone, ExtractResource)]
pub struct SimulationControl {
    pub enabled: bool,
}

impl Default for SimulationControl {
    fn default() -> Self {
        Self { enabled: true }
    }
}
