use bevy::asset::weak_handle;
use bevy::prelude::*;
use std::fmt;

/// Workgroup edge length; must match `@workgroup_size` in life.wgsl
pub const WORKGROUP_SIZE: u32 = 8;

/// Handle for the kernel shader
pub const LIFE_SHADER_HANDLE: Handle<Shader> = weak_handle!("6c1f3b0e-2d4a-4e8b-9f57-0b8d3a1c5e72");

/// The two simulation kernels, always launched in this order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kernel {
    /// Rule pass: writes the next state into channel 1
    CalculateStep,
    /// Propagation pass: copies channel 1 into the displayed channels
    UpdateTexture,
}

impl Kernel {
    /// WGSL entry point
    pub fn entry_point(&self) -> &'static str {
        match self {
            Kernel::CalculateStep => "calculate_step",
            Kernel::UpdateTexture => "update_texture",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Kernel::CalculateStep => "life_calculate_step",
            Kernel::UpdateTexture => "life_update_texture",
        }
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.entry_point())
    }
}

/// Workgroup grid of a 2D launch
///
/// Invocations past the texture extent exit immediately, so the launch
/// covers every cell exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchGeometry {
    pub workgroups: UVec2,
    pub workgroup_size: UVec2,
}

impl LaunchGeometry {
    /// Smallest launch that covers `extent`
    pub fn covering(extent: UVec2) -> Self {
        Self {
            workgroups: UVec2::new(
                extent.x.div_ceil(WORKGROUP_SIZE),
                extent.y.div_ceil(WORKGROUP_SIZE),
            ),
            workgroup_size: UVec2::splat(WORKGROUP_SIZE),
        }
    }

    /// Number of invocations along each axis
    pub fn invocations(&self) -> UVec2 {
        self.workgroups * self.workgroup_size
    }

    /// Whether some invocation is assigned to `pos`
    #[inline]
    pub fn covers(&self, pos: UVec2) -> bool {
        let invocations = self.invocations();
        pos.x < invocations.x && pos.y < invocations.y
    }
}
