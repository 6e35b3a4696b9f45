use bevy::prelude::*;

use crate::error::InteropError;
use crate::interop::{Binding, ComputeRuntime, Operation, Stream};
use crate::simulation::{Kernel, LaunchGeometry};

/// Outcome of one simulation frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// Both kernels ran and the stream drained cleanly
    Completed,
    /// A launch or the synchronize failed; the texture holds whatever
    /// state is resident and is drawn as is
    Degraded,
}

/// Advance the grid by one generation
///
/// Queues the rule pass and the propagation pass on `stream`, then blocks
/// until both have finished so the draw step samples a settled texture.
/// Errors are logged, never escalated.
pub fn step<R: ComputeRuntime>(
    runtime: &mut R,
    binding: &Binding<R::Texture>,
    stream: &Stream,
) -> FrameStatus {
    let geometry = LaunchGeometry::covering(binding.extent());
    let mut status = FrameStatus::Completed;

    for kernel in [Kernel::CalculateStep, Kernel::UpdateTexture] {
        if let Err(e) = runtime.launch(stream.id(), kernel, geometry, binding.surface()) {
            error!("{} ({kernel})", InteropError::new(Operation::Launch, e));
            status = FrameStatus::Degraded;
            // Propagating without a fresh rule pass would redisplay stale state
            break;
        }
    }

    if let Err(e) = runtime.synchronize(stream.id()) {
        error!("{}", InteropError::new(Operation::Synchronize, e));
        status = FrameStatus::Degraded;
    }

    debug!(
        "Frame stepped: {}x{} workgroups, {:?}",
        geometry.workgroups.x, geometry.workgroups.y, status
    );
    status
}
