use bevy::prelude::*;

use crate::error::{InteropError, RuntimeError};
use crate::interop::{ComputeRuntime, DeviceId, Operation, StreamId};

/// The single execution queue all grid kernels are submitted to
///
/// Not `Clone`: `release` consumes it, so a stream is destroyed once.
#[derive(Debug, PartialEq, Eq)]
pub struct Stream {
    id: StreamId,
    device: DeviceId,
}

impl Stream {
    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }
}

/// Select the device of the active graphics context and create a stream on it
///
/// Compute and graphics must share a physical device for the texture to be
/// shared without copies, so the first device reported for the graphics
/// context is used rather than a fixed index.
pub fn acquire<R: ComputeRuntime>(runtime: &mut R) -> Result<Stream, InteropError> {
    let devices = runtime
        .context_devices()
        .map_err(|e| InteropError::new(Operation::EnumerateDevices, e))?;
    let Some(&device) = devices.first() else {
        return Err(InteropError::new(
            Operation::EnumerateDevices,
            RuntimeError::NoDevice,
        ));
    };

    runtime
        .set_device(device)
        .map_err(|e| InteropError::new(Operation::SetDevice, e))?;

    let id = runtime
        .create_stream()
        .map_err(|e| InteropError::new(Operation::CreateStream, e))?;

    info!(
        "Compute stream {} created on device {} ({} device(s) in graphics context)",
        id.0,
        device.0,
        devices.len()
    );
    Ok(Stream { id, device })
}

/// Destroy the stream; failures are logged, never escalated
pub fn release<R: ComputeRuntime>(runtime: &mut R, stream: Stream) {
    match runtime.destroy_stream(stream.id) {
        Ok(()) => debug!("Compute stream {} destroyed", stream.id.0),
        Err(e) => error!("{}", InteropError::new(Operation::DestroyStream, e)),
    }
}
