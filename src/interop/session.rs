use bevy::prelude::*;

use crate::error::InteropError;
use crate::interop::{Binding, ComputeRuntime, Stream, acquire, bind, release, unbind};
use crate::simulation::{FrameStatus, frame};

/// Owner of every interop resource of a run
///
/// Holds the runtime, its stream and the bound texture. Opening acquires
/// them in dependency order; closing releases them in reverse exactly
/// once, whether through `close`, `shutdown` or drop.
pub struct InteropSession<R: ComputeRuntime> {
    runtime: R,
    stream: Option<Stream>,
    binding: Option<Binding<R::Texture>>,
    frames: u64,
}

impl<R: ComputeRuntime> InteropSession<R> {
    /// Select the device, create the stream and bind `texture`
    ///
    /// On failure everything acquired so far is released before the error
    /// is returned.
    pub fn open(mut runtime: R, texture: R::Texture) -> Result<Self, InteropError> {
        let stream = acquire(&mut runtime)?;
        let binding = match bind(&mut runtime, texture) {
            Ok(binding) => binding,
            Err(e) => {
                release(&mut runtime, stream);
                return Err(e);
            }
        };

        info!("Interop session opened on device {}", stream.device().0);
        Ok(Self {
            runtime,
            stream: Some(stream),
            binding: Some(binding),
            frames: 0,
        })
    }

    /// Run one generation and wait for it
    ///
    /// A closed session launches nothing and reports a degraded frame.
    pub fn step(&mut self) -> FrameStatus {
        let (Some(binding), Some(stream)) = (&self.binding, &self.stream) else {
            return FrameStatus::Degraded;
        };
        let status = frame::step(&mut self.runtime, binding, stream);
        self.frames += 1;
        status
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Frames stepped since the session was opened
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut R {
        &mut self.runtime
    }

    pub fn binding(&self) -> Option<&Binding<R::Texture>> {
        self.binding.as_ref()
    }

    /// Unbind the texture, then destroy the stream
    ///
    /// Failures are logged and do not stop the remaining steps. Calling it
    /// again is a no-op.
    pub fn close(&mut self) {
        if let Some(binding) = self.binding.take() {
            unbind(&mut self.runtime, binding);
        }
        if let Some(stream) = self.stream.take() {
            release(&mut self.runtime, stream);
            info!("Interop session closed after {} frame(s)", self.frames);
        }
    }

    pub fn shutdown(mut self) {
        self.close();
    }
}

impl<R: ComputeRuntime> Drop for InteropSession<R> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EdgePolicy;
    use crate::error::RuntimeError;
    use crate::interop::{DeviceId, HostRuntime, HostTexture, Operation};
    use crate::world::{Grid, Pattern};

    fn blinker_runtime(edge: EdgePolicy) -> (HostRuntime, HostTexture) {
        let mut runtime = HostRuntime::default().with_edge(edge);
        let mut grid = Grid::new(UVec2::splat(5));
        grid.stamp(Pattern::Blinker, UVec2::new(1, 1));
        let texture = runtime.upload(grid);
        (runtime, texture)
    }

    fn open_with_fault(operation: Operation) -> (HostRuntime, InteropError) {
        let (mut runtime, texture) = blinker_runtime(EdgePolicy::Dead);
        runtime.fail_on(operation);
        let err = match InteropSession::open(&mut runtime, texture) {
            Ok(_) => panic!("open succeeded despite {operation:?} fault"),
            Err(e) => e,
        };
        (runtime, err)
    }

    #[test]
    fn test_blinker_oscillates_through_session() {
        let (runtime, texture) = blinker_runtime(EdgePolicy::Dead);
        let mut session = InteropSession::open(runtime, texture).unwrap();
        let horizontal = session.runtime().texture(texture).unwrap().clone();

        assert_eq!(session.step(), FrameStatus::Completed);
        let vertical = session.runtime().texture(texture).unwrap();
        assert_eq!(
            vertical.live_positions(),
            vec![UVec2::new(2, 1), UVec2::new(2, 2), UVec2::new(2, 3)]
        );
        assert!(vertical.is_consistent());

        session.step();
        assert_eq!(session.runtime().texture(texture), Some(&horizontal));
        assert_eq!(session.frames(), 2);
    }

    #[test]
    fn test_glider_wraps_on_torus() {
        let mut runtime = HostRuntime::default().with_edge(EdgePolicy::Wrap);
        let mut grid = Grid::new(UVec2::splat(8));
        grid.stamp(Pattern::Glider, UVec2::ZERO);
        let texture = runtime.upload(grid.clone());
        let mut session = InteropSession::open(runtime, texture).unwrap();

        for _ in 0..32 {
            assert_eq!(session.step(), FrameStatus::Completed);
            assert!(session.runtime().texture(texture).unwrap().is_consistent());
        }
        assert_eq!(session.runtime().texture(texture), Some(&grid));
    }

    #[test]
    fn test_setup_failures_never_launch() {
        for operation in Operation::ALL.into_iter().filter(Operation::is_fatal) {
            if operation == Operation::LoadKernels {
                continue;
            }
            let (runtime, err) = open_with_fault(operation);
            assert!(!runtime.journal().contains(&Operation::Launch));
            assert_eq!(runtime.live_mappings(), 0);
            assert_eq!(err.operation, operation);
            assert_eq!(err.source, RuntimeError::Injected);
            assert!(err.is_fatal());
            assert_eq!(err.exit_code(), 1);
        }
    }

    #[test]
    fn test_failed_open_releases_everything() {
        let (mut runtime, texture) = blinker_runtime(EdgePolicy::Dead);
        runtime.fail_on(Operation::CreateSurface);

        let err = InteropSession::open(&mut runtime, texture).err().unwrap();
        assert_eq!(err.operation, Operation::CreateSurface);
        assert!(!runtime.journal().contains(&Operation::Launch));
        assert_eq!(runtime.live_mappings(), 0);
        assert_eq!(runtime.live_resources(), 0);
        assert_eq!(runtime.live_surfaces(), 0);
        assert_eq!(runtime.live_streams(), 0);
        assert_eq!(runtime.journal().last(), Some(&Operation::DestroyStream));
    }

    #[test]
    fn test_zero_devices_is_fatal() {
        let mut runtime = HostRuntime::with_context_devices(vec![]);
        let texture = runtime.upload(Grid::new(UVec2::splat(4)));
        let err = InteropSession::open(&mut runtime, texture).err().unwrap();
        assert_eq!(err.operation, Operation::EnumerateDevices);
        assert!(err.to_string().starts_with("Failed to enumerate compute devices"));
        assert_eq!(runtime.journal(), &[Operation::EnumerateDevices]);
    }

    #[test]
    fn test_close_order_and_idempotence() {
        let (runtime, texture) = blinker_runtime(EdgePolicy::Dead);
        let mut session = InteropSession::open(runtime, texture).unwrap();
        session.step();
        session.runtime_mut().clear_journal();

        session.close();
        session.close();
        assert!(!session.is_open());
        assert_eq!(
            session.runtime().journal(),
            &[
                Operation::DestroySurface,
                Operation::UnmapResource,
                Operation::UnregisterResource,
                Operation::DestroyStream
            ]
        );
        assert_eq!(session.step(), FrameStatus::Degraded);
        assert_eq!(session.runtime().live_streams(), 0);
    }

    #[test]
    fn test_close_continues_past_failures() {
        let (runtime, texture) = blinker_runtime(EdgePolicy::Dead);
        let mut session = InteropSession::open(runtime, texture).unwrap();
        session.runtime_mut().fail_on(Operation::UnmapResource);
        session.runtime_mut().clear_journal();

        session.close();
        assert_eq!(
            session.runtime().journal(),
            &[
                Operation::DestroySurface,
                Operation::UnmapResource,
                Operation::UnregisterResource,
                Operation::DestroyStream
            ]
        );
        assert_eq!(session.runtime().live_streams(), 0);
    }

    #[test]
    fn test_shutdown_releases_binding() {
        let (mut runtime, texture) = blinker_runtime(EdgePolicy::Dead);
        let session = InteropSession::open(&mut runtime, texture).unwrap();
        let binding = session.binding().unwrap();
        assert_eq!(binding.texture(), &texture);
        assert_eq!(binding.extent(), UVec2::splat(5));

        session.shutdown();
        assert_eq!(runtime.live_surfaces(), 0);
        assert_eq!(runtime.live_resources(), 0);
        assert_eq!(runtime.live_streams(), 0);
        let closes = runtime
            .journal()
            .iter()
            .filter(|op| **op == Operation::DestroyStream)
            .count();
        assert_eq!(closes, 1);
    }

    #[test]
    fn test_drop_closes_session() {
        let mut runtime = HostRuntime::with_context_devices(vec![DeviceId(3)]);
        let texture = runtime.upload(Grid::new(UVec2::splat(4)));
        {
            let session = InteropSession::open(&mut runtime, texture).unwrap();
            assert_eq!(session.runtime().live_streams(), 1);
        }
        assert_eq!(runtime.live_streams(), 0);
        assert_eq!(runtime.live_mappings(), 0);
        assert_eq!(runtime.journal().last(), Some(&Operation::DestroyStream));
    }
}
