//! Error types for the interop layer and configuration.

use thiserror::Error;

use crate::interop::Operation;
use crate::simulation::Kernel;

/// What a compute runtime call reported
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("no compute device shares the active graphics context")]
    NoDevice,

    #[error("device {0} is not associated with the active graphics context")]
    ForeignDevice(u32),

    #[error("no device has been selected")]
    NoDeviceSelected,

    #[error("invalid {kind} handle {id}")]
    InvalidHandle { kind: &'static str, id: u32 },

    #[error("resource {0} is already mapped")]
    AlreadyMapped(u32),

    #[error("resource {0} is not mapped")]
    NotMapped(u32),

    #[error("resource {0} is still mapped")]
    StillMapped(u32),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("kernel pipeline failed to build: {0}")]
    Kernel(String),

    #[error("{kernel} failed: {reason}")]
    LaunchFailed { kernel: Kernel, reason: String },

    #[error("device error: {0}")]
    Device(String),

    #[error("injected fault")]
    Injected,
}

/// A runtime failure tagged with the interop operation that produced it
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{operation}: {source}")]
pub struct InteropError {
    pub operation: Operation,
    #[source]
    pub source: RuntimeError,
}

impl InteropError {
    pub fn new(operation: Operation, source: RuntimeError) -> Self {
        Self { operation, source }
    }

    pub fn is_fatal(&self) -> bool {
        self.operation.is_fatal()
    }

    /// Process exit code for a failure that ends the run
    pub fn exit_code(&self) -> u8 {
        1
    }
}

/// Invalid `LIFE_*` environment override
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

impl ConfigError {
    pub fn exit_code(&self) -> u8 {
        2
    }
}
