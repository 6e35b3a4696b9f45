//! Simulation kernels and the per-frame loop
//!
//! `rules` holds the per-cell logic on the host, `life.wgsl` its device
//! counterpart. `frame` sequences the two passes on a compute runtime and
//! `compute_pipeline` wires that loop into bevy's render world.

pub mod compute_pipeline;
pub mod frame;
pub mod kernels;
pub mod rules;

pub use compute_pipeline::*;
pub use frame::FrameStatus;
pub use kernels::*;
