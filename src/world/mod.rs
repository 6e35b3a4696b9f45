/// Grid data shared by the simulation and the renderer
///
/// This module holds the packed cell encoding, the host-side grid used
/// for seeding and for the software runtime, and the texture provider.

pub mod cell;
pub mod grid;
pub mod pattern;
pub mod seed;

pub use cell::*;
pub use grid::*;
pub use pattern::*;
pub use seed::*;
