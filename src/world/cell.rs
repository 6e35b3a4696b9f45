use bytemuck::{Pod, Zeroable};

/// One grid cell, stored as a single `Rgba32Float` texel
/// Layout: [r: displayed state][g: life state][b: mirror of r][a: opaque]
///
/// The rule pass writes only `g`; the propagation pass copies `g` into
/// `r` and `b` and forces `a` to 1.0. Once a frame completes all three
/// colour channels agree.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Cell {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Cell {
    pub const DEAD: Cell = Cell::with_state(false);
    pub const LIVE: Cell = Cell::with_state(true);

    /// A consistent cell in the given state
    pub const fn with_state(alive: bool) -> Self {
        let v = if alive { 1.0 } else { 0.0 };
        Self {
            r: v,
            g: v,
            b: v,
            a: 1.0,
        }
    }

    /// State as currently displayed (channel 0)
    #[inline]
    pub fn is_shown_alive(&self) -> bool {
        self.r > 0.0
    }

    /// Authoritative life state (channel 1)
    #[inline]
    pub fn is_alive(&self) -> bool {
        self.g > 0.0
    }

    /// Displayed colour reflects the life state and alpha is opaque
    pub fn is_consistent(&self) -> bool {
        self.r == self.g && self.b == self.g && self.a == 1.0
    }
}

impl Default for Cell {
    fn default() -> Self {
        Cell::DEAD
    }
}
