use bevy::prelude::*;
use std::str::FromStr;

use crate::error::ConfigError;

/// Well-known seed patterns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pattern {
    /// Period-2 oscillator, horizontal phase
    Blinker,
    /// 2x2 still life
    Block,
    /// Moves one cell diagonally (down-right) every 4 generations
    Glider,
}

const BLINKER: [UVec2; 3] = [UVec2::new(0, 1), UVec2::new(1, 1), UVec2::new(2, 1)];

const BLOCK: [UVec2; 4] = [
    UVec2::new(0, 0),
    UVec2::new(1, 0),
    UVec2::new(0, 1),
    UVec2::new(1, 1),
];

const GLIDER: [UVec2; 5] = [
    UVec2::new(1, 0),
    UVec2::new(2, 1),
    UVec2::new(0, 2),
    UVec2::new(1, 2),
    UVec2::new(2, 2),
];

impl Pattern {
    /// Live cell offsets from the pattern's top-left corner
    pub fn cells(&self) -> &'static [UVec2] {
        match self {
            Pattern::Blinker => &BLINKER,
            Pattern::Block => &BLOCK,
            Pattern::Glider => &GLIDER,
        }
    }

    /// Bounding box of the pattern
    pub fn size(&self) -> UVec2 {
        match self {
            Pattern::Blinker => UVec2::new(3, 3),
            Pattern::Block => UVec2::new(2, 2),
            Pattern::Glider => UVec2::new(3, 3),
        }
    }
}

impl FromStr for Pattern {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "blinker" => Ok(Pattern::Blinker),
            "block" => Ok(Pattern::Block),
            "glider" => Ok(Pattern::Glider),
            _ => Err(ConfigError::Invalid {
                key: "LIFE_PATTERN",
                value: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patterns_fit_their_bounds() {
        for pattern in [Pattern::Blinker, Pattern::Block, Pattern::Glider] {
            let size = pattern.size();
            assert!(pattern.cells().iter().all(|c| c.x < size.x && c.y < size.y));
        }
    }

    #[test]
    fn test_parse_pattern() {
        assert_eq!("Glider".parse::<Pattern>().unwrap(), Pattern::Glider);
        assert!("spaceship".parse::<Pattern>().is_err());
    }
}
