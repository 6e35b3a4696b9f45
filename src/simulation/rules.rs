use bevy::prelude::*;

use crate::config::EdgePolicy;
use crate::world::{Cell, Grid};

/// Neighbour offsets in the order the kernel visits them
pub const NEIGHBOR_OFFSETS: [IVec2; 8] = [
    IVec2::new(-1, -1),
    IVec2::new(0, -1),
    IVec2::new(1, -1),
    IVec2::new(-1, 0),
    IVec2::new(1, 0),
    IVec2::new(-1, 1),
    IVec2::new(0, 1),
    IVec2::new(1, 1),
];

/// Two-state transition: survive on 2 or 3, birth on exactly 3
#[inline]
pub fn next_state(alive: bool, neighbors: u32) -> bool {
    matches!((alive, neighbors), (true, 2) | (_, 3))
}

/// Live neighbours of `pos` as displayed before this step
///
/// Reads channel 0 only. The rule pass never writes channel 0, so the
/// count sees previous-frame state even while channel 1 is being updated.
pub fn count_live_neighbors(grid: &Grid, pos: UVec2, edge: EdgePolicy) -> u32 {
    let pos = pos.as_ivec2();
    NEIGHBOR_OFFSETS
        .iter()
        .filter_map(|offset| grid.sample(pos + *offset, edge))
        .filter(Cell::is_shown_alive)
        .count() as u32
}

/// Rule pass for one cell: the cell with its new state in channel 1
pub fn calculate_step(grid: &Grid, pos: UVec2, edge: EdgePolicy) -> Cell {
    let mut cell = grid.cell(pos).unwrap_or_default();
    let neighbors = count_live_neighbors(grid, pos, edge);
    let alive = next_state(cell.is_shown_alive(), neighbors);
    cell.g = if alive { 1.0 } else { 0.0 };
    cell
}

/// Propagation pass for one cell: show channel 1 and force opacity
#[inline]
pub fn update_texture(cell: Cell) -> Cell {
    Cell {
        r: cell.g,
        g: cell.g,
        b: cell.g,
        a: 1.0,
    }
}

/// Reference step of a whole grid, computed from a pre-step snapshot
pub fn reference_step(grid: &Grid, edge: EdgePolicy) -> Grid {
    let extent = grid.extent();
    let mut next = Grid::new(extent);
    for y in 0..extent.y {
        for x in 0..extent.x {
            let pos = UVec2::new(x, y);
            let alive = next_state(
                grid.cell(pos).is_some_and(|c| c.is_alive()),
                count_live_neighbors(grid, pos, edge),
            );
            next.set_alive(pos, alive);
        }
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::Pattern;

    fn pattern_grid(size: u32, pattern: Pattern, origin: UVec2) -> Grid {
        let mut grid = Grid::new(UVec2::splat(size));
        grid.stamp(pattern, origin);
        grid
    }

    /// Both kernel passes over every cell, in the order the device runs them
    fn two_pass_step(grid: &mut Grid, edge: EdgePolicy) {
        let extent = grid.extent();
        let staged: Vec<Cell> = (0..extent.y)
            .flat_map(|y| (0..extent.x).map(move |x| UVec2::new(x, y)))
            .map(|pos| calculate_step(grid, pos, edge))
            .collect();
        for (cell, new) in grid.cells_mut().iter_mut().zip(staged) {
            *cell = update_texture(new);
        }
    }

    #[test]
    fn test_transition_table() {
        for n in 0..=8 {
            assert_eq!(next_state(true, n), n == 2 || n == 3, "live with {n}");
            assert_eq!(next_state(false, n), n == 3, "dead with {n}");
        }
    }

    #[test]
    fn test_rule_pass_only_touches_life_channel() {
        let grid = pattern_grid(5, Pattern::Blinker, UVec2::new(1, 1));
        // (2, 1) is dead with three live neighbours
        let cell = calculate_step(&grid, UVec2::new(2, 1), EdgePolicy::Dead);
        assert_eq!(cell.g, 1.0);
        assert_eq!((cell.r, cell.b, cell.a), (0.0, 0.0, 1.0));
    }

    #[test]
    fn test_blinker_has_period_two() {
        let start = pattern_grid(5, Pattern::Blinker, UVec2::new(1, 1));
        let mut grid = start.clone();

        two_pass_step(&mut grid, EdgePolicy::Dead);
        assert_eq!(
            grid.live_positions(),
            vec![UVec2::new(2, 1), UVec2::new(2, 2), UVec2::new(2, 3)]
        );
        assert_eq!(grid, reference_step(&start, EdgePolicy::Dead));

        two_pass_step(&mut grid, EdgePolicy::Dead);
        assert_eq!(grid, start);
    }

    #[test]
    fn test_block_is_still() {
        let start = pattern_grid(6, Pattern::Block, UVec2::new(2, 2));
        let mut grid = start.clone();
        two_pass_step(&mut grid, EdgePolicy::Dead);
        assert_eq!(grid, start);
    }

    #[test]
    fn test_dead_grid_stays_dead() {
        let mut grid = Grid::new(UVec2::splat(16));
        for _ in 0..5 {
            two_pass_step(&mut grid, EdgePolicy::Wrap);
        }
        assert_eq!(grid.population(), 0);
    }

    #[test]
    fn test_glider_wraps_around_torus() {
        let start = pattern_grid(8, Pattern::Glider, UVec2::new(0, 0));
        let mut grid = start.clone();
        for _ in 0..32 {
            two_pass_step(&mut grid, EdgePolicy::Wrap);
            assert_eq!(grid.population(), 5);
        }
        assert_eq!(grid, start);
    }

    #[test]
    fn test_corner_counts_per_edge_policy() {
        // Live cells in all four corners of a 4x4 grid
        let corners = [
            UVec2::new(0, 0),
            UVec2::new(3, 0),
            UVec2::new(0, 3),
            UVec2::new(3, 3),
        ];
        let grid = Grid::with_live(UVec2::splat(4), corners);

        for corner in corners {
            assert_eq!(count_live_neighbors(&grid, corner, EdgePolicy::Dead), 0);
            // The other three corners are diagonal or edge-adjacent on a torus
            assert_eq!(count_live_neighbors(&grid, corner, EdgePolicy::Wrap), 3);
        }

        let survivors = reference_step(&grid, EdgePolicy::Wrap);
        assert_eq!(survivors.live_positions().len(), 4);
        assert_eq!(reference_step(&grid, EdgePolicy::Dead).population(), 0);
    }

    #[test]
    fn test_edge_counts_are_reproducible() {
        let grid = pattern_grid(6, Pattern::Glider, UVec2::new(3, 3));
        for edge in [EdgePolicy::Dead, EdgePolicy::Wrap] {
            let first: Vec<u32> = (0..6)
                .map(|x| count_live_neighbors(&grid, UVec2::new(x, 5), edge))
                .collect();
            let second: Vec<u32> = (0..6)
                .map(|x| count_live_neighbors(&grid, UVec2::new(x, 5), edge))
                .collect();
            assert_eq!(first, second);
        }
    }
}
