use bevy::prelude::*;

use crate::config::EdgePolicy;
use crate::world::cell::Cell;
use crate::world::pattern::Pattern;

/// A 2D array of cells, row-major
///
/// On the GPU path this only exists long enough to seed the texture; the
/// host runtime keeps grids as its device textures.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    extent: UVec2,
    cells: Vec<Cell>,
}

impl Grid {
    /// Create an all-dead grid
    pub fn new(extent: UVec2) -> Self {
        Self {
            extent,
            cells: vec![Cell::DEAD; extent.x as usize * extent.y as usize],
        }
    }

    /// All-dead grid with the given live positions
    pub fn with_live(extent: UVec2, live: impl IntoIterator<Item = UVec2>) -> Self {
        let mut grid = Self::new(extent);
        for pos in live {
            grid.set_alive(pos, true);
        }
        grid
    }

    pub fn extent(&self) -> UVec2 {
        self.extent
    }

    #[inline]
    fn index(&self, pos: UVec2) -> Option<usize> {
        if pos.x >= self.extent.x || pos.y >= self.extent.y {
            return None;
        }
        Some(pos.y as usize * self.extent.x as usize + pos.x as usize)
    }

    pub fn cell(&self, pos: UVec2) -> Option<Cell> {
        self.index(pos).map(|idx| self.cells[idx])
    }

    pub fn cell_mut(&mut self, pos: UVec2) -> Option<&mut Cell> {
        self.index(pos).map(|idx| &mut self.cells[idx])
    }

    /// Overwrite a cell with a consistent live or dead texel
    pub fn set_alive(&mut self, pos: UVec2, alive: bool) {
        if let Some(cell) = self.cell_mut(pos) {
            *cell = Cell::with_state(alive);
        }
    }

    /// Read a cell at a possibly out-of-range coordinate
    ///
    /// `Dead` returns `None` outside the grid; `Wrap` folds the
    /// coordinate back onto the torus.
    pub fn sample(&self, pos: IVec2, edge: EdgePolicy) -> Option<Cell> {
        let size = self.extent.as_ivec2();
        let pos = match edge {
            EdgePolicy::Dead => {
                if pos.x < 0 || pos.y < 0 || pos.x >= size.x || pos.y >= size.y {
                    return None;
                }
                pos
            }
            EdgePolicy::Wrap => IVec2::new(pos.x.rem_euclid(size.x), pos.y.rem_euclid(size.y)),
        };
        self.cell(pos.as_uvec2())
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn cells_mut(&mut self) -> &mut [Cell] {
        &mut self.cells
    }

    /// Coordinate of the cell at a flat index
    #[inline]
    pub fn position(&self, index: usize) -> UVec2 {
        let width = self.extent.x as usize;
        UVec2::new((index % width) as u32, (index / width) as u32)
    }

    /// Number of cells whose life state is set
    pub fn population(&self) -> usize {
        self.cells.iter().filter(|c| c.is_alive()).count()
    }

    /// Sorted positions of live cells
    pub fn live_positions(&self) -> Vec<UVec2> {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_alive())
            .map(|(idx, _)| self.position(idx))
            .collect()
    }

    /// Every cell shows its life state with full opacity
    pub fn is_consistent(&self) -> bool {
        self.cells.iter().all(Cell::is_consistent)
    }

    /// Stamp a pattern with its top-left corner at `origin`, clipping at the edges
    pub fn stamp(&mut self, pattern: Pattern, origin: UVec2) {
        for offset in pattern.cells() {
            self.set_alive(origin + *offset, true);
        }
    }

    /// Raw texel bytes for texture upload
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.cells)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_creation() {
        let grid = Grid::new(UVec2::new(4, 3));
        assert_eq!(grid.cells().len(), 12);
        assert_eq!(grid.population(), 0);
        assert!(grid.is_consistent());
        assert_eq!(grid.as_bytes().len(), 12 * 16);
    }

    #[test]
    fn test_cell_indexing() {
        let mut grid = Grid::new(UVec2::new(4, 3));
        grid.set_alive(UVec2::new(3, 2), true);
        assert!(grid.cell(UVec2::new(3, 2)).unwrap().is_alive());
        assert_eq!(grid.position(11), UVec2::new(3, 2));
        assert!(grid.cell(UVec2::new(4, 0)).is_none());
        assert_eq!(grid.live_positions(), vec![UVec2::new(3, 2)]);
    }

    #[test]
    fn test_sample_dead_edges() {
        let grid = Grid::with_live(UVec2::splat(4), [UVec2::new(3, 3)]);
        assert!(grid.sample(IVec2::new(-1, -1), EdgePolicy::Dead).is_none());
        assert!(grid.sample(IVec2::new(4, 0), EdgePolicy::Dead).is_none());
        assert!(grid.sample(IVec2::new(3, 3), EdgePolicy::Dead).unwrap().is_alive());
    }

    #[test]
    fn test_sample_wrapped_edges() {
        let grid = Grid::with_live(UVec2::splat(4), [UVec2::new(3, 3)]);
        let wrapped = grid.sample(IVec2::new(-1, -1), EdgePolicy::Wrap).unwrap();
        assert!(wrapped.is_alive());
        let wrapped = grid.sample(IVec2::new(4, 4), EdgePolicy::Wrap).unwrap();
        assert!(!wrapped.is_alive());
    }

    #[test]
    fn test_stamp_clips_at_edges() {
        let mut grid = Grid::new(UVec2::splat(4));
        grid.stamp(Pattern::Block, UVec2::new(3, 3));
        assert_eq!(grid.live_positions(), vec![UVec2::new(3, 3)]);
    }
}
