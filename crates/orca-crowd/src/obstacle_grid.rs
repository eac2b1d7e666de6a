//! Uniform grid over static obstacle elements
//!
//! Every obstacle element is bucketed into each cell its bounding box
//! touches. Queries visit the cells overlapped by the query circle's box and
//! return a sorted, deduplicated superset of the elements within range; the
//! caller re-filters by true distance.

use std::collections::HashMap;

use crowd_common::Vec2;

use crate::config::DEFAULT_OBSTACLE_CELL_SIZE;
use crate::obstacle::{ObstacleElement, ObstacleRef};

/// Elements spanning more cells than this are kept in a separate list that
/// every query scans
const MAX_CELLS_PER_ELEMENT: i64 = 256;

/// Grid cell coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct GridCoord {
    x: i32,
    y: i32,
}

impl GridCoord {
    /// Creates new grid coordinates
    fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Converts a world position to grid coordinates
    fn from_world_pos(pos: Vec2, cell_size: f32) -> Self {
        Self {
            x: (pos.x / cell_size).floor() as i32,
            y: (pos.y / cell_size).floor() as i32,
        }
    }
}

/// Grid statistics for debugging
#[derive(Debug, Clone, PartialEq)]
pub struct ObstacleGridStats {
    /// Number of indexed elements
    pub total_elements: usize,
    /// Number of non-empty cells
    pub active_cells: usize,
    /// Largest number of elements in one cell
    pub max_elements_per_cell: usize,
    /// Elements too large to bucket
    pub oversized_elements: usize,
    /// Cell size in world units
    pub cell_size: f32,
}

/// Spatial grid of obstacle elements
#[derive(Debug, Clone)]
pub struct ObstacleGrid {
    cells: HashMap<GridCoord, Vec<u32>>,
    oversized: Vec<u32>,
    cell_size: f32,
    min_coord: GridCoord,
    max_coord: GridCoord,
    element_count: usize,
}

impl ObstacleGrid {
    /// Creates an empty grid
    pub fn new(cell_size: f32) -> Self {
        Self {
            cells: HashMap::new(),
            oversized: Vec::new(),
            // Minimum cell size to avoid division by zero
            cell_size: if cell_size.is_finite() { cell_size.max(0.1) } else { DEFAULT_OBSTACLE_CELL_SIZE },
            min_coord: GridCoord::new(0, 0),
            max_coord: GridCoord::new(0, 0),
            element_count: 0,
        }
    }

    /// Creates an empty grid with the default cell size
    pub fn new_default() -> Self {
        Self::new(DEFAULT_OBSTACLE_CELL_SIZE)
    }

    /// Rebuilds the grid from scratch
    pub fn build(&mut self, elements: &[ObstacleElement]) {
        self.clear();

        let mut first = true;
        for (i, element) in elements.iter().enumerate() {
            let (min, max) = element.bounds();
            let lo = GridCoord::from_world_pos(min, self.cell_size);
            let hi = GridCoord::from_world_pos(max, self.cell_size);

            if first {
                self.min_coord = lo;
                self.max_coord = hi;
                first = false;
            } else {
                self.min_coord.x = self.min_coord.x.min(lo.x);
                self.min_coord.y = self.min_coord.y.min(lo.y);
                self.max_coord.x = self.max_coord.x.max(hi.x);
                self.max_coord.y = self.max_coord.y.max(hi.y);
            }

            let span = (i64::from(hi.x) - i64::from(lo.x) + 1) * (i64::from(hi.y) - i64::from(lo.y) + 1);
            if span > MAX_CELLS_PER_ELEMENT {
                self.oversized.push(i as u32);
                continue;
            }

            for x in lo.x..=hi.x {
                for y in lo.y..=hi.y {
                    self.cells
                        .entry(GridCoord::new(x, y))
                        .or_default()
                        .push(i as u32);
                }
            }
        }

        self.element_count = elements.len();
    }

    /// Collects candidate elements within `radius` of `pos` into `out`.
    ///
    /// `out` is cleared first and comes back sorted and deduplicated.
    pub fn query_radius(&self, pos: Vec2, radius: f32, out: &mut Vec<ObstacleRef>) {
        out.clear();
        if self.element_count == 0 {
            return;
        }

        out.extend(self.oversized.iter().map(|&i| ObstacleRef(i)));

        let reach = Vec2::splat(radius.max(0.0));
        let lo = GridCoord::from_world_pos(pos - reach, self.cell_size);
        let hi = GridCoord::from_world_pos(pos + reach, self.cell_size);

        // Only cells inside the occupied bounds can hold anything
        let x0 = lo.x.max(self.min_coord.x);
        let x1 = hi.x.min(self.max_coord.x);
        let y0 = lo.y.max(self.min_coord.y);
        let y1 = hi.y.min(self.max_coord.y);

        for x in x0..=x1 {
            for y in y0..=y1 {
                if let Some(cell) = self.cells.get(&GridCoord::new(x, y)) {
                    out.extend(cell.iter().map(|&i| ObstacleRef(i)));
                }
            }
        }

        out.sort_unstable();
        out.dedup();
    }

    /// Clears all elements from the grid
    pub fn clear(&mut self) {
        self.cells.clear();
        self.oversized.clear();
        self.element_count = 0;
        self.min_coord = GridCoord::new(0, 0);
        self.max_coord = GridCoord::new(0, 0);
    }

    /// Gets the number of indexed elements
    pub fn get_element_count(&self) -> usize {
        self.element_count
    }

    /// Gets the cell size
    pub fn get_cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Gets grid statistics for debugging
    pub fn get_stats(&self) -> ObstacleGridStats {
        ObstacleGridStats {
            total_elements: self.element_count,
            active_cells: self.cells.len(),
            max_elements_per_cell: self.cells.values().map(Vec::len).max().unwrap_or(0),
            oversized_elements: self.oversized.len(),
            cell_size: self.cell_size,
        }
    }
}

impl Default for ObstacleGrid {
    fn default() -> Self {
        Self::new_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obstacle::{EdgeVertex, ObstacleId};

    fn segment(a: Vec2, b: Vec2) -> ObstacleElement {
        ObstacleElement::Edge {
            left: EdgeVertex {
                point: a,
                convex: true,
            },
            right: EdgeVertex {
                point: b,
                convex: true,
            },
            direction: (b - a).normalize(),
            left_left: None,
            right_right: None,
            owner: ObstacleId(0),
        }
    }

    #[test]
    fn test_grid_coord_from_world_pos() {
        let coord = GridCoord::from_world_pos(Vec2::new(4.5, 7.2), 2.0);
        assert_eq!(coord, GridCoord::new(2, 3));

        let coord = GridCoord::from_world_pos(Vec2::new(-1.5, -3.7), 2.0);
        assert_eq!(coord, GridCoord::new(-1, -2));
    }

    #[test]
    fn test_query_finds_nearby_elements() {
        let elements = vec![
            segment(Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0)),
            segment(Vec2::new(20.0, 20.0), Vec2::new(21.0, 20.0)),
            ObstacleElement::Disc {
                center: Vec2::new(3.0, 3.0),
                radius: 1.0,
                owner: ObstacleId(1),
            },
        ];
        let mut grid = ObstacleGrid::new(2.0);
        grid.build(&elements);
        assert_eq!(grid.get_element_count(), 3);

        let mut out = Vec::new();
        grid.query_radius(Vec2::new(1.0, 1.0), 2.0, &mut out);
        assert_eq!(out, vec![ObstacleRef(0), ObstacleRef(2)]);

        grid.query_radius(Vec2::new(20.5, 21.0), 1.5, &mut out);
        assert_eq!(out, vec![ObstacleRef(1)]);

        grid.query_radius(Vec2::new(-50.0, -50.0), 1.0, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_results_are_deduplicated() {
        // One long segment crossing several cells
        let elements = vec![segment(Vec2::new(0.0, 0.5), Vec2::new(10.0, 0.5))];
        let mut grid = ObstacleGrid::new(2.0);
        grid.build(&elements);

        let mut out = Vec::new();
        grid.query_radius(Vec2::new(5.0, 0.5), 6.0, &mut out);
        assert_eq!(out, vec![ObstacleRef(0)]);
        assert!(grid.get_stats().active_cells >= 5);
    }

    #[test]
    fn test_oversized_elements_always_returned() {
        let elements = vec![segment(Vec2::new(-500.0, -500.0), Vec2::new(500.0, 500.0))];
        let mut grid = ObstacleGrid::new(1.0);
        grid.build(&elements);
        assert_eq!(grid.get_stats().oversized_elements, 1);
        assert_eq!(grid.get_stats().active_cells, 0);

        let mut out = Vec::new();
        grid.query_radius(Vec2::ZERO, 1.0, &mut out);
        assert_eq!(out, vec![ObstacleRef(0)]);
    }

    #[test]
    fn test_build_is_idempotent() {
        let elements = vec![
            segment(Vec2::new(0.0, 0.0), Vec2::new(4.0, 3.0)),
            segment(Vec2::new(4.0, 3.0), Vec2::new(8.0, 0.0)),
        ];
        let mut grid = ObstacleGrid::new(1.5);
        let mut first = Vec::new();
        let mut second = Vec::new();

        grid.build(&elements);
        grid.query_radius(Vec2::new(4.0, 1.0), 3.0, &mut first);
        grid.build(&elements);
        grid.query_radius(Vec2::new(4.0, 1.0), 3.0, &mut second);

        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }
}
