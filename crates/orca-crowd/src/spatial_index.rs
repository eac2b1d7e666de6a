//! Per-tick spatial index
//!
//! Pairs the agent k-d tree, rebuilt from the position snapshot every tick,
//! with the obstacle grid, rebuilt only when the obstacle map changes.
//! Both halves are read-only while agents are being solved.

use crowd_common::Vec2;

use crate::kd_tree::AgentKdTree;
use crate::obstacle::{ObstacleMap, ObstacleRef};
use crate::obstacle_grid::ObstacleGrid;

/// Spatial index over agents and static obstacles
#[derive(Debug, Clone, Default)]
pub struct SpatialIndex {
    agents: AgentKdTree,
    obstacles: ObstacleGrid,
}

impl SpatialIndex {
    /// Creates an empty index
    pub fn new(obstacle_cell_size: f32) -> Self {
        Self {
            agents: AgentKdTree::new(),
            obstacles: ObstacleGrid::new(obstacle_cell_size),
        }
    }

    /// Builds both halves of the index from scratch
    pub fn build(points: &[Vec2], obstacles: &ObstacleMap, obstacle_cell_size: f32) -> Self {
        let mut index = Self::new(obstacle_cell_size);
        index.rebuild_agents(points);
        index.rebuild_obstacles(obstacles);
        index
    }

    /// Rebuilds the agent tree from a position snapshot
    pub fn rebuild_agents(&mut self, points: &[Vec2]) {
        self.agents.build(points);
    }

    /// Rebuilds the obstacle grid from the map's current elements
    pub fn rebuild_obstacles(&mut self, obstacles: &ObstacleMap) {
        self.obstacles.build(obstacles.elements());
    }

    /// Snapshot indices of every agent within `radius` of `point`, sorted
    pub fn query_agents_in_radius(&self, point: Vec2, radius: f32) -> Vec<u32> {
        let mut out = Vec::new();
        self.agents.query_radius(point, radius, &mut out);
        out
    }

    /// Nearest agents within `radius`, see [`AgentKdTree::query_nearest`]
    pub fn query_nearest_agents(
        &self,
        point: Vec2,
        k: usize,
        radius: f32,
        exclude: Option<u32>,
        out: &mut Vec<(f32, u32)>,
    ) {
        self.agents.query_nearest(point, k, radius, exclude, out);
    }

    /// Candidate obstacle elements within `radius` of `point`.
    ///
    /// May include elements slightly out of range; callers re-filter.
    pub fn query_obstacles_in_radius(&self, point: Vec2, radius: f32) -> Vec<ObstacleRef> {
        let mut out = Vec::new();
        self.obstacles.query_radius(point, radius, &mut out);
        out
    }

    /// Same as [`query_obstacles_in_radius`](Self::query_obstacles_in_radius)
    /// but fills a caller-owned buffer
    pub fn query_obstacles_into(&self, point: Vec2, radius: f32, out: &mut Vec<ObstacleRef>) {
        self.obstacles.query_radius(point, radius, out);
    }

    /// Number of agents in the current snapshot
    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Gets the obstacle grid
    pub fn obstacle_grid(&self) -> &ObstacleGrid {
        &self.obstacles
    }
}
