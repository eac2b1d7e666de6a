//! Multi-agent crowd simulation with ORCA collision avoidance
//!
//! This crate simulates the local motion of many agents sharing a 2D space.
//! Every tick each agent picks the velocity closest to its preferred one
//! that avoids its neighbours and the static obstacles, using Optimal
//! Reciprocal Collision Avoidance. Routes come from an external planner as
//! waypoint corridors.
//!
//! # Features
//!
//! - **Agent Management**: Generation-checked handles over a slot arena
//! - **Collision Avoidance**: ORCA half-planes solved by incremental linear
//!   programs, with a 3-D relaxation when the constraints are infeasible
//! - **Obstacles**: Polygons, polylines and circles
//! - **Path Following**: Waypoint corridors with arrival and stuck events
//! - **Spatial Queries**: Per-tick k-d tree over agents, grid over obstacles
//! - **Parallel Solving**: Agents are solved on the rayon pool (`parallel`
//!   feature, enabled by default)
//! - **Serialization**: JSON config and reports (`serialization` feature)
//!
//! # Example
//!
//! ```rust,ignore
//! use orca_crowd::{AgentParams, Crowd, CrowdConfig};
//! use glam::Vec2;
//!
//! let mut crowd = Crowd::new(CrowdConfig::default())?;
//!
//! let params = AgentParams {
//!     radius: 0.5,
//!     max_speed: 1.5,
//!     ..Default::default()
//! };
//! let agent = crowd.add_agent(Vec2::new(0.0, 0.0), params)?;
//! crowd.set_corridor(agent, vec![Vec2::new(10.0, 0.0), Vec2::new(10.0, 10.0)], None)?;
//!
//! for _ in 0..100 {
//!     let report = crowd.tick(0.1)?;
//!     for event in &report.events {
//!         println!("{:?}", event);
//!     }
//! }
//! ```
//!
//! # Architecture
//!
//! - [`Crowd`]: Owns the agents and runs the tick pipeline
//! - [`AgentStore`]: Agent records addressed by [`AgentHandle`]
//! - [`SpatialIndex`]: [`AgentKdTree`] and [`ObstacleGrid`]
//! - [`orca`]: Half-plane construction and per-agent solve
//! - [`PathCorridor`]: Preferred velocities from waypoints
//! - [`TickReport`] and [`CrowdMetrics`]: Published results

pub mod agent;
pub mod config;
pub mod crowd;
pub mod kd_tree;
pub mod metrics;
pub mod obstacle;
pub mod obstacle_grid;
pub mod orca;
pub mod path_corridor;
pub mod spatial_index;

pub use agent::*;
pub use config::*;
pub use crowd::*;
pub use kd_tree::*;
pub use metrics::*;
pub use obstacle::*;
pub use obstacle_grid::*;
pub use orca::*;
pub use path_corridor::*;
pub use spatial_index::*;

#[cfg(test)]
mod crowd_scenario_tests;
