//! Common utilities and data structures shared by the crowd simulation crates
//!
//! This crate holds the stateless geometry kernel (2D vector helpers,
//! half-planes, segment queries) and the incremental linear programs the
//! ORCA solver runs for every agent, together with the error type used
//! across the workspace.

mod geometry;
pub mod linear_program;
mod math;
mod vector;

pub use geometry::*;
pub use linear_program::{LpScratch, LpSolution};
pub use math::*;
pub use vector::*;

/// Represents a 2D position or velocity on the ground plane
pub type Vec2 = glam::Vec2;

/// Error types for the library
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid agent parameters: {0}")]
    InvalidAgent(String),

    #[error("invalid obstacle: {0}")]
    InvalidObstacle(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid timestep: {0}")]
    InvalidTimestep(f32),

    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("unknown obstacle: {0}")]
    UnknownObstacle(u32),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type for crowd operations
pub type Result<T> = std::result::Result<T, Error>;
