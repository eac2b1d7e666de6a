//! Standard evaluation scenarios
//!
//! Each scenario is a list of agents with their routes plus a set of static
//! obstacles. Scenarios can also be loaded from JSON.

use std::f32::consts::TAU;
use std::path::Path;

use anyhow::{Context, Result};
use glam::Vec2;
use orca_crowd::{AgentHandle, AgentParams, Crowd, ObstacleShape};
use serde::{Deserialize, Serialize};

/// One agent of a scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub position: Vec2,
    /// Route to follow; empty means the agent stands still
    #[serde(default)]
    pub waypoints: Vec<Vec2>,
    /// Optional corridor width
    #[serde(default)]
    pub width: Option<f32>,
    /// Parameters; the crowd defaults when omitted
    #[serde(default)]
    pub params: Option<AgentParams>,
}

impl AgentSpec {
    fn walking(position: Vec2, goal: Vec2) -> Self {
        Self {
            position,
            waypoints: vec![goal],
            width: None,
            params: None,
        }
    }
}

/// Agents and obstacles of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub agents: Vec<AgentSpec>,
    #[serde(default)]
    pub obstacles: Vec<ObstacleShape>,
}

impl Scenario {
    /// Pairs of agents walking straight at each other
    pub fn head_on(count: usize) -> Self {
        let pairs = count.div_ceil(2).max(1);
        let mut agents = Vec::with_capacity(pairs * 2);
        for i in 0..pairs {
            let y = i as f32 * 3.0;
            agents.push(AgentSpec::walking(Vec2::new(-10.0, y), Vec2::new(10.0, y)));
            agents.push(AgentSpec::walking(Vec2::new(10.0, y), Vec2::new(-10.0, y)));
        }
        Self {
            agents,
            obstacles: Vec::new(),
        }
    }

    /// Agents on a circle walking to the antipodal point
    pub fn circle(count: usize) -> Self {
        let count = count.max(2);
        // Keep neighbours about two radii apart on the rim
        let radius = (count as f32 * 1.5 / TAU).max(10.0);
        let agents = (0..count)
            .map(|i| {
                let angle = i as f32 * TAU / count as f32;
                let start = Vec2::new(angle.cos(), angle.sin()) * radius;
                AgentSpec::walking(start, -start)
            })
            .collect();
        Self {
            agents,
            obstacles: Vec::new(),
        }
    }

    /// Two perpendicular streams crossing at the origin
    pub fn crossing(count: usize) -> Self {
        let per_stream = count.div_ceil(2).max(1);
        let columns = (per_stream as f32).sqrt().ceil() as usize;
        let mut agents = Vec::with_capacity(per_stream * 2);
        for i in 0..per_stream {
            let lane = (i % columns) as f32 * 1.5 - (columns as f32 - 1.0) * 0.75;
            let depth = (i / columns) as f32 * 1.5;
            agents.push(AgentSpec::walking(
                Vec2::new(-15.0 - depth, lane),
                Vec2::new(15.0, lane),
            ));
            agents.push(AgentSpec::walking(
                Vec2::new(lane, -15.0 - depth),
                Vec2::new(lane, 15.0),
            ));
        }
        Self {
            agents,
            obstacles: Vec::new(),
        }
    }

    /// A packed block squeezing past a pillar to the opposite side
    pub fn dense(count: usize) -> Self {
        let count = count.max(1);
        let columns = (count as f32).sqrt().ceil() as usize;
        let agents = (0..count)
            .map(|i| {
                let offset = Vec2::new((i % columns) as f32, (i / columns) as f32) * 1.05;
                let start = Vec2::new(-12.0, -(columns as f32) * 0.5) + offset;
                AgentSpec::walking(start, Vec2::new(12.0 + offset.x, start.y))
            })
            .collect();
        Self {
            agents,
            obstacles: vec![
                ObstacleShape::Circle {
                    center: Vec2::ZERO,
                    radius: 2.0,
                },
                // Funnel walls, counter-clockwise boxes
                ObstacleShape::Polygon {
                    vertices: vec![
                        Vec2::new(-4.0, 6.0),
                        Vec2::new(4.0, 6.0),
                        Vec2::new(4.0, 8.0),
                        Vec2::new(-4.0, 8.0),
                    ],
                },
                ObstacleShape::Polygon {
                    vertices: vec![
                        Vec2::new(-4.0, -8.0),
                        Vec2::new(4.0, -8.0),
                        Vec2::new(4.0, -6.0),
                        Vec2::new(-4.0, -6.0),
                    ],
                },
            ],
        }
    }

    /// Loads a scenario from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario file: {}", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse scenario file: {}", path.display()))
    }

    /// Spawns the scenario into a crowd
    pub fn apply(&self, crowd: &mut Crowd) -> Result<Vec<AgentHandle>> {
        for (i, shape) in self.obstacles.iter().enumerate() {
            crowd
                .add_obstacle(shape.clone())
                .with_context(|| format!("Obstacle {i} is invalid"))?;
        }

        let mut handles = Vec::with_capacity(self.agents.len());
        for (i, spec) in self.agents.iter().enumerate() {
            let handle = match &spec.params {
                Some(params) => crowd.add_agent(spec.position, params.clone()),
                None => crowd.add_agent_with_defaults(spec.position),
            }
            .with_context(|| format!("Agent {i} is invalid"))?;

            if !spec.waypoints.is_empty() {
                crowd
                    .set_corridor(handle, spec.waypoints.clone(), spec.width)
                    .with_context(|| format!("Agent {i} cannot follow its route"))?;
            }
            handles.push(handle);
        }
        crowd.rebuild_obstacles();

        Ok(handles)
    }
}
