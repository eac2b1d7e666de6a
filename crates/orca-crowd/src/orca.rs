//! Optimal Reciprocal Collision Avoidance
//!
//! For each agent this module turns the frozen neighbour snapshot and the
//! nearby obstacle elements into velocity half-planes and solves for the
//! permitted velocity closest to the agent's preferred velocity. A solve
//! reads only the snapshot and writes only its own output, so agents can be
//! solved in any order or in parallel with identical results.

use crowd_common::linear_program::{self, LpScratch};
use crowd_common::{is_finite_vec, sqr, HalfPlane, Vec2};

use crate::agent::{Agent, AgentHandle};
use crate::obstacle::{leg_direction, ObstacleMap, ObstacleQuery, ObstacleRef};
use crate::spatial_index::SpatialIndex;

/// Frozen per-tick view of one agent
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentSnapshot {
    pub handle: AgentHandle,
    pub position: Vec2,
    pub velocity: Vec2,
    pub preferred_velocity: Vec2,
    pub radius: f32,
    pub max_speed: f32,
    pub neighbor_dist: f32,
    pub max_neighbors: usize,
    pub time_horizon: f32,
    pub time_horizon_obst: f32,
    pub responsibility: f32,
}

impl AgentSnapshot {
    /// Captures the solver inputs of an agent
    pub fn from_agent(agent: &Agent) -> Self {
        let params = agent.params();
        Self {
            handle: agent.handle(),
            position: agent.position(),
            velocity: agent.velocity(),
            preferred_velocity: agent.preferred_velocity(),
            radius: params.radius,
            max_speed: params.max_speed,
            neighbor_dist: params.neighbor_dist,
            max_neighbors: params.max_neighbors,
            time_horizon: params.time_horizon,
            time_horizon_obst: params.time_horizon_obst,
            responsibility: params.responsibility,
        }
    }
}

/// Tick-wide solver settings
#[derive(Debug, Clone, Copy)]
pub struct SolveContext {
    /// Tick length in seconds
    pub dt: f32,
    /// Tolerance for geometric comparisons
    pub epsilon: f32,
    /// Run the relaxation on infeasible constraint sets
    pub fallback_lp: bool,
    /// Gap below which a neighbour counts as a weak collision
    pub weak_collision_margin: f32,
}

/// Per-worker buffers, cleared for every agent solved
#[derive(Debug, Default, Clone)]
pub struct SolveScratch {
    lines: Vec<HalfPlane>,
    neighbors: Vec<(f32, u32)>,
    obstacle_refs: Vec<ObstacleRef>,
    obstacle_order: Vec<(f32, ObstacleRef)>,
    lp: LpScratch,
}

/// Result of solving one agent, staged until integration
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SolveOutput {
    /// Proposed new velocity
    pub velocity: Vec2,
    /// The constraints were infeasible and had to be relaxed
    pub relaxed: bool,
    /// Largest remaining constraint violation
    pub max_violation: f32,
    /// Number of agent neighbours considered
    pub neighbors: usize,
    /// Neighbours whose discs overlap this agent
    pub strong_collisions: u32,
    /// Neighbours closer than the weak collision margin
    pub weak_collisions: u32,
}

/// Deterministic push direction for agents whose relative state gives no
/// usable direction. Antisymmetric: swapping `a` and `b` negates it.
fn tie_break_direction(a: &AgentSnapshot, b: &AgentSnapshot, relative_position: Vec2, eps: f32) -> Vec2 {
    if relative_position.length_squared() > sqr(eps) {
        return -relative_position.normalize();
    }
    if let Some(direction) = (a.preferred_velocity - b.preferred_velocity)
        .perp()
        .try_normalize()
    {
        return direction;
    }
    if a.handle < b.handle { Vec2::X } else { -Vec2::X }
}

/// Computes the reciprocal half-plane agent `a` must respect to avoid `b`.
///
/// `a` takes the share `a.responsibility / (a.responsibility +
/// b.responsibility)` of the avoidance. Agents already overlapping get a
/// constraint that separates them within one tick of length `1 / inv_dt`.
pub fn agent_half_plane(a: &AgentSnapshot, b: &AgentSnapshot, inv_dt: f32, eps: f32) -> HalfPlane {
    let relative_position = b.position - a.position;
    let relative_velocity = a.velocity - b.velocity;
    let dist_sq = relative_position.length_squared();
    let combined_radius = a.radius + b.radius;
    let combined_radius_sq = sqr(combined_radius);
    let inv_tau = 1.0 / a.time_horizon;
    let share = a.responsibility / (a.responsibility + b.responsibility);

    let (direction, u) = if dist_sq > combined_radius_sq {
        // No collision yet
        let w = relative_velocity - inv_tau * relative_position;
        let w_length_sq = w.length_squared();
        let dot = w.dot(relative_position);

        if dot < 0.0 && sqr(dot) > combined_radius_sq * w_length_sq {
            // Project on the cut-off circle
            let w_length = w_length_sq.sqrt();
            let unit_w = w / w_length;
            (
                Vec2::new(unit_w.y, -unit_w.x),
                (combined_radius * inv_tau - w_length) * unit_w,
            )
        } else {
            // Project on a leg
            let direction = leg_direction(relative_position, w, dist_sq, combined_radius);
            let u = relative_velocity.dot(direction) * direction - relative_velocity;
            (direction, u)
        }
    } else {
        // Overlapping: resolve within one tick
        let w = relative_velocity - inv_dt * relative_position;
        let w_length = w.length();
        let unit_w = if w_length > eps {
            w / w_length
        } else {
            tie_break_direction(a, b, relative_position, eps)
        };
        (
            Vec2::new(unit_w.y, -unit_w.x),
            (combined_radius * inv_dt - w_length) * unit_w,
        )
    };

    HalfPlane::new(a.velocity + share * u, direction)
}

fn is_usable(line: &HalfPlane) -> bool {
    is_finite_vec(line.point) && is_finite_vec(line.direction) && line.direction != Vec2::ZERO
}

/// Solves the new velocity of `snapshot[index]`.
///
/// Obstacle constraints come first (nearest first) and are never relaxed;
/// agent constraints follow, nearest first with ties broken by snapshot
/// order.
pub fn compute_new_velocity(
    index: usize,
    snapshot: &[AgentSnapshot],
    spatial: &SpatialIndex,
    obstacles: &ObstacleMap,
    ctx: &SolveContext,
    scratch: &mut SolveScratch,
) -> SolveOutput {
    let agent = &snapshot[index];
    let inv_dt = 1.0 / ctx.dt;
    let mut output = SolveOutput::default();

    scratch.lines.clear();

    // Obstacles
    let obstacle_range = ctx.dt.max(agent.time_horizon_obst) * agent.max_speed + agent.radius;
    spatial.query_obstacles_into(agent.position, obstacle_range, &mut scratch.obstacle_refs);
    scratch.obstacle_order.clear();
    let range_sq = sqr(obstacle_range);
    for &reference in &scratch.obstacle_refs {
        if let Some(element) = obstacles.element(reference) {
            let dist_sq = element.distance_squared(agent.position);
            if dist_sq < range_sq {
                scratch.obstacle_order.push((dist_sq, reference));
            }
        }
    }
    scratch
        .obstacle_order
        .sort_unstable_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

    let query = ObstacleQuery {
        position: agent.position,
        velocity: agent.velocity,
        radius: agent.radius,
        time_horizon: agent.time_horizon_obst,
        inv_dt,
    };
    for &(_, reference) in &scratch.obstacle_order {
        let Some(element) = obstacles.element(reference) else {
            continue;
        };
        if let Some(line) = element.half_plane(&query, &scratch.lines) {
            if is_usable(&line) {
                scratch.lines.push(line);
            }
        }
    }
    let num_obstacle_lines = scratch.lines.len();

    // Agents
    spatial.query_nearest_agents(
        agent.position,
        agent.max_neighbors,
        agent.neighbor_dist,
        Some(index as u32),
        &mut scratch.neighbors,
    );
    output.neighbors = scratch.neighbors.len();

    for &(dist_sq, other_index) in &scratch.neighbors {
        let other = &snapshot[other_index as usize];

        let gap = dist_sq.sqrt() - (agent.radius + other.radius);
        if gap < 0.0 {
            output.strong_collisions += 1;
        } else if gap < ctx.weak_collision_margin {
            output.weak_collisions += 1;
        }

        let line = agent_half_plane(agent, other, inv_dt, ctx.epsilon);
        if is_usable(&line) {
            scratch.lines.push(line);
        }
    }

    let solution = linear_program::solve(
        &scratch.lines,
        num_obstacle_lines,
        agent.max_speed,
        agent.preferred_velocity,
        ctx.epsilon,
        ctx.fallback_lp,
        &mut scratch.lp,
    );

    output.velocity = solution.velocity;
    output.relaxed = solution.relaxed;
    output.max_violation = solution.max_violation;
    output
}

/// Solves every agent of the snapshot in order on the calling thread
pub fn solve_sequential(
    snapshot: &[AgentSnapshot],
    spatial: &SpatialIndex,
    obstacles: &ObstacleMap,
    ctx: &SolveContext,
    scratch: &mut SolveScratch,
    out: &mut Vec<SolveOutput>,
) {
    out.clear();
    out.extend(
        (0..snapshot.len())
            .map(|i| compute_new_velocity(i, snapshot, spatial, obstacles, ctx, scratch)),
    );
}

/// Solves every agent of the snapshot on the rayon thread pool
#[cfg(feature = "parallel")]
pub fn solve_parallel(
    snapshot: &[AgentSnapshot],
    spatial: &SpatialIndex,
    obstacles: &ObstacleMap,
    ctx: &SolveContext,
    out: &mut Vec<SolveOutput>,
) {
    use rayon::prelude::*;

    (0..snapshot.len())
        .into_par_iter()
        .map_init(SolveScratch::default, |scratch, i| {
            compute_new_velocity(i, snapshot, spatial, obstacles, ctx, scratch)
        })
        .collect_into_vec(out);
}
