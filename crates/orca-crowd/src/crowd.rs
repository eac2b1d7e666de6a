//! Crowd simulation
//!
//! [`Crowd`] owns the agents and obstacles and drives the per-tick pipeline:
//!
//! 1. **Neighbor query**: corridors produce preferred velocities, the agent
//!    snapshot is frozen and the agent k-d tree is rebuilt from it.
//! 2. **Solve**: every agent's new velocity is solved against the snapshot,
//!    in parallel when enabled. Results go to a staging buffer.
//! 3. **Integrate**: staged velocities are applied, positions advanced and
//!    corridor, arrival and stuck state updated.
//! 4. **Publish**: the [`TickReport`] is assembled and metrics accumulated.
//!
//! Structural changes (spawn, despawn, obstacle edits) are only possible
//! between ticks since they need `&mut Crowd`.

use crowd_common::{clamp_length, is_finite_vec, Error, Result, Vec2};
use web_time::Instant;

use crate::agent::{Agent, AgentHandle, AgentParams, AgentStore};
use crate::config::{CrowdConfig, TimestepMode};
use crate::metrics::{AgentSample, CrowdMetrics, PhaseTimings, TickReport, TickTotals};
use crate::obstacle::{ObstacleId, ObstacleMap, ObstacleShape};
use crate::orca::{self, AgentSnapshot, SolveContext, SolveOutput, SolveScratch};
use crate::path_corridor::{CorridorStatus, NavEvent, NavEventKind, PathCorridor, SteeringSettings};
use crate::spatial_index::SpatialIndex;

/// A simulated crowd
#[derive(Debug)]
pub struct Crowd {
    config: CrowdConfig,
    steering: SteeringSettings,
    agents: AgentStore,
    obstacles: ObstacleMap,
    spatial: SpatialIndex,

    // Per-tick buffers, reused across ticks
    snapshot: Vec<AgentSnapshot>,
    positions: Vec<Vec2>,
    outputs: Vec<SolveOutput>,
    displacements: Vec<Vec2>,
    scratch: SolveScratch,
    nav_events: Vec<NavEventKind>,

    pending_events: Vec<NavEvent>,
    report: TickReport,
    metrics: CrowdMetrics,
    time: f32,
    tick_count: u64,
    accumulator: f32,
}

impl Crowd {
    /// Creates an empty crowd
    pub fn new(config: CrowdConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            steering: SteeringSettings::from(&config),
            spatial: SpatialIndex::new(config.obstacle_cell_size),
            config,
            agents: AgentStore::new(),
            obstacles: ObstacleMap::new(),
            snapshot: Vec::new(),
            positions: Vec::new(),
            outputs: Vec::new(),
            displacements: Vec::new(),
            scratch: SolveScratch::default(),
            nav_events: Vec::new(),
            pending_events: Vec::new(),
            report: TickReport::default(),
            metrics: CrowdMetrics::new(),
            time: 0.0,
            tick_count: 0,
            accumulator: 0.0,
        })
    }

    /// Gets the configuration
    pub fn config(&self) -> &CrowdConfig {
        &self.config
    }

    /// Replaces the configuration.
    ///
    /// Agents keep the parameters they were spawned with. A changed obstacle
    /// cell size takes effect on the next obstacle rebuild.
    pub fn set_config(&mut self, config: CrowdConfig) -> Result<()> {
        config.validate()?;
        let cell_size_changed = config.obstacle_cell_size != self.config.obstacle_cell_size;
        self.steering = SteeringSettings::from(&config);
        self.config = config;
        if cell_size_changed {
            self.spatial = SpatialIndex::new(self.config.obstacle_cell_size);
            self.rebuild_obstacles();
        }
        Ok(())
    }

    // Lifecycle

    /// Spawns an agent
    pub fn add_agent(&mut self, position: Vec2, params: AgentParams) -> Result<AgentHandle> {
        let handle = self.agents.insert(position, params, self.time)?;
        log::debug!("Added agent {} at ({}, {})", handle, position.x, position.y);
        Ok(handle)
    }

    /// Spawns an agent with the configured default parameters
    pub fn add_agent_with_defaults(&mut self, position: Vec2) -> Result<AgentHandle> {
        let params = AgentParams::from_defaults(&self.config.agent_defaults);
        self.add_agent(position, params)
    }

    /// Despawns an agent. Its handle becomes invalid.
    pub fn remove_agent(&mut self, handle: AgentHandle) -> Result<()> {
        self.agents.remove(handle)?;
        log::debug!("Removed agent {}", handle);
        Ok(())
    }

    fn agent_mut(&mut self, handle: AgentHandle) -> Result<&mut Agent> {
        self.agents
            .get_mut(handle)
            .ok_or_else(|| Error::UnknownAgent(handle.to_string()))
    }

    /// Assigns a waypoint corridor to an agent and returns its status.
    ///
    /// A corridor that cannot be followed leaves the agent idle and raises
    /// an `Idle` event in the next report. Waypoints already within arrival
    /// tolerance are passed immediately.
    pub fn set_corridor(
        &mut self,
        handle: AgentHandle,
        waypoints: Vec<Vec2>,
        width: Option<f32>,
    ) -> Result<CorridorStatus> {
        let time = self.time;
        let steering = self.steering;
        let agent = self.agent_mut(handle)?;

        if agent.params.max_speed == 0.0 && !waypoints.is_empty() {
            return Err(Error::InvalidAgent(format!(
                "agent {handle} has zero max speed and cannot follow a route"
            )));
        }

        let tolerance = steering.arrival_tolerance(agent.params.radius);
        let mut corridor = PathCorridor::new(agent.position, waypoints, width, tolerance);
        let mut kinds = Vec::new();
        if corridor.status() == CorridorStatus::Idle {
            kinds.push(NavEventKind::Idle);
        } else {
            corridor.advance(agent.position, tolerance, &mut kinds);
        }

        let status = corridor.status();
        if status == CorridorStatus::Idle {
            agent.preferred_velocity = Vec2::ZERO;
        }
        agent.corridor = Some(corridor);
        agent.route_started = time;
        agent.stuck.reset();

        if kinds.contains(&NavEventKind::Arrived) {
            self.metrics.record_arrival(0.0);
        }
        self.pending_events
            .extend(kinds.into_iter().map(|kind| NavEvent { handle, kind }));

        Ok(status)
    }

    /// Removes an agent's corridor and stops it
    pub fn clear_corridor(&mut self, handle: AgentHandle) -> Result<()> {
        let agent = self.agent_mut(handle)?;
        agent.corridor = None;
        agent.preferred_velocity = Vec2::ZERO;
        agent.stuck.reset();
        Ok(())
    }

    /// Drives an agent directly, detaching any corridor it was following.
    ///
    /// The velocity may exceed the agent's max speed; the solver clamps it.
    pub fn set_preferred_velocity(&mut self, handle: AgentHandle, velocity: Vec2) -> Result<()> {
        if !is_finite_vec(velocity) {
            return Err(Error::InvalidAgent(format!(
                "preferred velocity must be finite, got {velocity}"
            )));
        }
        let agent = self.agent_mut(handle)?;
        if agent.params.max_speed == 0.0 && velocity != Vec2::ZERO {
            return Err(Error::InvalidAgent(format!(
                "agent {handle} has zero max speed and cannot be given a velocity"
            )));
        }
        agent.corridor = None;
        agent.preferred_velocity = velocity;
        Ok(())
    }

    /// Registers a static obstacle. It takes part in avoidance from the
    /// next tick on.
    pub fn add_obstacle(&mut self, shape: ObstacleShape) -> Result<ObstacleId> {
        self.obstacles.insert(shape)
    }

    /// Unregisters a static obstacle
    pub fn remove_obstacle(&mut self, id: ObstacleId) -> Result<()> {
        self.obstacles.remove(id).map(|_| ())
    }

    /// Re-derives obstacle elements and rebuilds the obstacle grid.
    ///
    /// Runs automatically before a tick when obstacles changed.
    pub fn rebuild_obstacles(&mut self) {
        self.obstacles.rebuild();
        self.spatial.rebuild_obstacles(&self.obstacles);

        let stats = self.spatial.obstacle_grid().get_stats();
        log::info!(
            "Rebuilt obstacle index: {} obstacles, {} elements in {} cells",
            self.obstacles.len(),
            stats.total_elements,
            stats.active_cells
        );
    }

    /// Gets the registered obstacles
    pub fn obstacles(&self) -> &ObstacleMap {
        &self.obstacles
    }

    // Simulation

    /// Advances the simulation by `dt` seconds.
    ///
    /// `dt` must be positive and finite; an invalid value is rejected before
    /// anything changes.
    pub fn tick(&mut self, dt: f32) -> Result<&TickReport> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(Error::InvalidTimestep(dt));
        }
        if self.obstacles.is_dirty() {
            self.rebuild_obstacles();
        }

        let mut timings = PhaseTimings::default();

        let start = Instant::now();
        self.neighbor_query_phase(dt);
        timings.neighbor_query = start.elapsed();

        let start = Instant::now();
        let ctx = SolveContext {
            dt,
            epsilon: self.config.epsilon,
            fallback_lp: self.config.fallback_lp,
            weak_collision_margin: self.config.weak_collision_margin,
        };
        self.solve_phase(&ctx);
        timings.solve = start.elapsed();

        let start = Instant::now();
        self.integrate_phase(dt);
        timings.integrate = start.elapsed();

        let start = Instant::now();
        self.publish_phase(dt);
        timings.publish = start.elapsed();
        self.report.timings = timings;

        Ok(&self.report)
    }

    /// Advances the simulation by elapsed wall time according to the
    /// configured timestep mode. Returns the number of ticks run.
    pub fn update(&mut self, elapsed: f32) -> Result<usize> {
        if !(elapsed.is_finite() && elapsed >= 0.0) {
            return Err(Error::InvalidTimestep(elapsed));
        }

        match self.config.timestep {
            TimestepMode::Fixed { step, max_substeps } => {
                self.accumulator += elapsed;
                let mut steps = 0;
                while self.accumulator >= step && steps < max_substeps {
                    self.tick(step)?;
                    self.accumulator -= step;
                    steps += 1;
                }
                if self.accumulator >= step {
                    let dropped = (self.accumulator / step).floor();
                    log::warn!(
                        "Dropping {} fixed steps after running {} this update",
                        dropped,
                        steps
                    );
                    self.accumulator %= step;
                }
                Ok(steps)
            }
            TimestepMode::Variable { max_step } => {
                if elapsed == 0.0 {
                    return Ok(0);
                }
                self.tick(elapsed.min(max_step))?;
                Ok(1)
            }
        }
    }

    fn neighbor_query_phase(&mut self, dt: f32) {
        let steering = self.steering;
        for agent in self.agents.iter_mut() {
            if let Some(corridor) = &agent.corridor {
                agent.preferred_velocity = corridor.compute_preferred_velocity(
                    agent.position,
                    agent.preferred_velocity,
                    agent.params.max_speed,
                    agent.params.radius,
                    &steering,
                    dt,
                );
            }
        }

        self.snapshot.clear();
        self.snapshot
            .extend(self.agents.iter().map(AgentSnapshot::from_agent));
        self.positions.clear();
        self.positions
            .extend(self.snapshot.iter().map(|agent| agent.position));
        self.spatial.rebuild_agents(&self.positions);
    }

    #[cfg(feature = "parallel")]
    fn solve_phase(&mut self, ctx: &SolveContext) {
        if self.config.parallel && self.snapshot.len() >= self.config.parallel_threshold {
            orca::solve_parallel(
                &self.snapshot,
                &self.spatial,
                &self.obstacles,
                ctx,
                &mut self.outputs,
            );
        } else {
            orca::solve_sequential(
                &self.snapshot,
                &self.spatial,
                &self.obstacles,
                ctx,
                &mut self.scratch,
                &mut self.outputs,
            );
        }
    }

    #[cfg(not(feature = "parallel"))]
    fn solve_phase(&mut self, ctx: &SolveContext) {
        orca::solve_sequential(
            &self.snapshot,
            &self.spatial,
            &self.obstacles,
            ctx,
            &mut self.scratch,
            &mut self.outputs,
        );
    }

    fn integrate_phase(&mut self, dt: f32) {
        self.time += dt;
        let time = self.time;
        let steering = self.steering;

        self.displacements.clear();
        for (agent, output) in self.agents.iter_mut().zip(&self.outputs) {
            let max_speed = agent.params.max_speed;
            agent.velocity = clamp_length(output.velocity, max_speed);

            let displacement = agent.velocity * dt;
            agent.position += displacement;
            agent.distance_walked += displacement.length();
            agent.strong_collisions += u64::from(output.strong_collisions);
            agent.weak_collisions += u64::from(output.weak_collisions);
            self.displacements.push(displacement);

            let handle = agent.handle();
            let tracking = match agent.corridor_status() {
                Some(status) => status == CorridorStatus::Following,
                None => agent.preferred_velocity != Vec2::ZERO,
            };
            if tracking {
                if agent
                    .stuck
                    .update(agent.preferred_velocity, agent.velocity, max_speed, &steering, dt)
                {
                    self.pending_events.push(NavEvent {
                        handle,
                        kind: NavEventKind::Stuck,
                    });
                }
            } else {
                agent.stuck.reset();
            }

            if let Some(corridor) = agent.corridor.as_mut() {
                let tolerance = steering.arrival_tolerance(agent.params.radius);
                self.nav_events.clear();
                corridor.advance(agent.position, tolerance, &mut self.nav_events);

                for &kind in &self.nav_events {
                    if kind == NavEventKind::Arrived {
                        self.metrics.record_arrival(time - agent.route_started);
                    }
                    self.pending_events.push(NavEvent { handle, kind });
                }
            }
        }
    }

    fn publish_phase(&mut self, dt: f32) {
        self.tick_count += 1;

        let report = &mut self.report;
        report.tick = self.tick_count;
        report.time = self.time;
        report.dt = dt;
        report.events.clear();
        report.events.append(&mut self.pending_events);

        report.samples.clear();
        report.samples.extend(
            self.agents
                .iter()
                .zip(&self.displacements)
                .map(|(agent, &displacement)| AgentSample {
                    handle: agent.handle(),
                    position: agent.position,
                    velocity: agent.velocity,
                    preferred_velocity: agent.preferred_velocity,
                    displacement,
                    status: agent.corridor_status(),
                }),
        );

        let agents = report.samples.len();
        let total_speed: f32 = report.samples.iter().map(|s| s.velocity.length()).sum();
        report.totals = TickTotals {
            agents,
            soft_violations: self.outputs.iter().filter(|o| o.relaxed).count(),
            strong_collisions: self
                .outputs
                .iter()
                .map(|o| o.strong_collisions as usize)
                .sum(),
            weak_collisions: self.outputs.iter().map(|o| o.weak_collisions as usize).sum(),
            arrivals: report
                .events
                .iter()
                .filter(|e| e.kind == NavEventKind::Arrived)
                .count(),
            mean_speed: if agents > 0 {
                total_speed / agents as f32
            } else {
                0.0
            },
        };

        self.metrics.record_tick(report);

        log::debug!(
            "Tick {}: {} agents, {} relaxed, {} strong / {} weak collisions, {} events",
            report.tick,
            report.totals.agents,
            report.totals.soft_violations,
            report.totals.strong_collisions,
            report.totals.weak_collisions,
            report.events.len()
        );

        if self.config.despawn_on_arrival {
            for event in &report.events {
                if event.kind == NavEventKind::Arrived && self.agents.contains(event.handle) {
                    if let Err(err) = self.agents.remove(event.handle) {
                        log::warn!("Failed to despawn agent {}: {}", event.handle, err);
                    }
                }
            }
        }
    }

    // Read access

    /// Gets an agent by handle
    pub fn agent(&self, handle: AgentHandle) -> Option<&Agent> {
        self.agents.get(handle)
    }

    /// Iterates live agents in slot order
    pub fn agents(&self) -> impl Iterator<Item = &Agent> {
        self.agents.iter()
    }

    /// Number of live agents
    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Report of the most recent tick
    pub fn last_report(&self) -> &TickReport {
        &self.report
    }

    /// Metrics accumulated since the crowd was created
    pub fn metrics(&self) -> &CrowdMetrics {
        &self.metrics
    }

    /// Simulation time in seconds
    pub fn time(&self) -> f32 {
        self.time
    }

    /// Number of ticks run
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Handles of the agents within `radius` of `point`, at their current
    /// positions
    pub fn query_nearby_agents(&self, point: Vec2, radius: f32) -> Vec<AgentHandle> {
        let radius_sq = radius * radius;
        self.agents
            .iter()
            .filter(|agent| (agent.position - point).length_squared() <= radius_sq)
            .map(Agent::handle)
            .collect()
    }

    /// Gets the spatial index of the last tick
    pub fn spatial_index(&self) -> &SpatialIndex {
        &self.spatial
    }
}
