//! Agent state store
//!
//! Agents live in a slot arena addressed by generation-checked handles.
//! Removing an agent tombstones its slot and bumps the slot generation, so a
//! stale handle can never reach the agent that later reuses the slot.

use std::fmt;

use crowd_common::{is_finite_vec, Error, Result, Vec2};

use crate::config::AgentDefaults;
use crate::path_corridor::{CorridorStatus, PathCorridor, StuckDetector};

/// Stable handle to an agent in the crowd
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct AgentHandle {
    /// Slot index in the store
    pub index: u32,
    /// Generation of the slot when the handle was issued
    pub generation: u32,
}

impl fmt::Display for AgentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Spawn-time parameters of an agent
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serialization", serde(default))]
pub struct AgentParams {
    /// Radius of the collision disc
    pub radius: f32,
    /// Maximum speed
    pub max_speed: f32,
    /// Neighbor search distance
    pub neighbor_dist: f32,
    /// Maximum number of neighbors considered per solve
    pub max_neighbors: usize,
    /// Time horizon for agent-agent avoidance
    pub time_horizon: f32,
    /// Time horizon for agent-obstacle avoidance
    pub time_horizon_obst: f32,
    /// Weight of this agent's share of a reciprocal avoidance manoeuvre
    pub responsibility: f32,
    /// Opaque value for the caller
    pub user_data: Option<u64>,
}

impl AgentParams {
    /// Creates parameters from crowd-wide defaults
    pub fn from_defaults(defaults: &AgentDefaults) -> Self {
        Self {
            radius: defaults.radius,
            max_speed: defaults.max_speed,
            neighbor_dist: defaults.neighbor_dist,
            max_neighbors: defaults.max_neighbors,
            time_horizon: defaults.time_horizon,
            time_horizon_obst: defaults.time_horizon_obst,
            responsibility: 1.0,
            user_data: None,
        }
    }

    /// Checks that the parameters describe a valid agent
    pub fn validate(&self) -> Result<()> {
        if !(self.radius.is_finite() && self.radius > 0.0) {
            return Err(Error::InvalidAgent(format!(
                "radius must be positive, got {}",
                self.radius
            )));
        }
        if !(self.max_speed.is_finite() && self.max_speed >= 0.0) {
            return Err(Error::InvalidAgent(format!(
                "max speed must be non-negative, got {}",
                self.max_speed
            )));
        }
        if !(self.neighbor_dist.is_finite() && self.neighbor_dist >= 0.0) {
            return Err(Error::InvalidAgent(format!(
                "neighbor distance must be non-negative, got {}",
                self.neighbor_dist
            )));
        }
        if !(self.time_horizon.is_finite() && self.time_horizon > 0.0) {
            return Err(Error::InvalidAgent(format!(
                "time horizon must be positive, got {}",
                self.time_horizon
            )));
        }
        if !(self.time_horizon_obst.is_finite() && self.time_horizon_obst > 0.0) {
            return Err(Error::InvalidAgent(format!(
                "obstacle time horizon must be positive, got {}",
                self.time_horizon_obst
            )));
        }
        if !(self.responsibility.is_finite() && self.responsibility > 0.0) {
            return Err(Error::InvalidAgent(format!(
                "responsibility must be positive, got {}",
                self.responsibility
            )));
        }
        Ok(())
    }
}

impl Default for AgentParams {
    fn default() -> Self {
        Self::from_defaults(&AgentDefaults::default())
    }
}

/// An agent in the crowd
#[derive(Debug, Clone)]
pub struct Agent {
    handle: AgentHandle,
    /// Current position
    pub(crate) position: Vec2,
    /// Velocity applied during the last tick
    pub(crate) velocity: Vec2,
    /// Goal-directed velocity, not clamped to max speed
    pub(crate) preferred_velocity: Vec2,
    pub(crate) params: AgentParams,
    pub(crate) corridor: Option<PathCorridor>,
    pub(crate) stuck: StuckDetector,
    /// Simulation time when the current route was assigned
    pub(crate) route_started: f32,
    pub(crate) spawn_time: f32,
    pub(crate) distance_walked: f32,
    pub(crate) strong_collisions: u64,
    pub(crate) weak_collisions: u64,
}

impl Agent {
    fn new(handle: AgentHandle, position: Vec2, params: AgentParams, time: f32) -> Self {
        Self {
            handle,
            position,
            velocity: Vec2::ZERO,
            preferred_velocity: Vec2::ZERO,
            params,
            corridor: None,
            stuck: StuckDetector::default(),
            route_started: time,
            spawn_time: time,
            distance_walked: 0.0,
            strong_collisions: 0,
            weak_collisions: 0,
        }
    }

    /// Gets the agent's handle
    pub fn handle(&self) -> AgentHandle {
        self.handle
    }

    /// Gets the agent's position
    pub fn position(&self) -> Vec2 {
        self.position
    }

    /// Gets the velocity applied during the last tick
    pub fn velocity(&self) -> Vec2 {
        self.velocity
    }

    /// Gets the current preferred velocity
    pub fn preferred_velocity(&self) -> Vec2 {
        self.preferred_velocity
    }

    /// Gets the agent's parameters
    pub fn params(&self) -> &AgentParams {
        &self.params
    }

    /// Gets the agent's corridor, if one is assigned
    pub fn corridor(&self) -> Option<&PathCorridor> {
        self.corridor.as_ref()
    }

    /// Navigation status, or `None` when the caller drives the preferred
    /// velocity directly
    pub fn corridor_status(&self) -> Option<CorridorStatus> {
        self.corridor.as_ref().map(|c| c.status())
    }

    /// Simulation time at which the agent spawned
    pub fn spawn_time(&self) -> f32 {
        self.spawn_time
    }

    /// Total distance travelled since spawning
    pub fn distance_walked(&self) -> f32 {
        self.distance_walked
    }

    /// Number of ticks on which this agent overlapped a neighbor, per neighbor
    pub fn strong_collisions(&self) -> u64 {
        self.strong_collisions
    }

    /// Number of ticks on which this agent came closer than the weak
    /// collision margin to a neighbor, per neighbor
    pub fn weak_collisions(&self) -> u64 {
        self.weak_collisions
    }
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    agent: Option<Agent>,
}

/// Slot arena of agents
#[derive(Debug, Clone, Default)]
pub struct AgentStore {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl AgentStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new agent and returns its handle.
    ///
    /// The position must be finite and the parameters valid.
    pub fn insert(&mut self, position: Vec2, params: AgentParams, time: f32) -> Result<AgentHandle> {
        if !is_finite_vec(position) {
            return Err(Error::InvalidAgent(format!(
                "position must be finite, got {position}"
            )));
        }
        params.validate()?;

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                let index = u32::try_from(self.slots.len())
                    .map_err(|_| Error::InvalidAgent("agent store is full".to_string()))?;
                self.slots.push(Slot {
                    generation: 0,
                    agent: None,
                });
                index
            }
        };

        let slot = &mut self.slots[index as usize];
        let handle = AgentHandle {
            index,
            generation: slot.generation,
        };
        slot.agent = Some(Agent::new(handle, position, params, time));
        self.len += 1;

        Ok(handle)
    }

    /// Removes an agent, invalidating its handle
    pub fn remove(&mut self, handle: AgentHandle) -> Result<Agent> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation && slot.agent.is_some())
            .ok_or_else(|| Error::UnknownAgent(handle.to_string()))?;

        let agent = slot
            .agent
            .take()
            .ok_or_else(|| Error::UnknownAgent(handle.to_string()))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;

        Ok(agent)
    }

    /// Gets an agent by handle
    pub fn get(&self, handle: AgentHandle) -> Option<&Agent> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.agent.as_ref())
    }

    /// Gets a mutable agent by handle
    pub fn get_mut(&mut self, handle: AgentHandle) -> Option<&mut Agent> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.agent.as_mut())
    }

    /// Checks whether a handle refers to a live agent
    pub fn contains(&self, handle: AgentHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Iterates live agents in slot order
    pub fn iter(&self) -> impl Iterator<Item = &Agent> {
        self.slots.iter().filter_map(|slot| slot.agent.as_ref())
    }

    /// Iterates live agents mutably in slot order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Agent> {
        self.slots.iter_mut().filter_map(|slot| slot.agent.as_mut())
    }

    /// Number of live agents
    pub fn len(&self) -> usize {
        self.len
    }

    /// Checks if the store is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
