//! Crowd configuration
//!
//! Holds every tunable of the simulation core. Values that describe an
//! individual agent (radius, speed, horizons) live in [`AgentParams`] and
//! default from the `agent_defaults` block here.
//!
//! [`AgentParams`]: crate::AgentParams

use crowd_common::{Error, Result, DEFAULT_EPSILON};

/// Default cell size of the static obstacle grid (in world units)
pub const DEFAULT_OBSTACLE_CELL_SIZE: f32 = 4.0;

/// Default frame-delta clamp for variable timestepping
pub const DEFAULT_MAX_STEP: f32 = 0.1;

/// Default minimum agent count before the solve phase is spread over threads
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 64;

/// How `Crowd::update` turns elapsed wall time into ticks
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub enum TimestepMode {
    /// Accumulate elapsed time and run whole steps of `step` seconds
    Fixed {
        /// Step length in seconds
        step: f32,
        /// Upper bound on steps run by one `update` call
        max_substeps: usize,
    },
    /// Run one tick per `update` with the elapsed time clamped to `max_step`
    Variable {
        /// Largest tick length in seconds
        max_step: f32,
    },
}

impl Default for TimestepMode {
    fn default() -> Self {
        TimestepMode::Variable {
            max_step: DEFAULT_MAX_STEP,
        }
    }
}

/// Per-agent defaults applied by `AgentParams::default()`
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct AgentDefaults {
    /// Time horizon for agent-agent avoidance
    pub time_horizon: f32,
    /// Time horizon for agent-obstacle avoidance
    pub time_horizon_obst: f32,
    /// Maximum neighbors to consider
    pub max_neighbors: usize,
    /// Neighbor search distance
    pub neighbor_dist: f32,
    /// Maximum speed
    pub max_speed: f32,
    /// Agent radius
    pub radius: f32,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            time_horizon: 2.0,
            time_horizon_obst: 2.0,
            max_neighbors: 10,
            neighbor_dist: 15.0,
            max_speed: 2.0,
            radius: 0.5,
        }
    }
}

/// Configuration of a [`Crowd`](crate::Crowd)
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serialization", serde(default))]
pub struct CrowdConfig {
    /// Defaults for agents spawned without explicit parameters
    pub agent_defaults: AgentDefaults,
    /// Tolerance for geometric comparisons
    pub epsilon: f32,
    /// Run the 3-D relaxation when the constraints are infeasible
    pub fallback_lp: bool,
    /// Fixed or variable timestepping for `update`
    pub timestep: TimestepMode,
    /// Spread the solve phase over worker threads
    pub parallel: bool,
    /// Minimum agent count before the solve phase runs in parallel
    pub parallel_threshold: usize,
    /// Cell size of the static obstacle grid
    pub obstacle_cell_size: f32,
    /// Waypoint arrival tolerance, as a multiple of the agent radius
    pub arrival_tolerance_factor: f32,
    /// Distance from the final waypoint (in radii) where agents start slowing
    pub slowdown_distance_factor: f32,
    /// Time constant of the preferred-velocity decay after arrival
    pub arrival_decay_time: f32,
    /// Gain of the lateral pull back into a corridor
    pub corridor_steering_gain: f32,
    /// Divergence between preferred and actual velocity (fraction of max
    /// speed) that counts as "not making progress"
    pub stuck_divergence: f32,
    /// How long the divergence must persist before a stuck event
    pub stuck_duration: f32,
    /// Gap below which two agents count as a weak collision
    pub weak_collision_margin: f32,
    /// Remove agents from the crowd once they arrive
    pub despawn_on_arrival: bool,
}

impl Default for CrowdConfig {
    fn default() -> Self {
        Self {
            agent_defaults: AgentDefaults::default(),
            epsilon: DEFAULT_EPSILON,
            fallback_lp: true,
            timestep: TimestepMode::default(),
            parallel: true,
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
            obstacle_cell_size: DEFAULT_OBSTACLE_CELL_SIZE,
            arrival_tolerance_factor: 1.0,
            slowdown_distance_factor: 2.0,
            arrival_decay_time: 0.25,
            corridor_steering_gain: 1.0,
            stuck_divergence: 0.75,
            stuck_duration: 2.0,
            weak_collision_margin: 0.1,
            despawn_on_arrival: false,
        }
    }
}

fn check_positive(name: &str, value: f32) -> Result<()> {
    if !(value.is_finite() && value > 0.0) {
        return Err(Error::InvalidConfig(format!(
            "{name} must be positive and finite, got {value}"
        )));
    }
    Ok(())
}

fn check_non_negative(name: &str, value: f32) -> Result<()> {
    if !(value.is_finite() && value >= 0.0) {
        return Err(Error::InvalidConfig(format!(
            "{name} must be non-negative and finite, got {value}"
        )));
    }
    Ok(())
}

impl CrowdConfig {
    /// Creates the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks that every option is within its valid range
    pub fn validate(&self) -> Result<()> {
        let defaults = &self.agent_defaults;
        check_positive("agent_defaults.radius", defaults.radius)?;
        check_non_negative("agent_defaults.max_speed", defaults.max_speed)?;
        check_non_negative("agent_defaults.neighbor_dist", defaults.neighbor_dist)?;
        check_positive("agent_defaults.time_horizon", defaults.time_horizon)?;
        check_positive("agent_defaults.time_horizon_obst", defaults.time_horizon_obst)?;

        check_positive("epsilon", self.epsilon)?;
        check_positive("obstacle_cell_size", self.obstacle_cell_size)?;
        check_positive("arrival_tolerance_factor", self.arrival_tolerance_factor)?;
        check_non_negative("slowdown_distance_factor", self.slowdown_distance_factor)?;
        check_non_negative("arrival_decay_time", self.arrival_decay_time)?;
        check_non_negative("corridor_steering_gain", self.corridor_steering_gain)?;
        check_positive("stuck_divergence", self.stuck_divergence)?;
        check_positive("stuck_duration", self.stuck_duration)?;
        check_non_negative("weak_collision_margin", self.weak_collision_margin)?;

        match self.timestep {
            TimestepMode::Fixed { step, max_substeps } => {
                check_positive("timestep.step", step)?;
                if max_substeps == 0 {
                    return Err(Error::InvalidConfig(
                        "timestep.max_substeps must be at least 1".to_string(),
                    ));
                }
            }
            TimestepMode::Variable { max_step } => {
                check_positive("timestep.max_step", max_step)?;
            }
        }

        Ok(())
    }

    /// Loads a configuration from a JSON file and validates it
    #[cfg(feature = "serialization")]
    pub fn load_from_json<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: CrowdConfig =
            serde_json::from_str(&json).map_err(|e| Error::Serialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the configuration to a JSON file
    #[cfg(feature = "serialization")]
    pub fn save_to_json<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let json =
            serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CrowdConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent_defaults.max_neighbors, 10);
        assert_eq!(config.epsilon, DEFAULT_EPSILON);
        assert!(config.fallback_lp);
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = CrowdConfig::default();
        config.epsilon = 0.0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config = CrowdConfig::default();
        config.agent_defaults.time_horizon = f32::NAN;
        assert!(config.validate().is_err());

        let mut config = CrowdConfig::default();
        config.timestep = TimestepMode::Fixed {
            step: 0.05,
            max_substeps: 0,
        };
        assert!(config.validate().is_err());

        let mut config = CrowdConfig::default();
        config.timestep = TimestepMode::Variable { max_step: -1.0 };
        assert!(config.validate().is_err());
    }

    #[cfg(feature = "serialization")]
    #[test]
    fn test_json_round_trip_through_file() -> Result<()> {
        let mut config = CrowdConfig::default();
        config.parallel = false;
        config.timestep = TimestepMode::Fixed {
            step: 0.05,
            max_substeps: 4,
        };

        let path = std::env::temp_dir().join(format!(
            "orca_crowd_config_{}.json",
            std::process::id()
        ));
        config.save_to_json(&path)?;
        let loaded = CrowdConfig::load_from_json(&path)?;
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded, config);
        Ok(())
    }
}
