//! Per-tick reports and run-wide metrics
//!
//! A [`TickReport`] is the read-only snapshot published after every tick:
//! per-agent samples for the representation layer, navigation events and
//! aggregate counters for evaluation. [`CrowdMetrics`] accumulates the
//! reports over a whole run.

use std::time::Duration;

use crowd_common::Vec2;

use crate::agent::AgentHandle;
use crate::path_corridor::{CorridorStatus, NavEvent};

/// State of one agent after a tick
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct AgentSample {
    pub handle: AgentHandle,
    pub position: Vec2,
    pub velocity: Vec2,
    pub preferred_velocity: Vec2,
    /// Position change over the tick
    pub displacement: Vec2,
    /// Navigation status, `None` for directly driven agents
    pub status: Option<CorridorStatus>,
}

/// Aggregate counters of one tick
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct TickTotals {
    /// Agents simulated this tick
    pub agents: usize,
    /// Solves whose constraints had to be relaxed
    pub soft_violations: usize,
    /// Overlapping neighbour pairs, counted once from each side
    pub strong_collisions: usize,
    /// Neighbour pairs closer than the weak collision margin, counted once
    /// from each side
    pub weak_collisions: usize,
    /// Agents that reached their final waypoint
    pub arrivals: usize,
    /// Mean speed over all agents
    pub mean_speed: f32,
}

/// Wall-clock time spent in each tick phase
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct PhaseTimings {
    pub neighbor_query: Duration,
    pub solve: Duration,
    pub integrate: Duration,
    pub publish: Duration,
}

impl PhaseTimings {
    /// Total time of the tick
    pub fn total(&self) -> Duration {
        self.neighbor_query + self.solve + self.integrate + self.publish
    }
}

/// Snapshot published after each tick
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct TickReport {
    /// Tick number, starting at 1
    pub tick: u64,
    /// Simulation time at the end of the tick
    pub time: f32,
    /// Length of the tick
    pub dt: f32,
    /// One sample per agent, in slot order
    pub samples: Vec<AgentSample>,
    /// Navigation events raised since the previous report
    pub events: Vec<NavEvent>,
    pub totals: TickTotals,
    pub timings: PhaseTimings,
}

impl TickReport {
    /// Finds the sample of an agent
    pub fn sample(&self, handle: AgentHandle) -> Option<&AgentSample> {
        self.samples.iter().find(|sample| sample.handle == handle)
    }
}

/// Metrics accumulated over a run
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct CrowdMetrics {
    pub ticks: u64,
    pub simulated_time: f32,
    pub soft_violations: u64,
    pub strong_collisions: u64,
    pub weak_collisions: u64,
    pub arrivals: u64,
    pub total_time_to_goal: f32,
    pub max_time_to_goal: f32,
    pub total_distance_walked: f32,
}

impl CrowdMetrics {
    /// Creates empty metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the counters of a published report
    pub fn record_tick(&mut self, report: &TickReport) {
        self.ticks += 1;
        self.simulated_time = report.time;
        self.soft_violations += report.totals.soft_violations as u64;
        self.strong_collisions += report.totals.strong_collisions as u64;
        self.weak_collisions += report.totals.weak_collisions as u64;
        self.total_distance_walked += report
            .samples
            .iter()
            .map(|sample| sample.displacement.length())
            .sum::<f32>();
    }

    /// Records one agent reaching its goal
    pub fn record_arrival(&mut self, time_to_goal: f32) {
        self.arrivals += 1;
        self.total_time_to_goal += time_to_goal;
        self.max_time_to_goal = self.max_time_to_goal.max(time_to_goal);
    }

    /// Mean time from route assignment to arrival
    pub fn mean_time_to_goal(&self) -> Option<f32> {
        if self.arrivals == 0 {
            None
        } else {
            Some(self.total_time_to_goal / self.arrivals as f32)
        }
    }

    /// Resets all counters
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(displacement: Vec2) -> AgentSample {
        AgentSample {
            handle: AgentHandle {
                index: 0,
                generation: 0,
            },
            position: Vec2::ZERO,
            velocity: Vec2::ZERO,
            preferred_velocity: Vec2::ZERO,
            displacement,
            status: None,
        }
    }

    #[test]
    fn test_record_tick_accumulates() {
        let mut metrics = CrowdMetrics::new();
        let report = TickReport {
            tick: 1,
            time: 0.1,
            dt: 0.1,
            samples: vec![sample(Vec2::new(0.3, 0.4)), sample(Vec2::new(0.0, 1.0))],
            totals: TickTotals {
                agents: 2,
                soft_violations: 1,
                strong_collisions: 2,
                weak_collisions: 4,
                ..Default::default()
            },
            ..Default::default()
        };

        metrics.record_tick(&report);
        metrics.record_tick(&report);

        assert_eq!(metrics.ticks, 2);
        assert_eq!(metrics.soft_violations, 2);
        assert_eq!(metrics.strong_collisions, 4);
        assert_eq!(metrics.weak_collisions, 8);
        assert!((metrics.total_distance_walked - 3.0).abs() < 1e-5);
    }

    #[test]
    fn test_time_to_goal() {
        let mut metrics = CrowdMetrics::new();
        assert_eq!(metrics.mean_time_to_goal(), None);

        metrics.record_arrival(2.0);
        metrics.record_arrival(4.0);
        assert_eq!(metrics.arrivals, 2);
        assert_eq!(metrics.mean_time_to_goal(), Some(3.0));
        assert_eq!(metrics.max_time_to_goal, 4.0);

        metrics.reset();
        assert_eq!(metrics, CrowdMetrics::default());
    }

    #[test]
    fn test_phase_timings_total() {
        let timings = PhaseTimings {
            neighbor_query: Duration::from_millis(1),
            solve: Duration::from_millis(2),
            integrate: Duration::from_millis(3),
            publish: Duration::from_millis(4),
        };
        assert_eq!(timings.total(), Duration::from_millis(10));
    }
}
