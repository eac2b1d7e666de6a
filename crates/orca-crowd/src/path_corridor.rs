//! Path corridor following
//!
//! A corridor is the ordered list of waypoints an agent follows, supplied by
//! an external planner. This module turns it into the agent's preferred
//! velocity each tick, advances through waypoints as they are reached and
//! reports arrival and lack of progress.

use crowd_common::{clamp_length, closest_point_on_segment, is_finite_vec, Vec2};

use crate::agent::AgentHandle;
use crate::config::CrowdConfig;

/// Navigation state of a corridor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub enum CorridorStatus {
    /// No usable route; the preferred velocity is zero
    #[default]
    Idle,
    /// Steering toward the next waypoint
    Following,
    /// The final waypoint was reached
    Arrived,
}

/// Kinds of navigation events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub enum NavEventKind {
    /// The waypoint at `index` came within arrival tolerance
    WaypointReached { index: usize },
    /// The final waypoint was reached
    Arrived,
    /// The assigned corridor could not be followed
    Idle,
    /// Preferred and actual velocity diverged for too long
    Stuck,
}

/// Navigation event for one agent, published with the tick report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct NavEvent {
    pub handle: AgentHandle,
    pub kind: NavEventKind,
}

/// Steering parameters taken from the crowd configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SteeringSettings {
    pub arrival_tolerance_factor: f32,
    pub slowdown_distance_factor: f32,
    pub arrival_decay_time: f32,
    pub corridor_steering_gain: f32,
    pub stuck_divergence: f32,
    pub stuck_duration: f32,
    pub epsilon: f32,
}

impl SteeringSettings {
    /// Arrival tolerance for an agent of the given radius
    pub fn arrival_tolerance(&self, radius: f32) -> f32 {
        self.arrival_tolerance_factor * radius
    }
}

impl From<&CrowdConfig> for SteeringSettings {
    fn from(config: &CrowdConfig) -> Self {
        Self {
            arrival_tolerance_factor: config.arrival_tolerance_factor,
            slowdown_distance_factor: config.slowdown_distance_factor,
            arrival_decay_time: config.arrival_decay_time,
            corridor_steering_gain: config.corridor_steering_gain,
            stuck_divergence: config.stuck_divergence,
            stuck_duration: config.stuck_duration,
            epsilon: config.epsilon,
        }
    }
}

/// Waypoint corridor for one agent
#[derive(Debug, Clone, PartialEq)]
pub struct PathCorridor {
    /// Ordered waypoints
    waypoints: Vec<Vec2>,
    /// Index of the next unreached waypoint
    next: usize,
    /// Optional corridor width around the waypoint segments
    width: Option<f32>,
    /// Agent position when the corridor was assigned
    origin: Vec2,
    status: CorridorStatus,
}

impl PathCorridor {
    /// Creates a corridor for an agent at `position`.
    ///
    /// Empty or non-finite input, a non-positive width, or a first waypoint
    /// lying behind the agent (relative to the route heading, outside
    /// `tolerance`) produce an idle corridor.
    pub fn new(position: Vec2, waypoints: Vec<Vec2>, width: Option<f32>, tolerance: f32) -> Self {
        let status = if Self::is_followable(position, &waypoints, width, tolerance) {
            CorridorStatus::Following
        } else {
            CorridorStatus::Idle
        };

        Self {
            waypoints,
            next: 0,
            width,
            origin: position,
            status,
        }
    }

    fn is_followable(position: Vec2, waypoints: &[Vec2], width: Option<f32>, tolerance: f32) -> bool {
        if waypoints.is_empty() || !waypoints.iter().all(|w| is_finite_vec(*w)) {
            return false;
        }
        if let Some(width) = width {
            if !(width.is_finite() && width > 0.0) {
                return false;
            }
        }
        if let [first, second, ..] = waypoints {
            let to_first = *first - position;
            let heading = *second - *first;
            if to_first.dot(heading) < 0.0 && to_first.length() > tolerance {
                return false;
            }
        }
        true
    }

    /// Gets the corridor status
    pub fn status(&self) -> CorridorStatus {
        self.status
    }

    /// Gets the waypoints
    pub fn waypoints(&self) -> &[Vec2] {
        &self.waypoints
    }

    /// Index of the next unreached waypoint
    pub fn next_index(&self) -> usize {
        self.next
    }

    /// Gets the corridor width
    pub fn width(&self) -> Option<f32> {
        self.width
    }

    /// Waypoint currently steered toward
    pub fn target(&self) -> Option<Vec2> {
        match self.status {
            CorridorStatus::Following => self.waypoints.get(self.next).copied(),
            _ => None,
        }
    }

    /// Straight-line length of the route still ahead of `position`
    pub fn remaining_distance(&self, position: Vec2) -> f32 {
        let Some(target) = self.target() else {
            return 0.0;
        };
        let tail: f32 = self.waypoints[self.next..]
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).length())
            .sum();
        (target - position).length() + tail
    }

    /// Computes the preferred velocity for this tick.
    ///
    /// Never exceeds `max_speed`. After arrival, `previous` decays
    /// exponentially and snaps to zero once it is negligible.
    pub fn compute_preferred_velocity(
        &self,
        position: Vec2,
        previous: Vec2,
        max_speed: f32,
        radius: f32,
        settings: &SteeringSettings,
        dt: f32,
    ) -> Vec2 {
        match self.status {
            CorridorStatus::Idle => Vec2::ZERO,
            CorridorStatus::Arrived => {
                if settings.arrival_decay_time <= 0.0 {
                    return Vec2::ZERO;
                }
                let decayed = clamp_length(previous, max_speed) * (-dt / settings.arrival_decay_time).exp();
                if decayed.length() < settings.epsilon {
                    Vec2::ZERO
                } else {
                    decayed
                }
            }
            CorridorStatus::Following => {
                let Some(target) = self.target() else {
                    return Vec2::ZERO;
                };
                self.steer(position, target, max_speed, radius, settings)
            }
        }
    }

    fn steer(&self, position: Vec2, target: Vec2, max_speed: f32, radius: f32, settings: &SteeringSettings) -> Vec2 {
        let to_target = target - position;
        let distance = to_target.length();
        let is_final = self.next + 1 == self.waypoints.len();

        let mut speed = max_speed;
        let slowdown = settings.slowdown_distance_factor * radius;
        if is_final && slowdown > 0.0 {
            speed *= (distance / slowdown).min(1.0);
        }

        let mut velocity = if distance > settings.epsilon {
            to_target * (speed / distance)
        } else {
            Vec2::ZERO
        };

        // Pull back toward the centre line when drifting past the corridor edge
        if let Some(width) = self.width {
            let start = if self.next == 0 {
                self.origin
            } else {
                self.waypoints[self.next - 1]
            };
            let centre = closest_point_on_segment(position, start, target);
            let offset = position - centre;
            let lateral = offset.length();
            let allowed = (0.5 * width - radius).max(0.0);
            if lateral > allowed && lateral > settings.epsilon {
                velocity -= offset / lateral * (lateral - allowed) * settings.corridor_steering_gain;
            }
        }

        clamp_length(velocity, max_speed)
    }

    /// Advances past every waypoint within `tolerance` of `position`,
    /// appending the resulting events to `events`.
    ///
    /// `Arrived` is emitted once, when the final waypoint is reached.
    pub fn advance(&mut self, position: Vec2, tolerance: f32, events: &mut Vec<NavEventKind>) {
        while self.status == CorridorStatus::Following {
            let Some(&waypoint) = self.waypoints.get(self.next) else {
                self.status = CorridorStatus::Idle;
                break;
            };
            if (waypoint - position).length() > tolerance {
                break;
            }

            events.push(NavEventKind::WaypointReached { index: self.next });
            if self.next + 1 == self.waypoints.len() {
                self.status = CorridorStatus::Arrived;
                events.push(NavEventKind::Arrived);
            } else {
                self.next += 1;
            }
        }
    }
}

/// Detects agents that fail to follow their preferred velocity
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StuckDetector {
    elapsed: f32,
    reported: bool,
}

impl StuckDetector {
    /// Accumulates divergence time; returns `true` on the tick the agent
    /// first counts as stuck. Re-arms once the agent makes progress again.
    pub fn update(
        &mut self,
        preferred: Vec2,
        velocity: Vec2,
        max_speed: f32,
        settings: &SteeringSettings,
        dt: f32,
    ) -> bool {
        if max_speed <= 0.0 {
            self.reset();
            return false;
        }

        // Over-speed requests are capped by the solver, not blocked
        let divergence = (clamp_length(preferred, max_speed) - velocity).length();
        if divergence > settings.stuck_divergence * max_speed {
            self.elapsed += dt;
            if self.elapsed >= settings.stuck_duration && !self.reported {
                self.reported = true;
                return true;
            }
        } else {
            self.reset();
        }
        false
    }

    /// Clears the accumulated time
    pub fn reset(&mut self) {
        self.elapsed = 0.0;
        self.reported = false;
    }

    /// Time the divergence has persisted
    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }
}
