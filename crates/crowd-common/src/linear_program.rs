//! Incremental linear programs over velocity half-planes
//!
//! The solver looks for the velocity inside the speed circle that satisfies
//! every half-plane and lies closest to a preferred velocity. Constraints are
//! added one at a time; when the current optimum violates a new constraint,
//! the optimum is moved onto that constraint's boundary by a 1-D search
//! against the constraints seen so far. If no feasible velocity exists, the
//! 3-D relaxation minimizes the largest violation of the soft constraints
//! while keeping the first `num_hard` constraints satisfied.

use glam::Vec2;

use crate::geometry::HalfPlane;
use crate::math::{clamp_length, det, sqr};

/// Reusable buffers for the relaxation step.
///
/// One scratch value is owned per worker and reset for every solve, so the
/// projected constraint set never allocates once warmed up.
#[derive(Debug, Default, Clone)]
pub struct LpScratch {
    projected: Vec<HalfPlane>,
}

impl LpScratch {
    /// Creates an empty scratch buffer
    pub fn new() -> Self {
        Self::default()
    }
}

/// Outcome of a velocity solve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LpSolution {
    /// Selected velocity, always finite and within the speed limit
    pub velocity: Vec2,
    /// True when the constraints were infeasible and had to be relaxed
    pub relaxed: bool,
    /// Index of the first constraint the 2-D program could not satisfy
    pub first_failed: Option<usize>,
    /// Largest remaining violation over all constraints (0 when feasible)
    pub max_violation: f32,
}

/// Solves for the velocity closest to `preferred` that satisfies `lines`.
///
/// `lines[..num_hard]` are never relaxed. When `allow_fallback` is false an
/// infeasible program keeps the best velocity found before the failing
/// constraint instead of running the relaxation.
pub fn solve(
    lines: &[HalfPlane],
    num_hard: usize,
    max_speed: f32,
    preferred: Vec2,
    eps: f32,
    allow_fallback: bool,
    scratch: &mut LpScratch,
) -> LpSolution {
    let max_speed = if max_speed.is_finite() { max_speed.max(0.0) } else { 0.0 };
    let preferred = if preferred.is_finite() { preferred } else { Vec2::ZERO };
    let num_hard = num_hard.min(lines.len());

    let mut result = preferred;
    let failed = solve_2d(lines, max_speed, preferred, false, eps, &mut result);

    let first_failed = (failed < lines.len()).then_some(failed);
    if first_failed.is_some() && allow_fallback {
        solve_3d(lines, num_hard, failed, max_speed, eps, scratch, &mut result);
    }

    let velocity = clamp_length(result, max_speed);
    let max_violation = lines
        .iter()
        .map(|line| line.violation(velocity))
        .fold(0.0f32, f32::max);

    LpSolution {
        velocity,
        relaxed: first_failed.is_some(),
        first_failed,
        max_violation,
    }
}

/// Solves the 1-D program on the boundary of `lines[line_no]`, subject to
/// the earlier constraints and the speed circle.
///
/// With `direction_opt` the result is the extreme point along `opt_velocity`
/// (a direction); otherwise it is the boundary point closest to
/// `opt_velocity`. Returns `false` when the boundary has no feasible part.
fn solve_1d(
    lines: &[HalfPlane],
    line_no: usize,
    radius: f32,
    opt_velocity: Vec2,
    direction_opt: bool,
    eps: f32,
    result: &mut Vec2,
) -> bool {
    let line = &lines[line_no];
    let Some((mut t_left, mut t_right)) = line.intersect_circle(radius) else {
        // The speed circle misses this boundary entirely
        return false;
    };

    for other in &lines[..line_no] {
        let denominator = det(line.direction, other.direction);
        let numerator = det(other.direction, line.point - other.point);

        if denominator.abs() <= eps {
            // Parallel boundaries: either `other` cuts this line away
            // completely or it does not constrain it at all
            if numerator < 0.0 {
                return false;
            }
            continue;
        }

        let t = numerator / denominator;
        if denominator >= 0.0 {
            t_right = t_right.min(t);
        } else {
            t_left = t_left.max(t);
        }

        if t_left > t_right {
            return false;
        }
    }

    if direction_opt {
        *result = if opt_velocity.dot(line.direction) > 0.0 {
            line.point_at(t_right)
        } else {
            line.point_at(t_left)
        };
    } else {
        let t = line.direction.dot(opt_velocity - line.point);
        *result = line.point_at(t.clamp(t_left, t_right));
    }

    true
}

/// Incremental 2-D program. Returns the index of the first constraint that
/// could not be satisfied, or `lines.len()` on success.
fn solve_2d(
    lines: &[HalfPlane],
    radius: f32,
    opt_velocity: Vec2,
    direction_opt: bool,
    eps: f32,
    result: &mut Vec2,
) -> usize {
    if direction_opt {
        // `opt_velocity` is a unit direction here
        *result = opt_velocity * radius;
    } else if opt_velocity.length_squared() > sqr(radius) {
        *result = opt_velocity.normalize_or_zero() * radius;
    } else {
        *result = opt_velocity;
    }

    for (i, line) in lines.iter().enumerate() {
        if line.violation(*result) > 0.0 {
            let previous = *result;
            if !solve_1d(lines, i, radius, opt_velocity, direction_opt, eps, result) {
                *result = previous;
                return i;
            }
        }
    }

    lines.len()
}

/// Relaxation: minimizes the maximum violation of `lines[num_hard..]`,
/// starting from the constraint `begin_line` where the 2-D program failed.
fn solve_3d(
    lines: &[HalfPlane],
    num_hard: usize,
    begin_line: usize,
    radius: f32,
    eps: f32,
    scratch: &mut LpScratch,
    result: &mut Vec2,
) {
    let mut distance = 0.0f32;

    for i in begin_line..lines.len() {
        let line = &lines[i];
        if line.violation(*result) <= distance {
            continue;
        }

        // Re-express every earlier soft constraint as a bisector on the
        // boundary of constraint `i`
        scratch.projected.clear();
        scratch.projected.extend_from_slice(&lines[..num_hard]);

        for other in &lines[num_hard..i] {
            let determinant = det(line.direction, other.direction);
            let point = if determinant.abs() <= eps {
                if line.direction.dot(other.direction) > 0.0 {
                    // Same direction, already covered by `line`
                    continue;
                }
                0.5 * (line.point + other.point)
            } else {
                line.point
                    + line.direction * (det(other.direction, line.point - other.point) / determinant)
            };

            let direction = (other.direction - line.direction).normalize_or_zero();
            if direction == Vec2::ZERO {
                continue;
            }
            scratch.projected.push(HalfPlane::new(point, direction));
        }

        let previous = *result;
        let toward = Vec2::new(-line.direction.y, line.direction.x);
        if solve_2d(&scratch.projected, radius, toward, true, eps, result) < scratch.projected.len()
        {
            // Only numerical noise can fail here; keep the last good value
            *result = previous;
        }

        distance = line.violation(*result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::DEFAULT_EPSILON;

    fn run(lines: &[HalfPlane], num_hard: usize, max_speed: f32, preferred: Vec2) -> LpSolution {
        let mut scratch = LpScratch::new();
        solve(
            lines,
            num_hard,
            max_speed,
            preferred,
            DEFAULT_EPSILON,
            true,
            &mut scratch,
        )
    }

    #[test]
    fn test_unconstrained_returns_preferred() {
        let solution = run(&[], 0, 2.0, Vec2::new(1.0, 0.5));
        assert_eq!(solution.velocity, Vec2::new(1.0, 0.5));
        assert!(!solution.relaxed);
        assert_eq!(solution.max_violation, 0.0);
    }

    #[test]
    fn test_preferred_clamped_to_max_speed() {
        let solution = run(&[], 0, 1.0, Vec2::new(3.0, 4.0));
        assert!((solution.velocity.length() - 1.0).abs() < 1e-5);
        assert!((solution.velocity.x - 0.6).abs() < 1e-5);
    }

    #[test]
    fn test_single_constraint_projects_onto_boundary() {
        // Permitted side is y >= 0.5
        let lines = [HalfPlane::new(Vec2::new(0.0, 0.5), Vec2::X)];
        let solution = run(&lines, 0, 2.0, Vec2::new(1.0, 0.0));
        assert!((solution.velocity - Vec2::new(1.0, 0.5)).length() < 1e-5);
        assert!(!solution.relaxed);
    }

    #[test]
    fn test_two_constraints_meet_at_corner() {
        // y >= 0.5 and x <= 0.25
        let lines = [
            HalfPlane::new(Vec2::new(0.0, 0.5), Vec2::X),
            HalfPlane::new(Vec2::new(0.25, 0.0), Vec2::Y),
        ];
        let solution = run(&lines, 0, 2.0, Vec2::new(1.0, 0.0));
        assert!((solution.velocity - Vec2::new(0.25, 0.5)).length() < 1e-5);
    }

    #[test]
    fn test_infeasible_program_is_relaxed() {
        // y >= 0.5 and y <= -0.5 cannot both hold
        let lines = [
            HalfPlane::new(Vec2::new(0.0, 0.5), Vec2::X),
            HalfPlane::new(Vec2::new(0.0, -0.5), -Vec2::X),
        ];
        let solution = run(&lines, 0, 2.0, Vec2::new(1.0, 0.0));
        assert!(solution.relaxed);
        assert_eq!(solution.first_failed, Some(1));
        assert!(solution.velocity.is_finite());
        // The least-bad velocity splits the violation evenly
        assert!(solution.velocity.y.abs() < 1e-4);
        assert!((solution.max_violation - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_hard_constraints_survive_relaxation() {
        // Hard: y >= 0.5. Soft: y <= -0.5.
        let lines = [
            HalfPlane::new(Vec2::new(0.0, 0.5), Vec2::X),
            HalfPlane::new(Vec2::new(0.0, -0.5), -Vec2::X),
        ];
        let solution = run(&lines, 1, 2.0, Vec2::ZERO);
        assert!(solution.relaxed);
        assert!(lines[0].contains(solution.velocity, 1e-4));
    }

    #[test]
    fn test_fallback_disabled_keeps_partial_result() {
        let lines = [
            HalfPlane::new(Vec2::new(0.0, 0.5), Vec2::X),
            HalfPlane::new(Vec2::new(0.0, -0.5), -Vec2::X),
        ];
        let mut scratch = LpScratch::new();
        let solution = solve(
            &lines,
            0,
            2.0,
            Vec2::new(1.0, 0.0),
            DEFAULT_EPSILON,
            false,
            &mut scratch,
        );
        assert!(solution.relaxed);
        assert!((solution.velocity - Vec2::new(1.0, 0.5)).length() < 1e-5);
    }

    #[test]
    fn test_speed_circle_excludes_constraint() {
        // Permitted side y >= 3 lies entirely outside a speed circle of 1
        let lines = [HalfPlane::new(Vec2::new(0.0, 3.0), Vec2::X)];
        let solution = run(&lines, 0, 1.0, Vec2::ZERO);
        assert!(solution.relaxed);
        assert!(solution.velocity.length() <= 1.0 + 1e-5);
        assert!(solution.velocity.y > 0.9);
    }

    #[test]
    fn test_non_finite_input_is_sanitized() {
        let solution = run(&[], 0, f32::NAN, Vec2::new(f32::INFINITY, 0.0));
        assert_eq!(solution.velocity, Vec2::ZERO);
    }
}
