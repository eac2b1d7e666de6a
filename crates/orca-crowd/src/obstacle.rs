//! Static obstacles and their one-sided velocity constraints
//!
//! Obstacles are registered as shapes and flattened into elements (polygon
//! and polyline edges, circle discs). Each element knows how to produce the
//! half-plane that keeps an agent from reaching it within the obstacle time
//! horizon. Obstacles never move, so the agent takes full responsibility.
//!
//! Edges follow the polygon winding: the solid side is to the left of each
//! edge. Counter-clockwise polygons keep agents out, clockwise polygons keep
//! them in. Polylines are treated as the visible part of some larger closed
//! boundary, solid on the left.

use std::collections::BTreeMap;
use std::fmt;

use crowd_common::{
    closest_point_on_segment, det, distance_point_segment_squared, is_finite_vec, segment_aabb, sqr,
    Error, HalfPlane, Result, Vec2,
};

/// Tolerance used when deciding whether an edge is already covered by an
/// earlier obstacle constraint
const EDGE_COVER_EPSILON: f32 = 1e-5;

/// Identifier of a registered obstacle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct ObstacleId(pub u32);

impl fmt::Display for ObstacleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obstacle {}", self.0)
    }
}

/// Reference to one element (edge or disc) of the flattened obstacle set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObstacleRef(pub u32);

/// Obstacle shapes accepted by the crowd
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub enum ObstacleShape {
    /// Closed polygon; the last vertex connects back to the first
    Polygon { vertices: Vec<Vec2> },
    /// Open chain of segments
    Polyline { vertices: Vec<Vec2> },
    /// Solid disc
    Circle { center: Vec2, radius: f32 },
}

impl ObstacleShape {
    /// Validates the shape and removes repeated vertices.
    ///
    /// Zero-length segments are repaired rather than rejected; shapes that
    /// collapse below their minimum vertex count are invalid.
    pub fn sanitized(&self) -> Result<ObstacleShape> {
        match self {
            ObstacleShape::Polygon { vertices } => {
                let mut vertices = dedup_vertices(vertices)?;
                while vertices.len() > 1 && vertices.first() == vertices.last() {
                    vertices.pop();
                }
                if vertices.len() < 3 {
                    return Err(Error::InvalidObstacle(format!(
                        "polygon needs at least 3 distinct vertices, got {}",
                        vertices.len()
                    )));
                }
                Ok(ObstacleShape::Polygon { vertices })
            }
            ObstacleShape::Polyline { vertices } => {
                let vertices = dedup_vertices(vertices)?;
                if vertices.len() < 2 {
                    return Err(Error::InvalidObstacle(format!(
                        "polyline needs at least 2 distinct vertices, got {}",
                        vertices.len()
                    )));
                }
                Ok(ObstacleShape::Polyline { vertices })
            }
            ObstacleShape::Circle { center, radius } => {
                if !is_finite_vec(*center) {
                    return Err(Error::InvalidObstacle(format!(
                        "circle center must be finite, got {center}"
                    )));
                }
                if !(radius.is_finite() && *radius > 0.0) {
                    return Err(Error::InvalidObstacle(format!(
                        "circle radius must be positive, got {radius}"
                    )));
                }
                Ok(ObstacleShape::Circle {
                    center: *center,
                    radius: *radius,
                })
            }
        }
    }
}

fn dedup_vertices(vertices: &[Vec2]) -> Result<Vec<Vec2>> {
    if let Some(bad) = vertices.iter().find(|v| !is_finite_vec(**v)) {
        return Err(Error::InvalidObstacle(format!(
            "vertex must be finite, got {bad}"
        )));
    }
    let mut out: Vec<Vec2> = Vec::with_capacity(vertices.len());
    for &v in vertices {
        if out.last() != Some(&v) {
            out.push(v);
        }
    }
    Ok(out)
}

/// Obstacle vertex with its precomputed convexity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeVertex {
    /// Vertex position
    pub point: Vec2,
    /// True if the boundary turns away from the free side at this vertex
    pub convex: bool,
}

/// The agent-side inputs of an obstacle constraint
#[derive(Debug, Clone, Copy)]
pub struct ObstacleQuery {
    /// Agent position
    pub position: Vec2,
    /// Agent velocity at the start of the tick
    pub velocity: Vec2,
    /// Agent radius
    pub radius: f32,
    /// Obstacle time horizon
    pub time_horizon: f32,
    /// Reciprocal of the tick length
    pub inv_dt: f32,
}

/// One element of the flattened obstacle set
#[derive(Debug, Clone, PartialEq)]
pub enum ObstacleElement {
    /// Directed edge; the solid side is on the left
    Edge {
        left: EdgeVertex,
        right: EdgeVertex,
        /// Unit direction from `left` to `right`
        direction: Vec2,
        /// Vertex before `left`, if the boundary continues
        left_left: Option<Vec2>,
        /// Vertex after `right`, if the boundary continues
        right_right: Option<Vec2>,
        owner: ObstacleId,
    },
    /// Solid disc
    Disc {
        center: Vec2,
        radius: f32,
        owner: ObstacleId,
    },
}

impl ObstacleElement {
    /// Obstacle this element belongs to
    pub fn owner(&self) -> ObstacleId {
        match self {
            ObstacleElement::Edge { owner, .. } | ObstacleElement::Disc { owner, .. } => *owner,
        }
    }

    /// Axis-aligned bounds of the element
    pub fn bounds(&self) -> (Vec2, Vec2) {
        match self {
            ObstacleElement::Edge { left, right, .. } => segment_aabb(left.point, right.point, 0.0),
            ObstacleElement::Disc { center, radius, .. } => segment_aabb(*center, *center, *radius),
        }
    }

    /// Squared distance from `point` to the element surface (zero inside a disc)
    pub fn distance_squared(&self, point: Vec2) -> f32 {
        match self {
            ObstacleElement::Edge { left, right, .. } => {
                distance_point_segment_squared(point, left.point, right.point)
            }
            ObstacleElement::Disc { center, radius, .. } => {
                sqr(((point - *center).length() - radius).max(0.0))
            }
        }
    }

    /// Computes the velocity half-plane this element imposes on an agent.
    ///
    /// `existing` holds the obstacle constraints already produced for this
    /// agent (nearest first); edges whose velocity obstacle they cover are
    /// skipped, as are edges seen from their solid side.
    pub fn half_plane(&self, query: &ObstacleQuery, existing: &[HalfPlane]) -> Option<HalfPlane> {
        match self {
            ObstacleElement::Edge {
                left,
                right,
                direction,
                left_left,
                right_right,
                ..
            } => edge_half_plane(query, *left, *right, *direction, *left_left, *right_right, existing),
            ObstacleElement::Disc { center, radius, .. } => {
                Some(disc_half_plane(query, *center, *radius))
            }
        }
    }
}

fn unit_or(v: Vec2, fallback: Vec2) -> Vec2 {
    v.try_normalize().unwrap_or(fallback)
}

/// Tangent direction of the left (`sign = 1`) or right (`sign = -1`) side of
/// the velocity cone around a vertex at `relative` with clearance `radius`
fn shadow_direction(relative: Vec2, dist_sq: f32, radius: f32, sign: f32) -> Vec2 {
    let leg = (dist_sq - sqr(radius)).max(0.0).sqrt();
    (relative * leg + sign * relative.perp() * radius) / dist_sq
}

fn is_edge_covered(left: Vec2, right: Vec2, query: &ObstacleQuery, existing: &[HalfPlane]) -> bool {
    let inv_tau = 1.0 / query.time_horizon;
    let clearance = query.radius * inv_tau - EDGE_COVER_EPSILON;
    existing.iter().any(|line| {
        det(left * inv_tau - line.point, line.direction) >= clearance
            && det(right * inv_tau - line.point, line.direction) >= clearance
    })
}

#[allow(clippy::too_many_arguments)]
fn edge_half_plane(
    query: &ObstacleQuery,
    mut left: EdgeVertex,
    mut right: EdgeVertex,
    edge_direction: Vec2,
    mut left_left: Option<Vec2>,
    mut right_right: Option<Vec2>,
    existing: &[HalfPlane],
) -> Option<HalfPlane> {
    let relative_left = left.point - query.position;
    let relative_right = right.point - query.position;
    let edge = right.point - left.point;

    // Seen from the solid side
    if det(-relative_left, edge) < 0.0 {
        return None;
    }

    if is_edge_covered(relative_left, relative_right, query, existing) {
        return None;
    }

    let radius = query.radius;
    let radius_sq = sqr(radius);
    let dist_left_sq = relative_left.length_squared();
    let dist_right_sq = relative_right.length_squared();

    let s = (-relative_left).dot(edge) / edge.length_squared();
    let dist_line_sq = (s * edge - (-relative_left)).length_squared();

    // Already touching: forbid any velocity that deepens the contact
    if s < 0.0 && dist_left_sq <= radius_sq {
        // Reflex vertices are handled by the adjacent edge
        if !left.convex {
            return None;
        }
        let direction = unit_or(relative_left.perp(), -edge_direction);
        return Some(HalfPlane::new(Vec2::ZERO, direction));
    } else if s > 1.0 && dist_right_sq <= radius_sq {
        if !right.convex {
            return None;
        }
        if let Some(next) = right_right {
            if det(relative_right, next - right.point) < 0.0 {
                return None;
            }
        }
        let direction = unit_or(relative_right.perp(), -edge_direction);
        return Some(HalfPlane::new(Vec2::ZERO, direction));
    } else if (0.0..=1.0).contains(&s) && dist_line_sq <= radius_sq {
        return Some(HalfPlane::new(Vec2::ZERO, -edge_direction));
    }

    let mut left_shadow;
    let mut right_shadow;

    if s < 0.0 && dist_line_sq <= radius_sq {
        // Obliquely viewed: only the left vertex casts the shadow
        if !left.convex {
            return None;
        }
        right_right = Some(right.point);
        right = left;
        left_shadow = shadow_direction(relative_left, dist_left_sq, radius, 1.0);
        right_shadow = shadow_direction(relative_left, dist_left_sq, radius, -1.0);
    } else if s > 1.0 && dist_line_sq <= radius_sq {
        // Obliquely viewed: only the right vertex casts the shadow
        if !right.convex {
            return None;
        }
        left_left = Some(left.point);
        left = right;
        left_shadow = shadow_direction(relative_right, dist_right_sq, radius, 1.0);
        right_shadow = shadow_direction(relative_right, dist_right_sq, radius, -1.0);
    } else {
        left_shadow = if left.convex {
            shadow_direction(relative_left, dist_left_sq, radius, 1.0)
        } else {
            -edge_direction
        };
        right_shadow = if right.convex {
            shadow_direction(relative_right, dist_right_sq, radius, -1.0)
        } else {
            edge_direction
        };
    }

    // A shadow hidden behind the neighbouring edge belongs to that edge
    let mut left_shadow_covered = false;
    let mut right_shadow_covered = false;

    if let Some(prev) = left_left.filter(|_| left.convex) {
        let neighbour = prev - left.point;
        if det(left_shadow, neighbour) >= 0.0 {
            left_shadow = unit_or(neighbour, left_shadow);
            left_shadow_covered = true;
        }
    }
    if let Some(next) = right_right.filter(|_| right.convex) {
        let neighbour = next - right.point;
        if det(right_shadow, neighbour) <= 0.0 {
            right_shadow = unit_or(neighbour, right_shadow);
            right_shadow_covered = true;
        }
    }

    let inv_tau = 1.0 / query.time_horizon;
    let left_cutoff = (left.point - query.position) * inv_tau;
    let right_cutoff = (right.point - query.position) * inv_tau;
    let cutoff = right_cutoff - left_cutoff;
    let degenerate = left.point == right.point;
    let velocity = query.velocity;
    let clearance = radius * inv_tau;

    let t_cutoff = if degenerate {
        0.5
    } else {
        (velocity - left_cutoff).dot(cutoff) / cutoff.length_squared()
    };
    let t_left = (velocity - left_cutoff).dot(left_shadow);
    let t_right = (velocity - right_cutoff).dot(right_shadow);

    if (t_cutoff < 0.0 && t_left < 0.0) || (degenerate && t_left < 0.0 && t_right < 0.0) {
        let away = unit_or(velocity - left_cutoff, -left_cutoff.normalize_or_zero());
        return Some(HalfPlane::new(left_cutoff + clearance * away, -away.perp()));
    }

    if t_cutoff > 1.0 && t_right < 0.0 {
        let away = unit_or(velocity - right_cutoff, -right_cutoff.normalize_or_zero());
        return Some(HalfPlane::new(right_cutoff + clearance * away, -away.perp()));
    }

    let cutoff_dist_sq = if !(0.0..=1.0).contains(&t_cutoff) || degenerate {
        f32::INFINITY
    } else {
        (velocity - (left_cutoff + t_cutoff * cutoff)).length_squared()
    };
    let left_dist_sq = if t_left < 0.0 {
        f32::INFINITY
    } else {
        (velocity - (left_cutoff + t_left * left_shadow)).length_squared()
    };
    let right_dist_sq = if t_right < 0.0 {
        f32::INFINITY
    } else {
        (velocity - (right_cutoff + t_right * right_shadow)).length_squared()
    };

    if cutoff_dist_sq <= left_dist_sq && cutoff_dist_sq <= right_dist_sq {
        let direction = -unit_or(cutoff, edge_direction);
        Some(HalfPlane::new(left_cutoff + clearance * direction.perp(), direction))
    } else if left_dist_sq <= right_dist_sq {
        (!left_shadow_covered)
            .then(|| HalfPlane::new(left_cutoff + clearance * left_shadow.perp(), left_shadow))
    } else {
        (!right_shadow_covered)
            .then(|| HalfPlane::new(right_cutoff - clearance * right_shadow.perp(), -right_shadow))
    }
}

/// One-sided constraint for a static disc: the agent-agent construction with
/// a motionless neighbour and full responsibility
fn disc_half_plane(query: &ObstacleQuery, center: Vec2, disc_radius: f32) -> HalfPlane {
    let relative_position = center - query.position;
    let relative_velocity = query.velocity;
    let dist_sq = relative_position.length_squared();
    let combined_radius = query.radius + disc_radius;
    let combined_radius_sq = sqr(combined_radius);
    let inv_tau = 1.0 / query.time_horizon;

    let (direction, u) = if dist_sq > combined_radius_sq {
        let w = relative_velocity - inv_tau * relative_position;
        let w_length_sq = w.length_squared();
        let dot = w.dot(relative_position);

        if dot < 0.0 && sqr(dot) > combined_radius_sq * w_length_sq {
            let w_length = w_length_sq.sqrt();
            let unit_w = w / w_length;
            (
                Vec2::new(unit_w.y, -unit_w.x),
                (combined_radius * inv_tau - w_length) * unit_w,
            )
        } else {
            let direction = leg_direction(relative_position, w, dist_sq, combined_radius);
            let u = relative_velocity.dot(direction) * direction - relative_velocity;
            (direction, u)
        }
    } else {
        let w = relative_velocity - query.inv_dt * relative_position;
        let w_length = w.length();
        let unit_w = unit_or(w, -unit_or(relative_position, Vec2::X));
        (
            Vec2::new(unit_w.y, -unit_w.x),
            (combined_radius * query.inv_dt - w_length) * unit_w,
        )
    };

    HalfPlane::new(query.velocity + u, direction)
}

/// Unit direction of the velocity-obstacle leg nearest to `w`
pub(crate) fn leg_direction(relative_position: Vec2, w: Vec2, dist_sq: f32, combined_radius: f32) -> Vec2 {
    let leg = (dist_sq - sqr(combined_radius)).sqrt();
    let p = relative_position;
    if det(p, w) > 0.0 {
        Vec2::new(
            p.x * leg - p.y * combined_radius,
            p.x * combined_radius + p.y * leg,
        ) / dist_sq
    } else {
        -Vec2::new(
            p.x * leg + p.y * combined_radius,
            -p.x * combined_radius + p.y * leg,
        ) / dist_sq
    }
}

fn vertex_convexity(prev: Vec2, center: Vec2, next: Vec2) -> bool {
    det(next - center, prev - center) >= 0.0
}

fn flatten_chain(vertices: &[Vec2], closed: bool, owner: ObstacleId, out: &mut Vec<ObstacleElement>) {
    let n = vertices.len();
    let convex = |i: usize| -> bool {
        if closed {
            vertex_convexity(vertices[(i + n - 1) % n], vertices[i], vertices[(i + 1) % n])
        } else if i == 0 || i == n - 1 {
            true
        } else {
            vertex_convexity(vertices[i - 1], vertices[i], vertices[i + 1])
        }
    };

    let edge_count = if closed { n } else { n - 1 };
    for i in 0..edge_count {
        let j = (i + 1) % n;
        let left_left = if closed || i > 0 {
            Some(vertices[(i + n - 1) % n])
        } else {
            None
        };
        let right_right = if closed || j < n - 1 {
            Some(vertices[(j + 1) % n])
        } else {
            None
        };
        let direction = (vertices[j] - vertices[i]).normalize_or_zero();
        out.push(ObstacleElement::Edge {
            left: EdgeVertex {
                point: vertices[i],
                convex: convex(i),
            },
            right: EdgeVertex {
                point: vertices[j],
                convex: convex(j),
            },
            direction,
            left_left,
            right_right,
            owner,
        });
    }
}

/// Registered obstacles and their flattened elements
#[derive(Debug, Clone, Default)]
pub struct ObstacleMap {
    shapes: BTreeMap<ObstacleId, ObstacleShape>,
    next_id: u32,
    elements: Vec<ObstacleElement>,
    dirty: bool,
}

impl ObstacleMap {
    /// Creates an empty obstacle map
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an obstacle. Elements are derived on the next `rebuild`.
    pub fn insert(&mut self, shape: ObstacleShape) -> Result<ObstacleId> {
        let shape = shape.sanitized()?;
        let id = ObstacleId(self.next_id);
        self.next_id = self
            .next_id
            .checked_add(1)
            .ok_or_else(|| Error::InvalidObstacle("obstacle ids exhausted".to_string()))?;
        self.shapes.insert(id, shape);
        self.dirty = true;
        Ok(id)
    }

    /// Unregisters an obstacle
    pub fn remove(&mut self, id: ObstacleId) -> Result<ObstacleShape> {
        let shape = self
            .shapes
            .remove(&id)
            .ok_or(Error::UnknownObstacle(id.0))?;
        self.dirty = true;
        Ok(shape)
    }

    /// Gets a registered shape
    pub fn shape(&self, id: ObstacleId) -> Option<&ObstacleShape> {
        self.shapes.get(&id)
    }

    /// Number of registered obstacles
    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    /// Checks if no obstacles are registered
    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// True when shapes changed since the last rebuild
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Re-derives the flattened elements from the registered shapes
    pub fn rebuild(&mut self) {
        self.elements.clear();
        for (&id, shape) in &self.shapes {
            match shape {
                ObstacleShape::Polygon { vertices } => {
                    flatten_chain(vertices, true, id, &mut self.elements)
                }
                ObstacleShape::Polyline { vertices } => {
                    flatten_chain(vertices, false, id, &mut self.elements)
                }
                ObstacleShape::Circle { center, radius } => {
                    self.elements.push(ObstacleElement::Disc {
                        center: *center,
                        radius: *radius,
                        owner: id,
                    })
                }
            }
        }
        self.dirty = false;
    }

    /// Flattened elements as of the last rebuild
    pub fn elements(&self) -> &[ObstacleElement] {
        &self.elements
    }

    /// Gets one element
    pub fn element(&self, reference: ObstacleRef) -> Option<&ObstacleElement> {
        self.elements.get(reference.0 as usize)
    }

    /// Closest point of an edge element to `point`; discs return the point
    /// on their rim
    pub fn closest_point(&self, reference: ObstacleRef, point: Vec2) -> Option<Vec2> {
        self.element(reference).map(|element| match element {
            ObstacleElement::Edge { left, right, .. } => {
                closest_point_on_segment(point, left.point, right.point)
            }
            ObstacleElement::Disc { center, radius, .. } => {
                *center + unit_or(point - *center, Vec2::X) * *radius
            }
        })
    }
}
