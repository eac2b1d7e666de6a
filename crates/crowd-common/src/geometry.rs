//! 2D geometry operations for the velocity-space solver
//!
//! Half-planes are stored as a directed boundary line. The permitted region
//! is the closed half-plane to the left of the direction; a point `v` lies in
//! the forbidden region when `det(direction, point - v) > 0`.

use glam::Vec2;

use crate::math::det;

/// A directed line splitting the plane into a permitted (left) side and a
/// forbidden (right) side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HalfPlane {
    /// A point on the boundary line
    pub point: Vec2,
    /// Unit direction of the boundary line
    pub direction: Vec2,
}

impl HalfPlane {
    /// Creates a new half-plane
    pub fn new(point: Vec2, direction: Vec2) -> Self {
        Self { point, direction }
    }

    /// Signed distance of `v` into the forbidden side.
    ///
    /// Positive values mean `v` violates the constraint; for a unit
    /// direction the value is the Euclidean distance to the boundary.
    #[inline]
    pub fn violation(&self, v: Vec2) -> f32 {
        det(self.direction, self.point - v)
    }

    /// Checks whether `v` lies on the permitted side, within `eps`
    #[inline]
    pub fn contains(&self, v: Vec2, eps: f32) -> bool {
        self.violation(v) <= eps
    }

    /// Point on the boundary at parameter `t`
    #[inline]
    pub fn point_at(&self, t: f32) -> Vec2 {
        self.point + self.direction * t
    }

    /// Parameter along this boundary where it crosses `other`'s boundary.
    ///
    /// Returns `None` for (anti)parallel boundaries.
    pub fn intersect_line(&self, other: &HalfPlane, eps: f32) -> Option<f32> {
        let denominator = det(self.direction, other.direction);
        if denominator.abs() <= eps {
            return None;
        }
        let numerator = det(other.direction, self.point - other.point);
        Some(numerator / denominator)
    }

    /// Parameter interval of this boundary lying inside the circle of
    /// `radius` around the origin, or `None` when the line misses it.
    pub fn intersect_circle(&self, radius: f32) -> Option<(f32, f32)> {
        let dot = self.point.dot(self.direction);
        let discriminant = dot * dot + radius * radius - self.point.length_squared();
        if discriminant < 0.0 {
            return None;
        }
        let root = discriminant.sqrt();
        Some((-dot - root, -dot + root))
    }
}

/// Signed area test: positive when `c` is to the left of the directed line
/// `a` -> `b`.
#[inline]
pub fn left_of(a: Vec2, b: Vec2, c: Vec2) -> f32 {
    det(a - c, b - a)
}

/// Axis-aligned bounds of a segment, grown by `pad` on every side
#[inline]
pub fn segment_aabb(a: Vec2, b: Vec2, pad: f32) -> (Vec2, Vec2) {
    (a.min(b) - Vec2::splat(pad), a.max(b) + Vec2::splat(pad))
}
