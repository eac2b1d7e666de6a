//! Vector utilities for segment and point queries on the ground plane

use glam::Vec2;

/// Returns the parameter of the projection of `p` onto segment `a`-`b`,
/// clamped to `[0, 1]`
pub fn segment_parameter(p: Vec2, a: Vec2, b: Vec2) -> f32 {
    let ab = b - a;
    let ab_len_sq = ab.length_squared();

    // If the line segment is just a point, every projection lands on `a`
    if ab_len_sq < f32::EPSILON {
        return 0.0;
    }

    ((p - a).dot(ab) / ab_len_sq).clamp(0.0, 1.0)
}

/// Finds the closest point on a line segment to a given point
pub fn closest_point_on_segment(p: Vec2, a: Vec2, b: Vec2) -> Vec2 {
    a + (b - a) * segment_parameter(p, a, b)
}

/// Calculates the squared distance between a point and a line segment
pub fn distance_point_segment_squared(p: Vec2, a: Vec2, b: Vec2) -> f32 {
    (p - closest_point_on_segment(p, a, b)).length_squared()
}

/// Calculates the distance between a point and a line segment
pub fn distance_point_segment(p: Vec2, a: Vec2, b: Vec2) -> f32 {
    distance_point_segment_squared(p, a, b).sqrt()
}

/// Squared distance from `p` to the axis-aligned box `[min, max]`
/// (zero when inside)
#[inline]
pub fn distance_point_aabb_squared(p: Vec2, min: Vec2, max: Vec2) -> f32 {
    let clamped = p.clamp(min, max);
    (p - clamped).length_squared()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closest_point_on_segment() {
        let a = Vec2::new(0.0, 0.0);
        let b = Vec2::new(4.0, 0.0);

        assert_eq!(closest_point_on_segment(Vec2::new(2.0, 3.0), a, b), Vec2::new(2.0, 0.0));
        assert_eq!(closest_point_on_segment(Vec2::new(-1.0, 1.0), a, b), a);
        assert_eq!(closest_point_on_segment(Vec2::new(9.0, -1.0), a, b), b);
    }

    #[test]
    fn test_distance_point_segment() {
        let a = Vec2::new(0.0, 0.0);
        let b = Vec2::new(0.0, 2.0);
        assert!((distance_point_segment(Vec2::new(3.0, 1.0), a, b) - 3.0).abs() < 1e-6);
        assert!((distance_point_segment_squared(Vec2::new(0.0, 5.0), a, b) - 9.0).abs() < 1e-6);
    }

    #[test]
    fn test_degenerate_segment() {
        let a = Vec2::new(1.0, 1.0);
        assert_eq!(segment_parameter(Vec2::new(5.0, 5.0), a, a), 0.0);
        assert!((distance_point_segment(Vec2::new(4.0, 5.0), a, a) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_distance_point_aabb() {
        let min = Vec2::new(0.0, 0.0);
        let max = Vec2::new(2.0, 2.0);
        assert_eq!(distance_point_aabb_squared(Vec2::new(1.0, 1.0), min, max), 0.0);
        assert_eq!(distance_point_aabb_squared(Vec2::new(5.0, 2.0), min, max), 9.0);
    }
}
