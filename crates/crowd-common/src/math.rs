//! Math utilities for the crowd kernel

use glam::Vec2;

/// Default tolerance for geometric comparisons, relative to unit-sized agents
pub const DEFAULT_EPSILON: f32 = 1e-5;

/// Calculates the determinant (2D cross product) of two vectors
#[inline]
pub fn det(a: Vec2, b: Vec2) -> f32 {
    a.x * b.y - a.y * b.x
}

/// Square a value (x²)
#[inline]
pub fn sqr<T: std::ops::Mul<Output = T> + Copy>(x: T) -> T {
    x * x
}

/// Limits the length of `v` to `max_len`, leaving shorter vectors untouched.
///
/// Non-finite input collapses to zero so a bad value can never escape
/// into the simulation state.
#[inline]
pub fn clamp_length(v: Vec2, max_len: f32) -> Vec2 {
    if !v.is_finite() {
        return Vec2::ZERO;
    }
    let len_sq = v.length_squared();
    if len_sq > max_len * max_len {
        if max_len <= 0.0 {
            return Vec2::ZERO;
        }
        v * (max_len / len_sq.sqrt())
    } else {
        v
    }
}

/// Checks that both components are finite
#[inline]
pub fn is_finite_vec(v: Vec2) -> bool {
    v.x.is_finite() && v.y.is_finite()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_det() {
        assert_eq!(det(Vec2::new(1.0, 2.0), Vec2::new(3.0, 4.0)), -2.0);
        assert_eq!(det(Vec2::X, Vec2::Y), 1.0);
    }

    #[test]
    fn test_clamp_length() {
        let v = clamp_length(Vec2::new(3.0, 4.0), 1.0);
        assert!((v.length() - 1.0).abs() < 1e-6);
        assert!((v.x - 0.6).abs() < 1e-6);

        let short = Vec2::new(0.1, 0.2);
        assert_eq!(clamp_length(short, 1.0), short);

        assert_eq!(clamp_length(Vec2::new(1.0, 0.0), 0.0), Vec2::ZERO);
        assert_eq!(clamp_length(Vec2::new(f32::NAN, 1.0), 1.0), Vec2::ZERO);
    }

    #[test]
    fn test_sqr() {
        assert_eq!(sqr(3.0f32), 9.0);
        assert_eq!(sqr(-0.5f32), 0.25);
    }
}
