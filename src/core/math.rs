//! Mathematical primitives for planar localization.
//!
//! Angle arithmetic uses `atan2(sin, cos)` semantics throughout so that no
//! wrapping ambiguity can leak into pose composition or motion sampling.

use std::f64::consts::PI;

/// Normalize an angle to (-π, π].
///
/// # Example
/// ```
/// use dhruva_amcl::core::math::normalize_angle;
/// use std::f64::consts::PI;
///
/// assert!((normalize_angle(3.0 * PI) - PI).abs() < 1e-9);
/// assert!(normalize_angle(2.0 * PI).abs() < 1e-9);
/// ```
#[inline]
pub fn normalize_angle(angle: f64) -> f64 {
    angle.sin().atan2(angle.cos())
}

/// Signed angular difference `a - b`, wrapped to (-π, π].
///
/// This is the shortest rotation taking heading `b` onto heading `a`.
#[inline]
pub fn angle_diff(a: f64, b: f64) -> f64 {
    normalize_angle(a - b)
}

/// Gaussian probability density at `x` for a zero-mean normal with the
/// given standard deviation.
#[inline]
pub fn gaussian_pdf(x: f64, sigma: f64) -> f64 {
    if sigma <= 0.0 {
        return 0.0;
    }
    (-0.5 * (x / sigma) * (x / sigma)).exp() / (sigma * (2.0 * PI).sqrt())
}
