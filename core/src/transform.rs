//! 3x3 homogeneous transform utilities.
//!
//! A [`Transform`] maps one image's pixel coordinates into another's (or into
//! the shared mosaic coordinate system). All routines keep the projective
//! normalization invariant: element `(2, 2)` is 1.0 after every composition,
//! and a matrix with `(2, 2) == 0` is degenerate.

use crate::{Error, Result};
use nalgebra::Matrix3;

/// Homogeneous 3x3 projective transform over image coordinates.
pub type Transform = Matrix3<f64>;

/// Translation-only transform.
pub fn translation(tx: f64, ty: f64) -> Transform {
    Matrix3::new(1.0, 0.0, tx, 0.0, 1.0, ty, 0.0, 0.0, 1.0)
}

/// Determinant by cofactor expansion.
pub fn determinant(m: &Transform) -> f64 {
    m[(0, 0)] * (m[(1, 1)] * m[(2, 2)] - m[(1, 2)] * m[(2, 1)])
        - m[(0, 1)] * (m[(1, 0)] * m[(2, 2)] - m[(1, 2)] * m[(2, 0)])
        + m[(0, 2)] * (m[(1, 0)] * m[(2, 1)] - m[(1, 1)] * m[(2, 0)])
}

/// Adjugate-over-determinant inverse.
///
/// Fails when the determinant is exactly zero; the contract is exact-zero
/// detection before the division, not an epsilon test.
pub fn invert(m: &Transform) -> Result<Transform> {
    let det = determinant(m);
    if det == 0.0 {
        return Err(Error::Degenerate("singular matrix"));
    }
    let inv_det = 1.0 / det;
    Ok(Matrix3::new(
        (m[(1, 1)] * m[(2, 2)] - m[(1, 2)] * m[(2, 1)]) * inv_det,
        (m[(0, 2)] * m[(2, 1)] - m[(0, 1)] * m[(2, 2)]) * inv_det,
        (m[(0, 1)] * m[(1, 2)] - m[(0, 2)] * m[(1, 1)]) * inv_det,
        (m[(1, 2)] * m[(2, 0)] - m[(1, 0)] * m[(2, 2)]) * inv_det,
        (m[(0, 0)] * m[(2, 2)] - m[(0, 2)] * m[(2, 0)]) * inv_det,
        (m[(0, 2)] * m[(1, 0)] - m[(0, 0)] * m[(1, 2)]) * inv_det,
        (m[(1, 0)] * m[(2, 1)] - m[(1, 1)] * m[(2, 0)]) * inv_det,
        (m[(0, 1)] * m[(2, 0)] - m[(0, 0)] * m[(2, 1)]) * inv_det,
        (m[(0, 0)] * m[(1, 1)] - m[(0, 1)] * m[(1, 0)]) * inv_det,
    ))
}

/// Divides all nine elements by `m[(2, 2)]`, restoring projective
/// normalization. Fails when `m[(2, 2)] == 0`.
pub fn normalize(m: &mut Transform) -> Result<()> {
    let w = m[(2, 2)];
    if w == 0.0 {
        return Err(Error::Degenerate("projective scale is zero"));
    }
    *m /= w;
    Ok(())
}

/// Non-destructive [`normalize`].
pub fn normalized(m: &Transform) -> Result<Transform> {
    let mut out = *m;
    normalize(&mut out)?;
    Ok(out)
}

/// Homogeneous depth of `(x, y, w)` under `m`.
pub fn proj_z(m: &Transform, x: f64, y: f64, w: f64) -> f64 {
    m[(2, 0)] * x + m[(2, 1)] * y + m[(2, 2)] * w
}

/// Projected x coordinate given a precomputed depth `z`.
pub fn proj_x(m: &Transform, x: f64, y: f64, z: f64, w: f64) -> f64 {
    (m[(0, 0)] * x + m[(0, 1)] * y + m[(0, 2)] * w) / z
}

/// Projected y coordinate given a precomputed depth `z`.
pub fn proj_y(m: &Transform, x: f64, y: f64, z: f64, w: f64) -> f64 {
    (m[(1, 0)] * x + m[(1, 1)] * y + m[(1, 2)] * w) / z
}

/// Full projective application. Returns `None` when the point projects to
/// infinity (`z == 0`), which callers must treat as an invalid sample.
pub fn apply(m: &Transform, x: f64, y: f64) -> Option<(f64, f64)> {
    let z = proj_z(m, x, y, 1.0);
    if z == 0.0 {
        return None;
    }
    Some((proj_x(m, x, y, z, 1.0), proj_y(m, x, y, z, 1.0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample() -> Transform {
        Matrix3::new(1.1, 0.02, 14.0, -0.03, 0.97, -6.0, 1e-4, -2e-4, 1.0)
    }

    #[test]
    fn invert_round_trips_to_identity() {
        let m = sample();
        let mut round = invert(&m).unwrap() * m;
        normalize(&mut round).unwrap();
        assert_relative_eq!(round, Transform::identity(), epsilon = 1e-9);
    }

    #[test]
    fn normalize_is_idempotent() {
        let mut once = sample() * 3.5;
        normalize(&mut once).unwrap();
        let mut twice = once;
        normalize(&mut twice).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn invert_rejects_singular_matrix() {
        let m = Matrix3::new(1.0, 2.0, 3.0, 2.0, 4.0, 6.0, 0.0, 0.0, 1.0);
        assert!(invert(&m).is_err());
    }

    #[test]
    fn normalize_rejects_zero_scale() {
        let mut m = sample();
        m[(2, 2)] = 0.0;
        assert!(normalize(&mut m).is_err());
    }

    #[test]
    fn apply_rejects_point_at_infinity() {
        let m = Matrix3::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, -1.0, 0.0, 1.0);
        // z = -x + 1 vanishes at x = 1
        assert!(apply(&m, 1.0, 5.0).is_none());
        assert!(apply(&m, 0.5, 5.0).is_some());
    }

    #[test]
    fn translation_moves_points() {
        let t = translation(4.0, -2.5);
        let (x, y) = apply(&t, 1.0, 1.0).unwrap();
        assert_relative_eq!(x, 5.0);
        assert_relative_eq!(y, -1.5);
    }
}
