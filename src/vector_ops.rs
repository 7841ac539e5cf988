//! # Small 3D vector primitives
//!
//! Cross products, axis–angle rotations and rescaling used by the cell and detector updates and
//! by the gradient model. All routines work on [`nalgebra::Vector3<f64>`] in place where that
//! matches how the callers mutate crystal and panel vectors.
//!
//! None of these functions validate their inputs: parallel or zero-length vectors and non-unit
//! rotation axes are caller contract violations that produce meaningless (but finite) numbers.
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::constants::Radian;

/// One of the three laboratory axes.
///
/// The beam travels along `+Z`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LabAxis {
    X,
    Y,
    Z,
}

impl LabAxis {
    pub const ALL: [LabAxis; 3] = [LabAxis::X, LabAxis::Y, LabAxis::Z];

    /// Unit vector along this axis.
    pub fn unit(self) -> Vector3<f64> {
        match self {
            LabAxis::X => Vector3::x(),
            LabAxis::Y => Vector3::y(),
            LabAxis::Z => Vector3::z(),
        }
    }
}

/// Unit vector orthogonal to `u` and `v`, following the right-hand rule (`u × v`).
///
/// Returns the zero vector when `u` and `v` are parallel (or either is zero). Callers that use
/// the result as a rotation axis must rule that case out first.
pub fn cross_normalize(u: &Vector3<f64>, v: &Vector3<f64>) -> Vector3<f64> {
    let n = u.cross(v);
    let norm = n.norm();
    if norm == 0.0 {
        return Vector3::zeros();
    }
    n / norm
}

/// Rotate `vec` in place by `angle` about `axis` (Rodrigues' formula).
///
/// Arguments
/// -----------------
/// * `vec`: vector to rotate.
/// * `axis`: rotation axis, **must already be a unit vector**. It is not normalised here; a
///   non-unit axis yields a rotation of the wrong magnitude.
/// * `angle`: right-handed rotation angle in radians.
pub fn rotate_about_axis(vec: &mut Vector3<f64>, axis: &Vector3<f64>, angle: Radian) {
    let (s, c) = angle.sin_cos();
    let v = *vec;
    *vec = v * c + axis.cross(&v) * s + axis * (axis.dot(&v) * (1.0 - c));
}

/// Scale `vec` in place so that its length becomes `new_length`.
///
/// Undefined for a zero-length input.
pub fn rescale(vec: &mut Vector3<f64>, new_length: f64) {
    let length = vec.norm();
    *vec *= new_length / length;
}

#[cfg(test)]
mod vector_ops_test {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_cross_normalize() {
        let n = cross_normalize(&Vector3::new(2.0, 0.0, 0.0), &Vector3::new(0.0, 3.0, 0.0));
        assert_eq!(n, Vector3::z());

        let parallel = cross_normalize(&Vector3::new(1.0, 1.0, 0.0), &Vector3::new(2.0, 2.0, 0.0));
        assert_eq!(parallel, Vector3::zeros());
    }

    #[test]
    fn test_rotate_about_axis_quarter_turn() {
        let mut v = Vector3::x();
        rotate_about_axis(&mut v, &Vector3::z(), FRAC_PI_2);
        assert_relative_eq!(v, Vector3::y(), epsilon = 1e-15);

        let mut w = Vector3::new(0.0, 1.0, 0.0);
        rotate_about_axis(&mut w, &LabAxis::X.unit(), FRAC_PI_2);
        assert_relative_eq!(w, Vector3::z(), epsilon = 1e-15);
    }

    #[test]
    fn test_rotate_preserves_component_along_axis() {
        let axis = Vector3::new(1.0, 2.0, -0.5).normalize();
        let mut v = Vector3::new(0.3, -1.2, 4.0);
        let along = axis.dot(&v);
        let length = v.norm();
        rotate_about_axis(&mut v, &axis, 0.73);
        assert_relative_eq!(axis.dot(&v), along, epsilon = 1e-12);
        assert_relative_eq!(v.norm(), length, epsilon = 1e-12);
    }

    #[test]
    fn test_rotate_zero_angle_is_identity() {
        let mut v = Vector3::new(1.5e8, -2.0e7, 3.3e6);
        let before = v;
        rotate_about_axis(&mut v, &Vector3::y(), 0.0);
        assert_eq!(v, before);
    }

    #[test]
    fn test_rescale() {
        let mut v = Vector3::new(3.0, 0.0, 4.0);
        rescale(&mut v, 10.0);
        assert_relative_eq!(v, Vector3::new(6.0, 0.0, 8.0), epsilon = 1e-12);
    }
}
