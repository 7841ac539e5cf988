//! # Applying parameter increments
//!
//! Increments are always composed with the current state: lengths are rescaled, angles and
//! orientations are turned by small rotations, detector groups are moved relative to where
//! they are. Nothing is ever replaced wholesale.
//!
//! A zero increment leaves the state bit-for-bit unchanged.
use nalgebra::Vector3;

use super::params::{CrystalParam, GroupParam};
use crate::{
    cell::UnitCell,
    constants::Meter,
    detector::DetectorGeometry,
    snapfit_errors::SnapfitError,
    vector_ops::{cross_normalize, rescale, rotate_about_axis},
};

/// Apply `delta` of one crystal parameter to `cell`.
///
/// * lengths (m⁻¹): the axis is rescaled to `|axis| + delta`;
/// * angles (rad): the turned axis rotates about `cross_normalize(other, turned)`;
/// * rotations (rad): the whole basis rotates about the lab axis.
pub fn apply_crystal_increment(cell: &mut UnitCell, param: CrystalParam, delta: f64) {
    if delta == 0.0 {
        return;
    }

    if let Some(axis) = param.length_axis() {
        let v = cell.axis_mut(axis);
        let length = v.norm();
        rescale(v, length + delta);
    } else if let Some((turned, other)) = param.angle_axes() {
        let n = cross_normalize(cell.axis(other), cell.axis(turned));
        rotate_about_axis(cell.axis_mut(turned), &n, delta);
    } else if let Some(axis) = param.rotation_axis() {
        let (mut a, mut b, mut c) = cell.reciprocal();
        let unit = axis.unit();
        rotate_about_axis(&mut a, &unit, delta);
        rotate_about_axis(&mut b, &unit, delta);
        rotate_about_axis(&mut c, &unit, delta);
        cell.set_reciprocal(a, b, c);
    }
}

/// Apply `delta` of one group parameter to the detector.
///
/// Translations are in metres; rotations are in radians about a lab axis through `center`
/// (metres), which should be the group centre captured before any increment of the current
/// iteration was applied.
pub fn apply_group_increment(
    detector: &mut DetectorGeometry,
    gp: GroupParam,
    delta: f64,
    center: &Vector3<Meter>,
) -> Result<(), SnapfitError> {
    if delta == 0.0 {
        return Ok(());
    }

    let axis = gp.param.axis();
    if gp.param.is_translation() {
        detector.translate_group(gp.group, &(axis.unit() * delta))
    } else {
        detector.rotate_group(gp.group, axis, delta, center)
    }
}
