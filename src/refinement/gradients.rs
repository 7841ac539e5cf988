//! # Gradient model
//!
//! Closed-form partial derivatives of the three residuals of [`super::residuals`] with respect
//! to one active parameter, evaluated at the current geometry.
//!
//! Derivation
//! -----------------
//! Every crystal parameter acts on the reciprocal-lattice point `q` of a reflection. With
//! `∂q` the change of `q` per unit increment (see [`lattice_point_gradient`]):
//!
//! * the excitation residual `r = |d| − k` with `d = q + k·ẑ` changes by `d̂·∂q`;
//! * the panel solution `v = M⁻¹·d` changes by `∂v = M⁻¹·∂q`.
//!
//! Detector-group parameters leave `q` alone and change the panel matrix `M` instead. Since
//! `M·v = d` stays fixed, `∂v = −M⁻¹·∂M·v`, with
//!
//! * translation along `e`: `∂M = [0 | 0 | e/pitch]`;
//! * rotation about lab axis `a` through the group centre `c`:
//!   `∂M = [a×fsv | a×ssv | a×(cn − c/pitch)]`.
//!
//! The projected coordinate `fs = v₀/v₂` then changes by `(∂v₀·v₂ − v₀·∂v₂)/v₂²` (same for
//! `ss` with `v₁`), and the position residuals, being observed − predicted, take the opposite
//! sign. A detector parameter has no path to the excitation residual and its gradient is the
//! literal `0.0`; so is the position gradient of a panel outside the parameter's group.
use std::collections::HashMap;

use nalgebra::{Matrix3, Vector3};

use super::{
    pairing::ReflPeak,
    params::{CrystalParam, DetectorParam, GroupParam, Param},
    residuals::ResidualKind,
};
use crate::{
    cell::{ReciprocalAxis, UnitCell},
    constants::{InvMeter, Meter},
    detector::{hierarchy::Ancestry, DetectorGeometry, GroupId, Panel},
    reflection::{diffracted_direction, project_direction, wavenumber, MillerIndex, Reflection},
    snapfit_errors::SnapfitError,
    vector_ops::cross_normalize,
};

/// Per-iteration detector quantities shared by every gradient evaluation: panel inverses,
/// panel ancestries and the rotation centre of each refined group.
#[derive(Debug, Clone)]
pub struct GradientContext<'a> {
    detector: &'a DetectorGeometry,
    panel_minvs: Vec<Matrix3<f64>>,
    panel_ancestry: Vec<Ancestry>,
    group_centers: HashMap<GroupId, Vector3<Meter>>,
}

impl<'a> GradientContext<'a> {
    /// Snapshot the detector for one iteration.
    ///
    /// Group centres are computed only for groups referenced by `params`.
    pub fn new(detector: &'a DetectorGeometry, params: &[Param]) -> Result<Self, SnapfitError> {
        let panel_minvs = detector.panel_inverses()?;
        let panel_ancestry = detector
            .panels()
            .iter()
            .map(|p| detector.ancestry(p.group))
            .collect::<Result<Vec<_>, _>>()?;

        let mut group_centers = HashMap::new();
        for param in params {
            if let Param::Group(gp) = param {
                if !group_centers.contains_key(&gp.group) {
                    group_centers.insert(gp.group, detector.group_center(gp.group)?);
                }
            }
        }

        Ok(GradientContext {
            detector,
            panel_minvs,
            panel_ancestry,
            group_centers,
        })
    }

    pub fn detector(&self) -> &DetectorGeometry {
        self.detector
    }

    pub fn panel_minv(&self, panel: usize) -> Result<&Matrix3<f64>, SnapfitError> {
        self.panel_minvs
            .get(panel)
            .ok_or(SnapfitError::UnknownPanel(panel))
    }

    pub fn panel_in_group(&self, panel: usize, group: GroupId) -> Result<bool, SnapfitError> {
        self.panel_ancestry
            .get(panel)
            .map(|chain| chain.contains(&group))
            .ok_or(SnapfitError::UnknownPanel(panel))
    }

    pub fn group_center(&self, group: GroupId) -> Result<&Vector3<Meter>, SnapfitError> {
        self.group_centers
            .get(&group)
            .ok_or_else(|| SnapfitError::UnknownGroup(group.to_string()))
    }

    /// Rotation centres captured at construction, keyed by group.
    pub fn group_centers(&self) -> &HashMap<GroupId, Vector3<Meter>> {
        &self.group_centers
    }
}

#[inline]
fn miller_component(hkl: &MillerIndex, axis: ReciprocalAxis) -> f64 {
    match axis {
        ReciprocalAxis::A => f64::from(hkl.h),
        ReciprocalAxis::B => f64::from(hkl.k),
        ReciprocalAxis::C => f64::from(hkl.l),
    }
}

/// Change of the reciprocal-lattice point of `hkl` per unit increment of a crystal parameter.
pub fn lattice_point_gradient(
    param: CrystalParam,
    hkl: &MillerIndex,
    cell: &UnitCell,
) -> Vector3<InvMeter> {
    if let Some(axis) = param.length_axis() {
        let v = cell.axis(axis);
        return v / v.norm() * miller_component(hkl, axis);
    }
    if let Some((turned, other)) = param.angle_axes() {
        let t = cell.axis(turned);
        let n = cross_normalize(cell.axis(other), t);
        return n.cross(t) * miller_component(hkl, turned);
    }
    match param.rotation_axis() {
        Some(axis) => axis.unit().cross(&cell.lattice_point(hkl)),
        None => Vector3::zeros(),
    }
}

/// Gradient of the excitation-error residual with respect to one parameter.
///
/// Detector-group parameters return exactly `0.0`.
pub fn r_gradient(param: &Param, refl: &Reflection, cell: &UnitCell, wavelength: Meter) -> f64 {
    match param {
        Param::Group(_) => 0.0,
        Param::Crystal(cp) => {
            let k = wavenumber(wavelength);
            let d = diffracted_direction(&cell.lattice_point(&refl.hkl), k);
            let dq = lattice_point_gradient(*cp, &refl.hkl, cell);
            d.dot(&dq) / d.norm()
        }
    }
}

/// `∂M·v` for a detector parameter acting on `panel`.
fn panel_matrix_change(
    gp: &GroupParam,
    panel: &Panel,
    v: &Vector3<f64>,
    center: &Vector3<Meter>,
) -> Vector3<f64> {
    let a = gp.param.axis().unit();
    match gp.param {
        DetectorParam::TransX | DetectorParam::TransY | DetectorParam::TransZ => {
            a * (v.z / panel.pixel_pitch)
        }
        DetectorParam::RotX | DetectorParam::RotY | DetectorParam::RotZ => {
            let arm = panel.cn - center / panel.pixel_pitch;
            a.cross(&panel.fsv) * v.x + a.cross(&panel.ssv) * v.y + a.cross(&arm) * v.z
        }
    }
}

/// Gradients of the fast-scan and slow-scan residuals with respect to one parameter.
///
/// Arguments
/// -----------------
/// * `param`: the active parameter.
/// * `refl`: reflection; its `panel` selects the projection.
/// * `cell`: current unit cell.
/// * `wavelength`: incident wavelength in metres.
/// * `ctx`: panel inverses and group centres of the current detector.
///
/// Return
/// ----------
/// * `(∂fs_dev, ∂ss_dev)` in pixels per parameter unit.
/// * `Err(SnapfitError::PredictionOffPanel)` when the ray no longer reaches the panel plane.
pub fn fs_ss_gradient(
    param: &Param,
    refl: &Reflection,
    cell: &UnitCell,
    wavelength: Meter,
    ctx: &GradientContext<'_>,
) -> Result<(f64, f64), SnapfitError> {
    let minv = ctx.panel_minv(refl.panel)?;
    let k = wavenumber(wavelength);
    let d = diffracted_direction(&cell.lattice_point(&refl.hkl), k);
    let v = project_direction(minv, &d).ok_or(SnapfitError::PredictionOffPanel(refl.panel))?;

    let dv = match param {
        Param::Crystal(cp) => minv * lattice_point_gradient(*cp, &refl.hkl, cell),
        Param::Group(gp) => {
            if !ctx.panel_in_group(refl.panel, gp.group)? {
                return Ok((0.0, 0.0));
            }
            let panel = ctx.detector().panel(refl.panel)?;
            let center = ctx.group_center(gp.group)?;
            -(minv * panel_matrix_change(gp, panel, &v, center))
        }
    };

    let v2_sq = v.z * v.z;
    let dfs = (dv.x * v.z - v.x * dv.z) / v2_sq;
    let dss = (dv.y * v.z - v.y * dv.z) / v2_sq;
    Ok((-dfs, -dss))
}

/// Residuals and gradients of one pair, indexed by [`ResidualKind::index`].
#[derive(Debug, Clone, PartialEq)]
pub struct DesignRow {
    pub residuals: [f64; 3],
    /// One gradient per active parameter, in active-set order, for each residual kind.
    pub gradients: [Vec<f64>; 3],
}

impl DesignRow {
    pub fn residual(&self, kind: ResidualKind) -> f64 {
        self.residuals[kind.index()]
    }

    pub fn gradient(&self, kind: ResidualKind) -> &[f64] {
        &self.gradients[kind.index()]
    }
}

/// Evaluate the design row of one matched pair over the active parameter set.
pub fn design_row(
    rp: &ReflPeak,
    params: &[Param],
    cell: &UnitCell,
    wavelength: Meter,
    ctx: &GradientContext<'_>,
) -> Result<DesignRow, SnapfitError> {
    let mut gradients = [
        Vec::with_capacity(params.len()),
        Vec::with_capacity(params.len()),
        Vec::with_capacity(params.len()),
    ];
    for param in params {
        let (dfs, dss) = fs_ss_gradient(param, &rp.refl, cell, wavelength, ctx)?;
        gradients[0].push(r_gradient(param, &rp.refl, cell, wavelength));
        gradients[1].push(dfs);
        gradients[2].push(dss);
    }

    let residuals = ResidualKind::ALL.map(|kind| kind.residual(rp));
    Ok(DesignRow {
        residuals,
        gradients,
    })
}
