//! # Reflections and spot prediction
//!
//! A [`Reflection`] caches what the current geometry predicts for one Miller index: its
//! excitation error and where the diffracted ray crosses the panel its observed peak lies on.
//!
//! Geometry conventions
//! -----------------
//! * The beam travels along `+z` with wavenumber `k = 1/λ`.
//! * The Ewald sphere has radius `k` and is centred on `(0, 0, -k)`, so the diffracted direction
//!   for a reciprocal-lattice point `q` is `d = q + (0, 0, k)`.
//! * A panel maps pixel `(fs, ss)` to `cn + fs·fsv + ss·ssv` (pixel units). With
//!   `M = [fsv | ssv | cn]` and `v = M⁻¹·d`, the ray hits the panel plane at
//!   `fs = v₀/v₂`, `ss = v₁/v₂`, provided `v₂ > 0`.
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::{
    cell::UnitCell,
    constants::{InvMeter, Meter, Pixel},
    snapfit_errors::SnapfitError,
};

/// Integer Miller indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MillerIndex {
    pub h: i32,
    pub k: i32,
    pub l: i32,
}

impl MillerIndex {
    pub fn new(h: i32, k: i32, l: i32) -> Self {
        MillerIndex { h, k, l }
    }

    pub fn is_origin(&self) -> bool {
        self.h == 0 && self.k == 0 && self.l == 0
    }
}

impl std::fmt::Display for MillerIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} {} {})", self.h, self.k, self.l)
    }
}

/// A predicted reflection.
///
/// `fs`, `ss` and `exerr` are only meaningful after [`update_prediction`] has run against the
/// current cell and detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reflection {
    pub hkl: MillerIndex,
    /// Panel the prediction is projected on.
    pub panel: usize,
    /// Predicted fast-scan coordinate.
    pub fs: Pixel,
    /// Predicted slow-scan coordinate.
    pub ss: Pixel,
    /// Excitation error `k − |q + k·ẑ|` in m⁻¹ (positive inside the Ewald sphere).
    pub exerr: InvMeter,
}

impl Reflection {
    pub fn new(hkl: MillerIndex, panel: usize) -> Self {
        Reflection {
            hkl,
            panel,
            fs: 0.0,
            ss: 0.0,
            exerr: 0.0,
        }
    }
}

/// Wavenumber `1/λ`.
#[inline]
pub fn wavenumber(wavelength: Meter) -> InvMeter {
    1.0 / wavelength
}

/// Diffracted-beam direction (unnormalised) for a reciprocal-lattice point.
#[inline]
pub fn diffracted_direction(q: &Vector3<InvMeter>, k: InvMeter) -> Vector3<InvMeter> {
    Vector3::new(q.x, q.y, q.z + k)
}

/// Signed distance of `q` from the Ewald sphere, positive inside.
#[inline]
pub fn excitation_error(q: &Vector3<InvMeter>, k: InvMeter) -> InvMeter {
    k - diffracted_direction(q, k).norm()
}

/// Project a direction through a panel inverse matrix.
///
/// Returns the panel-frame solution `v = M⁻¹·d` when the ray travels towards the panel
/// (`v₂ > 0`), `None` otherwise.
#[inline]
pub fn project_direction(panel_minv: &Matrix3<f64>, direction: &Vector3<f64>) -> Option<Vector3<f64>> {
    let v = panel_minv * direction;
    if v.z > 0.0 {
        Some(v)
    } else {
        None
    }
}

/// Refresh the cached excitation error and predicted position of a reflection.
///
/// Arguments
/// -----------------
/// * `refl`: reflection to update; its `panel` selects where the ray is projected.
/// * `cell`: current unit cell.
/// * `wavelength`: incident wavelength in metres.
/// * `panel_minv`: inverse of the panel matrix `[fsv | ssv | cn]`.
///
/// Return
/// ----------
/// * `Err(SnapfitError::PredictionOffPanel)` when the diffracted ray points away from the panel
///   plane; `refl` is left untouched in that case.
pub fn update_prediction(
    refl: &mut Reflection,
    cell: &UnitCell,
    wavelength: Meter,
    panel_minv: &Matrix3<f64>,
) -> Result<(), SnapfitError> {
    let k = wavenumber(wavelength);
    let q = cell.lattice_point(&refl.hkl);
    let d = diffracted_direction(&q, k);
    let v = project_direction(panel_minv, &d).ok_or(SnapfitError::PredictionOffPanel(refl.panel))?;

    refl.exerr = k - d.norm();
    refl.fs = v.x / v.z;
    refl.ss = v.y / v.z;
    Ok(())
}
