//! # Unit cell and crystal state
//!
//! A minimal rendering of the crystal collaborator: the refinement only needs the three
//! reciprocal basis vectors (`a*`, `b*`, `c*`, in m⁻¹, laboratory frame), in-place access to
//! them, and the profile radius that the radius estimator updates.
//!
//! Lattice classification, symmetry and the rest of the unit-cell algebra are not part of this
//! crate.
use nalgebra::{Matrix3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

use crate::{
    constants::{InvMeter, Meter, Radian},
    reflection::MillerIndex,
    snapfit_errors::SnapfitError,
};

/// Selects one of the three reciprocal basis vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReciprocalAxis {
    A,
    B,
    C,
}

/// Unit cell described by its reciprocal basis in the laboratory frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnitCell {
    astar: Vector3<f64>,
    bstar: Vector3<f64>,
    cstar: Vector3<f64>,
}

impl UnitCell {
    pub fn from_reciprocal(astar: Vector3<f64>, bstar: Vector3<f64>, cstar: Vector3<f64>) -> Self {
        UnitCell {
            astar,
            bstar,
            cstar,
        }
    }

    /// Build a cell from direct-space parameters in the standard setting.
    ///
    /// `a` lies along +x, `b` in the xy plane, `c` completes a right-handed basis. The
    /// reciprocal basis is the inverse transpose of the direct one.
    ///
    /// Arguments
    /// -----------------
    /// * `a`, `b`, `c`: axis lengths in metres.
    /// * `al`, `be`, `ga`: inter-axial angles α, β, γ in radians.
    ///
    /// Return
    /// ----------
    /// * `Err(SnapfitError::DegenerateCell)` if the angles do not describe a cell with positive
    ///   volume.
    pub fn from_parameters(
        a: Meter,
        b: Meter,
        c: Meter,
        al: Radian,
        be: Radian,
        ga: Radian,
    ) -> Result<Self, SnapfitError> {
        let (cos_al, cos_be, cos_ga) = (al.cos(), be.cos(), ga.cos());
        let sin_ga = ga.sin();

        let cy = (cos_al - cos_be * cos_ga) / sin_ga;
        let cz_sq = 1.0 - cos_be * cos_be - cy * cy;
        if !(cz_sq > 0.0) || sin_ga == 0.0 {
            return Err(SnapfitError::DegenerateCell);
        }

        let a_dir = Vector3::new(a, 0.0, 0.0);
        let b_dir = Vector3::new(b * cos_ga, b * sin_ga, 0.0);
        let c_dir = Vector3::new(c * cos_be, c * cy, c * cz_sq.sqrt());

        let volume = a_dir.dot(&b_dir.cross(&c_dir));
        if !(volume > 0.0) {
            return Err(SnapfitError::DegenerateCell);
        }

        Ok(UnitCell {
            astar: b_dir.cross(&c_dir) / volume,
            bstar: c_dir.cross(&a_dir) / volume,
            cstar: a_dir.cross(&b_dir) / volume,
        })
    }

    /// Copies of `(a*, b*, c*)`.
    pub fn reciprocal(&self) -> (Vector3<f64>, Vector3<f64>, Vector3<f64>) {
        (self.astar, self.bstar, self.cstar)
    }

    pub fn set_reciprocal(&mut self, astar: Vector3<f64>, bstar: Vector3<f64>, cstar: Vector3<f64>) {
        self.astar = astar;
        self.bstar = bstar;
        self.cstar = cstar;
    }

    pub fn axis(&self, which: ReciprocalAxis) -> &Vector3<f64> {
        match which {
            ReciprocalAxis::A => &self.astar,
            ReciprocalAxis::B => &self.bstar,
            ReciprocalAxis::C => &self.cstar,
        }
    }

    pub fn axis_mut(&mut self, which: ReciprocalAxis) -> &mut Vector3<f64> {
        match which {
            ReciprocalAxis::A => &mut self.astar,
            ReciprocalAxis::B => &mut self.bstar,
            ReciprocalAxis::C => &mut self.cstar,
        }
    }

    /// Matrix whose columns are `a*`, `b*`, `c*`.
    pub fn reciprocal_matrix(&self) -> Matrix3<f64> {
        Matrix3::from_columns(&[self.astar, self.bstar, self.cstar])
    }

    /// Reciprocal-lattice point `h·a* + k·b* + l·c*`.
    pub fn lattice_point(&self, hkl: &MillerIndex) -> Vector3<InvMeter> {
        self.astar * f64::from(hkl.h) + self.bstar * f64::from(hkl.k) + self.cstar * f64::from(hkl.l)
    }

    /// Fractional Miller indices of an arbitrary reciprocal-space vector.
    pub fn fractional_indices(&self, q: &Vector3<InvMeter>) -> Result<Vector3<f64>, SnapfitError> {
        let inverse = self
            .reciprocal_matrix()
            .try_inverse()
            .ok_or(SnapfitError::DegenerateCell)?;
        Ok(inverse * q)
    }

    /// Apply a rigid rotation to the whole reciprocal basis.
    pub fn rotate(&mut self, rotation: &Rotation3<f64>) {
        self.astar = rotation * self.astar;
        self.bstar = rotation * self.bstar;
        self.cstar = rotation * self.cstar;
    }
}

/// One crystal on an image: its cell and the reflection profile radius used for integration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Crystal {
    pub cell: UnitCell,
    /// Profile radius in m⁻¹, refreshed by [`crate::refinement::radius::refine_radius`].
    pub profile_radius: InvMeter,
}

impl Crystal {
    pub fn new(cell: UnitCell, profile_radius: InvMeter) -> Self {
        Crystal {
            cell,
            profile_radius,
        }
    }
}
