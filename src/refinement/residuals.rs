//! # Residual model
//!
//! Three residuals per matched pair, all **observed − predicted**:
//!
//! | kind               | observed            | predicted              | unit  |
//! |--------------------|---------------------|------------------------|-------|
//! | excitation error   | `0` (on the sphere) | `refl.exerr`           | m⁻¹   |
//! | fast-scan position | `peak.fs`           | `refl.fs`              | px    |
//! | slow-scan position | `peak.ss`           | `refl.ss`              | px    |
//!
//! The predictions are the ones cached on the reflection by
//! [`update_prediction`](crate::reflection::update_prediction), so callers must refresh them
//! after every geometry change. The gradients in [`super::gradients`] are derivatives of these
//! exact expressions.
use serde::{Deserialize, Serialize};

use super::pairing::ReflPeak;
use crate::constants::{EXCITATION_ERROR_WEIGHT, InvMeter, POSITION_WEIGHT, Pixel};

/// The three residual kinds produced for every matched pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResidualKind {
    ExcitationError,
    FastScan,
    SlowScan,
}

impl ResidualKind {
    pub const ALL: [ResidualKind; 3] = [
        ResidualKind::ExcitationError,
        ResidualKind::FastScan,
        ResidualKind::SlowScan,
    ];

    /// Fixed weight of a squared residual of this kind.
    pub fn weight(self) -> f64 {
        match self {
            ResidualKind::ExcitationError => EXCITATION_ERROR_WEIGHT,
            ResidualKind::FastScan | ResidualKind::SlowScan => POSITION_WEIGHT,
        }
    }

    /// Position of this kind in a [`DesignRow`](super::gradients::DesignRow).
    pub fn index(self) -> usize {
        match self {
            ResidualKind::ExcitationError => 0,
            ResidualKind::FastScan => 1,
            ResidualKind::SlowScan => 2,
        }
    }

    /// Residual of this kind for one pair.
    pub fn residual(self, rp: &ReflPeak) -> f64 {
        match self {
            ResidualKind::ExcitationError => r_dev(rp),
            ResidualKind::FastScan => fs_dev(rp),
            ResidualKind::SlowScan => ss_dev(rp),
        }
    }
}

impl std::fmt::Display for ResidualKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResidualKind::ExcitationError => "excitation error",
            ResidualKind::FastScan => "fast scan",
            ResidualKind::SlowScan => "slow scan",
        };
        f.write_str(name)
    }
}

/// Excitation-error residual: `0 − exerr`.
#[inline]
pub fn r_dev(rp: &ReflPeak) -> InvMeter {
    -rp.refl.exerr
}

/// Fast-scan residual in pixels.
#[inline]
pub fn fs_dev(rp: &ReflPeak) -> Pixel {
    rp.peak.fs - rp.refl.fs
}

/// Slow-scan residual in pixels.
#[inline]
pub fn ss_dev(rp: &ReflPeak) -> Pixel {
    rp.peak.ss - rp.refl.ss
}

/// Weighted sum of squared residuals over a set of pairs.
pub fn weighted_residual(pairs: &[ReflPeak]) -> f64 {
    pairs
        .iter()
        .map(|rp| {
            ResidualKind::ALL
                .iter()
                .map(|kind| {
                    let r = kind.residual(rp);
                    rp.ih * kind.weight() * r * r
                })
                .sum::<f64>()
        })
        .sum()
}
