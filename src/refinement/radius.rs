//! # Profile radius estimate
//!
//! A single pass over the matched pairs, outside of the iterative state machine: the profile
//! radius is a high order statistic of the absolute excitation errors, with the largest
//! `n / radius_percentile_drop` values discarded as outliers.
use itertools::Itertools;
use log::debug;

use super::{pairing::pair_peaks, ReflPeak, RefineParams};
use crate::{cell::Crystal, constants::InvMeter, image::Image, snapfit_errors::SnapfitError};

/// Robust spread of the excitation errors of `pairs`.
///
/// With the absolute excitation errors sorted ascending, the estimate is the value at index
/// `(n − 1) − n / drop`, clamped to the smallest value when `drop` asks to discard everything.
///
/// Return
/// ----------
/// * `Err(SnapfitError::EmptyResidualSet)` when `pairs` is empty.
pub fn estimate_radius(pairs: &[ReflPeak], drop: usize) -> Result<InvMeter, SnapfitError> {
    if pairs.is_empty() {
        return Err(SnapfitError::EmptyResidualSet);
    }
    let n = pairs.len();
    let sorted = pairs
        .iter()
        .map(|rp| rp.refl.exerr.abs())
        .sorted_by(f64::total_cmp)
        .collect_vec();
    Ok(sorted[(n - 1).saturating_sub(n / drop.max(1))])
}

/// Update the profile radius of `crystal` from the peaks of `image`, with default parameters.
pub fn refine_radius(crystal: &mut Crystal, image: &Image) -> Result<InvMeter, SnapfitError> {
    refine_radius_with(crystal, image, &RefineParams::default())
}

/// Pair the peaks of `image` with the current geometry and store the radius estimate on
/// `crystal`. The crystal is left untouched on failure.
pub fn refine_radius_with(
    crystal: &mut Crystal,
    image: &Image,
    params: &RefineParams,
) -> Result<InvMeter, SnapfitError> {
    let pairs = pair_peaks(image, crystal, params)?;
    let radius = estimate_radius(&pairs, params.radius_percentile_drop)?;
    debug!(
        "profile radius {radius:.4e} m^-1 from {} pairs (was {:.4e})",
        pairs.len(),
        crystal.profile_radius
    );
    crystal.profile_radius = radius;
    Ok(radius)
}
