//! # Matching observed peaks to predicted reflections
//!
//! Each peak is turned into an observed reciprocal vector (assuming it lies exactly on the
//! Ewald sphere), indexed against the current cell by rounding its fractional Miller indices,
//! and paired with the reflection predicted for those indices on the peak's own panel.
use itertools::Itertools;
use log::debug;
use serde::{Deserialize, Serialize};

use super::RefineParams;
use crate::{
    cell::Crystal,
    image::{Image, Peak},
    reflection::{update_prediction, MillerIndex, Reflection},
    snapfit_errors::SnapfitError,
};

/// A predicted reflection matched with the peak it explains.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReflPeak {
    pub refl: Reflection,
    pub peak: Peak,
    /// Intensity weight, normalised to the strongest pair (`0 < ih ≤ 1`).
    pub ih: f64,
}

/// Pair the peaks of `image` with reflections predicted from `crystal`.
///
/// Peaks are dropped when their intensity is not a positive finite number, when they index
/// to `(0 0 0)`, when the prediction misses their panel plane, or when the prediction lies
/// farther than `params.max_pair_distance` pixels away. When several peaks index to the same
/// reflection only the strongest is kept. Output order follows peak order.
///
/// Return
/// ----------
/// * The accepted pairs with `ih = intensity / max intensity`; empty if nothing survived.
/// * `Err(SnapfitError::DegenerateCell)` if the reciprocal basis is singular.
pub fn pair_peaks(
    image: &Image,
    crystal: &Crystal,
    params: &RefineParams,
) -> Result<Vec<ReflPeak>, SnapfitError> {
    let k = image.k();
    let minvs = image.detector.panel_inverses()?;
    let cell = &crystal.cell;

    let mut candidates = Vec::with_capacity(image.peaks.len());
    for (index, peak) in image.peaks.iter().enumerate() {
        if !(peak.intensity.is_finite() && peak.intensity > 0.0) {
            continue;
        }
        let panel = image.detector.panel(peak.panel)?;
        let direction = panel.lab_position(peak.fs, peak.ss).normalize();
        let mut q_obs = direction * k;
        q_obs.z -= k;

        let frac = cell.fractional_indices(&q_obs)?;
        let hkl = MillerIndex::new(
            frac.x.round() as i32,
            frac.y.round() as i32,
            frac.z.round() as i32,
        );
        if hkl.is_origin() {
            continue;
        }

        let mut refl = Reflection::new(hkl, peak.panel);
        match update_prediction(&mut refl, cell, image.wavelength, &minvs[peak.panel]) {
            Ok(()) => {}
            Err(SnapfitError::PredictionOffPanel(_)) => continue,
            Err(e) => return Err(e),
        }

        if let Some(max_distance) = params.max_pair_distance {
            let distance = (refl.fs - peak.fs).hypot(refl.ss - peak.ss);
            if distance > max_distance {
                continue;
            }
        }

        candidates.push((
            index,
            ReflPeak {
                refl,
                peak: *peak,
                ih: 0.0,
            },
        ));
    }

    let mut pairs: Vec<ReflPeak> = candidates
        .into_iter()
        .sorted_by(|(_, a), (_, b)| {
            a.refl
                .hkl
                .cmp(&b.refl.hkl)
                .then(b.peak.intensity.total_cmp(&a.peak.intensity))
        })
        .dedup_by(|(_, a), (_, b)| a.refl.hkl == b.refl.hkl)
        .sorted_by_key(|(index, _)| *index)
        .map(|(_, rp)| rp)
        .collect();

    let max_intensity = pairs
        .iter()
        .map(|rp| rp.peak.intensity)
        .fold(0.0, f64::max);
    for rp in pairs.iter_mut() {
        rp.ih = rp.peak.intensity / max_intensity;
    }

    debug!("paired {} of {} peaks", pairs.len(), image.peaks.len());
    Ok(pairs)
}

#[cfg(test)]
mod pairing_test {
    use super::*;
    use crate::{
        cell::UnitCell, detector::detector_test::quadrant_detector, reflection::Reflection,
    };
    use nalgebra::Vector3;

    fn setup() -> (Image, Crystal) {
        let cell = UnitCell::from_reciprocal(
            Vector3::new(1e8, 0.0, 0.0),
            Vector3::new(0.0, 1e8, 0.0),
            Vector3::new(0.0, 0.0, 1e8),
        );
        (
            Image::new(1e-10, quadrant_detector(), Vec::new()),
            Crystal::new(cell, 1e6),
        )
    }

    fn peak_for(image: &Image, crystal: &Crystal, hkl: MillerIndex, panel: usize) -> Peak {
        let minv = image.detector.panel_inverses().unwrap()[panel];
        let mut refl = Reflection::new(hkl, panel);
        update_prediction(&mut refl, &crystal.cell, image.wavelength, &minv).unwrap();
        Peak {
            fs: refl.fs + 0.2,
            ss: refl.ss - 0.1,
            panel,
            intensity: 100.0,
        }
    }

    #[test]
    fn test_pairs_index_back_to_hkl() {
        let (mut image, crystal) = setup();
        let hkl = MillerIndex::new(5, 3, 0);
        image.peaks.push(peak_for(&image, &crystal, hkl, 3));

        let pairs = pair_peaks(&image, &crystal, &RefineParams::default()).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].refl.hkl, hkl);
        assert_eq!(pairs[0].ih, 1.0);
    }

    #[test]
    fn test_duplicate_indices_keep_strongest() {
        let (mut image, crystal) = setup();
        let hkl = MillerIndex::new(5, 3, 0);
        let mut weak = peak_for(&image, &crystal, hkl, 3);
        weak.intensity = 10.0;
        let strong = peak_for(&image, &crystal, hkl, 3);
        let mut other = peak_for(&image, &crystal, MillerIndex::new(-4, -6, 0), 0);
        other.intensity = 50.0;
        image.peaks = vec![weak, other, strong];

        let pairs = pair_peaks(&image, &crystal, &RefineParams::default()).unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].refl.hkl, MillerIndex::new(-4, -6, 0));
        assert_eq!(pairs[0].ih, 0.5);
        assert_eq!(pairs[1].peak.intensity, 100.0);
    }

    #[test]
    fn test_unusable_peaks_are_dropped() {
        let (mut image, crystal) = setup();
        let mut zero = peak_for(&image, &crystal, MillerIndex::new(5, 3, 0), 3);
        zero.intensity = 0.0;
        let mut nan = peak_for(&image, &crystal, MillerIndex::new(4, 3, 0), 3);
        nan.intensity = f64::NAN;
        image.peaks = vec![zero, nan];

        assert!(pair_peaks(&image, &crystal, &RefineParams::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_max_pair_distance_gate() {
        let (mut image, crystal) = setup();
        image.peaks.push(peak_for(&image, &crystal, MillerIndex::new(5, 3, 0), 3));
        let params = RefineParams::builder()
            .max_pair_distance(Some(0.1))
            .build()
            .unwrap();
        assert!(pair_peaks(&image, &crystal, &params).unwrap().is_empty());
    }
}
