use serde::{Deserialize, Serialize};

use crate::{
    constants::{InvMeter, Meter, Pixel},
    detector::DetectorGeometry,
    reflection::wavenumber,
};

/// An observed diffraction peak.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    pub fs: Pixel,
    pub ss: Pixel,
    /// Index of the panel the peak was found on.
    pub panel: usize,
    pub intensity: f64,
}

/// One diffraction snapshot: beam wavelength, detector geometry and the peaks found on it.
///
/// The detector is owned by the image so that detector-group refinement for the crystals of
/// one snapshot mutates a single, explicitly passed geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub wavelength: Meter,
    pub detector: DetectorGeometry,
    pub peaks: Vec<Peak>,
}

impl Image {
    pub fn new(wavelength: Meter, detector: DetectorGeometry, peaks: Vec<Peak>) -> Self {
        Image {
            wavelength,
            detector,
            peaks,
        }
    }

    /// Incident wavenumber `1/λ`.
    pub fn k(&self) -> InvMeter {
        wavenumber(self.wavelength)
    }
}
