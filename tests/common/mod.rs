#![allow(dead_code)]

use nalgebra::{Rotation3, Vector3};
use snapfit::{
    cell::{Crystal, UnitCell},
    detector::{DetectorGeometry, Panel},
    image::{Image, Peak},
    reflection::{excitation_error, update_prediction, wavenumber, MillerIndex, Reflection},
};

pub const WAVELENGTH: f64 = 1.3e-10;
pub const PIXEL_PITCH: f64 = 100e-6;
/// Reflections further than this from the Ewald sphere are not observed. Kept tight so the
/// excitation-error term barely pulls the least-squares optimum away from the true geometry.
pub const MAX_EXERR: f64 = 1e6;
/// Miller index range searched for reflections.
pub const MAX_INDEX: i32 = 45;

/// Four 512×512 panels 100 mm downstream, grouped as
/// `detector → {top → {q2, q3}, bottom → {q0, q1}}`.
pub fn quadrant_detector() -> DetectorGeometry {
    let mut det = DetectorGeometry::new("detector");
    let root = det.root();
    let top = det.add_group("top", root).unwrap();
    let bottom = det.add_group("bottom", root).unwrap();

    let corners = [
        ("q0", bottom, -520.0, -520.0),
        ("q1", bottom, 8.0, -520.0),
        ("q2", top, -520.0, 8.0),
        ("q3", top, 8.0, 8.0),
    ];
    for (name, half, x, y) in corners {
        let leaf = det.add_group(name, half).unwrap();
        det.add_panel(Panel {
            name: name.to_string(),
            cn: Vector3::new(x, y, 1000.0),
            fsv: Vector3::x(),
            ssv: Vector3::y(),
            pixel_pitch: PIXEL_PITCH,
            width: 512,
            height: 512,
            group: leaf,
        })
        .unwrap();
    }
    det
}

/// Triclinic cell in a general orientation, large enough to put about a hundred reflections
/// within [`MAX_EXERR`] of the sphere on the quadrant detector.
pub fn true_cell() -> UnitCell {
    let mut cell = UnitCell::from_parameters(80e-10, 110e-10, 126e-10, 1.45, 1.62, 1.80).unwrap();
    cell.rotate(&Rotation3::from_euler_angles(0.3, -0.2, 0.5));
    cell
}

pub fn true_crystal() -> Crystal {
    Crystal::new(true_cell(), 5e6)
}

/// `cell` turned by `angle` radians about a fixed, generic axis.
pub fn rotated_cell(cell: &UnitCell, angle: f64) -> UnitCell {
    let axis = nalgebra::Unit::new_normalize(Vector3::new(0.4, -0.7, 0.6));
    let mut rotated = *cell;
    rotated.rotate(&Rotation3::from_axis_angle(&axis, angle));
    rotated
}

/// Peaks exactly at the predicted position of every reflection of `cell` that lies within
/// `MAX_EXERR` of the Ewald sphere and lands inside a panel.
pub fn predicted_peaks(cell: &UnitCell, detector: &DetectorGeometry) -> Vec<Peak> {
    let k = wavenumber(WAVELENGTH);
    let minvs = detector.panel_inverses().unwrap();
    let mut peaks = Vec::new();

    for h in -MAX_INDEX..=MAX_INDEX {
        for kk in -MAX_INDEX..=MAX_INDEX {
            for l in -MAX_INDEX..=MAX_INDEX {
                let hkl = MillerIndex::new(h, kk, l);
                if hkl.is_origin() {
                    continue;
                }
                let q = cell.lattice_point(&hkl);
                if excitation_error(&q, k).abs() >= MAX_EXERR {
                    continue;
                }
                for (i, panel) in detector.panels().iter().enumerate() {
                    let mut refl = Reflection::new(hkl, i);
                    if update_prediction(&mut refl, cell, WAVELENGTH, &minvs[i]).is_err() {
                        continue;
                    }
                    if panel.contains(refl.fs, refl.ss) {
                        peaks.push(Peak {
                            fs: refl.fs,
                            ss: refl.ss,
                            panel: i,
                            intensity: 100.0 + f64::from((7 * h + 13 * kk + 17 * l).rem_euclid(50)),
                        });
                        break;
                    }
                }
            }
        }
    }
    peaks
}

/// Image of the true crystal on the quadrant detector.
pub fn synthetic_image() -> Image {
    let detector = quadrant_detector();
    let peaks = predicted_peaks(&true_cell(), &detector);
    Image::new(WAVELENGTH, detector, peaks)
}

/// Angle between two vectors, in radians.
pub fn angle_between(a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
    a.angle(b)
}
