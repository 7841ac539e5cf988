use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use nalgebra::{Rotation3, Unit, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use snapfit::{
    cell::{Crystal, UnitCell},
    detector::{DetectorGeometry, Panel},
    image::{Image, Peak},
    refinement::{refine_prediction, refine_prediction_with, RefineParams},
    reflection::{excitation_error, update_prediction, wavenumber, MillerIndex, Reflection},
};

const WAVELENGTH: f64 = 1.3e-10;

/// 2×2 panels split in two halves, 100 mm downstream.
fn detector() -> DetectorGeometry {
    let mut det = DetectorGeometry::new("detector");
    let root = det.root();
    let halves = [
        det.add_group("bottom", root).unwrap(),
        det.add_group("top", root).unwrap(),
    ];
    for (i, (x, y)) in [(-520.0, -520.0), (8.0, -520.0), (-520.0, 8.0), (8.0, 8.0)]
        .into_iter()
        .enumerate()
    {
        let leaf = det.add_group(&format!("q{i}"), halves[i / 2]).unwrap();
        det.add_panel(Panel {
            name: format!("q{i}"),
            cn: Vector3::new(x, y, 1000.0),
            fsv: Vector3::x(),
            ssv: Vector3::y(),
            pixel_pitch: 100e-6,
            width: 512,
            height: 512,
            group: leaf,
        })
        .unwrap();
    }
    det
}

/// Snapshot of a random orientation with slightly jittered peak positions.
fn snapshot(rng: &mut StdRng) -> (Image, Crystal) {
    let mut cell = UnitCell::from_parameters(40e-10, 55e-10, 63e-10, 1.45, 1.62, 1.80).unwrap();
    cell.rotate(&Rotation3::from_euler_angles(
        rng.random_range(-3.0..3.0),
        rng.random_range(-1.5..1.5),
        rng.random_range(-3.0..3.0),
    ));

    let det = detector();
    let minvs = det.panel_inverses().unwrap();
    let k = wavenumber(WAVELENGTH);
    let mut peaks = Vec::new();
    for h in -25..=25 {
        for kk in -25..=25 {
            for l in -25..=25 {
                let hkl = MillerIndex::new(h, kk, l);
                let q = cell.lattice_point(&hkl);
                if hkl.is_origin() || excitation_error(&q, k).abs() >= 1e7 {
                    continue;
                }
                for (i, panel) in det.panels().iter().enumerate() {
                    let mut refl = Reflection::new(hkl, i);
                    if update_prediction(&mut refl, &cell, WAVELENGTH, &minvs[i]).is_ok()
                        && panel.contains(refl.fs, refl.ss)
                    {
                        peaks.push(Peak {
                            fs: refl.fs + rng.random_range(-0.3..0.3),
                            ss: refl.ss + rng.random_range(-0.3..0.3),
                            panel: i,
                            intensity: rng.random_range(10.0..1000.0),
                        });
                        break;
                    }
                }
            }
        }
    }

    let axis = Unit::new_normalize(Vector3::new(0.4, -0.7, 0.6));
    let mut start = cell;
    start.rotate(&Rotation3::from_axis_angle(&axis, 0.2f64.to_radians()));
    (Image::new(WAVELENGTH, det, peaks), Crystal::new(start, 5e6))
}

fn bench_crystal_only(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(42);
    let (image, crystal) = snapshot(&mut rng);

    c.bench_function("refine_prediction/crystal", |b| {
        b.iter_batched(
            || (image.clone(), crystal),
            |(mut image, mut crystal)| {
                let _ = black_box(refine_prediction(&mut image, &mut crystal, None, 0));
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_with_groups(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(7);
    let (image, crystal) = snapshot(&mut rng);
    let params = RefineParams::builder()
        .refine_groups(vec!["top".into(), "bottom".into()])
        .build()
        .unwrap();

    c.bench_function("refine_prediction/crystal+groups", |b| {
        b.iter_batched(
            || (image.clone(), crystal),
            |(mut image, mut crystal)| {
                let mut records = Vec::new();
                let _ = black_box(refine_prediction_with(
                    &mut image,
                    &mut crystal,
                    Some(&mut records),
                    3,
                    &params,
                ));
                records
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_crystal_only, bench_with_groups);
criterion_main!(benches);
