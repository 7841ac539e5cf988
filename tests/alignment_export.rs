mod common;

use std::collections::HashMap;

use common::{rotated_cell, true_cell};
use snapfit::{
    alignment::{alignment_unlabel, AlignmentRecord, AlignmentSink, MilleWriter},
    cell::Crystal,
    refinement::{refine_prediction, ResidualKind},
    snapfit_errors::SnapfitError,
};

fn start_crystal() -> Crystal {
    Crystal::new(rotated_cell(&true_cell(), 1e-3), 5e6)
}

fn export_at_depth(depth: u32) -> (Vec<AlignmentRecord>, usize) {
    let mut image = common::synthetic_image();
    let mut crystal = start_crystal();
    let mut records: Vec<AlignmentRecord> = Vec::new();
    let report = refine_prediction(&mut image, &mut crystal, Some(&mut records), depth).unwrap();
    (records, report.n_pairs)
}

#[test]
fn test_depth_zero_exports_local_derivatives_only() {
    let (records, n_pairs) = export_at_depth(0);
    assert_eq!(records.len(), 3 * n_pairs);
    for record in &records {
        assert!(record.global.is_empty());
        assert_eq!(record.local.len(), 9);
        assert!(record.sigma > 0.0 && record.sigma.is_finite());
    }
    for kind in ResidualKind::ALL {
        assert_eq!(records.iter().filter(|r| r.kind == kind).count(), n_pairs);
    }
}

#[test]
fn test_depth_only_adds_labels() {
    let (mut previous, n_pairs) = export_at_depth(0);
    for depth in 1..=4 {
        let (records, n) = export_at_depth(depth);
        assert_eq!(n, n_pairs);
        assert_eq!(records.len(), previous.len());

        for (shallow, deep) in previous.iter().zip(&records) {
            assert_eq!(shallow.hkl, deep.hkl);
            assert_eq!(shallow.kind, deep.kind);
            assert_eq!(shallow.local, deep.local);
            assert_eq!(shallow.residual, deep.residual);

            let deep_globals: HashMap<i64, f64> =
                deep.global.iter().map(|g| (g.label, g.value)).collect();
            for g in &shallow.global {
                assert_eq!(deep_globals.get(&g.label), Some(&g.value));
            }
            assert!(deep.global.len() >= shallow.global.len());
        }
        previous = records;
    }

    // the quadrant detector has three levels: depth 3 and beyond carry 18 globals
    assert!(previous.iter().all(|r| r.global.len() == 18));
}

#[test]
fn test_global_labels_name_ancestor_groups() {
    let (records, _) = export_at_depth(2);
    for record in &records {
        assert_eq!(record.global.len(), 12);
        let serials: Vec<i64> = record
            .global
            .iter()
            .map(|g| alignment_unlabel(g.label).unwrap().0)
            .collect();
        // innermost first: half (100 or 200), then the root (0)
        assert!(serials[..6].iter().all(|&s| s == 100 || s == 200));
        assert!(serials[6..].iter().all(|&s| s == 0));
    }
}

#[test]
fn test_excitation_records_have_no_detector_sensitivity() {
    let (records, _) = export_at_depth(3);
    for record in records
        .iter()
        .filter(|r| r.kind == ResidualKind::ExcitationError)
    {
        assert!(record.global.iter().all(|g| g.value == 0.0));
    }
}

#[test]
fn test_mille_writer_receives_one_record_per_crystal() {
    let mut image = common::synthetic_image();
    let mut crystal = start_crystal();
    let mut writer = MilleWriter::new(Vec::new());
    refine_prediction(&mut image, &mut crystal, Some(&mut writer), 2).unwrap();

    assert_eq!(writer.records_written(), 1);
    assert!(!writer.has_pending());
    let bytes = writer.into_inner();
    let n_words = i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    assert_eq!(bytes.len(), 4 + 4 * n_words);
}

struct FailingSink {
    appended: usize,
    discarded: bool,
}

impl AlignmentSink for FailingSink {
    fn append(&mut self, _record: AlignmentRecord) -> Result<(), SnapfitError> {
        self.appended += 1;
        if self.appended > 10 {
            return Err(SnapfitError::IoError(std::io::Error::other("disk full")));
        }
        Ok(())
    }

    fn discard_record(&mut self) {
        self.discarded = true;
    }
}

#[test]
fn test_failing_export_rolls_back() {
    let mut image = common::synthetic_image();
    let mut crystal = start_crystal();
    let before = crystal;
    let detector_before = image.detector.clone();
    let mut sink = FailingSink {
        appended: 0,
        discarded: false,
    };

    let err = refine_prediction(&mut image, &mut crystal, Some(&mut sink), 1).unwrap_err();
    assert!(matches!(err, SnapfitError::IoError(_)));
    assert!(sink.discarded);
    assert_eq!(crystal, before);
    assert_eq!(image.detector, detector_before);
}
