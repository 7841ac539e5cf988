//! # Millepede binary records
//!
//! [`MilleWriter`] buffers the observations of one crystal and writes them as a single
//! Millepede-II binary record when [`AlignmentSink::end_record`] is called.
//!
//! Record layout
//! -----------------
//! Two parallel arrays of the same length `n`, a float array and an integer array, are
//! preceded by the word count `2n`:
//!
//! ```text
//! [2n : i32] [f₀ … fₙ₋₁ : f32] [i₀ … iₙ₋₁ : i32]
//! ```
//!
//! Slot 0 holds `(0.0, 0)`. Each measurement then appends
//!
//! * `(residual, 0)`;
//! * `(∂r/∂localᵢ, i + 1)` for every non-zero local derivative;
//! * `(sigma, 0)`;
//! * `(∂r/∂global, label)` for every non-zero global derivative.
//!
//! All words use the native byte order, as the Millepede reader expects.
use std::io::Write;

use super::{AlignmentRecord, AlignmentSink};
use crate::snapfit_errors::SnapfitError;

/// Millepede-II binary writer over any [`Write`] implementation.
#[derive(Debug)]
pub struct MilleWriter<W: Write> {
    writer: W,
    floats: Vec<f32>,
    ints: Vec<i32>,
    records_written: usize,
}

impl<W: Write> MilleWriter<W> {
    pub fn new(writer: W) -> Self {
        MilleWriter {
            writer,
            floats: vec![0.0],
            ints: vec![0],
            records_written: 0,
        }
    }

    /// Number of binary records written so far.
    pub fn records_written(&self) -> usize {
        self.records_written
    }

    /// True when measurements are buffered and not yet written.
    pub fn has_pending(&self) -> bool {
        self.floats.len() > 1
    }

    pub fn flush(&mut self) -> Result<(), SnapfitError> {
        self.writer.flush()?;
        Ok(())
    }

    /// Return the underlying writer, dropping any pending measurements.
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn reset(&mut self) {
        self.floats.truncate(1);
        self.ints.truncate(1);
    }
}

impl<W: Write> AlignmentSink for MilleWriter<W> {
    fn append(&mut self, record: AlignmentRecord) -> Result<(), SnapfitError> {
        let mut globals = Vec::with_capacity(record.global.len());
        for g in &record.global {
            let label =
                i32::try_from(g.label).map_err(|_| SnapfitError::InvalidAlignmentLabel(g.label))?;
            globals.push((g.value, label));
        }

        self.floats.push(record.residual as f32);
        self.ints.push(0);
        for (i, local) in record.local.iter().enumerate() {
            if local.value != 0.0 {
                self.floats.push(local.value as f32);
                self.ints.push(i as i32 + 1);
            }
        }
        self.floats.push(record.sigma as f32);
        self.ints.push(0);
        for (value, label) in globals {
            if value != 0.0 {
                self.floats.push(value as f32);
                self.ints.push(label);
            }
        }
        Ok(())
    }

    fn end_record(&mut self) -> Result<(), SnapfitError> {
        if !self.has_pending() {
            return Ok(());
        }

        let n_words = (self.floats.len() * 2) as i32;
        let mut bytes = Vec::with_capacity(4 + 8 * self.floats.len());
        bytes.extend_from_slice(&n_words.to_ne_bytes());
        for f in &self.floats {
            bytes.extend_from_slice(&f.to_ne_bytes());
        }
        for i in &self.ints {
            bytes.extend_from_slice(&i.to_ne_bytes());
        }
        self.reset();

        self.writer.write_all(&bytes)?;
        self.records_written += 1;
        Ok(())
    }

    fn discard_record(&mut self) {
        self.reset();
    }
}

#[cfg(test)]
mod mille_test {
    use super::*;
    use crate::{
        alignment::{GlobalDerivative, LocalDerivative},
        refinement::{CrystalParam, ResidualKind},
        reflection::MillerIndex,
    };

    fn record() -> AlignmentRecord {
        AlignmentRecord {
            hkl: MillerIndex::new(1, 2, 3),
            kind: ResidualKind::FastScan,
            residual: 0.25,
            sigma: 2.0,
            local: vec![
                LocalDerivative {
                    param: CrystalParam::AStar,
                    value: 1.5,
                },
                LocalDerivative {
                    param: CrystalParam::BStar,
                    value: 0.0,
                },
                LocalDerivative {
                    param: CrystalParam::CStar,
                    value: -3.0,
                },
            ],
            global: vec![
                GlobalDerivative {
                    label: 101,
                    value: 4.0,
                },
                GlobalDerivative {
                    label: 102,
                    value: 0.0,
                },
            ],
        }
    }

    fn words(bytes: &[u8]) -> Vec<[u8; 4]> {
        bytes
            .chunks_exact(4)
            .map(|c| [c[0], c[1], c[2], c[3]])
            .collect()
    }

    #[test]
    fn test_record_layout() {
        let mut w = MilleWriter::new(Vec::new());
        w.append(record()).unwrap();
        w.end_record().unwrap();
        assert_eq!(w.records_written(), 1);
        let bytes = w.into_inner();

        let words = words(&bytes);
        let n = i32::from_ne_bytes(words[0]);
        // slot 0, residual, two non-zero locals, sigma, one non-zero global
        assert_eq!(n, 12);
        let floats: Vec<f32> = words[1..7].iter().map(|w| f32::from_ne_bytes(*w)).collect();
        let ints: Vec<i32> = words[7..13].iter().map(|w| i32::from_ne_bytes(*w)).collect();
        assert_eq!(floats, vec![0.0, 0.25, 1.5, -3.0, 2.0, 4.0]);
        assert_eq!(ints, vec![0, 0, 1, 3, 0, 101]);
        assert_eq!(words.len(), 13);
    }

    #[test]
    fn test_discard_and_empty_end() {
        let mut w = MilleWriter::new(Vec::new());
        w.append(record()).unwrap();
        assert!(w.has_pending());
        w.discard_record();
        w.end_record().unwrap();
        assert_eq!(w.records_written(), 0);
        assert!(w.into_inner().is_empty());
    }

    #[test]
    fn test_label_overflow() {
        let mut w = MilleWriter::new(Vec::new());
        let mut r = record();
        r.global[0].label = i64::from(i32::MAX) + 1;
        assert!(matches!(
            w.append(r),
            Err(SnapfitError::InvalidAlignmentLabel(_))
        ));
        assert!(!w.has_pending());
    }
}
