//! # Alignment export
//!
//! Translation of refined design rows into observation records for an external multi-frame
//! detector alignment (Millepede-style): each record holds one residual, its weight as a
//! standard deviation, the derivatives with respect to the crystal's own ("local")
//! parameters, and the derivatives with respect to the ("global") pose parameters of the
//! panel groups the observation's panel moves with.
//!
//! Labels
//! -----------------
//! A global derivative is identified by `serial + offset`, where `serial` is the group serial
//! number (see [`crate::detector`]) and `offset ∈ 1..=6` selects the [`DetectorParam`]. Serial
//! numbers are multiples of 100, so the two are recovered with
//! [`alignment_unlabel`].
//!
//! Depth
//! -----------------
//! Globals are emitted for the panel's group and its ancestors whose hierarchy level is below
//! `max_hierarchy_depth`. Depth 0 exports local derivatives only; every increase of the depth
//! only adds global derivatives.
pub mod mille;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{
    cell::UnitCell,
    constants::{Meter, SERIAL_BASE},
    detector::{DetectorGeometry, GroupId},
    refinement::{
        gradients::{design_row, GradientContext},
        CrystalParam, DetectorParam, GroupParam, Param, ReflPeak, ResidualKind,
    },
    reflection::MillerIndex,
    snapfit_errors::SnapfitError,
};

pub use mille::MilleWriter;

/// Derivative with respect to a crystal parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocalDerivative {
    pub param: CrystalParam,
    pub value: f64,
}

/// Derivative with respect to a labelled panel-group parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlobalDerivative {
    pub label: i64,
    pub value: f64,
}

/// One observation equation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentRecord {
    pub hkl: MillerIndex,
    pub kind: ResidualKind,
    /// Observed − predicted.
    pub residual: f64,
    /// Standard deviation of the residual, `1/√(ih · kind weight)`.
    pub sigma: f64,
    pub local: Vec<LocalDerivative>,
    pub global: Vec<GlobalDerivative>,
}

/// Receiver of alignment records.
///
/// Records of one crystal share its local parameters; the refinement calls
/// [`AlignmentSink::end_record`] once after appending all of them, or
/// [`AlignmentSink::discard_record`] if the export has to be abandoned.
pub trait AlignmentSink {
    fn append(&mut self, record: AlignmentRecord) -> Result<(), SnapfitError>;

    /// Close the records appended since the last call.
    fn end_record(&mut self) -> Result<(), SnapfitError> {
        Ok(())
    }

    /// Drop the records appended since the last [`AlignmentSink::end_record`].
    fn discard_record(&mut self) {}
}

impl AlignmentSink for Vec<AlignmentRecord> {
    fn append(&mut self, record: AlignmentRecord) -> Result<(), SnapfitError> {
        self.push(record);
        Ok(())
    }
}

/// Global label of one pose parameter of a group.
pub fn alignment_label(serial: i64, param: DetectorParam) -> i64 {
    serial + param.label_offset()
}

/// Split a global label into `(group serial, parameter)`.
///
/// Return
/// ----------
/// * `Err(SnapfitError::InvalidAlignmentLabel)` for negative labels or an offset outside
///   `1..=6`.
pub fn alignment_unlabel(label: i64) -> Result<(i64, DetectorParam), SnapfitError> {
    if label < 0 {
        return Err(SnapfitError::InvalidAlignmentLabel(label));
    }
    let offset = label % SERIAL_BASE;
    let param =
        DetectorParam::from_label_offset(offset).ok_or(SnapfitError::InvalidAlignmentLabel(label))?;
    Ok((label - offset, param))
}

/// Groups exported for a panel: its group and ancestors with level below `max_hierarchy_depth`,
/// innermost first.
fn exported_groups(
    detector: &DetectorGeometry,
    panel: usize,
    max_hierarchy_depth: u32,
) -> Result<SmallVec<[GroupId; 4]>, SnapfitError> {
    let leaf = detector.panel(panel)?.group;
    let mut groups = SmallVec::new();
    for id in detector.ancestry(leaf)? {
        if detector.group(id)?.hierarchy_level() < max_hierarchy_depth {
            groups.push(id);
        }
    }
    Ok(groups)
}

/// Append one record per pair per residual kind to `sink`.
///
/// Derivatives are evaluated at the current geometry; zero derivatives are kept so every
/// record carries the same local parameters.
///
/// Return
/// ----------
/// * The number of records appended.
pub fn export_observations(
    sink: &mut dyn AlignmentSink,
    pairs: &[ReflPeak],
    crystal_params: &[CrystalParam],
    cell: &UnitCell,
    wavelength: Meter,
    detector: &DetectorGeometry,
    max_hierarchy_depth: u32,
) -> Result<usize, SnapfitError> {
    let mut all_globals = Vec::new();
    for (id, group) in detector.groups().iter().enumerate() {
        let group_id = GroupId(id);
        if group.hierarchy_level() >= max_hierarchy_depth
            || detector.group_panels(group_id)?.is_empty()
        {
            continue;
        }
        all_globals.extend(DetectorParam::ALL.iter().map(|&param| {
            Param::Group(GroupParam {
                group: group_id,
                param,
            })
        }));
    }
    let ctx = GradientContext::new(detector, &all_globals)?;

    let mut count = 0;
    for rp in pairs {
        let groups = exported_groups(detector, rp.refl.panel, max_hierarchy_depth)?;

        let mut active: Vec<Param> = crystal_params.iter().map(|&p| p.into()).collect();
        let mut labels = Vec::with_capacity(groups.len() * DetectorParam::ALL.len());
        for &group in &groups {
            let serial = detector.group(group)?.serial();
            for param in DetectorParam::ALL {
                active.push(Param::Group(GroupParam { group, param }));
                labels.push(alignment_label(serial, param));
            }
        }

        let row = design_row(rp, &active, cell, wavelength, &ctx)?;
        let n_local = crystal_params.len();
        for kind in ResidualKind::ALL {
            let gradient = row.gradient(kind);
            let local = crystal_params
                .iter()
                .zip(&gradient[..n_local])
                .map(|(&param, &value)| LocalDerivative { param, value })
                .collect();
            let global = labels
                .iter()
                .zip(&gradient[n_local..])
                .map(|(&label, &value)| GlobalDerivative { label, value })
                .collect();

            sink.append(AlignmentRecord {
                hkl: rp.refl.hkl,
                kind,
                residual: row.residual(kind),
                sigma: 1.0 / (rp.ih * kind.weight()).sqrt(),
                local,
                global,
            })?;
            count += 1;
        }
    }
    Ok(count)
}
