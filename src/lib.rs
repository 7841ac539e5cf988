//! # snapfit
//!
//! Geometric refinement of single-crystal diffraction snapshots: given a tentative crystal cell
//! and orientation, a hierarchical detector geometry and the peaks observed on one image,
//! adjust crystal and (optionally) panel-group parameters by weighted least squares so that
//! predicted spot positions match the observations, and export the observation equations for a
//! global multi-frame detector alignment.
//!
//! ## Entry points
//!
//! * [`refinement::refine_prediction`] – pair peaks and refine one crystal.
//! * [`refinement::refine_radius`] – profile radius estimate from the excitation errors.
//! * [`refinement::residuals`] and [`refinement::gradients`] – residual and gradient primitives.
//! * [`alignment`] – alignment records, [`alignment::AlignmentSink`] and the Millepede writer.
pub mod alignment;
pub mod cell;
pub mod constants;
pub mod detector;
pub mod image;
pub mod refinement;
pub mod reflection;
pub mod snapfit_errors;
pub mod vector_ops;

pub use alignment::{AlignmentRecord, AlignmentSink, MilleWriter};
pub use cell::{Crystal, UnitCell};
pub use detector::{DetectorGeometry, GroupId, Panel};
pub use image::{Image, Peak};
pub use refinement::{
    refine_prediction, refine_prediction_with, refine_radius, RefineParams, RefineReport,
    RefineState,
};
pub use snapfit_errors::SnapfitError;
