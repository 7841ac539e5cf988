//! # Constants and type definitions for snapfit
//!
//! This module centralizes the **weighting constants**, **hierarchy limits**, and **unit type
//! aliases** used throughout the refinement code.
//!
//! ## Overview
//!
//! - Relative weighting of the excitation-error and position residuals
//! - Numbering scheme limits for detector panel groups
//! - Unit aliases so signatures say which length scale they expect

// -------------------------------------------------------------------------------------------------
// Residual weighting
// -------------------------------------------------------------------------------------------------

/// Scale converting an excitation error (m⁻¹) into pixel-equivalent units.
///
/// Position residuals are measured in pixels while the excitation error lives in reciprocal
/// space. Multiplying the excitation error by this factor makes a typical profile-radius sized
/// deviation (~10⁶ m⁻¹) count as roughly a tenth of a pixel in the combined solve.
pub const EXCITATION_ERROR_SCALE: f64 = 1.0e-7;

/// Weight of a squared excitation-error residual in the normal equations.
pub const EXCITATION_ERROR_WEIGHT: f64 = EXCITATION_ERROR_SCALE * EXCITATION_ERROR_SCALE;

/// Weight of a squared position residual (pixels²) in the normal equations.
pub const POSITION_WEIGHT: f64 = 1.0;

// -------------------------------------------------------------------------------------------------
// Detector hierarchy
// -------------------------------------------------------------------------------------------------

/// Base of the group serial numbering: each hierarchy level owns two decimal digits.
pub const SERIAL_BASE: i64 = 100;

/// Maximum number of child groups under one panel group.
///
/// Child serial numbers use `(index + 1) * 100^level`, so a 100th child would overflow into the
/// digits of the next level and break alignment labels.
pub const MAX_GROUP_CHILDREN: usize = (SERIAL_BASE - 1) as usize;

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Length in metres
pub type Meter = f64;
/// Detector coordinate in pixels
pub type Pixel = f64;
/// Reciprocal-space length in m⁻¹
pub type InvMeter = f64;
/// Angle in radians
pub type Radian = f64;
