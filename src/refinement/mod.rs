//! # Prediction refinement
//!
//! This module defines the [`RefineParams`] configuration struct and its builder, and hosts the
//! weighted least-squares refinement of one crystal (and optionally detector panel groups)
//! against the peaks observed on one snapshot.
//!
//! ## Pipeline overview
//!
//! 1. **Pairing** ([`pairing`])
//!    Peaks are indexed against the current cell and matched to predicted reflections. Each
//!    pair carries an intensity weight normalised to the strongest pair.
//!
//! 2. **Design rows** ([`residuals`], [`gradients`])
//!    For every pair, the excitation-error and the two position residuals are evaluated with
//!    their closed-form gradients over the active parameter set.
//!
//! 3. **Solve and update** ([`engine`], [`update`])
//!    The weighted normal equations are Jacobi-scaled, checked for conditioning and solved by
//!    Cholesky. The increment is composed with the current crystal and detector state.
//!
//! 4. **Termination**
//!    The loop stops as [`RefineState::Converged`] when the weighted residual stops improving,
//!    as [`RefineState::Stalled`] at `max_iterations`, or as [`RefineState::Diverged`] when the
//!    solve fails or the residual blows up. Failures restore the state from before the call.
//!
//! The profile radius estimate ([`radius`]) is a separate single pass over the final pairs.
//!
//! ## Example
//!
//! ```rust,no_run
//! use snapfit::refinement::{CrystalParam, RefineParams};
//!
//! let params = RefineParams::builder()
//!     .max_iterations(20)
//!     .convergence_tolerance(1e-4)
//!     .crystal_params(vec![CrystalParam::RotX, CrystalParam::RotY, CrystalParam::RotZ])
//!     .refine_groups(vec!["top".into(), "bottom".into()])
//!     .build()
//!     .unwrap();
//! println!("{params:#}");
//! ```
pub mod engine;
pub mod gradients;
pub mod pairing;
pub mod params;
pub mod radius;
pub mod residuals;
pub mod update;

use std::cmp::Ordering::Greater;
use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{detector::DetectorGeometry, snapfit_errors::SnapfitError};

pub use engine::{refine_pairs, refine_prediction, refine_prediction_with};
pub use pairing::{pair_peaks, ReflPeak};
pub use params::{CrystalParam, DetectorParam, GroupParam, Param};
pub use radius::{refine_radius, refine_radius_with};
pub use residuals::{fs_dev, r_dev, ss_dev, ResidualKind};

/// Configuration of one refinement call.
///
/// Default values
/// -----------------
/// * `max_iterations`: 10
/// * `convergence_tolerance`: 1e-3 (relative to the initial weighted residual)
/// * `divergence_factor`: 2.0
/// * `max_condition`: 1e12
/// * `crystal_params`: all nine [`CrystalParam`]s
/// * `refine_groups`: none
/// * `max_pair_distance`: `None` (no gate)
/// * `radius_percentile_drop`: 50
///
/// Notes & Validation
/// -----------------
/// * `max_iterations ≥ 1`, `convergence_tolerance > 0`, `divergence_factor > 1`,
///   `max_condition > 1`, `radius_percentile_drop ≥ 1`.
/// * `max_pair_distance`, when set, must be `> 0`.
/// * At least one parameter must be active; neither list may contain duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefineParams {
    /// Iteration cap; reaching it without converging is a stall.
    pub max_iterations: usize,
    /// Relative improvement of the weighted residual below which the fit has converged.
    pub convergence_tolerance: f64,
    /// An iteration whose residual exceeds this factor times the previous one diverges.
    pub divergence_factor: f64,
    /// Largest accepted condition number of the Jacobi-scaled normal matrix.
    pub max_condition: f64,
    /// Crystal parameters to refine, in solve order.
    pub crystal_params: Vec<CrystalParam>,
    /// Names of detector panel groups whose six pose parameters are refined.
    pub refine_groups: Vec<String>,
    /// Maximum distance in pixels between a peak and its prediction when pairing.
    pub max_pair_distance: Option<f64>,
    /// The radius estimate drops the largest `n / radius_percentile_drop` excitation errors.
    pub radius_percentile_drop: usize,
}

impl RefineParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> RefineParamsBuilder {
        RefineParamsBuilder::new()
    }

    /// Resolve the active parameter set against a detector.
    ///
    /// Crystal parameters come first, then the six pose parameters of each refined group in
    /// the order the groups are listed.
    pub fn active_params(&self, detector: &DetectorGeometry) -> Result<Vec<Param>, SnapfitError> {
        let mut active: Vec<Param> = self.crystal_params.iter().map(|&p| p.into()).collect();
        for name in &self.refine_groups {
            let group = detector
                .find_group(name)
                .ok_or_else(|| SnapfitError::UnknownGroup(name.clone()))?;
            active.extend(
                DetectorParam::ALL
                    .iter()
                    .map(|&param| Param::Group(GroupParam { group, param })),
            );
        }
        Ok(active)
    }
}

impl Default for RefineParams {
    fn default() -> Self {
        RefineParams {
            max_iterations: 10,
            convergence_tolerance: 1e-3,
            divergence_factor: 2.0,
            max_condition: 1e12,
            crystal_params: CrystalParam::ALL.to_vec(),
            refine_groups: Vec::new(),
            max_pair_distance: None,
            radius_percentile_drop: 50,
        }
    }
}

/// Builder for [`RefineParams`], with validation.
#[derive(Debug, Clone)]
pub struct RefineParamsBuilder {
    params: RefineParams,
}

impl Default for RefineParamsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RefineParamsBuilder {
    pub fn new() -> Self {
        Self {
            params: RefineParams::default(),
        }
    }

    pub fn max_iterations(mut self, v: usize) -> Self {
        self.params.max_iterations = v;
        self
    }
    pub fn convergence_tolerance(mut self, v: f64) -> Self {
        self.params.convergence_tolerance = v;
        self
    }
    pub fn divergence_factor(mut self, v: f64) -> Self {
        self.params.divergence_factor = v;
        self
    }
    pub fn max_condition(mut self, v: f64) -> Self {
        self.params.max_condition = v;
        self
    }
    pub fn crystal_params(mut self, v: Vec<CrystalParam>) -> Self {
        self.params.crystal_params = v;
        self
    }
    pub fn refine_groups(mut self, v: Vec<String>) -> Self {
        self.params.refine_groups = v;
        self
    }
    pub fn max_pair_distance(mut self, v: Option<f64>) -> Self {
        self.params.max_pair_distance = v;
        self
    }
    pub fn radius_percentile_drop(mut self, v: usize) -> Self {
        self.params.radius_percentile_drop = v;
        self
    }

    /// Return true iff x > y and comparable (i.e., not NaN).
    #[inline]
    fn gt(x: f64, y: f64) -> bool {
        x.partial_cmp(&y) == Some(Greater)
    }

    /// Finalize the builder.
    ///
    /// Return
    /// ----------
    /// * `Err(SnapfitError::InvalidRefineParameter)` naming the first rule that fails.
    pub fn build(self) -> Result<RefineParams, SnapfitError> {
        let p = &self.params;
        let invalid = |msg: &str| -> Result<RefineParams, SnapfitError> {
            Err(SnapfitError::InvalidRefineParameter(msg.into()))
        };

        if p.max_iterations == 0 {
            return invalid("max_iterations must be >= 1");
        }
        if !Self::gt(p.convergence_tolerance, 0.0) {
            return invalid("convergence_tolerance must be > 0");
        }
        if !Self::gt(p.divergence_factor, 1.0) {
            return invalid("divergence_factor must be > 1");
        }
        if !Self::gt(p.max_condition, 1.0) {
            return invalid("max_condition must be > 1");
        }
        if p.radius_percentile_drop == 0 {
            return invalid("radius_percentile_drop must be >= 1");
        }
        if let Some(d) = p.max_pair_distance {
            if !Self::gt(d, 0.0) {
                return invalid("max_pair_distance must be > 0");
            }
        }
        if p.crystal_params.is_empty() && p.refine_groups.is_empty() {
            return invalid("at least one crystal parameter or panel group must be refined");
        }
        if !p.crystal_params.iter().all_unique() {
            return invalid("crystal_params contains duplicates");
        }
        if !p.refine_groups.iter().all_unique() {
            return invalid("refine_groups contains duplicates");
        }

        Ok(self.params)
    }
}

impl fmt::Display for RefineParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let crystal = self.crystal_params.iter().join(", ");
        let groups = self.refine_groups.iter().join(", ");
        let gate = match self.max_pair_distance {
            Some(d) => format!("{d:.2} px"),
            None => "none".to_string(),
        };

        if f.alternate() {
            const PARAM_COL: usize = 44;
            writeln!(f, "Prediction Refinement Parameters")?;
            writeln!(f, "--------------------------------")?;

            macro_rules! line {
                ($fmt:expr, $val:expr, $comment:expr) => {{
                    let s = format!($fmt, $val);
                    let pad = if s.len() < PARAM_COL {
                        " ".repeat(PARAM_COL - s.len())
                    } else {
                        " ".to_string()
                    };
                    writeln!(f, "  {}{}# {}", s, pad, $comment)
                }};
            }

            writeln!(f, "[Iterations]")?;
            line!(
                "max_iterations         = {}",
                self.max_iterations,
                "Iteration cap before stalling"
            )?;
            line!(
                "convergence_tolerance  = {:.1e}",
                self.convergence_tolerance,
                "Relative residual improvement"
            )?;
            line!(
                "divergence_factor      = {:.2}",
                self.divergence_factor,
                "Allowed residual growth per step"
            )?;
            line!(
                "max_condition          = {:.1e}",
                self.max_condition,
                "Scaled normal matrix condition cap"
            )?;

            writeln!(f, "\n[Parameters]")?;
            line!("crystal_params         = [{}]", crystal, "Crystal unknowns")?;
            line!("refine_groups          = [{}]", groups, "Panel groups (6 each)")?;

            writeln!(f, "\n[Pairing / radius]")?;
            line!("max_pair_distance      = {}", gate, "Peak/prediction gate")?;
            line!(
                "radius_percentile_drop = {}",
                self.radius_percentile_drop,
                "Outlier fraction 1/n for radius"
            )?;
            Ok(())
        } else {
            write!(
                f,
                "RefineParams(max_iterations={}, tol={:.1e}, divergence={:.2}, max_condition={:.1e}, crystal=[{}], groups=[{}], gate={})",
                self.max_iterations,
                self.convergence_tolerance,
                self.divergence_factor,
                self.max_condition,
                crystal,
                groups,
                gate
            )
        }
    }
}

/// Where the refinement state machine stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefineState {
    Initialized,
    Iterating,
    Converged,
    Stalled,
    Diverged,
}

impl fmt::Display for RefineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RefineState::Initialized => "initialized",
            RefineState::Iterating => "iterating",
            RefineState::Converged => "converged",
            RefineState::Stalled => "stalled",
            RefineState::Diverged => "diverged",
        };
        f.write_str(s)
    }
}

/// Summary of a successful refinement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefineReport {
    pub state: RefineState,
    /// Number of solve steps taken.
    pub iterations: usize,
    /// Weighted residual before the first step.
    pub initial_residual: f64,
    /// Weighted residual at the returned geometry.
    pub final_residual: f64,
    pub n_pairs: usize,
    pub n_params: usize,
}

impl fmt::Display for RefineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} after {} iterations: residual {:.6e} -> {:.6e} ({} pairs, {} parameters)",
            self.state,
            self.iterations,
            self.initial_residual,
            self.final_residual,
            self.n_pairs,
            self.n_params
        )
    }
}

#[cfg(test)]
mod refine_params_test {
    use super::*;
    use crate::detector::detector_test::quadrant_detector;

    #[test]
    fn test_default_builds() {
        let p = RefineParams::builder().build().unwrap();
        assert_eq!(p, RefineParams::default());
        assert_eq!(p.crystal_params.len(), 9);
    }

    #[test]
    fn test_validation() {
        let err = RefineParams::builder().max_iterations(0).build().unwrap_err();
        assert_eq!(
            err,
            SnapfitError::InvalidRefineParameter("max_iterations must be >= 1".into())
        );
        assert!(RefineParams::builder()
            .convergence_tolerance(f64::NAN)
            .build()
            .is_err());
        assert!(RefineParams::builder()
            .divergence_factor(0.5)
            .build()
            .is_err());
        assert!(RefineParams::builder()
            .max_pair_distance(Some(-1.0))
            .build()
            .is_err());
        assert!(RefineParams::builder()
            .crystal_params(vec![])
            .build()
            .is_err());
        assert!(RefineParams::builder()
            .crystal_params(vec![CrystalParam::RotX, CrystalParam::RotX])
            .build()
            .is_err());
    }

    #[test]
    fn test_active_params_order() {
        let det = quadrant_detector();
        let p = RefineParams::builder()
            .crystal_params(vec![CrystalParam::RotZ])
            .refine_groups(vec!["top".into()])
            .build()
            .unwrap();
        let active = p.active_params(&det).unwrap();
        assert_eq!(active.len(), 7);
        assert_eq!(active[0], Param::Crystal(CrystalParam::RotZ));
        let top = det.find_group("top").unwrap();
        assert_eq!(
            active[1],
            Param::Group(GroupParam {
                group: top,
                param: DetectorParam::TransX
            })
        );
    }

    #[test]
    fn test_active_params_unknown_group() {
        let det = quadrant_detector();
        let p = RefineParams::builder()
            .refine_groups(vec!["left".into()])
            .build()
            .unwrap();
        assert_eq!(
            p.active_params(&det),
            Err(SnapfitError::UnknownGroup("left".into()))
        );
    }

    #[test]
    fn test_display_alternate() {
        let s = format!("{:#}", RefineParams::default());
        assert!(s.contains("max_iterations         = 10"));
        assert!(s.contains("alpha*"));
        let short = format!("{}", RefineParams::default());
        assert!(short.starts_with("RefineParams("));
    }
}
