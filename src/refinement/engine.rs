//! # Refinement engine
//!
//! Weighted Gauss–Newton refinement of one crystal, and optionally of detector panel groups,
//! against matched peaks.
//!
//! State machine
//! -----------------
//! ```text
//! Initialized ──► Iterating ──► Converged
//!                     │   ├───► Stalled   (max_iterations reached)
//!                     │   └───► Diverged  (singular / ill-conditioned solve, residual blow-up,
//!                     │                    prediction leaving its panel)
//!                     └── one step: design rows → normal equations → increment → refresh
//! ```
//!
//! Every call is all-or-nothing: the crystal, the detector and the pairs are snapshotted
//! before the first step and restored on any failure, including a failing alignment export.
//!
//! Normal equations
//! -----------------
//! With `g` the gradient of residual `r` over the active parameters and
//! `w = ih · kind weight`, the step solves
//!
//! ```text
//! (Σ w·g·gᵀ) δ = −Σ w·g·r
//! ```
//!
//! after Jacobi scaling `S = D^-1/2` (D the diagonal), so parameters of very different units
//! (m⁻¹ lengths, radian angles, metre shifts) share one well-scaled system.
use std::collections::HashMap;

use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector, Vector3};

use super::{
    gradients::{design_row, GradientContext},
    pairing::{pair_peaks, ReflPeak},
    params::Param,
    residuals::{weighted_residual, ResidualKind},
    update::{apply_crystal_increment, apply_group_increment},
    RefineParams, RefineReport, RefineState,
};
use crate::{
    alignment::{export_observations, AlignmentSink},
    cell::{Crystal, UnitCell},
    constants::Meter,
    detector::{DetectorGeometry, GroupId},
    image::Image,
    reflection::update_prediction,
    snapfit_errors::{DivergenceCause, SnapfitError},
};

/// Refine `crystal` (and the detector of `image`, if configured) with default parameters.
///
/// See [`refine_prediction_with`].
pub fn refine_prediction(
    image: &mut Image,
    crystal: &mut Crystal,
    sink: Option<&mut dyn AlignmentSink>,
    max_hierarchy_depth: u32,
) -> Result<RefineReport, SnapfitError> {
    refine_prediction_with(
        image,
        crystal,
        sink,
        max_hierarchy_depth,
        &RefineParams::default(),
    )
}

/// Pair the peaks of `image` with `crystal` and refine the geometry against them.
///
/// Arguments
/// -----------------
/// * `image`: snapshot; its detector is refined in place when `params.refine_groups` is set.
/// * `crystal`: crystal to refine in place.
/// * `sink`: alignment accumulator; `None` disables the export entirely.
/// * `max_hierarchy_depth`: exported global derivatives cover panel groups whose hierarchy
///   level is below this depth (0 → crystal derivatives only).
/// * `params`: refinement configuration.
///
/// Return
/// ----------
/// * `Ok(RefineReport)` with state [`RefineState::Converged`]; `crystal` and the detector hold
///   the refined geometry.
/// * `Err(SnapfitError::Stalled)` or `Err(SnapfitError::Diverged)`, with `crystal` and the
///   detector exactly as they were before the call.
pub fn refine_prediction_with(
    image: &mut Image,
    crystal: &mut Crystal,
    sink: Option<&mut dyn AlignmentSink>,
    max_hierarchy_depth: u32,
    params: &RefineParams,
) -> Result<RefineReport, SnapfitError> {
    let mut pairs = pair_peaks(image, crystal, params)?;
    refine_pairs(image, crystal, &mut pairs, sink, max_hierarchy_depth, params)
}

/// Refine against an explicit list of matched pairs.
///
/// Pairs whose weight is not a positive finite number are removed from `pairs` before the
/// solve. On success the predictions stored in `pairs` match the refined geometry; on failure
/// they are restored along with the crystal and the detector.
pub fn refine_pairs(
    image: &mut Image,
    crystal: &mut Crystal,
    pairs: &mut Vec<ReflPeak>,
    sink: Option<&mut dyn AlignmentSink>,
    max_hierarchy_depth: u32,
    params: &RefineParams,
) -> Result<RefineReport, SnapfitError> {
    let before = pairs.len();
    pairs.retain(|rp| rp.ih.is_finite() && rp.ih > 0.0);
    if pairs.len() < before {
        warn!("dropped {} pairs with unusable weight", before - pairs.len());
    }

    let active = params.active_params(&image.detector)?;
    if pairs.len() < active.len() {
        let cause = DivergenceCause::NotEnoughPairs {
            pairs: pairs.len(),
            params: active.len(),
        };
        warn!("refinement {}: {cause}", RefineState::Diverged);
        return Err(SnapfitError::Diverged(cause));
    }

    let snapshot = (*crystal, image.detector.clone(), pairs.clone());
    let restore = |image: &mut Image, crystal: &mut Crystal, pairs: &mut Vec<ReflPeak>| {
        *crystal = snapshot.0;
        image.detector = snapshot.1.clone();
        *pairs = snapshot.2.clone();
    };

    let mut run = RefineRun::new(&active, params);
    let report = match run.run(image, crystal, pairs) {
        Ok(report) => report,
        Err(e) => {
            warn!("refinement {} after {} iterations: {e}", run.state, run.iterations);
            restore(image, crystal, pairs);
            return Err(e);
        }
    };

    if let Some(sink) = sink {
        let exported = export_observations(
            sink,
            pairs,
            &params.crystal_params,
            &crystal.cell,
            image.wavelength,
            &image.detector,
            max_hierarchy_depth,
        )
        .and_then(|n| sink.end_record().map(|_| n));
        match exported {
            Ok(n) => debug!("exported {n} alignment records"),
            Err(e) => {
                warn!("alignment export failed, rolling back: {e}");
                sink.discard_record();
                restore(image, crystal, pairs);
                return Err(e);
            }
        }
    }

    info!("refinement {report}");
    Ok(report)
}

/// Mutable bookkeeping of one refinement call.
struct RefineRun<'p> {
    active: &'p [Param],
    params: &'p RefineParams,
    state: RefineState,
    iterations: usize,
}

impl<'p> RefineRun<'p> {
    fn new(active: &'p [Param], params: &'p RefineParams) -> Self {
        RefineRun {
            active,
            params,
            state: RefineState::Initialized,
            iterations: 0,
        }
    }

    fn report(&self, initial: f64, current: f64, n_pairs: usize) -> RefineReport {
        RefineReport {
            state: self.state,
            iterations: self.iterations,
            initial_residual: initial,
            final_residual: current,
            n_pairs,
            n_params: self.active.len(),
        }
    }

    fn diverge(&mut self, cause: DivergenceCause) -> SnapfitError {
        self.state = RefineState::Diverged;
        SnapfitError::Diverged(cause)
    }

    fn run(
        &mut self,
        image: &mut Image,
        crystal: &mut Crystal,
        pairs: &mut [ReflPeak],
    ) -> Result<RefineReport, SnapfitError> {
        self.refresh(image, &crystal.cell, pairs)?;
        let initial = weighted_residual(pairs);
        debug!(
            "refining {} parameters against {} pairs, initial residual {initial:.6e}",
            self.active.len(),
            pairs.len()
        );

        if initial == 0.0 {
            self.state = RefineState::Converged;
            return Ok(self.report(initial, initial, pairs.len()));
        }
        if !initial.is_finite() {
            return Err(self.diverge(DivergenceCause::ResidualIncrease {
                previous: initial,
                current: initial,
            }));
        }

        let tolerance = self.params.convergence_tolerance * initial;
        let mut previous = initial;
        self.state = RefineState::Iterating;

        while self.iterations < self.params.max_iterations {
            self.iterations += 1;
            let before = (*crystal, image.detector.clone(), pairs.to_vec());
            let current = self.step(image, crystal, pairs)?;
            debug!(
                "iteration {}: residual {current:.6e} (previous {previous:.6e})",
                self.iterations
            );

            match judge_step(previous, current, tolerance, self.params.divergence_factor) {
                StepOutcome::Diverged => {
                    return Err(
                        self.diverge(DivergenceCause::ResidualIncrease { previous, current })
                    );
                }
                StepOutcome::Converged => {
                    self.state = RefineState::Converged;
                    return Ok(self.report(initial, current, pairs.len()));
                }
                StepOutcome::Reverted => {
                    debug!("last step raised the residual, keeping the previous geometry");
                    *crystal = before.0;
                    image.detector = before.1;
                    pairs.copy_from_slice(&before.2);
                    self.state = RefineState::Converged;
                    return Ok(self.report(initial, previous, pairs.len()));
                }
                StepOutcome::Continue => previous = current,
            }
        }

        self.state = RefineState::Stalled;
        Err(SnapfitError::Stalled {
            iterations: self.iterations,
            residual: previous,
        })
    }

    /// One Gauss–Newton step; returns the weighted residual at the updated geometry.
    fn step(
        &mut self,
        image: &mut Image,
        crystal: &mut Crystal,
        pairs: &mut [ReflPeak],
    ) -> Result<f64, SnapfitError> {
        let (normal, rhs, centers) = {
            let ctx = GradientContext::new(&image.detector, self.active)?;
            let (normal, rhs) =
                normal_equations(pairs, self.active, &crystal.cell, image.wavelength, &ctx)
                    .map_err(|e| self.off_panel_divergence(e))?;
            (normal, rhs, ctx.group_centers().clone())
        };

        let delta = solve_normal_equations(normal, rhs, self.params.max_condition)
            .map_err(|cause| self.diverge(cause))?;
        debug!("step norm {:.6e}", delta.norm());

        apply_increments(crystal, &mut image.detector, self.active, &delta, &centers)?;
        self.refresh(image, &crystal.cell, pairs)?;
        Ok(weighted_residual(pairs))
    }

    /// Recompute every stored prediction against the current geometry.
    fn refresh(
        &mut self,
        image: &Image,
        cell: &UnitCell,
        pairs: &mut [ReflPeak],
    ) -> Result<(), SnapfitError> {
        let minvs = image.detector.panel_inverses()?;
        for rp in pairs.iter_mut() {
            let minv = minvs
                .get(rp.refl.panel)
                .ok_or(SnapfitError::UnknownPanel(rp.refl.panel))?;
            update_prediction(&mut rp.refl, cell, image.wavelength, minv)
                .map_err(|e| self.off_panel_divergence(e))?;
        }
        Ok(())
    }

    fn off_panel_divergence(&mut self, e: SnapfitError) -> SnapfitError {
        match e {
            SnapfitError::PredictionOffPanel(panel) => {
                self.diverge(DivergenceCause::PredictionOffPanel { panel })
            }
            other => other,
        }
    }
}

/// Verdict on the residual after one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepOutcome {
    Continue,
    Converged,
    /// The step made the residual slightly worse: undo it and stop.
    Reverted,
    Diverged,
}

/// Compare the residual after a step with the one before it.
///
/// `tolerance` is absolute (already scaled by the initial residual). An increase beyond
/// `divergence_factor` diverges unless the residual is still below `tolerance`; a smaller
/// increase is only accepted as convergence once the step is undone.
fn judge_step(previous: f64, current: f64, tolerance: f64, divergence_factor: f64) -> StepOutcome {
    if !current.is_finite() || (current > divergence_factor * previous && current > tolerance) {
        return StepOutcome::Diverged;
    }
    let improvement = previous - current;
    if improvement < 0.0 {
        if -improvement <= tolerance {
            StepOutcome::Reverted
        } else {
            StepOutcome::Continue
        }
    } else if improvement <= tolerance {
        StepOutcome::Converged
    } else {
        StepOutcome::Continue
    }
}

/// Accumulate the weighted normal matrix and right-hand side over all pairs.
pub(crate) fn normal_equations(
    pairs: &[ReflPeak],
    active: &[Param],
    cell: &UnitCell,
    wavelength: Meter,
    ctx: &GradientContext<'_>,
) -> Result<(DMatrix<f64>, DVector<f64>), SnapfitError> {
    let n = active.len();
    let mut normal = DMatrix::<f64>::zeros(n, n);
    let mut rhs = DVector::<f64>::zeros(n);

    for rp in pairs {
        let row = design_row(rp, active, cell, wavelength, ctx)?;
        for kind in ResidualKind::ALL {
            let w = rp.ih * kind.weight();
            let r = row.residual(kind);
            let g = row.gradient(kind);
            for i in 0..n {
                if g[i] == 0.0 {
                    continue;
                }
                rhs[i] -= w * g[i] * r;
                for j in i..n {
                    normal[(i, j)] += w * g[i] * g[j];
                }
            }
        }
    }

    for i in 0..n {
        for j in 0..i {
            normal[(i, j)] = normal[(j, i)];
        }
    }
    Ok((normal, rhs))
}

/// Solve the normal equations with Jacobi scaling, a condition check and Cholesky.
pub(crate) fn solve_normal_equations(
    normal: DMatrix<f64>,
    rhs: DVector<f64>,
    max_condition: f64,
) -> Result<DVector<f64>, DivergenceCause> {
    let diag = normal.diagonal();
    if diag.iter().any(|&d| !(d.is_finite() && d > 0.0)) {
        return Err(DivergenceCause::SingularNormalMatrix);
    }

    let s = diag.map(|d| 1.0 / d.sqrt());
    let scaled = normal.component_mul(&(&s * s.transpose()));
    let scaled_rhs = rhs.component_mul(&s);

    let eigenvalues = scaled.clone().symmetric_eigenvalues();
    let (min, max) = (eigenvalues.min(), eigenvalues.max());
    if !(min > 0.0) {
        return Err(DivergenceCause::SingularNormalMatrix);
    }
    let condition = max / min;
    if condition > max_condition {
        return Err(DivergenceCause::IllConditioned { condition });
    }

    let cholesky = scaled
        .cholesky()
        .ok_or(DivergenceCause::SingularNormalMatrix)?;
    Ok(cholesky.solve(&scaled_rhs).component_mul(&s))
}

fn apply_increments(
    crystal: &mut Crystal,
    detector: &mut DetectorGeometry,
    active: &[Param],
    delta: &DVector<f64>,
    centers: &HashMap<GroupId, Vector3<Meter>>,
) -> Result<(), SnapfitError> {
    for (param, &d) in active.iter().zip(delta.iter()) {
        match param {
            Param::Crystal(cp) => apply_crystal_increment(&mut crystal.cell, *cp, d),
            Param::Group(gp) => {
                let center = centers
                    .get(&gp.group)
                    .ok_or_else(|| SnapfitError::UnknownGroup(gp.group.to_string()))?;
                apply_group_increment(detector, *gp, d, center)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod engine_test {
    use super::*;
    use nalgebra::dmatrix;
    use nalgebra::dvector;

    #[test]
    fn test_solve_scaled_system() {
        // parameters with wildly different units
        let normal = dmatrix![4e16, 2e7; 2e7, 3.0];
        let truth = dvector![1e-8, 0.5];
        let rhs = &normal * &truth;
        let delta = solve_normal_equations(normal, rhs, 1e12).unwrap();
        assert!((delta[0] - 1e-8).abs() < 1e-20);
        assert!((delta[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_zero_diagonal_is_singular() {
        let normal = dmatrix![1.0, 0.0; 0.0, 0.0];
        assert_eq!(
            solve_normal_equations(normal, dvector![1.0, 0.0], 1e12),
            Err(DivergenceCause::SingularNormalMatrix)
        );
    }

    #[test]
    fn test_ill_conditioned() {
        let normal = dmatrix![1.0, 1.0 - 1e-14; 1.0 - 1e-14, 1.0];
        let res = solve_normal_equations(normal, dvector![1.0, 1.0], 1e12);
        assert!(matches!(
            res,
            Err(DivergenceCause::IllConditioned { .. }) | Err(DivergenceCause::SingularNormalMatrix)
        ));
    }

    #[test]
    fn test_judge_step() {
        use StepOutcome::*;
        assert_eq!(judge_step(10.0, 9.9995, 1e-2, 2.0), Converged);
        assert_eq!(judge_step(10.0, 10.0, 1e-2, 2.0), Converged);
        assert_eq!(judge_step(10.0, 5.0, 1e-2, 2.0), Continue);
        assert_eq!(judge_step(10.0, 25.0, 1e-2, 2.0), Diverged);
        assert_eq!(judge_step(10.0, f64::NAN, 1e-2, 2.0), Diverged);
        assert_eq!(judge_step(10.0, f64::INFINITY, 1e-2, 2.0), Diverged);
    }

    #[test]
    fn test_small_increase_is_not_accepted_as_converged() {
        use StepOutcome::*;
        assert_eq!(judge_step(10.0, 10.005, 1e-2, 2.0), Reverted);
        // larger, but not yet divergent: keep iterating
        assert_eq!(judge_step(10.0, 15.0, 1e-2, 2.0), Continue);
        // tripling a residual that is already below tolerance is noise
        assert_eq!(judge_step(1e-4, 3e-4, 1e-2, 2.0), Reverted);
    }

    #[test]
    fn test_zero_rhs_gives_exact_zero_step() {
        let normal = dmatrix![2.0, 0.5; 0.5, 1.0];
        let delta = solve_normal_equations(normal, dvector![0.0, 0.0], 1e12).unwrap();
        assert!(delta.iter().all(|&d| d == 0.0));
    }
}
