use thiserror::Error;

/// Why a refinement call was abandoned as diverged.
#[derive(Debug, Clone, PartialEq)]
pub enum DivergenceCause {
    /// Fewer matched pairs than active parameters.
    NotEnoughPairs { pairs: usize, params: usize },
    /// The normal matrix has a non-positive diagonal entry or failed its Cholesky factorisation.
    SingularNormalMatrix,
    /// The scaled normal matrix is too ill-conditioned to trust the increment.
    IllConditioned { condition: f64 },
    /// The weighted residual grew past the divergence factor.
    ResidualIncrease { previous: f64, current: f64 },
    /// An updated prediction no longer hits the plane of its panel.
    PredictionOffPanel { panel: usize },
}

impl std::fmt::Display for DivergenceCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DivergenceCause::NotEnoughPairs { pairs, params } => {
                write!(f, "{pairs} matched pairs for {params} parameters")
            }
            DivergenceCause::SingularNormalMatrix => write!(f, "singular normal matrix"),
            DivergenceCause::IllConditioned { condition } => {
                write!(f, "ill-conditioned normal matrix (condition {condition:.3e})")
            }
            DivergenceCause::ResidualIncrease { previous, current } => {
                write!(f, "residual increased from {previous:.6e} to {current:.6e}")
            }
            DivergenceCause::PredictionOffPanel { panel } => {
                write!(f, "prediction left the plane of panel {panel}")
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum SnapfitError {
    #[error("Refinement diverged: {0}")]
    Diverged(DivergenceCause),

    #[error("Refinement stalled after {iterations} iterations (residual {residual:.6e})")]
    Stalled { iterations: usize, residual: f64 },

    #[error("Invalid refinement parameter: {0}")]
    InvalidRefineParameter(String),

    #[error("Degenerate unit cell: reciprocal basis cannot be inverted")]
    DegenerateCell,

    #[error("Panel {0} has a singular pixel-to-lab matrix")]
    SingularPanelMatrix(usize),

    #[error("Reflection does not project onto panel {0}")]
    PredictionOffPanel(usize),

    #[error("Unknown panel index: {0}")]
    UnknownPanel(usize),

    #[error("Unknown panel group: {0}")]
    UnknownGroup(String),

    #[error("Panel group {0} has no panels")]
    EmptyGroup(String),

    #[error("Panel group {0} already has the maximum number of children")]
    TooManyChildren(String),

    #[error("Panel group {0} is nested too deeply for a serial number")]
    HierarchyTooDeep(String),

    #[error("No usable residuals to estimate the profile radius")]
    EmptyResidualSet,

    #[error("Invalid alignment label: {0}")]
    InvalidAlignmentLabel(i64),

    #[error("Unable to write alignment data: {0}")]
    IoError(#[from] std::io::Error),
}

impl SnapfitError {
    /// True for every failure the refinement engine reports as diverged.
    pub fn is_divergence(&self) -> bool {
        matches!(self, SnapfitError::Diverged(_))
    }
}

impl PartialEq for SnapfitError {
    fn eq(&self, other: &Self) -> bool {
        use SnapfitError::*;
        match (self, other) {
            (Diverged(a), Diverged(b)) => a == b,
            (
                Stalled {
                    iterations: ia,
                    residual: ra,
                },
                Stalled {
                    iterations: ib,
                    residual: rb,
                },
            ) => ia == ib && ra == rb,
            (InvalidRefineParameter(a), InvalidRefineParameter(b)) => a == b,
            (SingularPanelMatrix(a), SingularPanelMatrix(b)) => a == b,
            (PredictionOffPanel(a), PredictionOffPanel(b)) => a == b,
            (UnknownPanel(a), UnknownPanel(b)) => a == b,
            (UnknownGroup(a), UnknownGroup(b)) => a == b,
            (EmptyGroup(a), EmptyGroup(b)) => a == b,
            (TooManyChildren(a), TooManyChildren(b)) => a == b,
            (HierarchyTooDeep(a), HierarchyTooDeep(b)) => a == b,
            (InvalidAlignmentLabel(a), InvalidAlignmentLabel(b)) => a == b,

            // I/O errors are not comparable: same variant is enough
            (IoError(_), IoError(_)) => true,

            (DegenerateCell, DegenerateCell) => true,
            (EmptyResidualSet, EmptyResidualSet) => true,

            _ => false,
        }
    }
}
