//! # Refinable parameters
//!
//! Parameters come in two families that never mix:
//!
//! * [`CrystalParam`]: nine scalars acting on one crystal's reciprocal basis: the lengths of
//!   `a*`, `b*`, `c*`, the reciprocal inter-axial angles `α*`, `β*`, `γ*`, and small rotations of
//!   the whole basis about the laboratory axes. Together they are a complete local
//!   parametrisation of the nine reciprocal basis components.
//! * [`DetectorParam`]: six pose scalars (three translations, three rotations) that are only
//!   meaningful together with the panel group they move, hence [`GroupParam`].
//!
//! [`Param`] is the tagged union stored in an active parameter set. Two `GroupParam`s with the
//! same [`DetectorParam`] but different groups are distinct unknowns.
use serde::{Deserialize, Serialize};

use crate::{cell::ReciprocalAxis, detector::GroupId, vector_ops::LabAxis};

/// Parameter of a crystal's reciprocal basis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CrystalParam {
    /// Length of `a*` (m⁻¹).
    AStar,
    /// Length of `b*` (m⁻¹).
    BStar,
    /// Length of `c*` (m⁻¹).
    CStar,
    /// Angle between `b*` and `c*`, changed by turning `b*` (rad).
    AlStar,
    /// Angle between `c*` and `a*`, changed by turning `c*` (rad).
    BeStar,
    /// Angle between `a*` and `b*`, changed by turning `a*` (rad).
    GaStar,
    /// Rotation of the whole basis about lab x (rad).
    RotX,
    /// Rotation of the whole basis about lab y (rad).
    RotY,
    /// Rotation of the whole basis about lab z (rad).
    RotZ,
}

impl CrystalParam {
    pub const ALL: [CrystalParam; 9] = [
        CrystalParam::AStar,
        CrystalParam::BStar,
        CrystalParam::CStar,
        CrystalParam::AlStar,
        CrystalParam::BeStar,
        CrystalParam::GaStar,
        CrystalParam::RotX,
        CrystalParam::RotY,
        CrystalParam::RotZ,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CrystalParam::AStar => "a*",
            CrystalParam::BStar => "b*",
            CrystalParam::CStar => "c*",
            CrystalParam::AlStar => "alpha*",
            CrystalParam::BeStar => "beta*",
            CrystalParam::GaStar => "gamma*",
            CrystalParam::RotX => "rot_x",
            CrystalParam::RotY => "rot_y",
            CrystalParam::RotZ => "rot_z",
        }
    }

    /// Reciprocal axis rescaled by a length parameter.
    pub fn length_axis(self) -> Option<ReciprocalAxis> {
        match self {
            CrystalParam::AStar => Some(ReciprocalAxis::A),
            CrystalParam::BStar => Some(ReciprocalAxis::B),
            CrystalParam::CStar => Some(ReciprocalAxis::C),
            _ => None,
        }
    }

    /// For an angle parameter: `(turned, other)` axes. The turned axis rotates about
    /// `cross_normalize(other, turned)`, which opens the angle between them.
    pub fn angle_axes(self) -> Option<(ReciprocalAxis, ReciprocalAxis)> {
        match self {
            CrystalParam::AlStar => Some((ReciprocalAxis::B, ReciprocalAxis::C)),
            CrystalParam::BeStar => Some((ReciprocalAxis::C, ReciprocalAxis::A)),
            CrystalParam::GaStar => Some((ReciprocalAxis::A, ReciprocalAxis::B)),
            _ => None,
        }
    }

    /// Lab axis of a rotation parameter.
    pub fn rotation_axis(self) -> Option<LabAxis> {
        match self {
            CrystalParam::RotX => Some(LabAxis::X),
            CrystalParam::RotY => Some(LabAxis::Y),
            CrystalParam::RotZ => Some(LabAxis::Z),
            _ => None,
        }
    }
}

impl std::fmt::Display for CrystalParam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Pose parameter of a detector panel group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DetectorParam {
    TransX,
    TransY,
    TransZ,
    RotX,
    RotY,
    RotZ,
}

impl DetectorParam {
    pub const ALL: [DetectorParam; 6] = [
        DetectorParam::TransX,
        DetectorParam::TransY,
        DetectorParam::TransZ,
        DetectorParam::RotX,
        DetectorParam::RotY,
        DetectorParam::RotZ,
    ];

    pub fn name(self) -> &'static str {
        match self {
            DetectorParam::TransX => "shift_x",
            DetectorParam::TransY => "shift_y",
            DetectorParam::TransZ => "shift_z",
            DetectorParam::RotX => "tilt_x",
            DetectorParam::RotY => "tilt_y",
            DetectorParam::RotZ => "rot_z",
        }
    }

    pub fn axis(self) -> LabAxis {
        match self {
            DetectorParam::TransX | DetectorParam::RotX => LabAxis::X,
            DetectorParam::TransY | DetectorParam::RotY => LabAxis::Y,
            DetectorParam::TransZ | DetectorParam::RotZ => LabAxis::Z,
        }
    }

    pub fn is_translation(self) -> bool {
        matches!(
            self,
            DetectorParam::TransX | DetectorParam::TransY | DetectorParam::TransZ
        )
    }

    /// Offset added to a group serial number to form an alignment label (1..=6).
    pub fn label_offset(self) -> i64 {
        match self {
            DetectorParam::TransX => 1,
            DetectorParam::TransY => 2,
            DetectorParam::TransZ => 3,
            DetectorParam::RotX => 4,
            DetectorParam::RotY => 5,
            DetectorParam::RotZ => 6,
        }
    }

    pub fn from_label_offset(offset: i64) -> Option<Self> {
        DetectorParam::ALL
            .into_iter()
            .find(|p| p.label_offset() == offset)
    }
}

impl std::fmt::Display for DetectorParam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A detector parameter bound to the group it moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupParam {
    pub group: GroupId,
    pub param: DetectorParam,
}

/// One entry of an active parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Param {
    Crystal(CrystalParam),
    Group(GroupParam),
}

impl Param {
    pub fn is_crystal(&self) -> bool {
        matches!(self, Param::Crystal(_))
    }
}

impl From<CrystalParam> for Param {
    fn from(p: CrystalParam) -> Self {
        Param::Crystal(p)
    }
}

impl From<GroupParam> for Param {
    fn from(p: GroupParam) -> Self {
        Param::Group(p)
    }
}

impl std::fmt::Display for Param {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Param::Crystal(p) => write!(f, "{p}"),
            Param::Group(gp) => write!(f, "{}[{}]", gp.param, gp.group),
        }
    }
}
