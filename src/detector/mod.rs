//! # Detector geometry
//!
//! Panels and the tree of rigid panel groups they belong to.
//!
//! ## Overview
//! -----------------
//! A [`Panel`] is a flat pixel array placed in the laboratory frame by three vectors in
//! pixel units: the corner `cn` (position of pixel `(0, 0)`), and the fast-scan and slow-scan
//! steps `fsv`, `ssv`. Multiplying by the pixel pitch gives metres.
//!
//! Panels are organised in a hierarchy of [`PanelGroup`]s stored in an arena inside
//! [`DetectorGeometry`]. Each group knows its parent by [`GroupId`] (a non-owning back
//! reference) and lists its children, so walking from a leaf group up to the root never needs
//! shared ownership. Every panel belongs to exactly one group, usually a leaf holding only that
//! panel; a group "contains" a panel when it is that panel's group or one of its ancestors.
//!
//! ## Serial numbers
//! -----------------
//! Groups carry a hierarchy level (root = 0) and a serial number used to build alignment
//! labels: the root has serial 0 and child `i` (0-based) of a level-`L` group gets
//! `parent.serial + (i + 1)·100^(L+1)`. See [`hierarchy`] for the operations built on it.
//!
//! ## See also
//! ------------
//! * [`crate::alignment::alignment_label`] – label construction from serial numbers.
//! * [`crate::refinement::update`] – pose increments applied to groups.
pub mod hierarchy;

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::{
    constants::{Meter, Pixel, MAX_GROUP_CHILDREN, SERIAL_BASE},
    snapfit_errors::SnapfitError,
};

/// Index of a group inside a [`DetectorGeometry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(pub(crate) usize);

impl GroupId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One flat detector panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Panel {
    pub name: String,
    /// Position of pixel `(0, 0)`, in pixel units.
    pub cn: Vector3<f64>,
    /// Lab-frame step for one pixel along the fast-scan direction.
    pub fsv: Vector3<f64>,
    /// Lab-frame step for one pixel along the slow-scan direction.
    pub ssv: Vector3<f64>,
    /// Pixel size in metres.
    pub pixel_pitch: Meter,
    pub width: usize,
    pub height: usize,
    /// Innermost group containing this panel.
    pub group: GroupId,
}

impl Panel {
    /// Matrix `[fsv | ssv | cn]` mapping `(fs, ss, 1)` to a pixel-unit lab position.
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::from_columns(&[self.fsv, self.ssv, self.cn])
    }

    /// Lab position (metres) of a detector coordinate on this panel.
    pub fn lab_position(&self, fs: Pixel, ss: Pixel) -> Vector3<Meter> {
        (self.cn + self.fsv * fs + self.ssv * ss) * self.pixel_pitch
    }

    /// Lab position (metres) of the panel centre.
    pub fn center(&self) -> Vector3<Meter> {
        self.lab_position(self.width as f64 / 2.0, self.height as f64 / 2.0)
    }

    pub fn contains(&self, fs: Pixel, ss: Pixel) -> bool {
        fs >= 0.0 && ss >= 0.0 && fs < self.width as f64 && ss < self.height as f64
    }
}

/// A rigid group of panels sharing one pose relative to its parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelGroup {
    pub name: String,
    pub(crate) parent: Option<GroupId>,
    pub(crate) children: Vec<GroupId>,
    pub(crate) hierarchy_level: u32,
    pub(crate) serial: i64,
    /// Accumulated translation applied by refinement, in metres.
    pub total_shift: Vector3<Meter>,
    /// Accumulated rotation angles about the lab x, y, z axes, in radians.
    pub total_rotation: Vector3<f64>,
}

impl PanelGroup {
    pub fn parent(&self) -> Option<GroupId> {
        self.parent
    }

    pub fn children(&self) -> &[GroupId] {
        &self.children
    }

    pub fn hierarchy_level(&self) -> u32 {
        self.hierarchy_level
    }

    pub fn serial(&self) -> i64 {
        self.serial
    }
}

/// Panels plus their group hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorGeometry {
    panels: Vec<Panel>,
    groups: Vec<PanelGroup>,
}

impl DetectorGeometry {
    /// Create an empty detector with a single root group.
    pub fn new(root_name: &str) -> Self {
        DetectorGeometry {
            panels: Vec::new(),
            groups: vec![PanelGroup {
                name: root_name.to_string(),
                parent: None,
                children: Vec::new(),
                hierarchy_level: 0,
                serial: 0,
                total_shift: Vector3::zeros(),
                total_rotation: Vector3::zeros(),
            }],
        }
    }

    pub fn root(&self) -> GroupId {
        GroupId(0)
    }

    /// Add a child group under `parent`.
    ///
    /// Return
    /// ----------
    /// * `Err(SnapfitError::TooManyChildren)` when `parent` already has
    ///   [`MAX_GROUP_CHILDREN`] children (the serial numbering would overflow).
    /// * `Err(SnapfitError::HierarchyTooDeep)` when the serial number of the new group does
    ///   not fit in an `i64`.
    pub fn add_group(&mut self, name: &str, parent: GroupId) -> Result<GroupId, SnapfitError> {
        let parent_group = self.group(parent)?;
        if parent_group.children.len() >= MAX_GROUP_CHILDREN {
            return Err(SnapfitError::TooManyChildren(parent_group.name.clone()));
        }

        let level = parent_group.hierarchy_level + 1;
        let child_index = parent_group.children.len() as i64;
        let serial = SERIAL_BASE
            .checked_pow(level)
            .and_then(|base| base.checked_mul(child_index + 1))
            .and_then(|offset| offset.checked_add(parent_group.serial))
            .ok_or_else(|| SnapfitError::HierarchyTooDeep(name.to_string()))?;

        let id = GroupId(self.groups.len());
        self.groups.push(PanelGroup {
            name: name.to_string(),
            parent: Some(parent),
            children: Vec::new(),
            hierarchy_level: level,
            serial,
            total_shift: Vector3::zeros(),
            total_rotation: Vector3::zeros(),
        });
        self.groups[parent.0].children.push(id);
        Ok(id)
    }

    /// Add a panel; its `group` must already exist. Returns the panel index.
    pub fn add_panel(&mut self, panel: Panel) -> Result<usize, SnapfitError> {
        self.group(panel.group)?;
        self.panels.push(panel);
        Ok(self.panels.len() - 1)
    }

    pub fn panels(&self) -> &[Panel] {
        &self.panels
    }

    pub fn panel(&self, index: usize) -> Result<&Panel, SnapfitError> {
        self.panels
            .get(index)
            .ok_or(SnapfitError::UnknownPanel(index))
    }

    pub(crate) fn panels_mut(&mut self) -> &mut [Panel] {
        &mut self.panels
    }

    pub fn groups(&self) -> &[PanelGroup] {
        &self.groups
    }

    pub fn group(&self, id: GroupId) -> Result<&PanelGroup, SnapfitError> {
        self.groups
            .get(id.0)
            .ok_or_else(|| SnapfitError::UnknownGroup(id.to_string()))
    }

    pub(crate) fn group_mut(&mut self, id: GroupId) -> Result<&mut PanelGroup, SnapfitError> {
        self.groups
            .get_mut(id.0)
            .ok_or_else(|| SnapfitError::UnknownGroup(id.to_string()))
    }

    pub fn find_group(&self, name: &str) -> Option<GroupId> {
        self.groups.iter().position(|g| g.name == name).map(GroupId)
    }

    /// Inverse panel matrices, indexed like [`DetectorGeometry::panels`].
    pub fn panel_inverses(&self) -> Result<Vec<Matrix3<f64>>, SnapfitError> {
        self.panels
            .iter()
            .enumerate()
            .map(|(i, p)| {
                p.matrix()
                    .try_inverse()
                    .ok_or(SnapfitError::SingularPanelMatrix(i))
            })
            .collect()
    }
}
