//! Walking and moving the panel-group tree.
use nalgebra::Vector3;
use smallvec::SmallVec;

use super::{DetectorGeometry, GroupId};
use crate::{
    constants::{Meter, Radian, SERIAL_BASE},
    snapfit_errors::SnapfitError,
    vector_ops::{rotate_about_axis, LabAxis},
};

/// Group chain from a group up to the root, innermost first.
pub type Ancestry = SmallVec<[GroupId; 4]>;

impl DetectorGeometry {
    /// `group` followed by all of its ancestors up to the root.
    pub fn ancestry(&self, group: GroupId) -> Result<Ancestry, SnapfitError> {
        let mut chain = Ancestry::new();
        let mut current = Some(group);
        while let Some(id) = current {
            chain.push(id);
            current = self.group(id)?.parent;
        }
        Ok(chain)
    }

    /// True when `child` sits directly below `parent`, judged from serial numbers alone.
    pub fn is_child(&self, parent: GroupId, child: GroupId) -> Result<bool, SnapfitError> {
        let p = self.group(parent)?;
        let c = self.group(child)?;
        if p.hierarchy_level + 1 != c.hierarchy_level {
            return Ok(false);
        }
        Ok(c.serial % SERIAL_BASE.pow(c.hierarchy_level) == p.serial)
    }

    /// True when the panel moves with `group` (its own group or any ancestor).
    pub fn panel_in_group(&self, panel: usize, group: GroupId) -> Result<bool, SnapfitError> {
        let leaf = self.panel(panel)?.group;
        Ok(self.ancestry(leaf)?.contains(&group))
    }

    /// Indices of every panel moving with `group`.
    pub fn group_panels(&self, group: GroupId) -> Result<Vec<usize>, SnapfitError> {
        self.group(group)?;
        let mut members = Vec::new();
        for i in 0..self.panels.len() {
            if self.panel_in_group(i, group)? {
                members.push(i);
            }
        }
        Ok(members)
    }

    /// Rotation centre of a group: mean of its panel centres, in metres.
    pub fn group_center(&self, group: GroupId) -> Result<Vector3<Meter>, SnapfitError> {
        let members = self.group_panels(group)?;
        if members.is_empty() {
            return Err(SnapfitError::EmptyGroup(self.group(group)?.name.clone()));
        }
        let sum = members
            .iter()
            .fold(Vector3::zeros(), |acc, &i| acc + self.panels[i].center());
        Ok(sum / members.len() as f64)
    }

    /// Shift every panel of `group` by `shift` (metres) and record the movement.
    pub fn translate_group(
        &mut self,
        group: GroupId,
        shift: &Vector3<Meter>,
    ) -> Result<(), SnapfitError> {
        for i in self.group_panels(group)? {
            let panel = &mut self.panels[i];
            panel.cn += shift / panel.pixel_pitch;
        }
        self.group_mut(group)?.total_shift += shift;
        Ok(())
    }

    /// Rotate every panel of `group` by `angle` about a lab axis through `center` (metres).
    ///
    /// Panel corners are rotated about the centre, fast/slow-scan vectors about the origin,
    /// so the group moves rigidly.
    pub fn rotate_group(
        &mut self,
        group: GroupId,
        axis: LabAxis,
        angle: Radian,
        center: &Vector3<Meter>,
    ) -> Result<(), SnapfitError> {
        let unit = axis.unit();
        for i in self.group_panels(group)? {
            let panel = &mut self.panels[i];
            let pivot = center / panel.pixel_pitch;
            let mut arm = panel.cn - pivot;
            rotate_about_axis(&mut arm, &unit, angle);
            panel.cn = pivot + arm;
            rotate_about_axis(&mut panel.fsv, &unit, angle);
            rotate_about_axis(&mut panel.ssv, &unit, angle);
        }

        let g = self.group_mut(group)?;
        match axis {
            LabAxis::X => g.total_rotation.x += angle,
            LabAxis::Y => g.total_rotation.y += angle,
            LabAxis::Z => g.total_rotation.z += angle,
        }
        Ok(())
    }

    /// Forget the accumulated movement of every group.
    pub fn reset_total_movements(&mut self) {
        for g in self.groups.iter_mut() {
            g.total_shift = Vector3::zeros();
            g.total_rotation = Vector3::zeros();
        }
    }
}
