//! Joint models: type, parameterization, and local transforms.

use nalgebra::{Isometry3, Translation3, Unit, UnitQuaternion, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// User-chosen identifier of a joint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct JointId(pub i32);

/// Joint kinds supported by the tree.
///
/// Parameter layout per kind:
/// - `Fixed`: none
/// - `Revolute`/`Prismatic`: one scalar
/// - `Spherical`: unit quaternion `[w, x, y, z]`, 3 velocity dofs expressed
///   in the successor frame
/// - `Free`: unit quaternion `[w, x, y, z]` then translation `[x, y, z]`,
///   6 velocity dofs `(ω, v)` expressed in the successor frame
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum JointType {
    Fixed,
    Revolute(Unit<Vector3<f64>>),
    Prismatic(Unit<Vector3<f64>>),
    Spherical,
    Free,
}

/// A joint in the kinematic tree.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Joint {
    /// Stable identifier.
    pub id: JointId,
    /// Human-readable name (diagnostics only).
    pub name: String,
    /// Kind and axis.
    pub joint_type: JointType,
}

impl Joint {
    pub fn new(id: JointId, name: impl Into<String>, joint_type: JointType) -> Self {
        Self {
            id,
            name: name.into(),
            joint_type,
        }
    }

    /// Revolute joint about `axis` (axis is normalized).
    pub fn revolute(id: JointId, name: impl Into<String>, axis: Vector3<f64>) -> Self {
        Self::new(id, name, JointType::Revolute(Unit::new_normalize(axis)))
    }

    /// Prismatic joint along `axis` (axis is normalized).
    pub fn prismatic(id: JointId, name: impl Into<String>, axis: Vector3<f64>) -> Self {
        Self::new(id, name, JointType::Prismatic(Unit::new_normalize(axis)))
    }

    pub fn fixed(id: JointId, name: impl Into<String>) -> Self {
        Self::new(id, name, JointType::Fixed)
    }

    pub fn spherical(id: JointId, name: impl Into<String>) -> Self {
        Self::new(id, name, JointType::Spherical)
    }

    pub fn free(id: JointId, name: impl Into<String>) -> Self {
        Self::new(id, name, JointType::Free)
    }

    /// Number of velocity degrees of freedom.
    pub fn dof(&self) -> usize {
        match self.joint_type {
            JointType::Fixed => 0,
            JointType::Revolute(_) | JointType::Prismatic(_) => 1,
            JointType::Spherical => 3,
            JointType::Free => 6,
        }
    }

    /// Number of position parameters.
    pub fn nr_params(&self) -> usize {
        match self.joint_type {
            JointType::Fixed => 0,
            JointType::Revolute(_) | JointType::Prismatic(_) => 1,
            JointType::Spherical => 4,
            JointType::Free => 7,
        }
    }

    /// Identity (zero) position parameters for this joint.
    pub fn zero_params(&self) -> Vec<f64> {
        match self.joint_type {
            JointType::Fixed => vec![],
            JointType::Revolute(_) | JointType::Prismatic(_) => vec![0.0],
            JointType::Spherical => vec![1.0, 0.0, 0.0, 0.0],
            JointType::Free => vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        }
    }

    /// Local transform from the joint frame to the successor body frame.
    ///
    /// `q` must hold exactly [`nr_params`](Self::nr_params) values.
    pub fn pose(&self, q: &[f64]) -> Isometry3<f64> {
        debug_assert_eq!(q.len(), self.nr_params());
        match &self.joint_type {
            JointType::Fixed => Isometry3::identity(),
            JointType::Revolute(axis) => {
                Isometry3::from_parts(Translation3::identity(), UnitQuaternion::from_axis_angle(axis, q[0]))
            }
            JointType::Prismatic(axis) => Isometry3::from_parts(
                Translation3::from(axis.into_inner() * q[0]),
                UnitQuaternion::identity(),
            ),
            JointType::Spherical => {
                Isometry3::from_parts(Translation3::identity(), param_quat(q))
            }
            JointType::Free => Isometry3::from_parts(
                Translation3::new(q[4], q[5], q[6]),
                param_quat(q),
            ),
        }
    }

    /// Advance the position parameters by `alpha * dt` (exponential map on
    /// the rotational parts). `alpha` holds [`dof`](Self::dof) values in the
    /// successor frame.
    pub fn integrate(&self, q: &mut [f64], alpha: &[f64], dt: f64) {
        debug_assert_eq!(q.len(), self.nr_params());
        debug_assert_eq!(alpha.len(), self.dof());
        match &self.joint_type {
            JointType::Fixed => {}
            JointType::Revolute(_) | JointType::Prismatic(_) => q[0] += alpha[0] * dt,
            JointType::Spherical => {
                let rot = param_quat(q)
                    * UnitQuaternion::from_scaled_axis(Vector3::new(alpha[0], alpha[1], alpha[2]) * dt);
                write_quat(q, &rot);
            }
            JointType::Free => {
                let rot = param_quat(q);
                // Linear velocity is expressed in the successor frame, so it
                // must be rotated before integrating the joint-frame position.
                let dp = rot * (Vector3::new(alpha[3], alpha[4], alpha[5]) * dt);
                q[4] += dp.x;
                q[5] += dp.y;
                q[6] += dp.z;
                let rot = rot
                    * UnitQuaternion::from_scaled_axis(Vector3::new(alpha[0], alpha[1], alpha[2]) * dt);
                write_quat(q, &rot);
            }
        }
    }
}

fn param_quat(q: &[f64]) -> UnitQuaternion<f64> {
    UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(q[0], q[1], q[2], q[3]))
}

fn write_quat(q: &mut [f64], rot: &UnitQuaternion<f64>) {
    q[0] = rot.w;
    q[1] = rot.i;
    q[2] = rot.j;
    q[3] = rot.k;
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn revolute_pose_rotates_about_axis() {
        let j = Joint::revolute(JointId(0), "hinge", Vector3::z());
        let pose = j.pose(&[FRAC_PI_2]);
        let p = pose * nalgebra::Point3::new(1.0, 0.0, 0.0);
        assert_relative_eq!(p.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(p.y, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn prismatic_pose_translates_along_axis() {
        let j = Joint::prismatic(JointId(0), "slider", Vector3::x());
        let pose = j.pose(&[0.3]);
        assert_relative_eq!(pose.translation.x, 0.3, epsilon = 1e-12);
        assert_relative_eq!(pose.translation.y, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn dof_and_params_per_type() {
        assert_eq!(Joint::fixed(JointId(0), "f").dof(), 0);
        assert_eq!(Joint::spherical(JointId(0), "s").dof(), 3);
        assert_eq!(Joint::spherical(JointId(0), "s").nr_params(), 4);
        assert_eq!(Joint::free(JointId(0), "ff").dof(), 6);
        assert_eq!(Joint::free(JointId(0), "ff").nr_params(), 7);
    }

    #[test]
    fn free_joint_integration_uses_successor_frame_velocity() {
        let j = Joint::free(JointId(0), "ff");
        // Rotate the joint 90 degrees about z, then integrate a velocity
        // along the successor x axis: the joint-frame position must move
        // along +y.
        let mut q = j.zero_params();
        let rot = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), FRAC_PI_2);
        q[0] = rot.w;
        q[1] = rot.i;
        q[2] = rot.j;
        q[3] = rot.k;

        j.integrate(&mut q, &[0.0, 0.0, 0.0, 1.0, 0.0, 0.0], 0.1);
        assert_relative_eq!(q[4], 0.0, epsilon = 1e-12);
        assert_relative_eq!(q[5], 0.1, epsilon = 1e-12);
    }

    #[test]
    fn revolute_integration_accumulates() {
        let j = Joint::revolute(JointId(0), "hinge", Vector3::z());
        let mut q = vec![0.2];
        j.integrate(&mut q, &[2.0], 0.05);
        assert_relative_eq!(q[0], 0.3, epsilon = 1e-12);
    }
}
