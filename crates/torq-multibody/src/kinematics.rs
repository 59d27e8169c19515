//! Forward kinematics and forward velocity sweeps.

use crate::config::{MultiBodyConfig, SpatialVelocity};
use crate::joint::JointType;
use crate::multibody::MultiBody;

/// Refresh `joint_pose` and `body_pos_w` from the joint parameters `q`.
pub fn forward_kinematics(mb: &MultiBody, mbc: &mut MultiBodyConfig) {
    for i in 0..mb.nr_joints() {
        mbc.joint_pose[i] = mb.joint(i).pose(&mbc.q[i]);
        let local = mb.transform(i) * mbc.joint_pose[i];
        mbc.body_pos_w[i] = match mb.predecessor(i) {
            Some(p) => mbc.body_pos_w[p] * local,
            None => local,
        };
    }
}

/// Refresh `body_vel_w` from the joint velocities `alpha`.
///
/// Requires `forward_kinematics` to be current.
pub fn forward_velocity(mb: &MultiBody, mbc: &mut MultiBodyConfig) {
    for i in 0..mb.nr_joints() {
        let origin = mbc.body_pos_w[i].translation.vector;
        let mut vel = match mb.predecessor(i) {
            Some(p) => {
                let parent = &mbc.body_vel_w[p];
                SpatialVelocity {
                    angular: parent.angular,
                    linear: parent
                        .point_velocity(&origin, &mbc.body_pos_w[p].translation.vector),
                }
            }
            None => SpatialVelocity::zero(),
        };

        let rot = mbc.body_pos_w[i].rotation;
        let alpha = &mbc.alpha[i];
        match &mb.joint(i).joint_type {
            JointType::Fixed => {}
            JointType::Revolute(axis) => {
                vel.angular += (rot * axis.into_inner()) * alpha[0];
            }
            JointType::Prismatic(axis) => {
                vel.linear += (rot * axis.into_inner()) * alpha[0];
            }
            JointType::Spherical => {
                vel.angular += rot * nalgebra::Vector3::new(alpha[0], alpha[1], alpha[2]);
            }
            JointType::Free => {
                vel.angular += rot * nalgebra::Vector3::new(alpha[0], alpha[1], alpha[2]);
                vel.linear += rot * nalgebra::Vector3::new(alpha[3], alpha[4], alpha[5]);
            }
        }

        mbc.body_vel_w[i] = vel;
    }
}
