//! Per-tick multibody state.

use nalgebra::{DVector, Isometry3, Vector3};

use crate::multibody::MultiBody;

/// World-frame spatial velocity of a body, taken at the body origin.
///
/// Angular on top, linear below, matching the Jacobian row convention.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialVelocity {
    pub angular: Vector3<f64>,
    pub linear: Vector3<f64>,
}

impl SpatialVelocity {
    pub fn zero() -> Self {
        Self {
            angular: Vector3::zeros(),
            linear: Vector3::zeros(),
        }
    }

    /// Linear velocity of a world-frame point rigidly attached to the body.
    pub fn point_velocity(&self, point_w: &Vector3<f64>, origin_w: &Vector3<f64>) -> Vector3<f64> {
        self.linear + self.angular.cross(&(point_w - origin_w))
    }
}

/// Mutable state of a [`MultiBody`]: joint coordinates and the caches
/// refreshed by [`forward_kinematics`](crate::forward_kinematics) and
/// [`forward_velocity`](crate::forward_velocity).
///
/// Per-joint vectors are indexed like the topology arrays; each inner
/// vector holds `nr_params()` (for `q`) or `dof()` (for the rest) values.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiBodyConfig {
    /// Joint position parameters.
    pub q: Vec<Vec<f64>>,
    /// Joint velocities.
    pub alpha: Vec<Vec<f64>>,
    /// Joint accelerations.
    pub alpha_d: Vec<Vec<f64>>,
    /// Joint torques.
    pub joint_torque: Vec<Vec<f64>>,

    /// World pose of each body (filled by forward kinematics).
    pub body_pos_w: Vec<Isometry3<f64>>,
    /// Local joint transform of each joint (filled by forward kinematics).
    pub joint_pose: Vec<Isometry3<f64>>,
    /// World velocity of each body (filled by forward velocity).
    pub body_vel_w: Vec<SpatialVelocity>,
}

impl MultiBodyConfig {
    /// A zeroed configuration for `mb`, caches at identity.
    pub fn new(mb: &MultiBody) -> Self {
        let n = mb.nr_joints();
        Self {
            q: mb.joints().iter().map(|j| j.zero_params()).collect(),
            alpha: mb.joints().iter().map(|j| vec![0.0; j.dof()]).collect(),
            alpha_d: mb.joints().iter().map(|j| vec![0.0; j.dof()]).collect(),
            joint_torque: mb.joints().iter().map(|j| vec![0.0; j.dof()]).collect(),
            body_pos_w: vec![Isometry3::identity(); n],
            joint_pose: vec![Isometry3::identity(); n],
            body_vel_w: vec![SpatialVelocity::zero(); n],
        }
    }

    /// Reset joint coordinates to zero (identity posture, zero motion).
    pub fn zero(&mut self, mb: &MultiBody) {
        for (i, j) in mb.joints().iter().enumerate() {
            self.q[i] = j.zero_params();
            self.alpha[i].iter_mut().for_each(|v| *v = 0.0);
            self.alpha_d[i].iter_mut().for_each(|v| *v = 0.0);
            self.joint_torque[i].iter_mut().for_each(|v| *v = 0.0);
        }
    }

    /// Linear world velocity of a point given in the frame of body `body`.
    ///
    /// Requires forward kinematics and forward velocity to be current.
    pub fn point_velocity_w(&self, body: usize, point_local: &Vector3<f64>) -> Vector3<f64> {
        let pose = &self.body_pos_w[body];
        let point_w = pose * nalgebra::Point3::from(*point_local);
        self.body_vel_w[body]
            .point_velocity(&point_w.coords, &pose.translation.vector)
    }
}

/// Scatter a dof-indexed vector into per-joint lists (velocities,
/// accelerations, or torques). Accepts any contiguous or view storage.
pub fn vector_to_param<S>(mb: &MultiBody, vec: &nalgebra::Vector<f64, nalgebra::Dyn, S>, out: &mut [Vec<f64>])
where
    S: nalgebra::storage::Storage<f64, nalgebra::Dyn>,
{
    debug_assert_eq!(vec.len(), mb.nr_dof());
    debug_assert_eq!(out.len(), mb.nr_joints());
    for (i, joint) in mb.joints().iter().enumerate() {
        let pos = mb.joint_pos_in_dof(i);
        for d in 0..joint.dof() {
            out[i][d] = vec[pos + d];
        }
    }
}

/// Gather per-joint lists into a dof-indexed vector.
pub fn param_to_vector(mb: &MultiBody, param: &[Vec<f64>], out: &mut DVector<f64>) {
    debug_assert_eq!(out.len(), mb.nr_dof());
    debug_assert_eq!(param.len(), mb.nr_joints());
    for (i, joint) in mb.joints().iter().enumerate() {
        let pos = mb.joint_pos_in_dof(i);
        for d in 0..joint.dof() {
            out[pos + d] = param[i][d];
        }
    }
}
