//! Geometric Jacobians of body-fixed points.

use nalgebra::{DMatrix, Vector3};

use crate::body::BodyId;
use crate::config::MultiBodyConfig;
use crate::error::MultibodyError;
use crate::joint::JointType;
use crate::multibody::MultiBody;

/// World-frame geometric Jacobian of a point fixed to one body.
///
/// The Jacobian has six rows (angular on top, linear below) and one column
/// per degree of freedom along the kinematic path from the root to the
/// body. [`full_jacobian`](Self::full_jacobian) scatters those columns to
/// their positions in a robot-wide dof-indexed matrix.
///
/// All matrices are owned and resized once at construction; per-tick
/// computation writes in place.
#[derive(Debug, Clone)]
pub struct Jacobian {
    body_index: usize,
    point: Vector3<f64>,
    joints_path: Vec<usize>,
    dof: usize,
    jac_mat: DMatrix<f64>,
    jac_dot_mat: DMatrix<f64>,
}

impl Jacobian {
    /// Jacobian of `point` (body-frame coordinates) on body `body_id`.
    pub fn new(
        mb: &MultiBody,
        body_id: BodyId,
        point: Vector3<f64>,
    ) -> Result<Self, MultibodyError> {
        let body_index = mb.body_index_by_id(body_id)?;
        Ok(Self::from_body_index(mb, body_index, point))
    }

    /// Same as [`new`](Self::new) from an already-resolved body index.
    pub fn from_body_index(mb: &MultiBody, body_index: usize, point: Vector3<f64>) -> Self {
        let joints_path = mb.joints_path(body_index);
        let dof = joints_path.iter().map(|&j| mb.joint(j).dof()).sum();
        Self {
            body_index,
            point,
            joints_path,
            dof,
            jac_mat: DMatrix::zeros(6, dof),
            jac_dot_mat: DMatrix::zeros(6, dof),
        }
    }

    /// Degrees of freedom along the path (columns of the short Jacobian).
    pub fn dof(&self) -> usize {
        self.dof
    }

    pub fn joints_path(&self) -> &[usize] {
        &self.joints_path
    }

    pub fn point(&self) -> &Vector3<f64> {
        &self.point
    }

    pub fn set_point(&mut self, point: Vector3<f64>) {
        self.point = point;
    }

    /// Last matrix computed by [`jacobian`](Self::jacobian).
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.jac_mat
    }

    /// Last matrix computed by [`jacobian_dot`](Self::jacobian_dot).
    pub fn matrix_dot(&self) -> &DMatrix<f64> {
        &self.jac_dot_mat
    }

    /// Compute the 6 x path-dof Jacobian at the current configuration.
    ///
    /// Requires forward kinematics to be current on `mbc`.
    pub fn jacobian(&mut self, mb: &MultiBody, mbc: &MultiBodyConfig) -> &DMatrix<f64> {
        let point_w = (mbc.body_pos_w[self.body_index]
            * nalgebra::Point3::from(self.point))
        .coords;

        let mut col = 0;
        for &j in &self.joints_path {
            let rot = mbc.body_pos_w[j].rotation;
            let origin = mbc.body_pos_w[j].translation.vector;
            match &mb.joint(j).joint_type {
                JointType::Fixed => {}
                JointType::Revolute(axis) => {
                    let a = rot * axis.into_inner();
                    set_rot_col(&mut self.jac_mat, col, &a, &(point_w - origin));
                    col += 1;
                }
                JointType::Prismatic(axis) => {
                    let a = rot * axis.into_inner();
                    set_trans_col(&mut self.jac_mat, col, &a);
                    col += 1;
                }
                JointType::Spherical => {
                    for k in 0..3 {
                        let a = rot * basis(k);
                        set_rot_col(&mut self.jac_mat, col + k, &a, &(point_w - origin));
                    }
                    col += 3;
                }
                JointType::Free => {
                    for k in 0..3 {
                        let a = rot * basis(k);
                        set_rot_col(&mut self.jac_mat, col + k, &a, &(point_w - origin));
                    }
                    for k in 0..3 {
                        let a = rot * basis(k);
                        set_trans_col(&mut self.jac_mat, col + 3 + k, &a);
                    }
                    col += 6;
                }
            }
        }
        debug_assert_eq!(col, self.dof);
        &self.jac_mat
    }

    /// Compute the time derivative of the Jacobian.
    ///
    /// Requires forward kinematics *and* forward velocity to be current.
    /// At zero generalized velocity every column is zero.
    pub fn jacobian_dot(&mut self, mb: &MultiBody, mbc: &MultiBodyConfig) -> &DMatrix<f64> {
        let pose = &mbc.body_pos_w[self.body_index];
        let point_w = (pose * nalgebra::Point3::from(self.point)).coords;
        let point_vel = mbc.body_vel_w[self.body_index]
            .point_velocity(&point_w, &pose.translation.vector);

        let mut col = 0;
        for &j in &self.joints_path {
            let rot = mbc.body_pos_w[j].rotation;
            let origin = mbc.body_pos_w[j].translation.vector;
            let omega = mbc.body_vel_w[j].angular;
            let origin_vel = mbc.body_vel_w[j].linear;
            match &mb.joint(j).joint_type {
                JointType::Fixed => {}
                JointType::Revolute(axis) => {
                    let a = rot * axis.into_inner();
                    set_rot_col_dot(
                        &mut self.jac_dot_mat,
                        col,
                        &a,
                        &omega,
                        &(point_w - origin),
                        &(point_vel - origin_vel),
                    );
                    col += 1;
                }
                JointType::Prismatic(axis) => {
                    let a = rot * axis.into_inner();
                    set_trans_col(&mut self.jac_dot_mat, col, &omega.cross(&a));
                    col += 1;
                }
                JointType::Spherical => {
                    for k in 0..3 {
                        let a = rot * basis(k);
                        set_rot_col_dot(
                            &mut self.jac_dot_mat,
                            col + k,
                            &a,
                            &omega,
                            &(point_w - origin),
                            &(point_vel - origin_vel),
                        );
                    }
                    col += 3;
                }
                JointType::Free => {
                    for k in 0..3 {
                        let a = rot * basis(k);
                        set_rot_col_dot(
                            &mut self.jac_dot_mat,
                            col + k,
                            &a,
                            &omega,
                            &(point_w - origin),
                            &(point_vel - origin_vel),
                        );
                    }
                    for k in 0..3 {
                        let a = rot * basis(k);
                        set_trans_col(&mut self.jac_dot_mat, col + 3 + k, &omega.cross(&a));
                    }
                    col += 6;
                }
            }
        }
        debug_assert_eq!(col, self.dof);
        &self.jac_dot_mat
    }

    /// Scatter the columns of a path-sized matrix into a robot-wide one.
    ///
    /// `full` must be `rows x mb.nr_dof()`; columns outside the path are
    /// zeroed.
    pub fn full_jacobian(&self, mb: &MultiBody, short: &DMatrix<f64>, full: &mut DMatrix<f64>) {
        debug_assert_eq!(short.ncols(), self.dof);
        debug_assert_eq!(full.ncols(), mb.nr_dof());
        debug_assert_eq!(full.nrows(), short.nrows());
        full.fill(0.0);
        let mut col = 0;
        for &j in &self.joints_path {
            let dof = mb.joint(j).dof();
            let pos = mb.joint_pos_in_dof(j);
            full.view_mut((0, pos), (short.nrows(), dof))
                .copy_from(&short.view((0, col), (short.nrows(), dof)));
            col += dof;
        }
    }
}

fn basis(k: usize) -> Vector3<f64> {
    let mut v = Vector3::zeros();
    v[k] = 1.0;
    v
}

fn set_rot_col(mat: &mut DMatrix<f64>, col: usize, axis: &Vector3<f64>, lever: &Vector3<f64>) {
    let lin = axis.cross(lever);
    for r in 0..3 {
        mat[(r, col)] = axis[r];
        mat[(r + 3, col)] = lin[r];
    }
}

fn set_trans_col(mat: &mut DMatrix<f64>, col: usize, axis: &Vector3<f64>) {
    for r in 0..3 {
        mat[(r, col)] = 0.0;
        mat[(r + 3, col)] = axis[r];
    }
}

fn set_rot_col_dot(
    mat: &mut DMatrix<f64>,
    col: usize,
    axis: &Vector3<f64>,
    omega: &Vector3<f64>,
    lever: &Vector3<f64>,
    lever_dot: &Vector3<f64>,
) {
    let axis_dot = omega.cross(axis);
    let lin = axis_dot.cross(lever) + axis.cross(lever_dot);
    for r in 0..3 {
        mat[(r, col)] = axis_dot[r];
        mat[(r + 3, col)] = lin[r];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::Body;
    use crate::joint::{Joint, JointId};
    use crate::kinematics::{forward_kinematics, forward_velocity};
    use approx::assert_relative_eq;
    use nalgebra::Isometry3;

    fn planar_2r() -> (MultiBody, MultiBodyConfig) {
        let bodies = vec![
            Body::massless(BodyId(0), "base"),
            Body::point_mass(BodyId(1), "upper", 1.0, Vector3::new(0.0, 0.25, 0.0)),
            Body::point_mass(BodyId(2), "lower", 1.0, Vector3::new(0.0, 0.25, 0.0)),
        ];
        let joints = vec![
            Joint::fixed(JointId(0), "root"),
            Joint::revolute(JointId(1), "shoulder", Vector3::z()),
            Joint::revolute(JointId(2), "elbow", Vector3::z()),
        ];
        let pred = vec![None, Some(0), Some(1)];
        let succ = vec![0, 1, 2];
        let parent = pred.clone();
        let transforms = vec![
            Isometry3::identity(),
            Isometry3::identity(),
            Isometry3::translation(0.0, 0.5, 0.0),
        ];
        let mb = MultiBody::new(bodies, joints, pred, succ, parent, transforms).unwrap();
        let mbc = MultiBodyConfig::new(&mb);
        (mb, mbc)
    }

    #[test]
    fn planar_arm_tip_jacobian() {
        let (mb, mut mbc) = planar_2r();
        forward_kinematics(&mb, &mut mbc);

        let mut jac = Jacobian::new(&mb, BodyId(2), Vector3::new(0.0, 0.5, 0.0)).unwrap();
        assert_eq!(jac.dof(), 2);
        let j = jac.jacobian(&mb, &mbc);

        // Tip at (0, 1, 0). Shoulder column: z x (0,1,0) = (-1, 0, 0).
        assert_relative_eq!(j[(3, 0)], -1.0, epsilon = 1e-12);
        assert_relative_eq!(j[(4, 0)], 0.0, epsilon = 1e-12);
        // Elbow column: z x (0,0.5,0) = (-0.5, 0, 0).
        assert_relative_eq!(j[(3, 1)], -0.5, epsilon = 1e-12);
        // Angular rows carry the joint axes.
        assert_relative_eq!(j[(2, 0)], 1.0, epsilon = 1e-12);
        assert_relative_eq!(j[(2, 1)], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn jacobian_times_alpha_matches_forward_velocity() {
        let (mb, mut mbc) = planar_2r();
        mbc.alpha[1][0] = 0.7;
        mbc.alpha[2][0] = -0.3;
        mbc.q[1][0] = 0.4;
        mbc.q[2][0] = -0.9;
        forward_kinematics(&mb, &mut mbc);
        forward_velocity(&mb, &mut mbc);

        let point = Vector3::new(0.0, 0.5, 0.0);
        let mut jac = Jacobian::new(&mb, BodyId(2), point).unwrap();
        let j = jac.jacobian(&mb, &mbc).clone();
        let alpha = nalgebra::DVector::from_vec(vec![0.7, -0.3]);
        let vel6 = j * alpha;

        let v_ref = mbc.point_velocity_w(2, &point);
        assert_relative_eq!(vel6[3], v_ref.x, epsilon = 1e-12);
        assert_relative_eq!(vel6[4], v_ref.y, epsilon = 1e-12);
        assert_relative_eq!(vel6[5], v_ref.z, epsilon = 1e-12);
    }

    #[test]
    fn jacobian_dot_zero_at_rest() {
        let (mb, mut mbc) = planar_2r();
        mbc.q[1][0] = 0.3;
        forward_kinematics(&mb, &mut mbc);
        forward_velocity(&mb, &mut mbc);

        let mut jac = Jacobian::new(&mb, BodyId(2), Vector3::zeros()).unwrap();
        let jd = jac.jacobian_dot(&mb, &mbc);
        assert_relative_eq!(jd.norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn jacobian_dot_matches_finite_difference() {
        let (mb, mut mbc) = planar_2r();
        mbc.q[1][0] = 0.4;
        mbc.q[2][0] = -0.2;
        mbc.alpha[1][0] = 0.9;
        mbc.alpha[2][0] = 0.5;
        forward_kinematics(&mb, &mut mbc);
        forward_velocity(&mb, &mut mbc);

        let point = Vector3::new(0.0, 0.5, 0.0);
        let mut jac = Jacobian::new(&mb, BodyId(2), point).unwrap();
        let jd = jac.jacobian_dot(&mb, &mbc).clone();

        // Finite difference: step q along alpha and re-evaluate J.
        let h = 1e-6;
        let j0 = jac.jacobian(&mb, &mbc).clone();
        let mut mbc2 = mbc.clone();
        mbc2.q[1][0] += h * mbc.alpha[1][0];
        mbc2.q[2][0] += h * mbc.alpha[2][0];
        forward_kinematics(&mb, &mut mbc2);
        let j1 = jac.jacobian(&mb, &mbc2).clone();

        let fd = (j1 - j0) / h;
        assert_relative_eq!((jd - fd).norm(), 0.0, epsilon = 1e-5);
    }

    #[test]
    fn full_jacobian_scatters_path_columns() {
        let (mb, mut mbc) = planar_2r();
        forward_kinematics(&mb, &mut mbc);

        // Jacobian of the first link only: one path dof, scattered to col 0.
        let mut jac = Jacobian::new(&mb, BodyId(1), Vector3::zeros()).unwrap();
        assert_eq!(jac.dof(), 1);
        let short = jac.jacobian(&mb, &mbc).clone();
        let mut full = DMatrix::zeros(6, mb.nr_dof());
        jac.full_jacobian(&mb, &short, &mut full);
        assert_relative_eq!(full[(2, 0)], 1.0, epsilon = 1e-12);
        assert_relative_eq!(full.column(1).norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn unknown_body_is_an_error() {
        let (mb, _) = planar_2r();
        assert!(Jacobian::new(&mb, BodyId(42), Vector3::zeros()).is_err());
    }
}
