//! Centroidal momentum and the centroidal momentum matrix.

use nalgebra::{DMatrix, Matrix3, Vector3, Vector6};

use crate::config::MultiBodyConfig;
use crate::jacobian::Jacobian;
use crate::multibody::MultiBody;

/// Momentum of the whole tree about `com`, expressed in the world frame.
///
/// Angular (couple) on top, linear (force) below. Requires forward
/// kinematics and forward velocity to be current.
pub fn compute_centroidal_momentum(
    mb: &MultiBody,
    mbc: &MultiBodyConfig,
    com: &Vector3<f64>,
) -> Vector6<f64> {
    let mut angular = Vector3::zeros();
    let mut linear = Vector3::zeros();
    for (i, body) in mb.bodies().iter().enumerate() {
        if body.mass == 0.0 {
            continue;
        }
        let rot = mbc.body_pos_w[i].rotation.to_rotation_matrix();
        let inertia_w = rot.matrix() * body.inertia * rot.matrix().transpose();
        let com_i = (mbc.body_pos_w[i] * nalgebra::Point3::from(body.com)).coords;
        let v_com = mbc.point_velocity_w(i, &body.com);
        let omega = mbc.body_vel_w[i].angular;

        angular += inertia_w * omega + body.mass * (com_i - com).cross(&v_com);
        linear += body.mass * v_com;
    }
    Vector6::new(angular.x, angular.y, angular.z, linear.x, linear.y, linear.z)
}

/// The 6 x dof matrix mapping generalized velocity to centroidal momentum.
#[derive(Debug, Clone)]
pub struct CentroidalMomentumMatrix {
    body_jacs: Vec<Jacobian>,
    mat: DMatrix<f64>,
    mat_dot: DMatrix<f64>,
}

impl CentroidalMomentumMatrix {
    pub fn new(mb: &MultiBody) -> Self {
        let body_jacs = (0..mb.nr_bodies())
            .map(|i| Jacobian::from_body_index(mb, i, mb.body(i).com))
            .collect();
        Self {
            body_jacs,
            mat: DMatrix::zeros(6, mb.nr_dof()),
            mat_dot: DMatrix::zeros(6, mb.nr_dof()),
        }
    }

    /// Recompute the matrix about `com`; read it back with
    /// [`matrix`](Self::matrix).
    pub fn compute(&mut self, mb: &MultiBody, mbc: &MultiBodyConfig, com: &Vector3<f64>) {
        self.mat.fill(0.0);
        for (i, body) in mb.bodies().iter().enumerate() {
            if body.mass == 0.0 {
                continue;
            }
            let rot = mbc.body_pos_w[i].rotation.to_rotation_matrix();
            let inertia_w = rot.matrix() * body.inertia * rot.matrix().transpose();
            let com_i = (mbc.body_pos_w[i] * nalgebra::Point3::from(body.com)).coords;
            let lever = skew(&(com_i - com));

            self.body_jacs[i].jacobian(mb, mbc);
            let jac = &self.body_jacs[i];
            let short = jac.matrix();
            let mut col = 0;
            for &j in jac.joints_path() {
                let dof = mb.joint(j).dof();
                let pos = mb.joint_pos_in_dof(j);
                for c in 0..dof {
                    let ang = Vector3::new(short[(0, col + c)], short[(1, col + c)], short[(2, col + c)]);
                    let lin = Vector3::new(short[(3, col + c)], short[(4, col + c)], short[(5, col + c)]);
                    let couple = inertia_w * ang + body.mass * (lever * lin);
                    let force = body.mass * lin;
                    for r in 0..3 {
                        self.mat[(r, pos + c)] += couple[r];
                        self.mat[(r + 3, pos + c)] += force[r];
                    }
                }
                col += dof;
            }
        }
    }

    /// Recompute the time derivative of the matrix; read it back with
    /// [`matrix_dot`](Self::matrix_dot). `com_vel` is the CoM velocity.
    pub fn compute_dot(
        &mut self,
        mb: &MultiBody,
        mbc: &MultiBodyConfig,
        com: &Vector3<f64>,
        com_vel: &Vector3<f64>,
    ) {
        self.mat_dot.fill(0.0);
        for (i, body) in mb.bodies().iter().enumerate() {
            if body.mass == 0.0 {
                continue;
            }
            let rot = mbc.body_pos_w[i].rotation.to_rotation_matrix();
            let inertia_w = rot.matrix() * body.inertia * rot.matrix().transpose();
            let omega = mbc.body_vel_w[i].angular;
            // d/dt (R I R^T) = [w] I_w - I_w [w]
            let omega_skew = skew(&omega);
            let inertia_w_dot = omega_skew * inertia_w - inertia_w * omega_skew;

            let com_i = (mbc.body_pos_w[i] * nalgebra::Point3::from(body.com)).coords;
            let v_com_i = mbc.point_velocity_w(i, &body.com);
            let lever = skew(&(com_i - com));
            let lever_dot = skew(&(v_com_i - com_vel));

            self.body_jacs[i].jacobian(mb, mbc);
            self.body_jacs[i].jacobian_dot(mb, mbc);
            let jac = &self.body_jacs[i];
            let short = jac.matrix();
            let short_dot = jac.matrix_dot();
            let mut col = 0;
            for &j in jac.joints_path() {
                let dof = mb.joint(j).dof();
                let pos = mb.joint_pos_in_dof(j);
                for c in 0..dof {
                    let ang = Vector3::new(short[(0, col + c)], short[(1, col + c)], short[(2, col + c)]);
                    let lin = Vector3::new(short[(3, col + c)], short[(4, col + c)], short[(5, col + c)]);
                    let ang_dot = Vector3::new(
                        short_dot[(0, col + c)],
                        short_dot[(1, col + c)],
                        short_dot[(2, col + c)],
                    );
                    let lin_dot = Vector3::new(
                        short_dot[(3, col + c)],
                        short_dot[(4, col + c)],
                        short_dot[(5, col + c)],
                    );
                    let couple = inertia_w_dot * ang
                        + inertia_w * ang_dot
                        + body.mass * (lever_dot * lin + lever * lin_dot);
                    let force = body.mass * lin_dot;
                    for r in 0..3 {
                        self.mat_dot[(r, pos + c)] += couple[r];
                        self.mat_dot[(r + 3, pos + c)] += force[r];
                    }
                }
                col += dof;
            }
        }
    }

    /// Matrix from the last [`compute`](Self::compute).
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.mat
    }

    /// Matrix from the last [`compute_dot`](Self::compute_dot).
    pub fn matrix_dot(&self) -> &DMatrix<f64> {
        &self.mat_dot
    }
}

fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}
