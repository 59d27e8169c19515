//! Center of mass position, velocity, and Jacobian.

use nalgebra::{DMatrix, Vector3};

use crate::config::MultiBodyConfig;
use crate::jacobian::Jacobian;
use crate::multibody::MultiBody;

/// World-frame center of mass of the tree.
///
/// Requires forward kinematics to be current.
pub fn compute_com(mb: &MultiBody, mbc: &MultiBodyConfig) -> Vector3<f64> {
    let mut com = Vector3::zeros();
    let mut mass = 0.0;
    for (i, body) in mb.bodies().iter().enumerate() {
        if body.mass == 0.0 {
            continue;
        }
        let com_w = (mbc.body_pos_w[i] * nalgebra::Point3::from(body.com)).coords;
        com += body.mass * com_w;
        mass += body.mass;
    }
    assert!(mass > 0.0, "center of mass of a massless tree");
    com / mass
}

/// World-frame velocity of the center of mass.
///
/// Requires forward kinematics and forward velocity to be current.
pub fn compute_com_velocity(mb: &MultiBody, mbc: &MultiBodyConfig) -> Vector3<f64> {
    let mut vel = Vector3::zeros();
    let mut mass = 0.0;
    for (i, body) in mb.bodies().iter().enumerate() {
        if body.mass == 0.0 {
            continue;
        }
        vel += body.mass * mbc.point_velocity_w(i, &body.com);
        mass += body.mass;
    }
    assert!(mass > 0.0, "center of mass of a massless tree");
    vel / mass
}

/// CoM Jacobian with optional per-body mass weights.
///
/// With unit weights this is the exact CoM Jacobian. Weights below one
/// shrink a body's influence on the Jacobian (and on the normalization),
/// which the manipulated-body tasks use to make a virtual body's
/// contribution negligible.
#[derive(Debug, Clone)]
pub struct CoMJacobian {
    weights: Vec<f64>,
    body_jacs: Vec<Jacobian>,
    jac: DMatrix<f64>,
    jac_dot: DMatrix<f64>,
}

impl CoMJacobian {
    /// Exact CoM Jacobian (unit weights).
    pub fn new(mb: &MultiBody) -> Self {
        Self::with_weights(mb, vec![1.0; mb.nr_bodies()])
    }

    /// Weighted CoM Jacobian; `weights` has one entry per body.
    pub fn with_weights(mb: &MultiBody, weights: Vec<f64>) -> Self {
        assert_eq!(weights.len(), mb.nr_bodies(), "one weight per body");
        let body_jacs = (0..mb.nr_bodies())
            .map(|i| Jacobian::from_body_index(mb, i, mb.body(i).com))
            .collect();
        Self {
            weights,
            body_jacs,
            jac: DMatrix::zeros(3, mb.nr_dof()),
            jac_dot: DMatrix::zeros(3, mb.nr_dof()),
        }
    }

    /// Compute the 3 x dof CoM Jacobian.
    pub fn jacobian(&mut self, mb: &MultiBody, mbc: &MultiBodyConfig) -> &DMatrix<f64> {
        self.jac.fill(0.0);
        let total = self.accumulate(mb, mbc, false);
        self.jac /= total;
        &self.jac
    }

    /// Compute the 3 x dof time derivative of the CoM Jacobian.
    pub fn jacobian_dot(&mut self, mb: &MultiBody, mbc: &MultiBodyConfig) -> &DMatrix<f64> {
        self.jac_dot.fill(0.0);
        let total = self.accumulate(mb, mbc, true);
        self.jac_dot /= total;
        &self.jac_dot
    }

    fn accumulate(&mut self, mb: &MultiBody, mbc: &MultiBodyConfig, dot: bool) -> f64 {
        let mut total = 0.0;
        for (i, body) in mb.bodies().iter().enumerate() {
            let w = self.weights[i] * body.mass;
            if w == 0.0 {
                continue;
            }
            total += w;
            let jac = &mut self.body_jacs[i];
            if dot {
                jac.jacobian_dot(mb, mbc);
            } else {
                jac.jacobian(mb, mbc);
            }
            let jac = &self.body_jacs[i];
            let short = if dot { jac.matrix_dot() } else { jac.matrix() };
            // Scatter the weighted linear rows into the dof-indexed matrix.
            let target = if dot { &mut self.jac_dot } else { &mut self.jac };
            let mut col = 0;
            for &j in jac.joints_path() {
                let dof = mb.joint(j).dof();
                let pos = mb.joint_pos_in_dof(j);
                for c in 0..dof {
                    for r in 0..3 {
                        target[(r, pos + c)] += w * short[(r + 3, col + c)];
                    }
                }
                col += dof;
            }
        }
        assert!(total > 0.0, "CoM Jacobian of a massless tree");
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::{Body, BodyId};
    use crate::joint::{Joint, JointId};
    use crate::kinematics::{forward_kinematics, forward_velocity};
    use approx::assert_relative_eq;
    use nalgebra::{DVector, Isometry3};

    fn planar_2r() -> (MultiBody, MultiBodyConfig) {
        let bodies = vec![
            Body::massless(BodyId(0), "base"),
            Body::point_mass(BodyId(1), "upper", 2.0, Vector3::new(0.0, 0.25, 0.0)),
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
    fn com_of_two_point_masses() {
        let (mb, mut mbc) = planar_2r();
        forward_kinematics(&mb, &mut mbc);
        let com = compute_com(&mb, &mbc);
        // 2 kg at (0, 0.25, 0) and 1 kg at (0, 0.75, 0).
        assert_relative_eq!(com.y, (2.0 * 0.25 + 1.0 * 0.75) / 3.0, epsilon = 1e-12);
        assert_relative_eq!(com.x, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn com_jacobian_matches_com_velocity() {
        let (mb, mut mbc) = planar_2r();
        mbc.q[1][0] = 0.3;
        mbc.q[2][0] = -0.7;
        mbc.alpha[1][0] = 0.6;
        mbc.alpha[2][0] = 1.1;
        forward_kinematics(&mb, &mut mbc);
        forward_velocity(&mb, &mut mbc);

        let mut jac = CoMJacobian::new(&mb);
        let j = jac.jacobian(&mb, &mbc).clone();
        let alpha = DVector::from_vec(vec![0.6, 1.1]);
        let v_jac = j * alpha;
        let v_ref = compute_com_velocity(&mb, &mbc);

        assert_relative_eq!(v_jac[0], v_ref.x, epsilon = 1e-12);
        assert_relative_eq!(v_jac[1], v_ref.y, epsilon = 1e-12);
        assert_relative_eq!(v_jac[2], v_ref.z, epsilon = 1e-12);
    }

    #[test]
    fn weighted_jacobian_discounts_a_body() {
        let (mb, mut mbc) = planar_2r();
        forward_kinematics(&mb, &mut mbc);

        // Zero weight on the distal body: only the upper link drives the CoM,
        // so the elbow column must vanish.
        let mut jac = CoMJacobian::with_weights(&mb, vec![1.0, 1.0, 0.0]);
        let j = jac.jacobian(&mb, &mbc);
        assert_relative_eq!(j.column(1).norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn com_jacobian_dot_zero_at_rest() {
        let (mb, mut mbc) = planar_2r();
        mbc.q[1][0] = 0.5;
        forward_kinematics(&mb, &mut mbc);
        forward_velocity(&mb, &mut mbc);

        let mut jac = CoMJacobian::new(&mb);
        let jd = jac.jacobian_dot(&mb, &mbc);
        assert_relative_eq!(jd.norm(), 0.0, epsilon = 1e-12);
    }
}
