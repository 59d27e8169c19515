//! Semi-implicit Euler integration of a multibody configuration.

use crate::config::MultiBodyConfig;
use crate::multibody::MultiBody;

/// Advance `mbc` by one step: velocities first (`alpha += alpha_d * step`),
/// then positions from the updated velocities, using the exponential map on
/// rotational joints.
///
/// Caches are not refreshed; call
/// [`forward_kinematics`](crate::forward_kinematics) and
/// [`forward_velocity`](crate::forward_velocity) afterwards.
pub fn euler_integration(mb: &MultiBody, mbc: &mut MultiBodyConfig, step: f64) {
    for (i, joint) in mb.joints().iter().enumerate() {
        for d in 0..joint.dof() {
            mbc.alpha[i][d] += mbc.alpha_d[i][d] * step;
        }
        joint.integrate(&mut mbc.q[i], &mbc.alpha[i], step);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::{Body, BodyId};
    use crate::joint::{Joint, JointId};
    use crate::kinematics::forward_kinematics;
    use approx::assert_relative_eq;
    use nalgebra::{Isometry3, Vector3};

    fn free_box() -> (MultiBody, MultiBodyConfig) {
        let bodies = vec![Body::point_mass(BodyId(0), "box", 1.0, Vector3::zeros())];
        let joints = vec![Joint::free(JointId(0), "root")];
        let mb = MultiBody::new(
            bodies,
            joints,
            vec![None],
            vec![0],
            vec![None],
            vec![Isometry3::identity()],
        )
        .unwrap();
        let mbc = MultiBodyConfig::new(&mb);
        (mb, mbc)
    }

    #[test]
    fn acceleration_moves_pose_after_one_step() {
        let (mb, mut mbc) = free_box();
        mbc.alpha_d[0][5] = 2.0; // z acceleration
        let step = 0.005;
        euler_integration(&mb, &mut mbc, step);

        // Semi-implicit: v = a dt, then p = v dt = a dt^2.
        assert_relative_eq!(mbc.alpha[0][5], 2.0 * step, epsilon = 1e-12);
        assert_relative_eq!(mbc.q[0][6], 2.0 * step * step, epsilon = 1e-12);

        forward_kinematics(&mb, &mut mbc);
        assert_relative_eq!(
            mbc.body_pos_w[0].translation.z,
            2.0 * step * step,
            epsilon = 1e-12
        );
    }

    #[test]
    fn zero_acceleration_zero_velocity_is_a_fixed_point() {
        let (mb, mut mbc) = free_box();
        let before = mbc.clone();
        euler_integration(&mb, &mut mbc, 0.005);
        assert_eq!(mbc, before);
    }

    #[test]
    fn angular_velocity_integrates_to_rotation() {
        let (mb, mut mbc) = free_box();
        mbc.alpha[0][2] = 1.0; // yaw rate
        euler_integration(&mb, &mut mbc, 0.1);

        let rot = nalgebra::UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(
            mbc.q[0][0],
            mbc.q[0][1],
            mbc.q[0][2],
            mbc.q[0][3],
        ));
        let angle = rot.angle();
        assert_relative_eq!(angle, 0.1, epsilon = 1e-12);
    }
}
