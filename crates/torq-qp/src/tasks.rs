//! Kinematic tasks: residuals and Jacobians over the robot's accelerations.
//!
//! Each task tracks some function of the configuration (a body point, an
//! orientation, the CoM, ...) and exposes, after `update`, a residual
//! `eval`, its Jacobian, and after `update_dot` the Jacobian's time
//! derivative. The QP layer wraps these into quadratic objectives
//! (see [`SetPointTask`](crate::SetPointTask)).

use nalgebra::{DMatrix, DVector, UnitQuaternion, Vector3, Vector6};
use torq_multibody::{
    compute_centroidal_momentum, compute_com, compute_com_velocity, rotation_error, BodyId,
    CentroidalMomentumMatrix, CoMJacobian, Jacobian, JointId, JointType, MultiBody,
    MultiBodyConfig, MultibodyError,
};

/// Residual regularization used by every rotation-error evaluation.
pub(crate) const ROT_ERROR_EPS: f64 = 1e-7;

/// Common surface of all kinematic tasks.
///
/// `update` must be called once per tick after the kinematic caches are
/// refreshed; `update_dot` additionally refreshes the Jacobian derivative.
pub trait KinematicTask {
    fn update(&mut self, mb: &MultiBody, mbc: &MultiBodyConfig);
    fn update_dot(&mut self, mb: &MultiBody, mbc: &MultiBodyConfig);

    /// Task residual (desired minus current).
    fn eval(&self) -> &DVector<f64>;
    /// Task Jacobian, one column per robot dof.
    fn jac(&self) -> &DMatrix<f64>;
    /// Time derivative of the Jacobian (valid after `update_dot`).
    fn jac_dot(&self) -> &DMatrix<f64>;
}

// ---------------------------------------------------------------------------
// PositionTask
// ---------------------------------------------------------------------------

/// Drive a body-fixed point toward a world position.
#[derive(Debug, Clone)]
pub struct PositionTask {
    pos: Vector3<f64>,
    body_index: usize,
    jac: Jacobian,
    eval: DVector<f64>,
    short: DMatrix<f64>,
    jac_mat: DMatrix<f64>,
    jac_dot_mat: DMatrix<f64>,
}

impl PositionTask {
    pub fn new(
        mb: &MultiBody,
        body_id: BodyId,
        pos: Vector3<f64>,
        body_point: Vector3<f64>,
    ) -> Result<Self, MultibodyError> {
        let body_index = mb.body_index_by_id(body_id)?;
        let jac = Jacobian::new(mb, body_id, body_point)?;
        let dof = jac.dof();
        Ok(Self {
            pos,
            body_index,
            jac,
            eval: DVector::zeros(3),
            short: DMatrix::zeros(3, dof),
            jac_mat: DMatrix::zeros(3, mb.nr_dof()),
            jac_dot_mat: DMatrix::zeros(3, mb.nr_dof()),
        })
    }

    pub fn position(&self) -> &Vector3<f64> {
        &self.pos
    }

    pub fn set_position(&mut self, pos: Vector3<f64>) {
        self.pos = pos;
    }

    pub fn body_point(&self) -> &Vector3<f64> {
        self.jac.point()
    }

    pub fn set_body_point(&mut self, point: Vector3<f64>) {
        self.jac.set_point(point);
    }
}

impl KinematicTask for PositionTask {
    fn update(&mut self, mb: &MultiBody, mbc: &MultiBodyConfig) {
        let point_w =
            mbc.body_pos_w[self.body_index] * nalgebra::Point3::from(*self.jac.point());
        self.eval[0] = self.pos.x - point_w.x;
        self.eval[1] = self.pos.y - point_w.y;
        self.eval[2] = self.pos.z - point_w.z;

        self.jac.jacobian(mb, mbc);
        self.short.copy_from(&self.jac.matrix().rows(3, 3));
        self.jac.full_jacobian(mb, &self.short, &mut self.jac_mat);
    }

    fn update_dot(&mut self, mb: &MultiBody, mbc: &MultiBodyConfig) {
        self.jac.jacobian_dot(mb, mbc);
        self.short.copy_from(&self.jac.matrix_dot().rows(3, 3));
        self.jac.full_jacobian(mb, &self.short, &mut self.jac_dot_mat);
    }

    fn eval(&self) -> &DVector<f64> {
        &self.eval
    }

    fn jac(&self) -> &DMatrix<f64> {
        &self.jac_mat
    }

    fn jac_dot(&self) -> &DMatrix<f64> {
        &self.jac_dot_mat
    }
}

// ---------------------------------------------------------------------------
// OrientationTask
// ---------------------------------------------------------------------------

/// Drive a body's orientation toward a world orientation.
#[derive(Debug, Clone)]
pub struct OrientationTask {
    ori: UnitQuaternion<f64>,
    body_index: usize,
    jac: Jacobian,
    eval: DVector<f64>,
    short: DMatrix<f64>,
    jac_mat: DMatrix<f64>,
    jac_dot_mat: DMatrix<f64>,
}

impl OrientationTask {
    pub fn new(
        mb: &MultiBody,
        body_id: BodyId,
        ori: UnitQuaternion<f64>,
    ) -> Result<Self, MultibodyError> {
        let body_index = mb.body_index_by_id(body_id)?;
        let jac = Jacobian::new(mb, body_id, Vector3::zeros())?;
        let dof = jac.dof();
        Ok(Self {
            ori,
            body_index,
            jac,
            eval: DVector::zeros(3),
            short: DMatrix::zeros(3, dof),
            jac_mat: DMatrix::zeros(3, mb.nr_dof()),
            jac_dot_mat: DMatrix::zeros(3, mb.nr_dof()),
        })
    }

    pub fn orientation(&self) -> &UnitQuaternion<f64> {
        &self.ori
    }

    pub fn set_orientation(&mut self, ori: UnitQuaternion<f64>) {
        self.ori = ori;
    }
}

impl KinematicTask for OrientationTask {
    fn update(&mut self, mb: &MultiBody, mbc: &MultiBodyConfig) {
        let err = rotation_error(
            &mbc.body_pos_w[self.body_index].rotation,
            &self.ori,
            ROT_ERROR_EPS,
        );
        self.eval[0] = err.x;
        self.eval[1] = err.y;
        self.eval[2] = err.z;

        self.jac.jacobian(mb, mbc);
        self.short.copy_from(&self.jac.matrix().rows(0, 3));
        self.jac.full_jacobian(mb, &self.short, &mut self.jac_mat);
    }

    fn update_dot(&mut self, mb: &MultiBody, mbc: &MultiBodyConfig) {
        self.jac.jacobian_dot(mb, mbc);
        self.short.copy_from(&self.jac.matrix_dot().rows(0, 3));
        self.jac.full_jacobian(mb, &self.short, &mut self.jac_dot_mat);
    }

    fn eval(&self) -> &DVector<f64> {
        &self.eval
    }

    fn jac(&self) -> &DMatrix<f64> {
        &self.jac_mat
    }

    fn jac_dot(&self) -> &DMatrix<f64> {
        &self.jac_dot_mat
    }
}

// ---------------------------------------------------------------------------
// PostureTask
// ---------------------------------------------------------------------------

/// Hold a reference posture on every joint but the root.
///
/// One-dof joints contribute a scalar error, spherical joints a rotation
/// error, fixed joints nothing. The Jacobian is the identity with the root
/// joint's rows and columns zeroed, so a free-flyer base is never fought.
#[derive(Debug, Clone)]
pub struct PostureTask {
    q_des: Vec<Vec<f64>>,
    eval: DVector<f64>,
    jac_mat: DMatrix<f64>,
    jac_dot_mat: DMatrix<f64>,
}

impl PostureTask {
    pub fn new(mb: &MultiBody, q_des: Vec<Vec<f64>>) -> Self {
        assert_eq!(q_des.len(), mb.nr_joints(), "one parameter list per joint");
        let dof = mb.nr_dof();
        let mut jac_mat = DMatrix::identity(dof, dof);
        if mb.nr_dof() > 0 {
            let root_dof = mb.joint(0).dof();
            for i in 0..root_dof {
                jac_mat[(i, i)] = 0.0;
            }
        }
        Self {
            q_des,
            eval: DVector::zeros(dof),
            jac_mat,
            jac_dot_mat: DMatrix::zeros(dof, dof),
        }
    }

    pub fn posture(&self) -> &[Vec<f64>] {
        &self.q_des
    }

    pub fn set_posture(&mut self, q_des: Vec<Vec<f64>>) {
        self.q_des = q_des;
    }
}

impl KinematicTask for PostureTask {
    fn update(&mut self, mb: &MultiBody, mbc: &MultiBodyConfig) {
        self.eval.fill(0.0);
        // Root joint (free flyer or fixed base) is skipped.
        for i in 1..mb.nr_joints() {
            let pos = mb.joint_pos_in_dof(i);
            match mb.joint(i).joint_type {
                JointType::Revolute(_) | JointType::Prismatic(_) => {
                    self.eval[pos] = self.q_des[i][0] - mbc.q[i][0];
                }
                JointType::Spherical => {
                    let des = UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(
                        self.q_des[i][0],
                        self.q_des[i][1],
                        self.q_des[i][2],
                        self.q_des[i][3],
                    ));
                    let err =
                        rotation_error(&mbc.joint_pose[i].rotation, &des, ROT_ERROR_EPS);
                    self.eval[pos] = err.x;
                    self.eval[pos + 1] = err.y;
                    self.eval[pos + 2] = err.z;
                }
                JointType::Fixed | JointType::Free => {}
            }
        }
    }

    fn update_dot(&mut self, _mb: &MultiBody, _mbc: &MultiBodyConfig) {}

    fn eval(&self) -> &DVector<f64> {
        &self.eval
    }

    fn jac(&self) -> &DMatrix<f64> {
        &self.jac_mat
    }

    fn jac_dot(&self) -> &DMatrix<f64> {
        &self.jac_dot_mat
    }
}

// ---------------------------------------------------------------------------
// CoMTask
// ---------------------------------------------------------------------------

/// Drive the center of mass toward a world position.
#[derive(Debug, Clone)]
pub struct CoMTask {
    com_des: Vector3<f64>,
    jac: CoMJacobian,
    eval: DVector<f64>,
    jac_mat: DMatrix<f64>,
    jac_dot_mat: DMatrix<f64>,
}

impl CoMTask {
    pub fn new(mb: &MultiBody, com_des: Vector3<f64>) -> Self {
        Self {
            com_des,
            jac: CoMJacobian::new(mb),
            eval: DVector::zeros(3),
            jac_mat: DMatrix::zeros(3, mb.nr_dof()),
            jac_dot_mat: DMatrix::zeros(3, mb.nr_dof()),
        }
    }

    pub fn com(&self) -> &Vector3<f64> {
        &self.com_des
    }

    pub fn set_com(&mut self, com: Vector3<f64>) {
        self.com_des = com;
    }
}

impl KinematicTask for CoMTask {
    fn update(&mut self, mb: &MultiBody, mbc: &MultiBodyConfig) {
        let com = compute_com(mb, mbc);
        self.eval[0] = self.com_des.x - com.x;
        self.eval[1] = self.com_des.y - com.y;
        self.eval[2] = self.com_des.z - com.z;
        self.jac_mat.copy_from(self.jac.jacobian(mb, mbc));
    }

    fn update_dot(&mut self, mb: &MultiBody, mbc: &MultiBodyConfig) {
        self.jac_dot_mat.copy_from(self.jac.jacobian_dot(mb, mbc));
    }

    fn eval(&self) -> &DVector<f64> {
        &self.eval
    }

    fn jac(&self) -> &DMatrix<f64> {
        &self.jac_mat
    }

    fn jac_dot(&self) -> &DMatrix<f64> {
        &self.jac_dot_mat
    }
}

// ---------------------------------------------------------------------------
// MomentumTask
// ---------------------------------------------------------------------------

/// Track a centroidal momentum reference (couple on top, force below).
#[derive(Debug, Clone)]
pub struct MomentumTask {
    momentum_des: Vector6<f64>,
    matrix: CentroidalMomentumMatrix,
    eval: DVector<f64>,
    jac_mat: DMatrix<f64>,
    jac_dot_mat: DMatrix<f64>,
}

impl MomentumTask {
    pub fn new(mb: &MultiBody, momentum_des: Vector6<f64>) -> Self {
        Self {
            momentum_des,
            matrix: CentroidalMomentumMatrix::new(mb),
            eval: DVector::zeros(6),
            jac_mat: DMatrix::zeros(6, mb.nr_dof()),
            jac_dot_mat: DMatrix::zeros(6, mb.nr_dof()),
        }
    }

    pub fn momentum(&self) -> &Vector6<f64> {
        &self.momentum_des
    }

    pub fn set_momentum(&mut self, momentum: Vector6<f64>) {
        self.momentum_des = momentum;
    }
}

impl KinematicTask for MomentumTask {
    fn update(&mut self, mb: &MultiBody, mbc: &MultiBodyConfig) {
        let com = compute_com(mb, mbc);
        let h = compute_centroidal_momentum(mb, mbc, &com);
        for r in 0..6 {
            self.eval[r] = self.momentum_des[r] - h[r];
        }
        self.matrix.compute(mb, mbc, &com);
        self.jac_mat.copy_from(self.matrix.matrix());
    }

    fn update_dot(&mut self, mb: &MultiBody, mbc: &MultiBodyConfig) {
        let com = compute_com(mb, mbc);
        let com_vel = compute_com_velocity(mb, mbc);
        self.matrix.compute_dot(mb, mbc, &com, &com_vel);
        self.jac_dot_mat.copy_from(self.matrix.matrix_dot());
    }

    fn eval(&self) -> &DVector<f64> {
        &self.eval
    }

    fn jac(&self) -> &DMatrix<f64> {
        &self.jac_mat
    }

    fn jac_dot(&self) -> &DMatrix<f64> {
        &self.jac_dot_mat
    }
}

// ---------------------------------------------------------------------------
// LinVelocityTask
// ---------------------------------------------------------------------------

/// Track a world-frame linear velocity of a body-fixed point.
#[derive(Debug, Clone)]
pub struct LinVelocityTask {
    vel_des: Vector3<f64>,
    body_index: usize,
    jac: Jacobian,
    eval: DVector<f64>,
    short: DMatrix<f64>,
    jac_mat: DMatrix<f64>,
    jac_dot_mat: DMatrix<f64>,
}

impl LinVelocityTask {
    pub fn new(
        mb: &MultiBody,
        body_id: BodyId,
        vel_des: Vector3<f64>,
        body_point: Vector3<f64>,
    ) -> Result<Self, MultibodyError> {
        let body_index = mb.body_index_by_id(body_id)?;
        let jac = Jacobian::new(mb, body_id, body_point)?;
        let dof = jac.dof();
        Ok(Self {
            vel_des,
            body_index,
            jac,
            eval: DVector::zeros(3),
            short: DMatrix::zeros(3, dof),
            jac_mat: DMatrix::zeros(3, mb.nr_dof()),
            jac_dot_mat: DMatrix::zeros(3, mb.nr_dof()),
        })
    }

    pub fn velocity(&self) -> &Vector3<f64> {
        &self.vel_des
    }

    pub fn set_velocity(&mut self, vel: Vector3<f64>) {
        self.vel_des = vel;
    }

    pub fn body_point(&self) -> &Vector3<f64> {
        self.jac.point()
    }

    pub fn set_body_point(&mut self, point: Vector3<f64>) {
        self.jac.set_point(point);
    }
}

impl KinematicTask for LinVelocityTask {
    fn update(&mut self, mb: &MultiBody, mbc: &MultiBodyConfig) {
        let vel = mbc.point_velocity_w(self.body_index, self.jac.point());
        self.eval[0] = self.vel_des.x - vel.x;
        self.eval[1] = self.vel_des.y - vel.y;
        self.eval[2] = self.vel_des.z - vel.z;

        self.jac.jacobian(mb, mbc);
        self.short.copy_from(&self.jac.matrix().rows(3, 3));
        self.jac.full_jacobian(mb, &self.short, &mut self.jac_mat);
    }

    fn update_dot(&mut self, mb: &MultiBody, mbc: &MultiBodyConfig) {
        self.jac.jacobian_dot(mb, mbc);
        self.short.copy_from(&self.jac.matrix_dot().rows(3, 3));
        self.jac.full_jacobian(mb, &self.short, &mut self.jac_dot_mat);
    }

    fn eval(&self) -> &DVector<f64> {
        &self.eval
    }

    fn jac(&self) -> &DMatrix<f64> {
        &self.jac_mat
    }

    fn jac_dot(&self) -> &DMatrix<f64> {
        &self.jac_dot_mat
    }
}

// ---------------------------------------------------------------------------
// OrientationTrackingTask
// ---------------------------------------------------------------------------

/// Point a body axis at a world target using only a chosen subset of the
/// joints along the body's kinematic path.
///
/// The residual is the rotation aligning the axis with the direction from
/// the body point to the target; Jacobian columns of joints outside the
/// tracking set are zeroed, so the rest of the chain is left alone.
#[derive(Debug, Clone)]
pub struct OrientationTrackingTask {
    body_index: usize,
    body_point: Vector3<f64>,
    body_axis: Vector3<f64>,
    tracked_point: Vector3<f64>,
    zero_jac_cols: Vec<usize>,
    jac: Jacobian,
    eval: DVector<f64>,
    short: DMatrix<f64>,
    jac_mat: DMatrix<f64>,
    jac_dot_mat: DMatrix<f64>,
}

impl OrientationTrackingTask {
    pub fn new(
        mb: &MultiBody,
        body_id: BodyId,
        body_point: Vector3<f64>,
        body_axis: Vector3<f64>,
        tracking_joint_ids: &[JointId],
        tracked_point: Vector3<f64>,
    ) -> Result<Self, MultibodyError> {
        let body_index = mb.body_index_by_id(body_id)?;
        let jac = Jacobian::new(mb, body_id, Vector3::zeros())?;

        let mut tracking = Vec::with_capacity(tracking_joint_ids.len());
        for id in tracking_joint_ids {
            tracking.push(mb.joint_index_by_id(*id)?);
        }

        // Path-local column indices of every non-tracking dof.
        let mut zero_jac_cols = Vec::new();
        let mut col = 0;
        for &j in jac.joints_path() {
            let dof = mb.joint(j).dof();
            if !tracking.contains(&j) {
                zero_jac_cols.extend(col..col + dof);
            }
            col += dof;
        }

        let dof = jac.dof();
        Ok(Self {
            body_index,
            body_point,
            body_axis,
            tracked_point,
            zero_jac_cols,
            jac,
            eval: DVector::zeros(3),
            short: DMatrix::zeros(3, dof),
            jac_mat: DMatrix::zeros(3, mb.nr_dof()),
            jac_dot_mat: DMatrix::zeros(3, mb.nr_dof()),
        })
    }

    pub fn tracked_point(&self) -> &Vector3<f64> {
        &self.tracked_point
    }

    pub fn set_tracked_point(&mut self, point: Vector3<f64>) {
        self.tracked_point = point;
    }

    pub fn body_point(&self) -> &Vector3<f64> {
        &self.body_point
    }

    pub fn set_body_point(&mut self, point: Vector3<f64>) {
        self.body_point = point;
    }

    pub fn body_axis(&self) -> &Vector3<f64> {
        &self.body_axis
    }

    pub fn set_body_axis(&mut self, axis: Vector3<f64>) {
        self.body_axis = axis;
    }

    fn zero_columns(&self, mat: &mut DMatrix<f64>) {
        for &c in &self.zero_jac_cols {
            mat.column_mut(c).fill(0.0);
        }
    }
}

impl KinematicTask for OrientationTrackingTask {
    fn update(&mut self, mb: &MultiBody, mbc: &MultiBodyConfig) {
        let pose = &mbc.body_pos_w[self.body_index];
        let point_w = (pose * nalgebra::Point3::from(self.body_point)).coords;
        let cur_dir = pose.rotation * self.body_axis;
        let des_dir = self.tracked_point - point_w;

        let err = if des_dir.norm() < 1e-9 || cur_dir.norm() < 1e-9 {
            // Degenerate geometry: nothing meaningful to align.
            Vector3::zeros()
        } else {
            let align = UnitQuaternion::rotation_between(&cur_dir, &des_dir)
                .unwrap_or_else(|| {
                    // Opposite directions: half turn about any perpendicular.
                    UnitQuaternion::from_axis_angle(
                        &nalgebra::Unit::new_normalize(perpendicular(&cur_dir)),
                        std::f64::consts::PI,
                    )
                });
            align.scaled_axis()
        };
        self.eval[0] = err.x;
        self.eval[1] = err.y;
        self.eval[2] = err.z;

        self.jac.jacobian(mb, mbc);
        self.short.copy_from(&self.jac.matrix().rows(0, 3));
        let mut short = std::mem::take(&mut self.short);
        self.zero_columns(&mut short);
        self.jac.full_jacobian(mb, &short, &mut self.jac_mat);
        self.short = short;
    }

    fn update_dot(&mut self, mb: &MultiBody, mbc: &MultiBodyConfig) {
        self.jac.jacobian_dot(mb, mbc);
        self.short.copy_from(&self.jac.matrix_dot().rows(0, 3));
        let mut short = std::mem::take(&mut self.short);
        self.zero_columns(&mut short);
        self.jac.full_jacobian(mb, &short, &mut self.jac_dot_mat);
        self.short = short;
    }

    fn eval(&self) -> &DVector<f64> {
        &self.eval
    }

    fn jac(&self) -> &DMatrix<f64> {
        &self.jac_mat
    }

    fn jac_dot(&self) -> &DMatrix<f64> {
        &self.jac_dot_mat
    }
}

fn perpendicular(v: &Vector3<f64>) -> Vector3<f64> {
    if v.x.abs() < 0.9 * v.norm() {
        v.cross(&Vector3::x())
    } else {
        v.cross(&Vector3::y())
    }
}
