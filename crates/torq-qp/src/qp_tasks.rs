//! QP-facing task contract and the set-point wrapper.

use nalgebra::{DMatrix, DVector};
use torq_multibody::{param_to_vector, MultiBody, MultiBodyConfig};

use crate::data::SolverData;
use crate::tasks::KinematicTask;

/// A quadratic objective contributed to the QP.
///
/// The solver adds `weight * q_mat()` into the Hessian and
/// `weight * c_vec()` into the gradient at the [`begin`](Task::begin)
/// origin. [`update_structure`](Task::update_structure) is called whenever
/// the decision vector changes shape; [`update`](Task::update) once per
/// tick, after the kinematic caches are refreshed.
pub trait Task {
    fn update_structure(&mut self, mb: &MultiBody, data: &SolverData);
    fn update(&mut self, mb: &MultiBody, mbc: &MultiBodyConfig);

    /// Hessian block (`J^T J` for set-point tasks).
    fn q_mat(&self) -> &DMatrix<f64>;
    /// Gradient block.
    fn c_vec(&self) -> &DVector<f64>;
    /// Strictly positive scalar weight.
    fn weight(&self) -> f64;
    /// `(row, col)` origin of the block in the full Hessian.
    fn begin(&self) -> (usize, usize) {
        (0, 0)
    }
}

/// Classical set-point servo around a kinematic task.
///
/// Builds the objective `|| J alphaD - acc_des ||^2` with
/// `acc_des = stiffness * eval - damping * (J alpha) - Jdot alpha`,
/// which the QP sees as `q_mat = J^T J`, `c_vec = -J^T acc_des`.
///
/// [`new`](Self::new) picks critical damping (`2 sqrt(stiffness)`); use
/// [`with_gains`](Self::with_gains) for first-order residuals such as
/// [`LinVelocityTask`](crate::LinVelocityTask), where damping should be
/// zero.
pub struct SetPointTask<T> {
    task: T,
    stiffness: f64,
    damping: f64,
    weight: f64,
    q: DMatrix<f64>,
    c: DVector<f64>,
    alpha: DVector<f64>,
    acc_des: DVector<f64>,
}

impl<T: KinematicTask> SetPointTask<T> {
    /// Critically damped set-point task.
    pub fn new(task: T, stiffness: f64, weight: f64) -> Self {
        let damping = 2.0 * stiffness.sqrt();
        Self::with_gains(task, stiffness, damping, weight)
    }

    pub fn with_gains(task: T, stiffness: f64, damping: f64, weight: f64) -> Self {
        assert!(weight > 0.0, "task weight must be strictly positive");
        assert!(stiffness >= 0.0, "stiffness must be nonnegative");
        let dim = task.eval().len();
        Self {
            task,
            stiffness,
            damping,
            weight,
            q: DMatrix::zeros(0, 0),
            c: DVector::zeros(0),
            alpha: DVector::zeros(0),
            acc_des: DVector::zeros(dim),
        }
    }

    pub fn stiffness(&self) -> f64 {
        self.stiffness
    }

    /// Set the stiffness, re-deriving critical damping.
    pub fn set_stiffness(&mut self, stiffness: f64) {
        self.stiffness = stiffness;
        self.damping = 2.0 * stiffness.sqrt();
    }

    pub fn set_weight(&mut self, weight: f64) {
        assert!(weight > 0.0, "task weight must be strictly positive");
        self.weight = weight;
    }

    /// The wrapped kinematic task, for reading residuals.
    pub fn task(&self) -> &T {
        &self.task
    }

    /// The wrapped kinematic task, for retargeting.
    pub fn task_mut(&mut self) -> &mut T {
        &mut self.task
    }
}

impl<T: KinematicTask> Task for SetPointTask<T> {
    fn update_structure(&mut self, mb: &MultiBody, _data: &SolverData) {
        let dof = mb.nr_dof();
        if self.q.nrows() != dof {
            self.q = DMatrix::zeros(dof, dof);
            self.c = DVector::zeros(dof);
            self.alpha = DVector::zeros(dof);
        }
    }

    fn update(&mut self, mb: &MultiBody, mbc: &MultiBodyConfig) {
        self.task.update(mb, mbc);
        self.task.update_dot(mb, mbc);
        param_to_vector(mb, &mbc.alpha, &mut self.alpha);

        let jac = self.task.jac();
        let jac_dot = self.task.jac_dot();
        let eval = self.task.eval();

        // acc_des = stiffness e - damping (J alpha) - Jdot alpha
        self.acc_des.gemv(-self.damping, jac, &self.alpha, 0.0);
        self.acc_des.gemv(-1.0, jac_dot, &self.alpha, 1.0);
        self.acc_des.axpy(self.stiffness, eval, 1.0);

        self.q.gemm_tr(1.0, jac, jac, 0.0);
        self.c.gemv_tr(-1.0, jac, &self.acc_des, 0.0);
    }

    fn q_mat(&self) -> &DMatrix<f64> {
        &self.q
    }

    fn c_vec(&self) -> &DVector<f64> {
        &self.c
    }

    fn weight(&self) -> f64 {
        self.weight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{PositionTask, PostureTask};
    use approx::assert_relative_eq;
    use nalgebra::{Isometry3, Vector3};
    use torq_multibody::{
        forward_kinematics, forward_velocity, Body, BodyId, Joint, JointId,
    };

    fn arm() -> (MultiBody, MultiBodyConfig) {
        let bodies = vec![
            Body::massless(BodyId(0), "base"),
            Body::point_mass(BodyId(1), "link", 1.0, Vector3::new(0.0, 0.5, 0.0)),
        ];
        let joints = vec![
            Joint::fixed(JointId(0), "root"),
            Joint::revolute(JointId(1), "shoulder", Vector3::z()),
        ];
        let mb = MultiBody::new(
            bodies,
            joints,
            vec![None, Some(0)],
            vec![0, 1],
            vec![None, Some(0)],
            vec![Isometry3::identity(); 2],
        )
        .unwrap();
        let mut mbc = MultiBodyConfig::new(&mb);
        forward_kinematics(&mb, &mut mbc);
        forward_velocity(&mb, &mut mbc);
        (mb, mbc)
    }

    #[test]
    fn satisfied_task_at_rest_has_zero_gradient() {
        let (mb, mbc) = arm();
        let posture = PostureTask::new(&mb, mbc.q.clone());
        let mut sp = SetPointTask::new(posture, 1.0, 1.0);
        sp.update_structure(&mb, &SolverData::default());
        sp.update(&mb, &mbc);

        assert_relative_eq!(sp.c_vec().norm(), 0.0, epsilon = 1e-12);
        // Hessian is J^T J = identity on the single dof.
        assert_relative_eq!(sp.q_mat()[(0, 0)], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn gradient_points_along_stiffness_times_error() {
        let (mb, mbc) = arm();
        let task = PositionTask::new(
            &mb,
            BodyId(1),
            Vector3::new(0.1, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
        )
        .unwrap();
        let mut sp = SetPointTask::new(task, 10.0, 1.0);
        sp.update_structure(&mb, &SolverData::default());
        sp.update(&mb, &mbc);

        // At rest: acc_des = K e, c = -J^T K e.
        // J x-row = z x (0,1,0) = (-1,0,0); e = (0.1, -1, 0) with tip at
        // (0,1,0); y row of J: z x lever has zero y. So J^T K e = -1 * 10 * 0.1.
        assert_relative_eq!(sp.c_vec()[0], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn damping_opposes_motion() {
        let (mb, mut mbc) = arm();
        mbc.alpha[1][0] = 2.0;
        forward_kinematics(&mb, &mut mbc);
        forward_velocity(&mb, &mut mbc);

        let posture = PostureTask::new(&mb, mbc.q.clone());
        let mut sp = SetPointTask::with_gains(posture, 0.0, 3.0, 1.0);
        sp.update_structure(&mb, &SolverData::default());
        sp.update(&mb, &mbc);

        // acc_des = -damping * speed = -6; c = -J^T acc_des = 6.
        assert_relative_eq!(sp.c_vec()[0], 6.0, epsilon = 1e-12);
    }
}
