//! The whole-body QP solver: assembles every registered task and
//! constraint into one dense QP per tick, solves it, and writes the result
//! back into the robot state.

use std::cell::RefCell;
use std::rc::Rc;

use nalgebra::{DMatrix, DVector};
use torq_multibody::{
    euler_integration, forward_kinematics, forward_velocity, vector_to_param, BodyId, MultiBody,
    MultiBodyConfig,
};
use tracing::{debug, warn};

use crate::backend::{BackendKind, QpBackend};
use crate::constraint::{Bound, Constraint, Equality, Inequality};
use crate::contact::{BilateralContact, UnilateralContact};
use crate::data::SolverData;
use crate::qp_tasks::Task;

/// Added to undersized Hessian diagonal entries so the QP stays positive.
const DIAG_CONSTANT: f64 = 1e-5;

/// Feasibility-tolerance ladder: start, growth, and (exclusive) cap.
const TOL_START: f64 = 1e-8;
const TOL_CAP: f64 = 1e-3;

/// One controller tick as a convex QP.
///
/// Clients register tasks and constraints (shared `Rc<RefCell<_>>`
/// handles, so targets stay adjustable between ticks), describe the
/// problem shape with [`set_problem_structure`](Self::set_problem_structure),
/// then call [`update`](Self::update) once per control step. On success the
/// solved accelerations and torques are written into the passed
/// configuration and an attached manipulated body is integrated forward;
/// on failure the robot state and the cached result are left untouched.
pub struct QpSolver {
    constraints: Vec<Rc<RefCell<dyn Constraint>>>,
    eq_constraints: Vec<Rc<RefCell<dyn Equality>>>,
    in_eq_constraints: Vec<Rc<RefCell<dyn Inequality>>>,
    bound_constraints: Vec<Rc<RefCell<dyn Bound>>>,
    tasks: Vec<Rc<RefCell<dyn Task>>>,

    data: SolverData,

    nr_eq: usize,
    a1: DMatrix<f64>,
    b1: DVector<f64>,
    nr_in_eq: usize,
    a2: DMatrix<f64>,
    b2: DVector<f64>,
    xl: DVector<f64>,
    xu: DVector<f64>,
    q: DMatrix<f64>,
    c: DVector<f64>,

    res: DVector<f64>,
    torque_res: DVector<f64>,

    backend: Box<dyn QpBackend>,
    silent: bool,
}

impl QpSolver {
    /// A solver with the default (tolerance-accepting) back-end.
    pub fn new() -> Self {
        Self::with_backend(BackendKind::Clarabel.make())
    }

    pub fn with_backend(backend: Box<dyn QpBackend>) -> Self {
        Self {
            constraints: Vec::new(),
            eq_constraints: Vec::new(),
            in_eq_constraints: Vec::new(),
            bound_constraints: Vec::new(),
            tasks: Vec::new(),
            data: SolverData::default(),
            nr_eq: 0,
            a1: DMatrix::zeros(0, 0),
            b1: DVector::zeros(0),
            nr_in_eq: 0,
            a2: DMatrix::zeros(0, 0),
            b2: DVector::zeros(0),
            xl: DVector::zeros(0),
            xu: DVector::zeros(0),
            q: DMatrix::zeros(0, 0),
            c: DVector::zeros(0),
            res: DVector::zeros(0),
            torque_res: DVector::zeros(0),
            backend,
            silent: true,
        }
    }

    /// Switch the QP back-end; problem dimensions carry over.
    pub fn select_backend(&mut self, kind: BackendKind) {
        self.backend = kind.make();
        self.backend.set_silent(self.silent);
        self.backend
            .problem(self.data.nr_vars(), self.a1.nrows(), self.a2.nrows());
    }

    /// Replace the back-end with a custom implementation.
    pub fn set_backend(&mut self, backend: Box<dyn QpBackend>) {
        self.backend = backend;
        self.backend.set_silent(self.silent);
        self.backend
            .problem(self.data.nr_vars(), self.a1.nrows(), self.a2.nrows());
    }

    /// Suppress diagnostic output from back-ends that support it.
    pub fn set_silent(&mut self, silent: bool) {
        self.silent = silent;
        self.backend.set_silent(silent);
    }

    // -----------------------------------------------------------------------
    // Problem structure
    // -----------------------------------------------------------------------

    /// Install the manipulated body's model and local configuration.
    ///
    /// Must run before a [`set_problem_structure`](Self::set_problem_structure)
    /// that declares robot-to-manipulated-body contacts.
    pub fn set_manip_body(&mut self, body: MultiBody, config: MultiBodyConfig) {
        self.data.manip_body = Some(body);
        self.data.manip_body_config = Some(config);
    }

    /// Replace the manipulated body's configuration.
    pub fn set_manip_body_config(&mut self, config: MultiBodyConfig) {
        self.data.manip_body_config = Some(config);
    }

    pub fn manip_body(&self) -> Option<&MultiBody> {
        self.data.manip_body()
    }

    pub fn manip_body_config(&self) -> Option<&MultiBodyConfig> {
        self.data.manip_body_config()
    }

    /// Recompute the decision-vector decomposition from the robot model and
    /// the contact sets, resize every owned matrix, and propagate the new
    /// shape to tasks, constraints, and the back-end.
    pub fn set_problem_structure(
        &mut self,
        mb: &MultiBody,
        uni: Vec<UnilateralContact>,
        bi: Vec<BilateralContact>,
        robot_to_manip: Vec<UnilateralContact>,
        manip_to_robot: Vec<UnilateralContact>,
    ) {
        let data = &mut self.data;
        data.alpha_d = mb.nr_dof();
        data.torque = mb.nr_dof() - mb.joint(0).dof();
        data.lambda_uni = uni.iter().map(UnilateralContact::nr_lambda_total).sum();
        data.lambda_bi = bi.iter().map(BilateralContact::nr_lambda_total).sum();
        data.lambda_manip = robot_to_manip
            .iter()
            .map(UnilateralContact::nr_lambda_total)
            .sum();
        data.uni_contacts = uni;
        data.bi_contacts = bi;
        data.robot_to_manip = robot_to_manip;
        data.manip_to_robot = manip_to_robot;

        if data.lambda_manip != 0 {
            // The manipulated body rides along as six extra accelerations.
            data.alpha_d += 6;
            assert!(
                data.manip_body.is_some() && data.manip_body_config.is_some(),
                "manipulated-body contacts declared but no manipulated body installed"
            );
        }

        data.lambda = data.lambda_uni + data.lambda_bi + data.lambda_manip;
        data.nr_vars = data.alpha_d + data.lambda + data.torque;

        if self.xl.len() != data.nr_vars {
            let n = data.nr_vars;
            self.xl = DVector::zeros(n);
            self.xu = DVector::zeros(n);
            self.q = DMatrix::zeros(n, n);
            self.c = DVector::zeros(n);
            self.res = DVector::zeros(n);
            self.torque_res = DVector::zeros(mb.nr_dof());
        }

        for task in &self.tasks {
            task.borrow_mut().update_structure(mb, &self.data);
        }
        for constraint in &self.constraints {
            constraint.borrow_mut().update_structure(mb, &self.data);
        }

        let max_eq: usize = self
            .eq_constraints
            .iter()
            .map(|c| c.borrow().max_eq())
            .sum();
        self.nr_eq = 0;
        self.a1 = DMatrix::zeros(max_eq, self.data.nr_vars);
        self.b1 = DVector::zeros(max_eq);

        let max_in_eq: usize = self
            .in_eq_constraints
            .iter()
            .map(|c| c.borrow().max_in_eq())
            .sum();
        self.nr_in_eq = 0;
        self.a2 = DMatrix::zeros(max_in_eq, self.data.nr_vars);
        self.b2 = DVector::zeros(max_in_eq);

        debug!(
            nr_vars = self.data.nr_vars,
            max_eq, max_in_eq, "problem structure changed"
        );
        self.backend.problem(self.data.nr_vars, max_eq, max_in_eq);
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Register a constraint for the per-tick refresh hook. Role matrices
    /// are only consumed if the object is also registered under
    /// [`add_equality_constraint`](Self::add_equality_constraint),
    /// [`add_inequality_constraint`](Self::add_inequality_constraint), or
    /// [`add_bound_constraint`](Self::add_bound_constraint).
    pub fn add_constraint(&mut self, constraint: Rc<RefCell<dyn Constraint>>) {
        if !self
            .constraints
            .iter()
            .any(|c| Rc::ptr_eq(c, &constraint))
        {
            self.constraints.push(constraint);
        }
    }

    pub fn remove_constraint(&mut self, constraint: &Rc<RefCell<dyn Constraint>>) {
        self.constraints.retain(|c| !Rc::ptr_eq(c, constraint));
    }

    pub fn add_equality_constraint(&mut self, constraint: Rc<RefCell<dyn Equality>>) {
        self.eq_constraints.push(constraint);
    }

    pub fn remove_equality_constraint(&mut self, constraint: &Rc<RefCell<dyn Equality>>) {
        self.eq_constraints.retain(|c| !Rc::ptr_eq(c, constraint));
    }

    pub fn add_inequality_constraint(&mut self, constraint: Rc<RefCell<dyn Inequality>>) {
        self.in_eq_constraints.push(constraint);
    }

    pub fn remove_inequality_constraint(&mut self, constraint: &Rc<RefCell<dyn Inequality>>) {
        self.in_eq_constraints.retain(|c| !Rc::ptr_eq(c, constraint));
    }

    pub fn add_bound_constraint(&mut self, constraint: Rc<RefCell<dyn Bound>>) {
        self.bound_constraints.push(constraint);
    }

    pub fn remove_bound_constraint(&mut self, constraint: &Rc<RefCell<dyn Bound>>) {
        self.bound_constraints.retain(|c| !Rc::ptr_eq(c, constraint));
    }

    pub fn add_task(&mut self, task: Rc<RefCell<dyn Task>>) {
        if !self.tasks.iter().any(|t| Rc::ptr_eq(t, &task)) {
            self.tasks.push(task);
        }
    }

    pub fn remove_task(&mut self, task: &Rc<RefCell<dyn Task>>) {
        self.tasks.retain(|t| !Rc::ptr_eq(t, task));
    }

    pub fn reset_tasks(&mut self) {
        self.tasks.clear();
    }

    pub fn nr_constraints(&self) -> usize {
        self.constraints.len()
    }

    pub fn nr_equality_constraints(&self) -> usize {
        self.eq_constraints.len()
    }

    pub fn nr_inequality_constraints(&self) -> usize {
        self.in_eq_constraints.len()
    }

    pub fn nr_bound_constraints(&self) -> usize {
        self.bound_constraints.len()
    }

    pub fn nr_tasks(&self) -> usize {
        self.tasks.len()
    }

    // -----------------------------------------------------------------------
    // The tick
    // -----------------------------------------------------------------------

    /// Run one control tick: refresh, assemble, solve, write back.
    ///
    /// Returns whether the QP was solved; on `false`, `mbc` and the cached
    /// result are unchanged and the controller is expected to react.
    pub fn update(&mut self, mb: &MultiBody, mbc: &mut MultiBodyConfig, step: f64) -> bool {
        self.pre_update(mb, mbc);

        let success = if self.backend.accepts_tolerance() {
            let mut success = false;
            let mut tol = TOL_START;
            while !success && tol < TOL_CAP {
                success = self.backend.solve(
                    &self.q,
                    &self.c,
                    self.a1.view((0, 0), (self.nr_eq, self.data.nr_vars)),
                    self.b1.rows(0, self.nr_eq),
                    self.a2.view((0, 0), (self.nr_in_eq, self.data.nr_vars)),
                    self.b2.rows(0, self.nr_in_eq),
                    &self.xl,
                    &self.xu,
                    Some(tol),
                );
                if !success {
                    warn!(tol, backend = self.backend.name(), "QP solve failed, relaxing");
                }
                tol *= 10.0;
            }
            success
        } else {
            self.backend.solve(
                &self.q,
                &self.c,
                self.a1.view((0, 0), (self.nr_eq, self.data.nr_vars)),
                self.b1.rows(0, self.nr_eq),
                self.a2.view((0, 0), (self.nr_in_eq, self.data.nr_vars)),
                self.b2.rows(0, self.nr_in_eq),
                &self.xl,
                &self.xu,
                None,
            )
        };

        self.post_update(mb, mbc, success, step);
        success
    }

    /// Refresh every task and constraint, then fill the QP matrices.
    fn pre_update(&mut self, mb: &MultiBody, mbc: &MultiBodyConfig) {
        for constraint in &self.constraints {
            constraint.borrow_mut().update(mb, mbc);
        }
        for task in &self.tasks {
            task.borrow_mut().update(mb, mbc);
        }

        self.a1.fill(0.0);
        self.b1.fill(0.0);
        self.a2.fill(0.0);
        self.b2.fill(0.0);
        self.xl.fill(f64::NEG_INFINITY);
        self.xu.fill(f64::INFINITY);
        self.q.fill(0.0);
        self.c.fill(0.0);

        let nr_vars = self.data.nr_vars;

        self.nr_eq = 0;
        for constraint in &self.eq_constraints {
            let eq = constraint.borrow();
            // The stored matrix may carry more rows than are active.
            let rows = eq.nr_eq();
            assert!(
                rows <= eq.max_eq(),
                "equality constraint uses more rows than it advertised"
            );
            self.a1
                .view_mut((self.nr_eq, 0), (rows, nr_vars))
                .copy_from(&eq.a_eq().view((0, 0), (rows, nr_vars)));
            self.b1
                .rows_mut(self.nr_eq, rows)
                .copy_from(&eq.b_eq().rows(0, rows));
            self.nr_eq += rows;
        }

        self.nr_in_eq = 0;
        for constraint in &self.in_eq_constraints {
            let in_eq = constraint.borrow();
            let rows = in_eq.nr_in_eq();
            assert!(
                rows <= in_eq.max_in_eq(),
                "inequality constraint uses more rows than it advertised"
            );
            self.a2
                .view_mut((self.nr_in_eq, 0), (rows, nr_vars))
                .copy_from(&in_eq.a_in_eq().view((0, 0), (rows, nr_vars)));
            self.b2
                .rows_mut(self.nr_in_eq, rows)
                .copy_from(&in_eq.b_in_eq().rows(0, rows));
            self.nr_in_eq += rows;
        }

        // Last write wins on overlap.
        for constraint in &self.bound_constraints {
            let bound = constraint.borrow();
            let lower = bound.lower();
            let upper = bound.upper();
            assert_eq!(lower.len(), upper.len(), "bound vectors must have equal length");
            let begin = bound.begin_var();
            assert!(
                begin + lower.len() <= nr_vars,
                "bound constraint writes past the decision vector"
            );
            self.xl.rows_mut(begin, lower.len()).copy_from(lower);
            self.xu.rows_mut(begin, upper.len()).copy_from(upper);
        }

        for task in &self.tasks {
            let task = task.borrow();
            let q = task.q_mat();
            let c = task.c_vec();
            let (row, col) = task.begin();
            let w = task.weight();

            let mut q_block = self.q.view_mut((row, col), q.shape());
            q_block.zip_apply(q, |e, v| *e += w * v);
            let mut c_block = self.c.rows_mut(row, c.len());
            c_block.axpy(w, c, 1.0);
        }

        // First-order positivity repair: lift undersized diagonal entries.
        // Off-diagonal dominance is deliberately not checked.
        for i in 0..nr_vars {
            if self.q[(i, i)].abs() < DIAG_CONSTANT {
                self.q[(i, i)] += DIAG_CONSTANT;
            }
        }
    }

    /// Write the solution back into the robot (and manipulated-body) state.
    fn post_update(&mut self, mb: &MultiBody, mbc: &mut MultiBodyConfig, success: bool, step: f64) {
        if !success {
            return;
        }
        self.res.copy_from(self.backend.result());

        let root_dof = mb.joint(0).dof();
        // Root torques stay zero; only the actuated tail is overwritten.
        self.torque_res
            .rows_mut(root_dof, mb.nr_dof() - root_dof)
            .copy_from(&self.res.rows(self.data.torque_begin(), self.data.torque));
        vector_to_param(mb, &self.torque_res, &mut mbc.joint_torque);

        if self.data.lambda_manip != 0 {
            // Contact forces stay in the decision vector (constraints read
            // them back next tick); only accelerations are deserialized.
            let robot_dof = self.data.alpha_d - 6;
            vector_to_param(mb, &self.res.rows(0, robot_dof), &mut mbc.alpha_d);

            let manip_mb = self
                .data
                .manip_body
                .as_ref()
                .expect("manipulated-body contacts without a manipulated body");
            let manip_mbc = self
                .data
                .manip_body_config
                .as_mut()
                .expect("manipulated-body contacts without a manipulated body");
            for d in 0..6 {
                manip_mbc.alpha_d[0][d] = self.res[robot_dof + d];
            }
            euler_integration(manip_mb, manip_mbc, step);
            forward_kinematics(manip_mb, manip_mbc);
            forward_velocity(manip_mb, manip_mbc);
        } else {
            vector_to_param(mb, &self.res.rows(0, self.data.alpha_d), &mut mbc.alpha_d);
        }
    }

    // -----------------------------------------------------------------------
    // Results
    // -----------------------------------------------------------------------

    /// Decision-vector sizes currently in force.
    pub fn data(&self) -> &SolverData {
        &self.data
    }

    pub fn nr_vars(&self) -> usize {
        self.data.nr_vars
    }

    /// Full decision vector of the last successful solve.
    pub fn result(&self) -> &DVector<f64> {
        &self.res
    }

    /// Acceleration segment of the last successful solve.
    pub fn alpha_d_vec(&self) -> DVector<f64> {
        self.res.rows(0, self.data.alpha_d).into_owned()
    }

    /// Force-parameter segment of the last successful solve.
    pub fn lambda_vec(&self) -> DVector<f64> {
        self.res
            .rows(self.data.lambda_begin(), self.data.lambda)
            .into_owned()
    }

    /// Torque segment of the last successful solve.
    pub fn torque_vec(&self) -> DVector<f64> {
        self.res
            .rows(self.data.torque_begin(), self.data.torque)
            .into_owned()
    }

    /// Offset of `body_id`'s first force parameter inside the lambda
    /// segment, searching unilateral then bilateral contacts in
    /// registration order. `None` if no contact carries the body.
    pub fn contact_lambda_position(&self, body_id: BodyId) -> Option<usize> {
        let mut pos = 0;
        for contact in &self.data.uni_contacts {
            if contact.body_id == body_id {
                return Some(pos);
            }
            pos += contact.nr_lambda_total();
        }
        for contact in &self.data.bi_contacts {
            if contact.body_id == body_id {
                return Some(pos);
            }
            pos += contact.nr_lambda_total();
        }
        None
    }
}

impl Default for QpSolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::QpBackend;
    use crate::contact::FrictionCone;
    use approx::assert_relative_eq;
    use nalgebra::{DMatrixView, DVectorView, Isometry3, Vector3};
    use torq_multibody::{Body, Joint, JointId};

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
        let mut mbc = MultiBodyConfig::new(&mb);
        forward_kinematics(&mb, &mut mbc);
        forward_velocity(&mb, &mut mbc);
        (mb, mbc)
    }

    /// A bound constraint writing constants over a fixed range.
    struct RangeBound {
        begin: usize,
        lower: DVector<f64>,
        upper: DVector<f64>,
    }

    impl RangeBound {
        fn shared(begin: usize, lower: Vec<f64>, upper: Vec<f64>) -> Rc<RefCell<Self>> {
            Rc::new(RefCell::new(Self {
                begin,
                lower: DVector::from_vec(lower),
                upper: DVector::from_vec(upper),
            }))
        }
    }

    impl Constraint for RangeBound {
        fn update_structure(&mut self, _mb: &MultiBody, _data: &SolverData) {}
        fn update(&mut self, _mb: &MultiBody, _mbc: &MultiBodyConfig) {}
    }

    impl Bound for RangeBound {
        fn begin_var(&self) -> usize {
            self.begin
        }
        fn lower(&self) -> &DVector<f64> {
            &self.lower
        }
        fn upper(&self) -> &DVector<f64> {
            &self.upper
        }
    }

    /// Back-end double that accepts a tolerance and succeeds only at or
    /// above a threshold, recording every attempt in a shared log.
    struct ThresholdBackend {
        succeed_at: f64,
        calls: Rc<RefCell<Vec<f64>>>,
        result: DVector<f64>,
    }

    impl ThresholdBackend {
        fn new(succeed_at: f64) -> (Self, Rc<RefCell<Vec<f64>>>) {
            let calls = Rc::new(RefCell::new(Vec::new()));
            (
                Self {
                    succeed_at,
                    calls: Rc::clone(&calls),
                    result: DVector::zeros(0),
                },
                calls,
            )
        }
    }

    impl QpBackend for ThresholdBackend {
        fn problem(&mut self, nr_vars: usize, _nr_eq: usize, _nr_in_eq: usize) {
            self.result = DVector::zeros(nr_vars);
        }

        #[allow(clippy::too_many_arguments)]
        fn solve(
            &mut self,
            _q: &DMatrix<f64>,
            _c: &DVector<f64>,
            _a_eq: DMatrixView<f64>,
            _b_eq: DVectorView<f64>,
            _a_in_eq: DMatrixView<f64>,
            _b_in_eq: DVectorView<f64>,
            _xl: &DVector<f64>,
            _xu: &DVector<f64>,
            tol: Option<f64>,
        ) -> bool {
            let tol = tol.expect("ladder must pass a tolerance");
            self.calls.borrow_mut().push(tol);
            tol >= self.succeed_at
        }

        fn result(&self) -> &DVector<f64> {
            &self.result
        }

        fn accepts_tolerance(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "threshold"
        }
    }

    /// Tolerance-less back-end double counting its calls.
    struct OneShotBackend {
        calls: Rc<RefCell<usize>>,
        result: DVector<f64>,
    }

    impl QpBackend for OneShotBackend {
        fn problem(&mut self, nr_vars: usize, _nr_eq: usize, _nr_in_eq: usize) {
            self.result = DVector::zeros(nr_vars);
        }

        #[allow(clippy::too_many_arguments)]
        fn solve(
            &mut self,
            _q: &DMatrix<f64>,
            _c: &DVector<f64>,
            _a_eq: DMatrixView<f64>,
            _b_eq: DVectorView<f64>,
            _a_in_eq: DMatrixView<f64>,
            _b_in_eq: DVectorView<f64>,
            _xl: &DVector<f64>,
            _xu: &DVector<f64>,
            tol: Option<f64>,
        ) -> bool {
            assert!(tol.is_none(), "tolerance passed to a tolerance-less back-end");
            *self.calls.borrow_mut() += 1;
            false
        }

        fn result(&self) -> &DVector<f64> {
            &self.result
        }

        fn accepts_tolerance(&self) -> bool {
            false
        }

        fn name(&self) -> &str {
            "one-shot"
        }
    }

    #[test]
    fn sizes_are_coherent_after_structure_change() {
        let (mb, _) = planar_2r();
        let mut solver = QpSolver::new();

        let contact = UnilateralContact::new(
            BodyId(2),
            vec![Vector3::zeros()],
            vec![FrictionCone::pyramid(Vector3::z(), 4, 0.5)],
        );
        solver.set_problem_structure(&mb, vec![contact], vec![], vec![], vec![]);

        // nVars = alphaD + lambda + torque = 2 + 4 + 2.
        assert_eq!(solver.nr_vars(), 8);
        assert_eq!(solver.data().alpha_d(), 2);
        assert_eq!(solver.data().lambda(), 4);
        assert_eq!(solver.data().torque(), 2);
        assert_eq!(solver.q.shape(), (8, 8));
        assert_eq!(solver.c.len(), 8);
        assert_eq!(solver.xl.len(), 8);
        assert_eq!(solver.xu.len(), 8);
    }

    #[test]
    fn equality_storage_sums_advertised_rows() {
        let (mb, _) = planar_2r();
        let mut solver = QpSolver::new();

        // The motion constraint advertises one row per dof.
        let motion = Rc::new(RefCell::new(crate::qp_constraints::MotionConstr::new(
            Vector3::new(0.0, 0.0, -9.81),
        )));
        solver.add_constraint(motion.clone());
        solver.add_equality_constraint(motion);

        solver.set_problem_structure(&mb, vec![], vec![], vec![], vec![]);
        assert_eq!(solver.a1.nrows(), mb.nr_dof());
        assert_eq!(solver.b1.len(), mb.nr_dof());
        assert_eq!(solver.a1.ncols(), solver.nr_vars());
    }

    #[test]
    fn empty_problem_solves_to_the_origin() {
        let (mb, mut mbc) = planar_2r();
        for kind in [BackendKind::Clarabel, BackendKind::Quadprog] {
            let mut solver = QpSolver::new();
            solver.select_backend(kind);
            solver.set_problem_structure(&mb, vec![], vec![], vec![], vec![]);

            assert!(solver.update(&mb, &mut mbc, 0.005));
            assert_relative_eq!(solver.result().norm(), 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn regularization_floors_the_diagonal() {
        let (mb, mbc) = planar_2r();
        let mut solver = QpSolver::new();
        solver.set_problem_structure(&mb, vec![], vec![], vec![], vec![]);
        solver.pre_update(&mb, &mbc);

        for i in 0..solver.nr_vars() {
            assert!(solver.q[(i, i)].abs() >= DIAG_CONSTANT);
        }
    }

    #[test]
    fn structure_change_is_idempotent() {
        let (mb, mut mbc) = planar_2r();
        let mut solver = QpSolver::new();
        solver.set_problem_structure(&mb, vec![], vec![], vec![], vec![]);
        assert!(solver.update(&mb, &mut mbc, 0.005));
        let result_before = solver.result().clone();
        let nr_vars_before = solver.nr_vars();

        solver.set_problem_structure(&mb, vec![], vec![], vec![], vec![]);
        assert_eq!(solver.nr_vars(), nr_vars_before);
        assert_relative_eq!((solver.result() - result_before).norm(), 0.0);
    }

    #[test]
    fn result_partitions_into_the_three_segments() {
        let (mb, mut mbc) = planar_2r();
        let mut solver = QpSolver::new();
        let contact = UnilateralContact::new(
            BodyId(2),
            vec![Vector3::zeros()],
            vec![FrictionCone::pyramid(Vector3::z(), 4, 0.5)],
        );
        solver.set_problem_structure(&mb, vec![contact], vec![], vec![], vec![]);
        assert!(solver.update(&mb, &mut mbc, 0.005));

        let alpha_d = solver.alpha_d_vec();
        let lambda = solver.lambda_vec();
        let torque = solver.torque_vec();
        assert_eq!(alpha_d.len(), 2);
        assert_eq!(lambda.len(), 4);
        assert_eq!(torque.len(), 2);

        let mut concat: Vec<&f64> = Vec::new();
        concat.extend(alpha_d.iter());
        concat.extend(lambda.iter());
        concat.extend(torque.iter());
        for (i, v) in concat.iter().enumerate() {
            assert_relative_eq!(solver.result()[i], **v);
        }
    }

    #[test]
    fn overlapping_bounds_last_write_wins() {
        let (mb, mbc) = planar_2r();
        let mut solver = QpSolver::new();

        let first = RangeBound::shared(0, vec![-1.0, -1.0, -1.0], vec![1.0, 1.0, 1.0]);
        let second = RangeBound::shared(2, vec![-7.0, -7.0], vec![7.0, 7.0]);
        solver.add_bound_constraint(first);
        solver.add_bound_constraint(second);

        solver.set_problem_structure(&mb, vec![], vec![], vec![], vec![]);
        solver.pre_update(&mb, &mbc);

        // nVars = 4; ranges [0,3) and [2,4) overlap at index 2.
        assert_relative_eq!(solver.xl[0], -1.0);
        assert_relative_eq!(solver.xl[1], -1.0);
        assert_relative_eq!(solver.xl[2], -7.0);
        assert_relative_eq!(solver.xl[3], -7.0);
        assert_relative_eq!(solver.xu[2], 7.0);
    }

    #[test]
    fn tolerance_ladder_retries_until_accepted() {
        let (mb, mut mbc) = planar_2r();
        let (backend, calls) = ThresholdBackend::new(1e-6);
        let mut solver = QpSolver::new();
        solver.set_backend(Box::new(backend));
        solver.set_problem_structure(&mb, vec![], vec![], vec![], vec![]);

        assert!(solver.update(&mb, &mut mbc, 0.005));

        // 1e-8 and 1e-7 rejected, 1e-6 accepted.
        let calls = calls.borrow();
        assert_eq!(calls.len(), 3);
        assert_relative_eq!(calls[0], 1e-8);
        assert_relative_eq!(calls[1], 1e-7);
        assert_relative_eq!(calls[2], 1e-6);
    }

    #[test]
    fn ladder_exhausts_below_the_cap() {
        let (mb, mut mbc) = planar_2r();
        // Succeeds only at 1e-3, which the ladder never reaches.
        let (backend, calls) = ThresholdBackend::new(1e-3);
        let mut solver = QpSolver::new();
        solver.set_backend(Box::new(backend));
        solver.set_problem_structure(&mb, vec![], vec![], vec![], vec![]);

        assert!(!solver.update(&mb, &mut mbc, 0.005));

        // Attempts at 1e-8 .. 1e-4, never 1e-3.
        let calls = calls.borrow();
        assert_eq!(calls.len(), 5);
        assert_relative_eq!(calls[4], 1e-4);
    }

    #[test]
    fn tolerance_less_backend_gets_one_call() {
        let (mb, mut mbc) = planar_2r();
        let calls = Rc::new(RefCell::new(0));
        let mut solver = QpSolver::new();
        solver.set_backend(Box::new(OneShotBackend {
            calls: Rc::clone(&calls),
            result: DVector::zeros(0),
        }));
        solver.set_problem_structure(&mb, vec![], vec![], vec![], vec![]);

        assert!(!solver.update(&mb, &mut mbc, 0.005));
        assert_eq!(*calls.borrow(), 1);
    }

    #[test]
    fn contact_lambda_position_walks_registration_order() {
        let (mb, _) = planar_2r();
        let mut solver = QpSolver::new();

        let uni = UnilateralContact::new(
            BodyId(1),
            vec![Vector3::zeros()],
            vec![FrictionCone::pyramid(Vector3::z(), 4, 0.5)],
        );
        let bi = BilateralContact::new(
            BodyId(2),
            vec![Vector3::zeros()],
            vec![FrictionCone::pyramid(Vector3::z(), 3, 0.5)],
        );
        solver.set_problem_structure(&mb, vec![uni], vec![bi], vec![], vec![]);

        assert_eq!(solver.contact_lambda_position(BodyId(1)), Some(0));
        assert_eq!(solver.contact_lambda_position(BodyId(2)), Some(4));
        assert_eq!(solver.contact_lambda_position(BodyId(99)), None);
    }
}
