//! Concrete whole-body constraints.
//!
//! - [`MotionConstr`]: equation of motion over accelerations, contact
//!   forces, and torques
//! - [`ContactAccConstr`]: keeps contact points still at the acceleration
//!   level
//! - [`PositiveLambdaBound`]: nonnegativity of unilateral force parameters
//! - [`TorqueBound`]: actuator limits over the torque segment
//! - [`ContactForceLimit`]: caps the normal force per unilateral contact
//!   point

use nalgebra::{DMatrix, DVector, Vector3};
use torq_multibody::{param_to_vector, Jacobian, JointDynamics, MultiBody, MultiBodyConfig};

use crate::constraint::{Bound, Constraint, Equality, Inequality};
use crate::contact::FrictionCone;
use crate::data::SolverData;

/// Per contact point work space: its Jacobian, the linear-row scratch, the
/// cone generator matrix, and the point's column offset in the decision
/// vector.
#[derive(Debug, Clone)]
struct ContactPointData {
    jac: Jacobian,
    short: DMatrix<f64>,
    generators: DMatrix<f64>,
    col: usize,
}

fn collect_contact_points(
    mb: &MultiBody,
    data: &SolverData,
    include_manip: bool,
) -> Vec<ContactPointData> {
    let mut points = Vec::new();
    let mut col = data.lambda_begin();

    let mut push = |body_id, point: &Vector3<f64>, cone: &FrictionCone, col: usize| {
        let jac = Jacobian::new(mb, body_id, *point)
            .expect("contact body id not in the robot model");
        let dof = jac.dof();
        points.push(ContactPointData {
            jac,
            short: DMatrix::zeros(3, dof),
            generators: cone.matrix(),
            col,
        });
    };

    for c in data.unilateral_contacts() {
        for (point, cone) in c.points.iter().zip(&c.cones) {
            push(c.body_id, point, cone, col);
            col += cone.nr_generators();
        }
    }
    for c in data.bilateral_contacts() {
        for (point, cone) in c.points.iter().zip(&c.cones) {
            push(c.body_id, point, cone, col);
            col += cone.nr_generators();
        }
    }
    if include_manip {
        for c in data.robot_to_manip_contacts() {
            for (point, cone) in c.points.iter().zip(&c.cones) {
                push(c.body_id, point, cone, col);
                col += cone.nr_generators();
            }
        }
    }
    points
}

// ---------------------------------------------------------------------------
// MotionConstr
// ---------------------------------------------------------------------------

/// Equation of motion as equality rows:
/// `H alphaD - sum_i J_i^T G_i lambda_i - S^T tau = -nle`.
///
/// `S` selects the actuated joints, so the root rows of a floating-base
/// robot are driven purely by contact forces.
pub struct MotionConstr {
    gravity: Vector3<f64>,
    dynamics: Option<JointDynamics>,
    contact_points: Vec<ContactPointData>,
    a: DMatrix<f64>,
    b: DVector<f64>,
    full3: DMatrix<f64>,
    nr_dof: usize,
    root_dof: usize,
    torque_begin: usize,
}

impl MotionConstr {
    pub fn new(gravity: Vector3<f64>) -> Self {
        Self {
            gravity,
            dynamics: None,
            contact_points: Vec::new(),
            a: DMatrix::zeros(0, 0),
            b: DVector::zeros(0),
            full3: DMatrix::zeros(3, 0),
            nr_dof: 0,
            root_dof: 0,
            torque_begin: 0,
        }
    }
}

impl Constraint for MotionConstr {
    fn update_structure(&mut self, mb: &MultiBody, data: &SolverData) {
        self.dynamics = Some(JointDynamics::new(mb));
        self.contact_points = collect_contact_points(mb, data, true);
        self.nr_dof = mb.nr_dof();
        self.root_dof = mb.joint(0).dof();
        self.torque_begin = data.torque_begin();
        self.a = DMatrix::zeros(self.nr_dof, data.nr_vars());
        self.b = DVector::zeros(self.nr_dof);
        self.full3 = DMatrix::zeros(3, self.nr_dof);
    }

    fn update(&mut self, mb: &MultiBody, mbc: &MultiBodyConfig) {
        let dynamics = self
            .dynamics
            .as_mut()
            .expect("update_structure must run before update");

        self.a.fill(0.0);

        let h = dynamics.mass_matrix(mb, mbc);
        self.a
            .view_mut((0, 0), (self.nr_dof, self.nr_dof))
            .copy_from(h);

        let nle = dynamics.nonlinear_effects(mb, mbc, &self.gravity);
        for r in 0..self.nr_dof {
            self.b[r] = -nle[r];
        }

        // -J_p^T G per contact point.
        for cp in &mut self.contact_points {
            cp.jac.jacobian(mb, mbc);
            cp.short.copy_from(&cp.jac.matrix().rows(3, 3));
            cp.jac.full_jacobian(mb, &cp.short, &mut self.full3);
            for k in 0..cp.generators.ncols() {
                for r in 0..self.nr_dof {
                    let mut v = 0.0;
                    for ax in 0..3 {
                        v += self.full3[(ax, r)] * cp.generators[(ax, k)];
                    }
                    self.a[(r, cp.col + k)] = -v;
                }
            }
        }

        // -S^T on the actuated rows.
        for r in self.root_dof..self.nr_dof {
            self.a[(r, self.torque_begin + r - self.root_dof)] = -1.0;
        }
    }
}

impl Equality for MotionConstr {
    fn nr_eq(&self) -> usize {
        self.nr_dof
    }

    fn max_eq(&self) -> usize {
        self.nr_dof
    }

    fn a_eq(&self) -> &DMatrix<f64> {
        &self.a
    }

    fn b_eq(&self) -> &DVector<f64> {
        &self.b
    }
}

// ---------------------------------------------------------------------------
// ContactAccConstr
// ---------------------------------------------------------------------------

/// Zero linear acceleration at every environment contact point:
/// `J_p alphaD = -Jdot_p alpha` (3 rows per point, unilateral then
/// bilateral).
pub struct ContactAccConstr {
    points: Vec<ContactPointData>,
    a: DMatrix<f64>,
    b: DVector<f64>,
    full3: DMatrix<f64>,
    alpha: DVector<f64>,
    nr_dof: usize,
}

impl ContactAccConstr {
    pub fn new() -> Self {
        Self {
            points: Vec::new(),
            a: DMatrix::zeros(0, 0),
            b: DVector::zeros(0),
            full3: DMatrix::zeros(3, 0),
            alpha: DVector::zeros(0),
            nr_dof: 0,
        }
    }
}

impl Default for ContactAccConstr {
    fn default() -> Self {
        Self::new()
    }
}

impl Constraint for ContactAccConstr {
    fn update_structure(&mut self, mb: &MultiBody, data: &SolverData) {
        self.points = collect_contact_points(mb, data, false);
        self.nr_dof = mb.nr_dof();
        let rows = 3 * self.points.len();
        self.a = DMatrix::zeros(rows, data.nr_vars());
        self.b = DVector::zeros(rows);
        self.full3 = DMatrix::zeros(3, self.nr_dof);
        self.alpha = DVector::zeros(self.nr_dof);
    }

    fn update(&mut self, mb: &MultiBody, mbc: &MultiBodyConfig) {
        param_to_vector(mb, &mbc.alpha, &mut self.alpha);
        for (i, cp) in self.points.iter_mut().enumerate() {
            let row = 3 * i;

            cp.jac.jacobian(mb, mbc);
            cp.short.copy_from(&cp.jac.matrix().rows(3, 3));
            cp.jac.full_jacobian(mb, &cp.short, &mut self.full3);
            self.a
                .view_mut((row, 0), (3, self.nr_dof))
                .copy_from(&self.full3);

            cp.jac.jacobian_dot(mb, mbc);
            cp.short.copy_from(&cp.jac.matrix_dot().rows(3, 3));
            cp.jac.full_jacobian(mb, &cp.short, &mut self.full3);
            for r in 0..3 {
                let mut v = 0.0;
                for c in 0..self.nr_dof {
                    v += self.full3[(r, c)] * self.alpha[c];
                }
                self.b[row + r] = -v;
            }
        }
    }
}

impl Equality for ContactAccConstr {
    fn nr_eq(&self) -> usize {
        self.a.nrows()
    }

    fn max_eq(&self) -> usize {
        self.a.nrows()
    }

    fn a_eq(&self) -> &DMatrix<f64> {
        &self.a
    }

    fn b_eq(&self) -> &DVector<f64> {
        &self.b
    }
}

// ---------------------------------------------------------------------------
// PositiveLambdaBound
// ---------------------------------------------------------------------------

/// Bounds over the whole force-parameter segment: unilateral and
/// manipulated-body coefficients are nonnegative, bilateral ones free.
pub struct PositiveLambdaBound {
    begin: usize,
    lower: DVector<f64>,
    upper: DVector<f64>,
}

impl PositiveLambdaBound {
    pub fn new() -> Self {
        Self {
            begin: 0,
            lower: DVector::zeros(0),
            upper: DVector::zeros(0),
        }
    }
}

impl Default for PositiveLambdaBound {
    fn default() -> Self {
        Self::new()
    }
}

impl Constraint for PositiveLambdaBound {
    fn update_structure(&mut self, _mb: &MultiBody, data: &SolverData) {
        self.begin = data.lambda_begin();
        let lambda = data.lambda();
        self.lower = DVector::from_element(lambda, f64::NEG_INFINITY);
        self.upper = DVector::from_element(lambda, f64::INFINITY);
        for i in 0..data.lambda_uni() {
            self.lower[i] = 0.0;
        }
        for i in (data.lambda_uni() + data.lambda_bi())..lambda {
            self.lower[i] = 0.0;
        }
    }

    fn update(&mut self, _mb: &MultiBody, _mbc: &MultiBodyConfig) {}
}

impl Bound for PositiveLambdaBound {
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

// ---------------------------------------------------------------------------
// TorqueBound
// ---------------------------------------------------------------------------

/// Actuator limits written over the torque segment.
///
/// Limits are given per joint (root entries are ignored, the root is
/// unactuated).
pub struct TorqueBound {
    limits_lower: Vec<Vec<f64>>,
    limits_upper: Vec<Vec<f64>>,
    begin: usize,
    lower: DVector<f64>,
    upper: DVector<f64>,
}

impl TorqueBound {
    pub fn new(limits_lower: Vec<Vec<f64>>, limits_upper: Vec<Vec<f64>>) -> Self {
        Self {
            limits_lower,
            limits_upper,
            begin: 0,
            lower: DVector::zeros(0),
            upper: DVector::zeros(0),
        }
    }
}

impl Constraint for TorqueBound {
    fn update_structure(&mut self, mb: &MultiBody, data: &SolverData) {
        assert_eq!(self.limits_lower.len(), mb.nr_joints(), "one limit list per joint");
        assert_eq!(self.limits_upper.len(), mb.nr_joints(), "one limit list per joint");

        self.begin = data.torque_begin();
        self.lower = DVector::zeros(data.torque());
        self.upper = DVector::zeros(data.torque());
        let mut pos = 0;
        for i in 1..mb.nr_joints() {
            for d in 0..mb.joint(i).dof() {
                self.lower[pos] = self.limits_lower[i][d];
                self.upper[pos] = self.limits_upper[i][d];
                pos += 1;
            }
        }
        assert_eq!(pos, data.torque(), "torque limits do not cover the torque segment");
    }

    fn update(&mut self, _mb: &MultiBody, _mbc: &MultiBodyConfig) {}
}

impl Bound for TorqueBound {
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

// ---------------------------------------------------------------------------
// ContactForceLimit
// ---------------------------------------------------------------------------

/// Caps the transmitted normal force of each unilateral contact point:
/// `sum_k lambda_k <= f_max` (one row per point).
///
/// Exact when the point's cone generators have unit normal components, as
/// produced by [`FrictionCone::pyramid`].
pub struct ContactForceLimit {
    f_max: f64,
    a: DMatrix<f64>,
    b: DVector<f64>,
}

impl ContactForceLimit {
    pub fn new(f_max: f64) -> Self {
        assert!(f_max > 0.0, "force limit must be strictly positive");
        Self {
            f_max,
            a: DMatrix::zeros(0, 0),
            b: DVector::zeros(0),
        }
    }
}

impl Constraint for ContactForceLimit {
    fn update_structure(&mut self, _mb: &MultiBody, data: &SolverData) {
        let rows: usize = data
            .unilateral_contacts()
            .iter()
            .map(|c| c.points.len())
            .sum();
        self.a = DMatrix::zeros(rows, data.nr_vars());
        self.b = DVector::from_element(rows, self.f_max);

        let mut row = 0;
        let mut col = data.lambda_begin();
        for c in data.unilateral_contacts() {
            for cone in &c.cones {
                for k in 0..cone.nr_generators() {
                    self.a[(row, col + k)] = 1.0;
                }
                col += cone.nr_generators();
                row += 1;
            }
        }
    }

    fn update(&mut self, _mb: &MultiBody, _mbc: &MultiBodyConfig) {}
}

impl Inequality for ContactForceLimit {
    fn nr_in_eq(&self) -> usize {
        self.a.nrows()
    }

    fn max_in_eq(&self) -> usize {
        self.a.nrows()
    }

    fn a_in_eq(&self) -> &DMatrix<f64> {
        &self.a
    }

    fn b_in_eq(&self) -> &DVector<f64> {
        &self.b
    }
}
