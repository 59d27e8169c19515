//! Decision-vector bookkeeping shared by tasks, constraints, and the solver.

use torq_multibody::{MultiBody, MultiBodyConfig};

use crate::contact::{BilateralContact, UnilateralContact};

/// Current decomposition of the decision vector and the contact sets it was
/// derived from.
///
/// The decision vector is, in order: generalized accelerations (`alpha_d`
/// entries, extended by 6 when a manipulated body is attached), unilateral,
/// bilateral, and manipulated-body force parameters, then actuated
/// torques. Only
/// [`QpSolver::set_problem_structure`](crate::QpSolver::set_problem_structure)
/// mutates this.
#[derive(Debug, Clone, Default)]
pub struct SolverData {
    pub(crate) alpha_d: usize,
    pub(crate) lambda_uni: usize,
    pub(crate) lambda_bi: usize,
    pub(crate) lambda_manip: usize,
    pub(crate) lambda: usize,
    pub(crate) torque: usize,
    pub(crate) nr_vars: usize,

    pub(crate) uni_contacts: Vec<UnilateralContact>,
    pub(crate) bi_contacts: Vec<BilateralContact>,
    pub(crate) robot_to_manip: Vec<UnilateralContact>,
    pub(crate) manip_to_robot: Vec<UnilateralContact>,

    pub(crate) manip_body: Option<MultiBody>,
    pub(crate) manip_body_config: Option<MultiBodyConfig>,
}

impl SolverData {
    /// Length of the acceleration segment (robot dof, +6 with a
    /// manipulated body attached).
    pub fn alpha_d(&self) -> usize {
        self.alpha_d
    }

    /// Length of the whole force-parameter segment.
    pub fn lambda(&self) -> usize {
        self.lambda
    }

    pub fn lambda_uni(&self) -> usize {
        self.lambda_uni
    }

    pub fn lambda_bi(&self) -> usize {
        self.lambda_bi
    }

    pub fn lambda_manip(&self) -> usize {
        self.lambda_manip
    }

    /// Length of the actuated-torque segment.
    pub fn torque(&self) -> usize {
        self.torque
    }

    /// Total decision-vector length.
    pub fn nr_vars(&self) -> usize {
        self.nr_vars
    }

    /// Offset of the force-parameter segment in the decision vector.
    pub fn lambda_begin(&self) -> usize {
        self.alpha_d
    }

    /// Offset of the torque segment in the decision vector.
    pub fn torque_begin(&self) -> usize {
        self.alpha_d + self.lambda
    }

    pub fn unilateral_contacts(&self) -> &[UnilateralContact] {
        &self.uni_contacts
    }

    pub fn bilateral_contacts(&self) -> &[BilateralContact] {
        &self.bi_contacts
    }

    pub fn robot_to_manip_contacts(&self) -> &[UnilateralContact] {
        &self.robot_to_manip
    }

    pub fn manip_to_robot_contacts(&self) -> &[UnilateralContact] {
        &self.manip_to_robot
    }

    pub fn manip_body(&self) -> Option<&MultiBody> {
        self.manip_body.as_ref()
    }

    pub fn manip_body_config(&self) -> Option<&MultiBodyConfig> {
        self.manip_body_config.as_ref()
    }
}
