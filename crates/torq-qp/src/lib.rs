//! Whole-body robot control as a single convex QP per tick.
//!
//! Every control step assembles one dense quadratic program over a
//! partitioned decision vector
//!
//! ```text
//! x = [ alphaD | lambda_uni | lambda_bi | lambda_manip | tau ]
//! ```
//!
//! (generalized accelerations, contact-force cone coefficients for the
//! three contact groups, actuated torques), with:
//!
//! 1. **Tasks** ([`Task`], [`SetPointTask`] over the [`tasks`] library)
//!    contributing weighted `J^T J` blocks to the objective
//! 2. **Constraints** ([`Equality`], [`Inequality`], [`Bound`]) filling
//!    dense rows and variable bounds, with
//!    [`MotionConstr`]/[`ContactAccConstr`] covering the dynamics
//! 3. **Back-ends** ([`QpBackend`]) solving the program, with a
//!    feasibility-relaxation ladder where the back-end supports it
//! 4. **Writeback** copying solved accelerations and torques into the
//!    robot configuration and integrating an attached manipulated body
//!
//! The kinematic and dynamic quantities come from the `torq-multibody`
//! oracle. See [`QpSolver`] for the per-tick life cycle.

pub mod backend;
pub mod constraint;
pub mod contact;
pub mod data;
pub mod manip;
pub mod qp_constraints;
pub mod qp_tasks;
pub mod solver;
pub mod tasks;

pub use backend::{BackendKind, ClarabelBackend, QpBackend, QuadprogBackend};
pub use constraint::{Bound, Constraint, Equality, Inequality};
pub use contact::{BilateralContact, FrictionCone, UnilateralContact};
pub use data::SolverData;
pub use manip::{ManipCoMTask, ManipMomTask, VirtualBodyConfig};
pub use qp_constraints::{
    ContactAccConstr, ContactForceLimit, MotionConstr, PositiveLambdaBound, TorqueBound,
};
pub use qp_tasks::{SetPointTask, Task};
pub use solver::QpSolver;
pub use tasks::{
    CoMTask, KinematicTask, LinVelocityTask, MomentumTask, OrientationTask,
    OrientationTrackingTask, PositionTask, PostureTask,
};
