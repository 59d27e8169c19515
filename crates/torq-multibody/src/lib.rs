//! Rigid multibody kinematics and joint-space dynamics.
//!
//! This crate is the kinematic oracle behind the `torq-qp` whole-body
//! controller. It models an articulated robot as a kinematic tree of
//! [`Body`]s connected by [`Joint`]s, with the mutable per-tick state kept
//! in a separate [`MultiBodyConfig`]:
//!
//! 1. **Topology** — [`MultiBody`] owns bodies, joints, and the tree arrays
//!    (predecessor, successor, parent, fixed transforms)
//! 2. **State** — [`MultiBodyConfig`] owns joint positions, velocities,
//!    accelerations, torques, and the cached world poses/velocities
//! 3. **Algorithms** — forward kinematics/velocity, geometric Jacobians and
//!    their time derivatives, CoM and centroidal momentum quantities, the
//!    joint-space mass matrix and nonlinear effects, and semi-implicit
//!    Euler integration
//!
//! All world-frame spatial quantities follow one convention: 6D vectors
//! stack the angular part on top of the linear part, and Jacobians map the
//! generalized velocity to `(ω, v)` of a body-fixed point expressed in the
//! world frame.

pub mod body;
pub mod com;
pub mod config;
pub mod dynamics;
pub mod error;
pub mod integration;
pub mod jacobian;
pub mod joint;
pub mod kinematics;
pub mod momentum;
pub mod multibody;
pub mod rotation;

pub use body::{Body, BodyId};
pub use com::{compute_com, compute_com_velocity, CoMJacobian};
pub use config::{vector_to_param, param_to_vector, MultiBodyConfig, SpatialVelocity};
pub use dynamics::JointDynamics;
pub use error::MultibodyError;
pub use integration::euler_integration;
pub use jacobian::Jacobian;
pub use joint::{Joint, JointId, JointType};
pub use kinematics::{forward_kinematics, forward_velocity};
pub use momentum::{compute_centroidal_momentum, CentroidalMomentumMatrix};
pub use multibody::MultiBody;
pub use rotation::rotation_error;
