use thiserror::Error;

use crate::body::BodyId;
use crate::joint::JointId;

/// Errors raised while building or querying a multibody model.
///
/// Runtime algorithms (kinematics, Jacobians, dynamics) are total once the
/// model is built; every fallible lookup happens at construction time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MultibodyError {
    #[error("unknown body id: {0:?}")]
    UnknownBodyId(BodyId),

    #[error("unknown joint id: {0:?}")]
    UnknownJointId(JointId),

    #[error("duplicate body id: {0:?}")]
    DuplicateBodyId(BodyId),

    #[error("duplicate joint id: {0:?}")]
    DuplicateJointId(JointId),

    #[error("tree arrays disagree: {bodies} bodies, {joints} joints, {pred} predecessors, {succ} successors, {parent} parents, {transforms} transforms")]
    TreeSizeMismatch {
        bodies: usize,
        joints: usize,
        pred: usize,
        succ: usize,
        parent: usize,
        transforms: usize,
    },

    #[error("joint {joint} references body index {index} out of range ({bodies} bodies)")]
    BadBodyIndex {
        joint: usize,
        index: usize,
        bodies: usize,
    },
}
