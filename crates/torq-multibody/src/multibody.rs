//! Kinematic tree topology.

use std::collections::HashMap;

use nalgebra::Isometry3;

use crate::body::{Body, BodyId};
use crate::error::MultibodyError;
use crate::joint::{Joint, JointId, JointType};

/// An articulated rigid-body tree.
///
/// Bodies and joints are stored in the same order: joint `i` attaches body
/// `i` (its successor) to body `pred[i]` (its predecessor, `None` for the
/// root). `transforms[i]` is the fixed transform from the predecessor body
/// frame to the frame of joint `i`; the successor body frame coincides with
/// the joint frame after joint motion.
///
/// The topology is immutable once built; per-tick state lives in
/// [`MultiBodyConfig`](crate::MultiBodyConfig).
#[derive(Debug, Clone)]
pub struct MultiBody {
    bodies: Vec<Body>,
    joints: Vec<Joint>,
    pred: Vec<Option<usize>>,
    succ: Vec<usize>,
    parent: Vec<Option<usize>>,
    transforms: Vec<Isometry3<f64>>,

    body_index: HashMap<BodyId, usize>,
    joint_index: HashMap<JointId, usize>,
    joint_pos_in_dof: Vec<usize>,
    joint_pos_in_param: Vec<usize>,
    nr_dof: usize,
    nr_params: usize,
}

impl MultiBody {
    /// Build a tree from its arrays. All arrays must have the same length,
    /// with bodies ordered so that every predecessor index is valid.
    pub fn new(
        bodies: Vec<Body>,
        joints: Vec<Joint>,
        pred: Vec<Option<usize>>,
        succ: Vec<usize>,
        parent: Vec<Option<usize>>,
        transforms: Vec<Isometry3<f64>>,
    ) -> Result<Self, MultibodyError> {
        let n = bodies.len();
        if joints.len() != n
            || pred.len() != n
            || succ.len() != n
            || parent.len() != n
            || transforms.len() != n
        {
            return Err(MultibodyError::TreeSizeMismatch {
                bodies: n,
                joints: joints.len(),
                pred: pred.len(),
                succ: succ.len(),
                parent: parent.len(),
                transforms: transforms.len(),
            });
        }

        for (i, p) in pred.iter().enumerate() {
            if let Some(p) = p {
                // Predecessors must come earlier: kinematic passes are single
                // sweeps in storage order.
                if *p >= i {
                    return Err(MultibodyError::BadBodyIndex {
                        joint: i,
                        index: *p,
                        bodies: n,
                    });
                }
            }
        }
        for (i, s) in succ.iter().enumerate() {
            if *s >= n {
                return Err(MultibodyError::BadBodyIndex {
                    joint: i,
                    index: *s,
                    bodies: n,
                });
            }
        }

        let mut body_index = HashMap::with_capacity(n);
        for (i, b) in bodies.iter().enumerate() {
            if body_index.insert(b.id, i).is_some() {
                return Err(MultibodyError::DuplicateBodyId(b.id));
            }
        }
        let mut joint_index = HashMap::with_capacity(n);
        for (i, j) in joints.iter().enumerate() {
            if joint_index.insert(j.id, i).is_some() {
                return Err(MultibodyError::DuplicateJointId(j.id));
            }
        }

        let mut joint_pos_in_dof = Vec::with_capacity(n);
        let mut joint_pos_in_param = Vec::with_capacity(n);
        let mut nr_dof = 0;
        let mut nr_params = 0;
        for j in &joints {
            joint_pos_in_dof.push(nr_dof);
            joint_pos_in_param.push(nr_params);
            nr_dof += j.dof();
            nr_params += j.nr_params();
        }

        Ok(Self {
            bodies,
            joints,
            pred,
            succ,
            parent,
            transforms,
            body_index,
            joint_index,
            joint_pos_in_dof,
            joint_pos_in_param,
            nr_dof,
            nr_params,
        })
    }

    pub fn nr_bodies(&self) -> usize {
        self.bodies.len()
    }

    pub fn nr_joints(&self) -> usize {
        self.joints.len()
    }

    /// Total velocity degrees of freedom.
    pub fn nr_dof(&self) -> usize {
        self.nr_dof
    }

    /// Total position parameters.
    pub fn nr_params(&self) -> usize {
        self.nr_params
    }

    pub fn body(&self, index: usize) -> &Body {
        &self.bodies[index]
    }

    pub fn joint(&self, index: usize) -> &Joint {
        &self.joints[index]
    }

    pub fn bodies(&self) -> &[Body] {
        &self.bodies
    }

    pub fn joints(&self) -> &[Joint] {
        &self.joints
    }

    pub fn predecessors(&self) -> &[Option<usize>] {
        &self.pred
    }

    pub fn successors(&self) -> &[usize] {
        &self.succ
    }

    pub fn parents(&self) -> &[Option<usize>] {
        &self.parent
    }

    pub fn transforms(&self) -> &[Isometry3<f64>] {
        &self.transforms
    }

    pub fn predecessor(&self, joint: usize) -> Option<usize> {
        self.pred[joint]
    }

    pub fn transform(&self, joint: usize) -> &Isometry3<f64> {
        &self.transforms[joint]
    }

    pub fn body_index_by_id(&self, id: BodyId) -> Result<usize, MultibodyError> {
        self.body_index
            .get(&id)
            .copied()
            .ok_or(MultibodyError::UnknownBodyId(id))
    }

    pub fn joint_index_by_id(&self, id: JointId) -> Result<usize, MultibodyError> {
        self.joint_index
            .get(&id)
            .copied()
            .ok_or(MultibodyError::UnknownJointId(id))
    }

    /// Offset of joint `index` in dof-indexed vectors (alpha, torque, ...).
    pub fn joint_pos_in_dof(&self, index: usize) -> usize {
        self.joint_pos_in_dof[index]
    }

    /// Offset of joint `index` in parameter-indexed vectors (q).
    pub fn joint_pos_in_param(&self, index: usize) -> usize {
        self.joint_pos_in_param[index]
    }

    /// Whether the root joint is a 6-dof free flyer.
    pub fn has_free_flyer_root(&self) -> bool {
        matches!(self.joints.first().map(|j| &j.joint_type), Some(JointType::Free))
    }

    /// Chain of joint indices from the root to `body`, inclusive.
    pub fn joints_path(&self, body: usize) -> Vec<usize> {
        let mut path = Vec::new();
        let mut cur = Some(body);
        while let Some(i) = cur {
            path.push(i);
            cur = self.pred[i];
        }
        path.reverse();
        path
    }

    /// Total mass of the tree.
    pub fn total_mass(&self) -> f64 {
        self.bodies.iter().map(|b| b.mass).sum()
    }
}
