//! Rigid bodies and their inertial parameters.

use nalgebra::{Matrix3, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// User-chosen identifier of a body, stable across model edits.
///
/// Ids are arbitrary; indices into [`MultiBody`](crate::MultiBody) arrays
/// are resolved through `body_index_by_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BodyId(pub i32);

/// A rigid body: mass, CoM offset, and rotational inertia about the CoM.
///
/// The CoM offset and the inertia tensor are expressed in the body frame.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Body {
    /// Stable identifier.
    pub id: BodyId,
    /// Human-readable name (diagnostics only).
    pub name: String,
    /// Mass in kg.
    pub mass: f64,
    /// Center of mass in the body frame (m).
    pub com: Vector3<f64>,
    /// Rotational inertia about the CoM, body frame (kg m^2).
    pub inertia: Matrix3<f64>,
}

impl Body {
    /// Create a body from its inertial parameters.
    pub fn new(
        id: BodyId,
        name: impl Into<String>,
        mass: f64,
        com: Vector3<f64>,
        inertia: Matrix3<f64>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            mass,
            com,
            inertia,
        }
    }

    /// A massless body, useful as a tree root or a frame placeholder.
    pub fn massless(id: BodyId, name: impl Into<String>) -> Self {
        Self::new(id, name, 0.0, Vector3::zeros(), Matrix3::zeros())
    }

    /// A point mass at `com` (no rotational inertia of its own).
    pub fn point_mass(id: BodyId, name: impl Into<String>, mass: f64, com: Vector3<f64>) -> Self {
        Self::new(id, name, mass, com, Matrix3::zeros())
    }
}
