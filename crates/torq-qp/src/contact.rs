//! Contact descriptions: bodies, points, and linearized friction cones.
//!
//! Contact forces enter the QP through their cone parameterization: the
//! force at a contact point is `G lambda` with `G` the generator matrix of
//! the point's friction cone. Unilateral contacts restrict `lambda >= 0`;
//! bilateral contacts carry both cone orientations so the combination is
//! sign-free.

use nalgebra::{DMatrix, Vector3};
use torq_multibody::BodyId;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A linearized friction cone: columns of extremal rays.
///
/// Any admissible contact force at the point is a nonnegative combination
/// of the generators.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FrictionCone {
    pub generators: Vec<Vector3<f64>>,
}

impl FrictionCone {
    pub fn new(generators: Vec<Vector3<f64>>) -> Self {
        Self { generators }
    }

    /// Regular pyramid around `normal`: `nr_generators` rays
    /// `n + mu (cos t_i, sin t_i)` spread over the tangent plane.
    ///
    /// Each ray has unit normal component, so the sum of the lambdas equals
    /// the transmitted normal force.
    pub fn pyramid(normal: Vector3<f64>, nr_generators: usize, mu: f64) -> Self {
        assert!(nr_generators >= 3, "a cone needs at least 3 generators");
        let n = normal.normalize();
        // Any unit vector orthogonal to n.
        let t1 = if n.x.abs() < 0.9 {
            n.cross(&Vector3::x()).normalize()
        } else {
            n.cross(&Vector3::y()).normalize()
        };
        let t2 = n.cross(&t1);

        let generators = (0..nr_generators)
            .map(|i| {
                let theta = 2.0 * std::f64::consts::PI * i as f64 / nr_generators as f64;
                n + mu * (theta.cos() * t1 + theta.sin() * t2)
            })
            .collect();
        Self { generators }
    }

    pub fn nr_generators(&self) -> usize {
        self.generators.len()
    }

    /// Dense 3 x k generator matrix.
    pub fn matrix(&self) -> DMatrix<f64> {
        let mut m = DMatrix::zeros(3, self.generators.len());
        for (c, g) in self.generators.iter().enumerate() {
            m[(0, c)] = g.x;
            m[(1, c)] = g.y;
            m[(2, c)] = g.z;
        }
        m
    }

    /// Force produced by the coefficients `lambda` (`G lambda`).
    pub fn force(&self, lambda: &[f64]) -> Vector3<f64> {
        debug_assert_eq!(lambda.len(), self.generators.len());
        self.generators
            .iter()
            .zip(lambda)
            .map(|(g, l)| g * *l)
            .sum()
    }
}

/// A unilateral contact: one body, several points, one cone per point.
///
/// The associated force parameters are constrained nonnegative.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct UnilateralContact {
    pub body_id: BodyId,
    /// Contact points in the body frame.
    pub points: Vec<Vector3<f64>>,
    /// One friction cone per point, world frame.
    pub cones: Vec<FrictionCone>,
}

impl UnilateralContact {
    pub fn new(body_id: BodyId, points: Vec<Vector3<f64>>, cones: Vec<FrictionCone>) -> Self {
        assert_eq!(points.len(), cones.len(), "one cone per contact point");
        Self {
            body_id,
            points,
            cones,
        }
    }

    /// Force parameters of point `i`.
    pub fn nr_lambda(&self, i: usize) -> usize {
        self.cones[i].nr_generators()
    }

    /// Force parameters over all points.
    pub fn nr_lambda_total(&self) -> usize {
        self.cones.iter().map(FrictionCone::nr_generators).sum()
    }
}

/// A bilateral contact: the sign-free variant.
///
/// Built from the same cones as a unilateral contact, with every generator
/// mirrored so that nonnegative coefficients span both half-spaces.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BilateralContact {
    pub body_id: BodyId,
    pub points: Vec<Vector3<f64>>,
    pub cones: Vec<FrictionCone>,
}

impl BilateralContact {
    /// Mirror each cone's generators so the contact can push and pull.
    pub fn new(body_id: BodyId, points: Vec<Vector3<f64>>, cones: Vec<FrictionCone>) -> Self {
        assert_eq!(points.len(), cones.len(), "one cone per contact point");
        let cones = cones
            .into_iter()
            .map(|c| {
                let mut generators = c.generators.clone();
                generators.extend(c.generators.iter().map(|g| -g));
                FrictionCone::new(generators)
            })
            .collect();
        Self {
            body_id,
            points,
            cones,
        }
    }

    pub fn nr_lambda(&self, i: usize) -> usize {
        self.cones[i].nr_generators()
    }

    pub fn nr_lambda_total(&self) -> usize {
        self.cones.iter().map(FrictionCone::nr_generators).sum()
    }
}
