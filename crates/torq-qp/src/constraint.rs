//! QP-facing constraint contracts.
//!
//! A constraint object implements [`Constraint`] (the per-tick refresh
//! hook) plus any of the three row-producing roles. A single object may
//! implement several roles; register it once as a generic constraint and
//! once per role.

use nalgebra::{DMatrix, DVector};
use torq_multibody::{MultiBody, MultiBodyConfig};

use crate::data::SolverData;

/// Per-tick refresh hook shared by every constraint.
pub trait Constraint {
    /// Called whenever the decision vector changes shape.
    fn update_structure(&mut self, mb: &MultiBody, data: &SolverData);
    /// Called once per tick before the matrices are read.
    fn update(&mut self, mb: &MultiBody, mbc: &MultiBodyConfig);
}

/// Produces dense equality rows `A1 x = b1`.
///
/// Storage is sized by [`max_eq`](Equality::max_eq); only the first
/// [`nr_eq`](Equality::nr_eq) rows are consumed on a given tick.
pub trait Equality: Constraint {
    fn nr_eq(&self) -> usize;
    fn max_eq(&self) -> usize;
    fn a_eq(&self) -> &DMatrix<f64>;
    fn b_eq(&self) -> &DVector<f64>;
}

/// Produces dense inequality rows `A2 x <= b2`.
pub trait Inequality: Constraint {
    fn nr_in_eq(&self) -> usize;
    fn max_in_eq(&self) -> usize;
    fn a_in_eq(&self) -> &DMatrix<f64>;
    fn b_in_eq(&self) -> &DVector<f64>;
}

/// Writes variable bounds starting at [`begin_var`](Bound::begin_var).
///
/// Lower and upper must have the same length. Overlapping bound writers
/// are resolved last-write-wins by the solver.
pub trait Bound: Constraint {
    fn begin_var(&self) -> usize;
    fn lower(&self) -> &DVector<f64>;
    fn upper(&self) -> &DVector<f64>;
}
