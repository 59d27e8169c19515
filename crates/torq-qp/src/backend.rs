//! Dense QP back-ends behind one trait.
//!
//! Two back-ends are provided:
//!
//! - [`ClarabelBackend`]: interior-point (pure Rust), accepts a feasibility
//!   tolerance, so the solver runs its relaxation ladder against it
//! - [`QuadprogBackend`]: Goldfarb-Idnani dense active set (pure Rust), no
//!   tolerance knob, one shot per tick
//!
//! Both consume the same problem form:
//! `min 1/2 x^T Q x + c^T x` s.t. `A1 x = b1`, `A2 x <= b2`,
//! `xl <= x <= xu`.

use clarabel::algebra::CscMatrix;
use clarabel::solver::{
    DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus,
    SupportedConeT::{NonnegativeConeT, ZeroConeT},
};
use nalgebra::{DMatrix, DMatrixView, DVector, DVectorView};

/// Which back-end a solver should construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Interior-point, tolerance-accepting.
    Clarabel,
    /// Dense active-set, tolerance-less.
    Quadprog,
}

impl BackendKind {
    pub fn make(self) -> Box<dyn QpBackend> {
        match self {
            Self::Clarabel => Box::new(ClarabelBackend::new()),
            Self::Quadprog => Box::new(QuadprogBackend::new()),
        }
    }
}

/// A dense QP routine the solver can dispatch to.
pub trait QpBackend {
    /// Announce the problem dimensions; called on every structure change.
    fn problem(&mut self, nr_vars: usize, nr_eq: usize, nr_in_eq: usize);

    /// Solve one instance. `tol` is a feasibility tolerance for back-ends
    /// that consume one; the rest must ignore it.
    #[allow(clippy::too_many_arguments)]
    fn solve(
        &mut self,
        q: &DMatrix<f64>,
        c: &DVector<f64>,
        a_eq: DMatrixView<f64>,
        b_eq: DVectorView<f64>,
        a_in_eq: DMatrixView<f64>,
        b_in_eq: DVectorView<f64>,
        xl: &DVector<f64>,
        xu: &DVector<f64>,
        tol: Option<f64>,
    ) -> bool;

    /// Solution of the last successful [`solve`](QpBackend::solve).
    fn result(&self) -> &DVector<f64>;

    /// Whether [`solve`](QpBackend::solve) consumes the tolerance; decides
    /// if the relaxation ladder applies.
    fn accepts_tolerance(&self) -> bool;

    /// Suppress diagnostic output where supported.
    fn set_silent(&mut self, silent: bool) {
        let _ = silent;
    }

    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// ClarabelBackend
// ---------------------------------------------------------------------------

/// Clarabel adapter: equalities map to the zero cone, inequalities and
/// finite variable bounds to the nonnegative cone.
pub struct ClarabelBackend {
    result: DVector<f64>,
    silent: bool,
    max_iter: u32,
}

impl ClarabelBackend {
    pub fn new() -> Self {
        Self {
            result: DVector::zeros(0),
            silent: true,
            max_iter: 200,
        }
    }
}

impl Default for ClarabelBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl QpBackend for ClarabelBackend {
    fn problem(&mut self, nr_vars: usize, _nr_eq: usize, _nr_in_eq: usize) {
        if self.result.len() != nr_vars {
            self.result = DVector::zeros(nr_vars);
        }
    }

    fn solve(
        &mut self,
        q: &DMatrix<f64>,
        c: &DVector<f64>,
        a_eq: DMatrixView<f64>,
        b_eq: DVectorView<f64>,
        a_in_eq: DMatrixView<f64>,
        b_in_eq: DVectorView<f64>,
        xl: &DVector<f64>,
        xu: &DVector<f64>,
        tol: Option<f64>,
    ) -> bool {
        let n = q.nrows();
        let n_eq = a_eq.nrows();
        let n_in_eq = a_in_eq.nrows();

        // Stack rows: equalities, inequalities, then finite bounds as
        // inequality rows ( x <= xu and -x <= -xl ).
        let mut bound_rows = 0;
        for i in 0..n {
            if xu[i].is_finite() {
                bound_rows += 1;
            }
            if xl[i].is_finite() {
                bound_rows += 1;
            }
        }

        let mut a = DMatrix::zeros(n_eq + n_in_eq + bound_rows, n);
        let mut b = DVector::zeros(n_eq + n_in_eq + bound_rows);
        a.view_mut((0, 0), (n_eq, n)).copy_from(&a_eq);
        b.rows_mut(0, n_eq).copy_from(&b_eq);
        a.view_mut((n_eq, 0), (n_in_eq, n)).copy_from(&a_in_eq);
        b.rows_mut(n_eq, n_in_eq).copy_from(&b_in_eq);

        let mut row = n_eq + n_in_eq;
        for i in 0..n {
            if xu[i].is_finite() {
                a[(row, i)] = 1.0;
                b[row] = xu[i];
                row += 1;
            }
            if xl[i].is_finite() {
                a[(row, i)] = -1.0;
                b[row] = -xl[i];
                row += 1;
            }
        }

        let p_csc = pack_csc(q, CscShape::UpperTriangle);
        let a_csc = pack_csc(&a, CscShape::Full);
        let cones = vec![ZeroConeT(n_eq), NonnegativeConeT(n_in_eq + bound_rows)];

        let mut settings = DefaultSettingsBuilder::default();
        settings.max_iter(self.max_iter).verbose(!self.silent);
        if let Some(tol) = tol {
            settings.tol_feas(tol);
        }
        let settings = settings.build().expect("valid solver settings");

        let c_slice: Vec<f64> = c.iter().copied().collect();
        let b_slice: Vec<f64> = b.iter().copied().collect();

        let mut solver =
            DefaultSolver::new(&p_csc, &c_slice, &a_csc, &b_slice, &cones, settings);
        solver.solve();
        let sol = &solver.solution;
        let converged = matches!(
            sol.status,
            SolverStatus::Solved | SolverStatus::AlmostSolved
        );
        if converged {
            for i in 0..n {
                self.result[i] = sol.x[i];
            }
        }
        converged
    }

    fn result(&self) -> &DVector<f64> {
        &self.result
    }

    fn accepts_tolerance(&self) -> bool {
        true
    }

    fn set_silent(&mut self, silent: bool) {
        self.silent = silent;
    }

    fn name(&self) -> &str {
        "clarabel"
    }
}

// ---------------------------------------------------------------------------
// QuadprogBackend
// ---------------------------------------------------------------------------

/// Goldfarb-Idnani adapter. The routine wants one constraint per column
/// (equalities first) and destroys the Hessian, so both are staged into
/// owned buffers.
pub struct QuadprogBackend {
    result: DVector<f64>,
    qbuf: Vec<f64>,
    abuf: Vec<f64>,
    bbuf: Vec<f64>,
}

impl QuadprogBackend {
    pub fn new() -> Self {
        Self {
            result: DVector::zeros(0),
            qbuf: Vec::new(),
            abuf: Vec::new(),
            bbuf: Vec::new(),
        }
    }
}

impl Default for QuadprogBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl QpBackend for QuadprogBackend {
    fn problem(&mut self, nr_vars: usize, _nr_eq: usize, _nr_in_eq: usize) {
        if self.result.len() != nr_vars {
            self.result = DVector::zeros(nr_vars);
        }
    }

    fn solve(
        &mut self,
        q: &DMatrix<f64>,
        c: &DVector<f64>,
        a_eq: DMatrixView<f64>,
        b_eq: DVectorView<f64>,
        a_in_eq: DMatrixView<f64>,
        b_in_eq: DVectorView<f64>,
        xl: &DVector<f64>,
        xu: &DVector<f64>,
        _tol: Option<f64>,
    ) -> bool {
        let n = q.nrows();
        let n_eq = a_eq.nrows();
        let n_in_eq = a_in_eq.nrows();

        self.qbuf.clear();
        self.qbuf.extend(q.iter());

        // One column (n contiguous values) per constraint, equalities first.
        self.abuf.clear();
        self.bbuf.clear();
        for r in 0..n_eq {
            for i in 0..n {
                self.abuf.push(a_eq[(r, i)]);
            }
            self.bbuf.push(b_eq[r]);
        }
        for r in 0..n_in_eq {
            for i in 0..n {
                self.abuf.push(a_in_eq[(r, i)]);
            }
            self.bbuf.push(b_in_eq[r]);
        }
        for i in 0..n {
            if xu[i].is_finite() {
                for j in 0..n {
                    self.abuf.push(if i == j { 1.0 } else { 0.0 });
                }
                self.bbuf.push(xu[i]);
            }
            if xl[i].is_finite() {
                for j in 0..n {
                    self.abuf.push(if i == j { -1.0 } else { 0.0 });
                }
                self.bbuf.push(-xl[i]);
            }
        }

        let c_slice: Vec<f64> = c.iter().copied().collect();
        match quadprog::solve_qp(&mut self.qbuf, &c_slice, &self.abuf, &self.bbuf, n_eq, false) {
            Ok(solution) => {
                for (i, v) in solution.sol.iter().enumerate() {
                    self.result[i] = *v;
                }
                true
            }
            Err(_) => false,
        }
    }

    fn result(&self) -> &DVector<f64> {
        &self.result
    }

    fn accepts_tolerance(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "quadprog"
    }
}

// ---------------------------------------------------------------------------
// Dense to CSC packing
// ---------------------------------------------------------------------------

/// Which part of a dense matrix to emit when packing to sparse.
#[derive(Clone, Copy)]
enum CscShape {
    /// Every entry (constraint matrices).
    Full,
    /// Upper triangle only, as Clarabel wants symmetric cost matrices.
    UpperTriangle,
}

/// Pack a dense matrix into Clarabel's compressed sparse column format.
///
/// The assembled matrices are mostly structural zeros, so only exact
/// nonzeros are emitted; the regularized cost diagonal always survives.
fn pack_csc(dense: &DMatrix<f64>, shape: CscShape) -> CscMatrix<f64> {
    let (rows, cols) = dense.shape();
    let mut col_starts = Vec::with_capacity(cols + 1);
    let mut row_indices = Vec::new();
    let mut values = Vec::new();

    col_starts.push(0);
    for (c, col) in dense.column_iter().enumerate() {
        let keep = match shape {
            CscShape::Full => rows,
            CscShape::UpperTriangle => (c + 1).min(rows),
        };
        for (r, &v) in col.iter().take(keep).enumerate() {
            if v != 0.0 {
                row_indices.push(r);
                values.push(v);
            }
        }
        col_starts.push(values.len());
    }

    CscMatrix::new(rows, cols, col_starts, row_indices, values)
}
