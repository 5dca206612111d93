//! Sparse LDL^T factorization over the `ldl` crate.
//!
//! Computes a permutation P, a unit lower triangular L and a diagonal D such
//! that P A P^T = L D L^T, for a symmetric matrix given by its upper triangle
//! in CSR form. The symbolic phase fixes the elimination order once (fill
//! ordering, elimination tree, column counts) and every numeric
//! factorization reuses it.
//!
//! `ldl` does not pivot. Symmetric indefinite matrices whose natural pivot
//! sequence hits a zero (saddle-point systems with a zero block, for
//! instance) are factorized with a small diagonal shift instead, and solves
//! against such a factor are corrected by iterative refinement on the
//! unshifted matrix. A matrix that stays singular after refinement is
//! reported as [`LdltError::ZeroPivot`].

use super::sparse::symmetric_from_upper;
use crate::config::MatrixType;
use crate::pattern::SparsityPattern;
use thiserror::Error;

/// LDL^T errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LdltError {
    /// The matrix is singular (a pivot stayed zero or not finite)
    #[error("zero pivot: matrix is numerically singular")]
    ZeroPivot,

    /// Positive definite factorization met a non-positive pivot
    #[error("non-positive pivot {value} at column {column}")]
    NotPositiveDefinite {
        /// Column in the caller's ordering
        column: usize,
        /// Offending pivot
        value: f64,
    },

    /// Value or vector length does not match the analysed structure
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Elimination tree could not be built for the assembled structure
    #[error("elimination tree rejected the matrix structure")]
    Structure,
}

/// Fill-reducing ordering applied during symbolic analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillOrdering {
    /// Identity permutation.
    Natural,
    /// Reverse Cuthill-McKee (bandwidth reduction).
    #[default]
    ReverseCuthillMcKee,
}

/// Pivot handling for symmetric indefinite matrices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PivotPolicy {
    /// Diagonal shift, relative to the largest matrix entry, applied when
    /// the unshifted factorization meets a zero pivot. Zero disables it.
    pub perturbation: f64,

    /// Pivots smaller than this in magnitude are bumped after factorization.
    pub min_pivot: f64,

    /// Iterative refinement steps for solves against a perturbed factor.
    pub refine_steps: usize,
}

impl Default for PivotPolicy {
    fn default() -> Self {
        Self {
            perturbation: 1e-8,
            min_pivot: 1e-13,
            refine_steps: 10,
        }
    }
}

/// Relative error above which a perturbed factor is treated as singular.
const SINGULAR_TOLERANCE: f64 = 1e-6;

/// Result of the symbolic phase. Depends on the sparsity pattern only.
#[derive(Debug, Clone)]
pub struct SymbolicLdlt {
    n: usize,

    /// Number of caller value positions.
    nnz_in: usize,

    /// perm[new] = old
    perm: Vec<usize>,

    /// Permuted upper triangle in CSC form. Every column ends with its
    /// diagonal entry, stored even when the pattern omits it.
    ap: Vec<usize>,
    ai: Vec<usize>,

    /// Caller value position -> slot in `ai`. `None` for entries below the
    /// diagonal, which an upper view ignores. Duplicates share a slot.
    slot_of: Vec<Option<usize>>,

    /// Elimination tree parent of each column.
    etree: Vec<Option<usize>>,

    /// Strictly lower nonzeros of each column of L.
    l_nz: Vec<usize>,
}

/// Numeric factors for one set of matrix values.
#[derive(Debug, Clone)]
pub struct NumericLdlt {
    lp: Vec<usize>,
    li: Vec<usize>,
    lx: Vec<f64>,
    d: Vec<f64>,
    d_inv: Vec<f64>,

    /// Unshifted permuted values, kept for refinement.
    ax: Vec<f64>,

    /// Diagonal shift the factors were computed with.
    shift: f64,

    /// Pivots replaced after factorization.
    dynamic_bumps: usize,

    refine_steps: usize,
}

impl NumericLdlt {
    /// Diagonal D in the permuted ordering.
    pub fn d(&self) -> &[f64] {
        &self.d
    }

    /// Diagonal shift applied before factorizing (0 when none was needed).
    pub fn shift(&self) -> f64 {
        self.shift
    }

    /// Number of tiny pivots bumped after factorization.
    pub fn dynamic_bumps(&self) -> usize {
        self.dynamic_bumps
    }

    fn is_perturbed(&self) -> bool {
        self.shift != 0.0 || self.dynamic_bumps > 0
    }
}

impl SymbolicLdlt {
    /// Analyse an upper-view CSR pattern.
    ///
    /// Computes the ordering, assembles the permuted upper triangle with the
    /// value-position map, then runs `ldl::etree` for the elimination tree
    /// and the column counts of L.
    pub fn analyze(pattern: &SparsityPattern, ordering: FillOrdering) -> Result<Self, LdltError> {
        let n = pattern.rows();
        let nnz_in = pattern.nnz();

        let perm = match ordering {
            FillOrdering::Natural => (0..n).collect(),
            FillOrdering::ReverseCuthillMcKee => rcm_ordering(pattern),
        };
        let mut iperm = vec![0usize; n];
        for (new, &old) in perm.iter().enumerate() {
            iperm[old] = new;
        }

        // Bucket entries by permuted column, upper triangle only.
        let mut columns: Vec<Vec<(usize, usize)>> = vec![Vec::new(); n];
        for (row, col, p) in pattern.entries() {
            if col < row {
                continue;
            }
            let (a, b) = (iperm[row], iperm[col]);
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            columns[hi].push((lo, p));
        }

        let mut ap = Vec::with_capacity(n + 1);
        let mut ai = Vec::with_capacity(nnz_in + n);
        let mut slot_of = vec![None; nnz_in];
        ap.push(0);
        for (k, entries) in columns.iter_mut().enumerate() {
            entries.sort_unstable();
            let mut last_row = None;
            for &(row, p) in entries.iter() {
                if last_row != Some(row) {
                    ai.push(row);
                    last_row = Some(row);
                }
                slot_of[p] = Some(ai.len() - 1);
            }
            // Rows are sorted and <= k, so a declared diagonal comes last.
            if last_row != Some(k) {
                ai.push(k);
            }
            ap.push(ai.len());
        }

        let mut work = vec![0usize; n];
        let mut l_nz = vec![0usize; n];
        let mut etree = vec![None; n];
        ldl::etree(n, &ap, &ai, &mut work, &mut l_nz, &mut etree).map_err(|_| LdltError::Structure)?;

        Ok(Self {
            n,
            nnz_in,
            perm,
            ap,
            ai,
            slot_of,
            etree,
            l_nz,
        })
    }

    pub fn n(&self) -> usize {
        self.n
    }

    /// Number of strictly lower entries of L (fill included).
    pub fn nnz_l(&self) -> usize {
        self.l_nz.iter().sum()
    }

    /// Fill-reducing permutation, perm[new] = old.
    pub fn perm(&self) -> &[usize] {
        &self.perm
    }

    /// Elimination tree in the permuted ordering.
    pub fn parent(&self) -> &[Option<usize>] {
        &self.etree
    }

    /// Numeric factorization of `values` (one per pattern position).
    ///
    /// For [`MatrixType::Symmetric`] a zero pivot triggers one retry with
    /// the diagonal shifted by `policy.perturbation`; the shifted factor is
    /// kept only if refinement recovers a known solution through it.
    pub fn factorize(
        &self,
        values: &[f64],
        matrix_type: MatrixType,
        policy: &PivotPolicy,
    ) -> Result<NumericLdlt, LdltError> {
        if values.len() != self.nnz_in {
            return Err(LdltError::DimensionMismatch {
                expected: self.nnz_in,
                actual: values.len(),
            });
        }

        let mut ax = vec![0.0; self.ai.len()];
        for (p, slot) in self.slot_of.iter().enumerate() {
            if let Some(s) = *slot {
                ax[s] += values[p];
            }
        }

        let mut factor = match self.factor_shifted(&ax, 0.0, policy) {
            Ok(factor) => factor,
            Err(LdltError::ZeroPivot)
                if matrix_type == MatrixType::Symmetric && policy.perturbation > 0.0 =>
            {
                let scale = ax.iter().fold(1.0f64, |m, v| m.max(v.abs()));
                let shift = policy.perturbation * scale;
                log::debug!("zero pivot, refactorizing with diagonal shift {:e}", shift);
                let factor = self.factor_shifted(&ax, shift, policy)?;
                self.check_recovers_solution(&factor)?;
                factor
            }
            Err(e) => return Err(e),
        };

        if matrix_type == MatrixType::Spd {
            if let Some(k) = factor.d.iter().position(|&dk| dk <= 0.0) {
                return Err(LdltError::NotPositiveDefinite {
                    column: self.perm[k],
                    value: factor.d[k],
                });
            }
        }

        let replacement = (policy.min_pivot * 2e6).min(1e-6);
        for (dk, dk_inv) in factor.d.iter_mut().zip(factor.d_inv.iter_mut()) {
            if dk.abs() < policy.min_pivot {
                *dk = if *dk >= 0.0 { replacement } else { -replacement };
                *dk_inv = 1.0 / *dk;
                factor.dynamic_bumps += 1;
            }
        }
        if factor.dynamic_bumps > 0 {
            log::debug!("{} tiny pivots bumped", factor.dynamic_bumps);
        }

        Ok(factor)
    }

    fn factor_shifted(&self, ax: &[f64], shift: f64, policy: &PivotPolicy) -> Result<NumericLdlt, LdltError> {
        let n = self.n;
        let mut shifted = ax.to_vec();
        if shift != 0.0 {
            for k in 0..n {
                shifted[self.ap[k + 1] - 1] += shift;
            }
        }

        let nnz_l = self.nnz_l();
        let mut lp = vec![0usize; n + 1];
        let mut li = vec![0usize; nnz_l];
        let mut lx = vec![0.0; nnz_l];
        let mut d = vec![0.0; n];
        let mut d_inv = vec![0.0; n];
        let mut bwork = vec![ldl::Marker::Unused; n];
        let mut iwork = vec![0usize; 3 * n];
        let mut fwork = vec![0.0; n];

        ldl::factor(
            n,
            &self.ap,
            &self.ai,
            &shifted,
            &mut lp,
            &mut li,
            &mut lx,
            &mut d,
            &mut d_inv,
            &self.l_nz,
            &self.etree,
            &mut bwork,
            &mut iwork,
            &mut fwork,
        )
        .map_err(|_| LdltError::ZeroPivot)?;

        if d.iter().any(|dk| !dk.is_finite()) {
            return Err(LdltError::ZeroPivot);
        }

        Ok(NumericLdlt {
            lp,
            li,
            lx,
            d,
            d_inv,
            ax: ax.to_vec(),
            shift,
            dynamic_bumps: 0,
            refine_steps: policy.refine_steps,
        })
    }

    /// Solve against a known solution; a singular matrix leaves a component
    /// of it unrecoverable.
    fn check_recovers_solution(&self, factor: &NumericLdlt) -> Result<(), LdltError> {
        let n = self.n as f64;
        let expected: Vec<f64> = (0..self.n).map(|i| 1.0 + i as f64 / n).collect();
        let mut b = vec![0.0; self.n];
        self.permuted_mul(&factor.ax, &expected, &mut b);
        let mut x = b.clone();
        self.refined_solve(factor, &b, &mut x);

        let error = x
            .iter()
            .zip(&expected)
            .fold(0.0f64, |m, (xi, ei)| m.max((xi - ei).abs()));
        // Entries of `expected` lie in [1, 2).
        if error.is_finite() && error <= SINGULAR_TOLERANCE {
            Ok(())
        } else {
            log::debug!("shifted factor misses the reference solution by {:e}", error);
            Err(LdltError::ZeroPivot)
        }
    }

    /// Solve A x = b in place for one column.
    pub fn solve_in_place(&self, factor: &NumericLdlt, x: &mut [f64]) -> Result<(), LdltError> {
        if x.len() != self.n {
            return Err(LdltError::DimensionMismatch {
                expected: self.n,
                actual: x.len(),
            });
        }

        let b: Vec<f64> = self.perm.iter().map(|&old| x[old]).collect();
        let mut y = b.clone();
        if factor.is_perturbed() {
            self.refined_solve(factor, &b, &mut y);
        } else {
            ldl::solve(self.n, &factor.lp, &factor.li, &factor.lx, &factor.d_inv, &mut y);
        }

        for (k, &old) in self.perm.iter().enumerate() {
            x[old] = y[k];
        }
        Ok(())
    }

    /// Solve with the factors, then refine against the unshifted matrix.
    /// `y` holds `b` on entry. Both are in the permuted ordering.
    fn refined_solve(&self, factor: &NumericLdlt, b: &[f64], y: &mut [f64]) {
        let n = self.n;
        ldl::solve(n, &factor.lp, &factor.li, &factor.lx, &factor.d_inv, y);

        let b_norm = norm_inf(b);
        let mut ay = vec![0.0; n];
        let mut r = vec![0.0; n];
        let mut last = f64::INFINITY;
        for _ in 0..factor.refine_steps {
            self.permuted_mul(&factor.ax, y, &mut ay);
            for i in 0..n {
                r[i] = b[i] - ay[i];
            }
            let r_norm = norm_inf(&r);
            if r_norm <= f64::EPSILON * b_norm || r_norm >= last {
                break;
            }
            last = r_norm;
            ldl::solve(n, &factor.lp, &factor.li, &factor.lx, &factor.d_inv, &mut r);
            for (yi, ri) in y.iter_mut().zip(&r) {
                *yi += ri;
            }
        }
    }

    /// y = A x with A given by its permuted upper triangle.
    fn permuted_mul(&self, ax: &[f64], x: &[f64], y: &mut [f64]) {
        y.fill(0.0);
        for j in 0..self.n {
            for p in self.ap[j]..self.ap[j + 1] {
                let i = self.ai[p];
                y[i] += ax[p] * x[j];
                if i != j {
                    y[j] += ax[p] * x[i];
                }
            }
        }
    }
}

fn norm_inf(v: &[f64]) -> f64 {
    v.iter().fold(0.0f64, |m, x| m.max(x.abs()))
}

/// Reverse Cuthill-McKee on the full symmetric structure. Falls back to the
/// identity if the ordering is not a permutation of 0..n.
fn rcm_ordering(pattern: &SparsityPattern) -> Vec<usize> {
    let n = pattern.rows();
    let structure = symmetric_from_upper(pattern, &vec![1.0; pattern.nnz()]);
    let ordering = sprs::linalg::reverse_cuthill_mckee(structure.view());
    let perm: Vec<usize> = ordering.perm.vec();

    let mut seen = vec![false; n];
    let valid = perm.len() == n
        && perm.iter().all(|&i| i < n && !std::mem::replace(&mut seen[i], true));
    if valid {
        perm
    } else {
        log::warn!("reverse Cuthill-McKee returned an invalid permutation, using natural order");
        (0..n).collect()
    }
}
