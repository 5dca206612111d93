//! Sparse matrix helpers.
//!
//! The engine stores only the upper triangle of a symmetric matrix; these
//! helpers expand it into full `sprs` storage for orderings and residual
//! checks.

use crate::pattern::SparsityPattern;
use sprs::{CsMat, TriMat};

/// Full symmetric matrix in CSR format.
pub type SparseCsr = CsMat<f64>;

/// Expand an upper-view CSR pattern and its values into a full symmetric
/// matrix. Entries below the diagonal are ignored and duplicates are summed,
/// matching what an upper-view solver sees.
pub fn symmetric_from_upper(pattern: &SparsityPattern, values: &[f64]) -> SparseCsr {
    assert_eq!(values.len(), pattern.nnz(), "one value per declared entry");

    let n = pattern.rows();
    let mut tri = TriMat::new((n, n));
    for (row, col, p) in pattern.entries() {
        if col < row {
            continue;
        }
        tri.add_triplet(row, col, values[p]);
        if col != row {
            tri.add_triplet(col, row, values[p]);
        }
    }
    tri.to_csr()
}

/// Sparse matrix-vector product: y = A * x
pub fn spmv(a: &SparseCsr, x: &[f64], y: &mut [f64]) {
    assert_eq!(a.cols(), x.len());
    assert_eq!(a.rows(), y.len());

    y.fill(0.0);
    for (val, (row, col)) in a.iter() {
        y[row] += *val * x[col];
    }
}

/// Euclidean norm of A * x - b.
pub fn residual_norm(a: &SparseCsr, x: &[f64], b: &[f64]) -> f64 {
    let mut ax = vec![0.0; a.rows()];
    spmv(a, x, &mut ax);
    ax.iter()
        .zip(b)
        .map(|(ai, bi)| (ai - bi) * (ai - bi))
        .sum::<f64>()
        .sqrt()
}
