//! End-to-end tests of the factorization engine on the CPU device.
//!
//! These follow the caller's view: structure once, then write values into
//! the host mirror and solve batches of right-hand sides.

use dss_core::device::host::{HostConfig, HostDevice};
use dss_core::linalg::ldlt::FillOrdering;
use dss_core::linalg::sparse::{residual_norm, symmetric_from_upper};
use dss_core::{
    EngineConfig, EngineError, EngineState, FactorizationEngine, MatrixType, SparsityPattern,
};
use proptest::prelude::*;

type Engine = FactorizationEngine<f64, HostDevice>;

/// Upper-triangular CSR of a banded symmetric matrix.
struct Banded {
    n: usize,
    row_ptr: Vec<usize>,
    col_ind: Vec<usize>,
}

impl Banded {
    fn new(n: usize, band: usize) -> Self {
        let mut row_ptr = vec![0];
        let mut col_ind = Vec::new();
        for row in 0..n {
            for col in row..(row + band + 1).min(n) {
                col_ind.push(col);
            }
            row_ptr.push(col_ind.len());
        }
        Self {
            n,
            row_ptr,
            col_ind,
        }
    }

    fn nnz(&self) -> usize {
        self.col_ind.len()
    }

    fn pattern(&self) -> SparsityPattern {
        SparsityPattern::new(self.n, self.nnz(), &self.row_ptr, &self.col_ind).unwrap()
    }

    /// `diag` on the diagonal, `off(p)` at off-diagonal position p.
    fn values(&self, diag: f64, off: impl Fn(usize) -> f64) -> Vec<f64> {
        let mut values = vec![0.0; self.nnz()];
        for row in 0..self.n {
            for p in self.row_ptr[row]..self.row_ptr[row + 1] {
                values[p] = if self.col_ind[p] == row { diag } else { off(p) };
            }
        }
        values
    }

    fn engine(&self, host: HostConfig) -> Engine {
        let mut engine = FactorizationEngine::host(EngineConfig::default(), host);
        engine
            .structural_setup(self.n, self.nnz(), &self.row_ptr, &self.col_ind)
            .expect("structural setup failed");
        engine
    }

    fn residual(&self, values: &[f64], x: &[f64], b: &[f64]) -> f64 {
        let a = symmetric_from_upper(&self.pattern(), values);
        residual_norm(&a, x, b)
    }
}

fn column(data: &[f64], n: usize, j: usize) -> &[f64] {
    &data[j * n..(j + 1) * n]
}

#[test]
fn test_two_by_two_scenario() {
    let mut engine: Engine = FactorizationEngine::host(EngineConfig::default(), HostConfig::default());
    engine.structural_setup(2, 3, &[0, 2, 3], &[0, 1, 1]).unwrap();
    engine.host_values_mut().unwrap().copy_from_slice(&[2.0, 1.0, 3.0]);

    let mut rhs = [1.0, 1.0];
    engine.solve(true, 1, &mut rhs).unwrap();

    assert!((rhs[0] - 0.4).abs() < 1e-12, "x[0] = {}", rhs[0]);
    assert!((rhs[1] - 0.2).abs() < 1e-12, "x[1] = {}", rhs[1]);
    assert_eq!(engine.state(), EngineState::Solved);
}

#[test]
fn test_saddle_point_system_with_zero_block() {
    // [ H  A^T ]   H = 4 I (3x3), A = [1 1 1], zero (3, 3) block not stored.
    // [ A  0   ]
    let row_ptr = [0, 2, 4, 6, 6];
    let col_ind = [0, 3, 1, 3, 2, 3];
    let values = [4.0, 1.0, 4.0, 1.0, 4.0, 1.0];
    let mut engine: Engine = FactorizationEngine::host(EngineConfig::default(), HostConfig::default());
    engine.structural_setup(4, 6, &row_ptr, &col_ind).unwrap();
    engine.host_values_mut().unwrap().copy_from_slice(&values);

    // x = [1, 2, 3], multiplier -1
    let b = [3.0, 7.0, 11.0, 6.0];
    let mut x = b;
    engine.solve(true, 1, &mut x).unwrap();
    for (got, want) in x.iter().zip([1.0, 2.0, 3.0, -1.0]) {
        assert!((got - want).abs() < 1e-10, "x = {:?}", x);
    }

    let pattern = SparsityPattern::new(4, 6, &row_ptr, &col_ind).unwrap();
    let a = symmetric_from_upper(&pattern, &values);
    assert!(residual_norm(&a, &x, &b) < 1e-10);
    assert_eq!(engine.state(), EngineState::Solved);
}

#[test]
fn test_repeated_solve_without_change_reuses_factors() {
    let system = Banded::new(8, 2);
    let values = system.values(6.0, |p| -1.0 + 0.1 * p as f64);
    let mut engine = system.engine(HostConfig::default());
    engine.host_values_mut().unwrap().copy_from_slice(&values);

    let b: Vec<f64> = (0..8).map(|i| i as f64 - 3.5).collect();
    let mut first = b.clone();
    engine.solve(true, 1, &mut first).unwrap();

    let mut second = b.clone();
    engine.solve(false, 1, &mut second).unwrap();
    let mut third = b.clone();
    engine.solve(false, 1, &mut third).unwrap();

    assert_eq!(first, second);
    assert_eq!(second, third);
    assert_eq!(engine.stats().num_factorizations, 1);
    assert_eq!(engine.stats().num_solves, 3);
    assert!(system.residual(&values, &first, &b) < 1e-10);
}

#[test]
fn test_refactorization_follows_flag() {
    let system = Banded::new(10, 1);
    let a = system.values(4.0, |_| -1.0);
    let a_prime = system.values(3.0, |p| 0.5 + 0.01 * p as f64);
    let b = vec![1.0; 10];

    let mut engine = system.engine(HostConfig::default());
    engine.host_values_mut().unwrap().copy_from_slice(&a);
    let mut x = b.clone();
    engine.solve(true, 1, &mut x).unwrap();
    assert!(system.residual(&a, &x, &b) < 1e-10);

    engine.host_values_mut().unwrap().copy_from_slice(&a_prime);
    let mut x_prime = b.clone();
    engine.solve(true, 1, &mut x_prime).unwrap();

    assert!(system.residual(&a_prime, &x_prime, &b) < 1e-10);
    let diff: f64 = x.iter().zip(&x_prime).map(|(u, v)| (u - v).abs()).sum();
    assert!(diff > 1e-3, "solutions should differ, diff = {}", diff);
    assert_eq!(engine.stats().num_factorizations, 2);
}

#[test]
fn test_unflagged_edits_are_not_factorized() {
    let system = Banded::new(5, 1);
    let a = system.values(4.0, |_| -1.0);
    let b = vec![1.0; 5];

    let mut engine = system.engine(HostConfig::default());
    engine.host_values_mut().unwrap().copy_from_slice(&a);
    let mut x = b.clone();
    engine.solve(true, 1, &mut x).unwrap();

    // The caller asserts nothing changed; the old factors are used.
    engine.host_values_mut().unwrap()[0] = 100.0;
    let mut stale = b.clone();
    engine.solve(false, 1, &mut stale).unwrap();
    assert_eq!(x, stale);

    // The edit is staged by the next flagged solve.
    let mut fresh = b.clone();
    engine.solve(true, 1, &mut fresh).unwrap();
    assert_ne!(x, fresh);
}

#[test]
fn test_batch_width_resize() {
    let system = Banded::new(6, 2);
    let values = system.values(8.0, |p| ((p % 3) as f64) - 1.0);
    let mut engine = system.engine(HostConfig::default());
    engine.host_values_mut().unwrap().copy_from_slice(&values);

    let single: Vec<f64> = vec![9.0; 6];
    let mut x = single.clone();
    engine.solve(true, 1, &mut x).unwrap();
    assert_eq!(engine.batch_width(), Some(1));

    let batch: Vec<f64> = (0..18).map(|i| (i as f64).sin()).collect();
    let mut out = batch.clone();
    engine.solve(false, 3, &mut out).unwrap();
    assert_eq!(engine.batch_width(), Some(3));
    assert_eq!(engine.stats().operand_reallocations, 1);

    for j in 0..3 {
        let r = system.residual(&values, column(&out, 6, j), column(&batch, 6, j));
        assert!(r < 1e-10, "column {} residual {}", j, r);
    }

    // Shrink again: only the new columns are touched.
    let mut two = batch[..12].to_vec();
    engine.solve(false, 2, &mut two).unwrap();
    assert_eq!(&two[..], &out[..12]);
    assert_eq!(engine.stats().operand_reallocations, 2);
}

#[test]
fn test_resize_releases_old_operands() {
    let system = Banded::new(4, 1);
    let values = system.values(3.0, |_| 1.0);
    let mut engine = system.engine(HostConfig::default());
    engine.host_values_mut().unwrap().copy_from_slice(&values);

    let base_bytes = engine.device().live_bytes();
    let mut b = vec![1.0; 4 * 5];
    engine.solve(true, 5, &mut b).unwrap();
    let mut b = vec![1.0; 4];
    engine.solve(false, 1, &mut b).unwrap();

    // values, row pointers, column indices, right-hand side, solution
    assert_eq!(engine.device().live_buffers(), 5);
    // CSR matrix plus two dense operands
    assert_eq!(engine.device().live_descriptors(), 3);
    assert_eq!(engine.device().live_bytes(), base_bytes);
}

#[test]
fn test_identity_system_returns_rhs() {
    let n = 5;
    let row_ptr: Vec<usize> = (0..=n).collect();
    let col_ind: Vec<usize> = (0..n).collect();
    let mut engine: Engine = FactorizationEngine::host(EngineConfig::default(), HostConfig::default());
    engine.structural_setup(n, n, &row_ptr, &col_ind).unwrap();
    // Placeholder values already form the identity.
    assert!(engine.host_values().unwrap().iter().all(|&v| v == 1.0));

    let mut identity = vec![0.0; n * n];
    for i in 0..n {
        identity[i * n + i] = 1.0;
    }
    let mut out = identity.clone();
    engine.solve(true, n, &mut out).unwrap();
    for (got, want) in out.iter().zip(&identity) {
        assert!((got - want).abs() < 1e-14);
    }
}

#[test]
fn test_unsupported_diagnostics_always_fail() {
    let system = Banded::new(3, 1);
    let mut engine = system.engine(HostConfig::default());
    assert!(matches!(
        engine.number_of_negative_eigenvalues(),
        Err(EngineError::Unsupported(_))
    ));

    engine
        .host_values_mut()
        .unwrap()
        .copy_from_slice(&system.values(2.0, |_| -1.0));
    let mut b = vec![1.0; 3];
    engine.solve(true, 1, &mut b).unwrap();
    assert!(matches!(
        engine.number_of_negative_eigenvalues(),
        Err(EngineError::Unsupported(_))
    ));
    assert!(matches!(
        engine.determine_dependent_rows(&system.row_ptr, &system.col_ind),
        Err(EngineError::Unsupported(_))
    ));
}

#[test]
fn test_allocation_failure_fails_engine() {
    let system = Banded::new(4, 1);
    let values = system.values(3.0, |_| 1.0);
    // Setup needs 7*8 + 5*4 + 7*4 + 2*32 = 168 bytes; width 4 needs 192 more
    // for the operands alone.
    let mut engine = system.engine(HostConfig {
        memory_limit: Some(200),
        ..HostConfig::default()
    });
    engine.host_values_mut().unwrap().copy_from_slice(&values);

    let mut b = vec![1.0; 16];
    let err = engine.solve(true, 4, &mut b).unwrap_err();
    assert!(matches!(err, EngineError::Allocation { .. }));
    assert_eq!(engine.state(), EngineState::Failed);

    let mut b = vec![1.0; 4];
    assert!(matches!(
        engine.solve(true, 1, &mut b),
        Err(EngineError::InvalidState {
            state: EngineState::Failed,
            ..
        })
    ));
    assert!(engine.host_values_mut().is_err());
}

#[test]
fn test_full_storage_matches_upper_storage() {
    // Same 3x3 matrix, once as upper triangle, once with both triangles.
    let upper_ptr = [0, 2, 4, 5];
    let upper_ind = [0, 1, 1, 2, 2];
    let upper_val = [4.0, 1.0, 5.0, 2.0, 6.0];

    let full_ptr = [0, 2, 5, 7];
    let full_ind = [0, 1, 0, 1, 2, 1, 2];
    let full_val = [4.0, 1.0, 1.0, 5.0, 2.0, 2.0, 6.0];

    let mut upper: Engine = FactorizationEngine::host(EngineConfig::default(), HostConfig::default());
    upper.structural_setup(3, 5, &upper_ptr, &upper_ind).unwrap();
    upper.host_values_mut().unwrap().copy_from_slice(&upper_val);

    let mut full: Engine = FactorizationEngine::host(EngineConfig::default(), HostConfig::default());
    full.structural_setup(3, 7, &full_ptr, &full_ind).unwrap();
    full.host_values_mut().unwrap().copy_from_slice(&full_val);

    let mut x1 = [1.0, 2.0, 3.0];
    let mut x2 = x1;
    upper.solve(true, 1, &mut x1).unwrap();
    full.solve(true, 1, &mut x2).unwrap();
    for (a, b) in x1.iter().zip(&x2) {
        assert!((a - b).abs() < 1e-12);
    }
}

#[test]
fn test_spd_engine_and_orderings() {
    let system = Banded::new(12, 3);
    let values = system.values(10.0, |p| -0.5 - 0.01 * p as f64);
    let b: Vec<f64> = (0..12).map(|i| 1.0 + i as f64).collect();

    for ordering in [FillOrdering::Natural, FillOrdering::ReverseCuthillMcKee] {
        let config = EngineConfig {
            matrix_type: MatrixType::Spd,
            ..EngineConfig::default()
        };
        let mut engine: Engine = FactorizationEngine::host(
            config,
            HostConfig {
                ordering,
                ..HostConfig::default()
            },
        );
        engine
            .structural_setup(system.n, system.nnz(), &system.row_ptr, &system.col_ind)
            .unwrap();
        engine.host_values_mut().unwrap().copy_from_slice(&values);
        let mut x = b.clone();
        engine.solve(true, 1, &mut x).unwrap();
        assert!(system.residual(&values, &x, &b) < 1e-10, "{:?}", ordering);
    }
}

#[test]
fn test_single_precision_banded() {
    let system = Banded::new(6, 1);
    let values = system.values(4.0, |_| -1.0);
    let mut engine: FactorizationEngine<f32, HostDevice> =
        FactorizationEngine::host(EngineConfig::default(), HostConfig::default());
    engine
        .structural_setup(system.n, system.nnz(), &system.row_ptr, &system.col_ind)
        .unwrap();
    for (dst, &v) in engine.host_values_mut().unwrap().iter_mut().zip(&values) {
        *dst = v as f32;
    }
    let mut x = vec![1.0f32; 6];
    engine.solve(true, 1, &mut x).unwrap();

    let x64: Vec<f64> = x.iter().map(|&v| v as f64).collect();
    assert!(system.residual(&values, &x64, &[1.0; 6]) < 1e-5);
}

fn banded_system() -> impl Strategy<Value = (usize, usize, usize, Vec<f64>, Vec<f64>)> {
    (2usize..24, 1usize..4, 1usize..4).prop_flat_map(|(n, band, width)| {
        (
            Just(n),
            Just(band),
            Just(width),
            proptest::collection::vec(-1.0f64..1.0, n * band),
            proptest::collection::vec(-10.0f64..10.0, n * width),
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_diagonally_dominant_systems_solve(
        (n, band, width, off, rhs) in banded_system()
    ) {
        let system = Banded::new(n, band);
        // At most 2 * band off-diagonals per row, each below 1 in magnitude.
        let values = system.values(2.0 * band as f64 + 1.0, |p| off[p % off.len()]);
        let mut engine = system.engine(HostConfig::default());
        engine.host_values_mut().unwrap().copy_from_slice(&values);

        let mut x = rhs.clone();
        engine.solve(true, width, &mut x).unwrap();
        for j in 0..width {
            let r = system.residual(&values, column(&x, n, j), column(&rhs, n, j));
            prop_assert!(r < 1e-9, "column {} residual {}", j, r);
        }
    }
}
