//! Adapter contract for an outer optimization framework.
//!
//! The framework owns the iteration loop. It sets the structure once, then
//! on every iteration writes coefficients through [`SparseSymLinearSolver::values_mut`]
//! and calls [`SparseSymLinearSolver::multi_solve`]. Index arrays use the
//! framework's 32-bit integers.

use crate::device::host::{HostConfig, HostDevice};
use crate::device::Device;
use crate::engine::FactorizationEngine;
use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::pattern::SparsityPattern;
use crate::scalar::Scalar;
use crate::EngineConfig;

/// Outcome of an adapter call, in the framework's vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymSolverStatus {
    Success,
    /// Factorization met a zero pivot.
    Singular,
    /// Inertia differs from the requested count (never reported here).
    WrongInertia,
    /// The framework should call again with more memory (never reported here).
    CallAgain,
    FatalError,
}

/// Matrix storage understood by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixFormat {
    /// Triplet format.
    Triplet,
    /// Compressed rows, zero-based offsets.
    Csr0Offset,
    /// Compressed rows, one-based offsets.
    Csr1Offset,
}

/// Sparse symmetric indefinite solver as seen by the framework.
pub trait SparseSymLinearSolver {
    type Value: Scalar;

    /// Declare dimension and upper-triangular CSR pattern.
    fn initialize_structure(&mut self, dim: i32, nonzeros: i32, ia: &[i32], ja: &[i32]) -> SymSolverStatus;

    /// Coefficient array to fill before the next solve, in pattern order.
    fn values_mut(&mut self) -> Option<&mut [Self::Value]>;

    /// Solve for `nrhs` right-hand sides stored column-major in `rhs_vals`;
    /// solutions overwrite them. The pattern arrays and the inertia request
    /// are accepted for contract compatibility and ignored.
    #[allow(clippy::too_many_arguments)]
    fn multi_solve(
        &mut self,
        new_matrix: bool,
        ia: &[i32],
        ja: &[i32],
        nrhs: i32,
        rhs_vals: &mut [Self::Value],
        check_neg_evals: bool,
        number_of_neg_evals: i32,
    ) -> SymSolverStatus;

    /// Negative eigenvalues of the last factorized matrix.
    fn number_of_neg_evals(&self) -> EngineResult<i32>;

    /// Ask for a more accurate factorization next time.
    fn increase_quality(&mut self) -> bool;

    fn provides_inertia(&self) -> bool;

    fn matrix_format(&self) -> MatrixFormat;

    fn provides_degeneracy_detection(&self) -> bool;

    /// Rows of a constraint Jacobian that are linearly dependent.
    fn determine_dependent_rows(&mut self, ia: &[i32], ja: &[i32]) -> EngineResult<Vec<i32>>;
}

/// [`SparseSymLinearSolver`] backed by a [`FactorizationEngine`].
pub struct DssSolverInterface<T: Scalar, D: Device> {
    engine: FactorizationEngine<T, D>,
    last_error: Option<EngineError>,
}

impl<T: Scalar> DssSolverInterface<T, HostDevice> {
    pub fn host(config: EngineConfig, host: HostConfig) -> Self {
        Self::new(FactorizationEngine::host(config, host))
    }
}

impl<T: Scalar, D: Device> DssSolverInterface<T, D> {
    pub fn new(engine: FactorizationEngine<T, D>) -> Self {
        Self {
            engine,
            last_error: None,
        }
    }

    pub fn engine(&self) -> &FactorizationEngine<T, D> {
        &self.engine
    }

    pub fn into_engine(self) -> FactorizationEngine<T, D> {
        self.engine
    }

    /// Error behind the most recent non-success status.
    pub fn last_error(&self) -> Option<&EngineError> {
        self.last_error.as_ref()
    }

    fn report(&mut self, operation: &str, result: EngineResult<()>) -> SymSolverStatus {
        match result {
            Ok(()) => {
                self.last_error = None;
                SymSolverStatus::Success
            }
            Err(e) => {
                let status = if e.is_singular() {
                    log::debug!("{}: matrix is singular", operation);
                    SymSolverStatus::Singular
                } else {
                    match e.kind() {
                        ErrorKind::Resource => log::error!("{} failed: {}", operation, e),
                        ErrorKind::Unsupported | ErrorKind::ContractViolation => {
                            log::error!("{} rejected: {}", operation, e)
                        }
                    }
                    SymSolverStatus::FatalError
                };
                self.last_error = Some(e);
                status
            }
        }
    }
}

impl<T: Scalar, D: Device> SparseSymLinearSolver for DssSolverInterface<T, D> {
    type Value = T;

    fn initialize_structure(&mut self, dim: i32, nonzeros: i32, ia: &[i32], ja: &[i32]) -> SymSolverStatus {
        let result = SparsityPattern::from_i32(dim, nonzeros, ia, ja)
            .and_then(|pattern| self.engine.setup_pattern(pattern));
        self.report("initialize_structure", result)
    }

    fn values_mut(&mut self) -> Option<&mut [T]> {
        match self.engine.host_values_mut() {
            Ok(values) => Some(values),
            Err(e) => {
                log::error!("value buffer requested: {}", e);
                None
            }
        }
    }

    fn multi_solve(
        &mut self,
        new_matrix: bool,
        _ia: &[i32],
        _ja: &[i32],
        nrhs: i32,
        rhs_vals: &mut [T],
        _check_neg_evals: bool,
        _number_of_neg_evals: i32,
    ) -> SymSolverStatus {
        let result = match usize::try_from(nrhs) {
            Ok(nrhs) => self.engine.solve(new_matrix, nrhs, rhs_vals),
            Err(_) => Err(EngineError::EmptyBatch),
        };
        self.report("multi_solve", result)
    }

    fn number_of_neg_evals(&self) -> EngineResult<i32> {
        self.engine.number_of_negative_eigenvalues().map(|n| n as i32)
    }

    fn increase_quality(&mut self) -> bool {
        self.engine.increase_quality()
    }

    fn provides_inertia(&self) -> bool {
        self.engine.capabilities().inertia
    }

    fn matrix_format(&self) -> MatrixFormat {
        MatrixFormat::Csr0Offset
    }

    fn provides_degeneracy_detection(&self) -> bool {
        self.engine.capabilities().degeneracy_detection
    }

    fn determine_dependent_rows(&mut self, ia: &[i32], ja: &[i32]) -> EngineResult<Vec<i32>> {
        let to_usize = |v: &[i32]| v.iter().map(|&i| i.max(0) as usize).collect::<Vec<_>>();
        self.engine
            .determine_dependent_rows(&to_usize(ia), &to_usize(ja))
            .map(|rows| rows.into_iter().map(|r| r as i32).collect())
    }
}
