//! C ABI for the dss sparse symmetric solver.
//!
//! Exposes [`DssSolverInterface`] in double precision to C and C++
//! optimization frameworks. A solver is an opaque pointer created with
//! [`dss_solver_create`] and released with [`dss_solver_destroy`]; every
//! other call takes it as its first argument and returns one of the
//! `DSS_STATUS_*` codes.
//!
//! ```c
//! DssSolver *s = dss_solver_create(DSS_BACKEND_CUDA);
//! dss_initialize_structure(s, n, nnz, ia, ja);
//! memcpy(dss_values(s), vals, nnz * sizeof(double));
//! dss_multi_solve(s, 1, ia, ja, 1, rhs, 0, 0);
//! dss_solver_destroy(s);
//! ```

#![warn(missing_docs)]

use dss_core::device::host::{HostConfig, HostDevice};
use dss_core::{DssSolverInterface, EngineConfig, EngineError, MatrixFormat, SparseSymLinearSolver, SymSolverStatus};
use std::ffi::{c_char, c_double, c_int, CString};
use std::ptr;

/// Call succeeded.
pub const DSS_STATUS_SUCCESS: c_int = 0;
/// Factorization met a zero pivot.
pub const DSS_STATUS_SINGULAR: c_int = 1;
/// Inertia differs from the requested count.
pub const DSS_STATUS_WRONG_INERTIA: c_int = 2;
/// Call again with more memory.
pub const DSS_STATUS_CALL_AGAIN: c_int = 3;
/// Unrecoverable error; see [`dss_last_error`].
pub const DSS_STATUS_FATAL_ERROR: c_int = 4;

/// CPU emulation of the accelerator.
pub const DSS_BACKEND_HOST: c_int = 0;
/// CUDA GPU through cuDSS.
pub const DSS_BACKEND_CUDA: c_int = 1;

/// Triplet storage.
pub const DSS_FORMAT_TRIPLET: c_int = 0;
/// CSR with zero-based offsets.
pub const DSS_FORMAT_CSR_0_OFFSET: c_int = 1;
/// CSR with one-based offsets.
pub const DSS_FORMAT_CSR_1_OFFSET: c_int = 2;

type HostSolver = DssSolverInterface<f64, HostDevice>;
#[cfg(feature = "cuda")]
type CudaSolver = DssSolverInterface<f64, dss_core::device::cuda::CudaDevice>;

enum Backend {
    Host(HostSolver),
    #[cfg(feature = "cuda")]
    Cuda(CudaSolver),
}

/// Opaque solver handle.
pub struct DssSolver {
    backend: Backend,
    message: CString,
}

impl DssSolver {
    fn new(backend: c_int) -> Result<Self, EngineError> {
        let config = EngineConfig::from_env();
        let backend = match backend {
            DSS_BACKEND_HOST => Backend::Host(HostSolver::host(config, HostConfig::from_env())),
            #[cfg(feature = "cuda")]
            DSS_BACKEND_CUDA => {
                use dss_core::device::cuda::CudaConfig;
                use dss_core::FactorizationEngine;
                let engine = FactorizationEngine::cuda(config, CudaConfig::from_env())?;
                Backend::Cuda(DssSolverInterface::new(engine))
            }
            #[cfg(not(feature = "cuda"))]
            DSS_BACKEND_CUDA => return Err(EngineError::Unsupported("CUDA backend (built without `cuda`)")),
            _ => return Err(EngineError::Unsupported("unknown backend")),
        };
        Ok(Self {
            backend,
            message: CString::default(),
        })
    }

    fn solver(&mut self) -> &mut dyn SparseSymLinearSolver<Value = f64> {
        match &mut self.backend {
            Backend::Host(s) => s,
            #[cfg(feature = "cuda")]
            Backend::Cuda(s) => s,
        }
    }

    fn rows(&self) -> Option<usize> {
        match &self.backend {
            Backend::Host(s) => s.engine().rows(),
            #[cfg(feature = "cuda")]
            Backend::Cuda(s) => s.engine().rows(),
        }
    }

    fn last_error(&self) -> Option<&EngineError> {
        match &self.backend {
            Backend::Host(s) => s.last_error(),
            #[cfg(feature = "cuda")]
            Backend::Cuda(s) => s.last_error(),
        }
    }

    fn set_message(&mut self, message: impl ToString) {
        self.message = CString::new(message.to_string()).unwrap_or_default();
    }

    /// Convert an adapter status, keeping the error text for non-success.
    fn finish(&mut self, status: SymSolverStatus) -> c_int {
        if status != SymSolverStatus::Success {
            let message = self
                .last_error()
                .map(ToString::to_string)
                .unwrap_or_else(|| format!("{:?}", status));
            self.set_message(message);
        }
        status_code(status)
    }

    fn fail(&mut self, error: EngineError) -> c_int {
        log::error!("{}", error);
        self.set_message(error);
        DSS_STATUS_FATAL_ERROR
    }
}

fn status_code(status: SymSolverStatus) -> c_int {
    match status {
        SymSolverStatus::Success => DSS_STATUS_SUCCESS,
        SymSolverStatus::Singular => DSS_STATUS_SINGULAR,
        SymSolverStatus::WrongInertia => DSS_STATUS_WRONG_INERTIA,
        SymSolverStatus::CallAgain => DSS_STATUS_CALL_AGAIN,
        SymSolverStatus::FatalError => DSS_STATUS_FATAL_ERROR,
    }
}

fn format_code(format: MatrixFormat) -> c_int {
    match format {
        MatrixFormat::Triplet => DSS_FORMAT_TRIPLET,
        MatrixFormat::Csr0Offset => DSS_FORMAT_CSR_0_OFFSET,
        MatrixFormat::Csr1Offset => DSS_FORMAT_CSR_1_OFFSET,
    }
}

/// Borrow `len` elements, or an empty slice for a null pointer.
///
/// # Safety
/// A non-null `data` must point to `len` readable elements.
unsafe fn borrow<'a, E>(data: *const E, len: usize) -> &'a [E] {
    if data.is_null() || len == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(data, len)
    }
}

fn len_of(value: c_int) -> usize {
    usize::try_from(value).unwrap_or(0)
}

/// Create a solver on `backend` (`DSS_BACKEND_HOST` or `DSS_BACKEND_CUDA`).
///
/// Engine and device options are read from the `DSS_*` environment
/// variables. Returns null if the backend cannot be brought up.
#[no_mangle]
pub extern "C" fn dss_solver_create(backend: c_int) -> *mut DssSolver {
    match DssSolver::new(backend) {
        Ok(solver) => Box::into_raw(Box::new(solver)),
        Err(e) => {
            log::error!("dss_solver_create({}): {}", backend, e);
            ptr::null_mut()
        }
    }
}

/// Release a solver and every device resource it holds. Null is ignored.
///
/// # Safety
/// `solver` must come from [`dss_solver_create`] and not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn dss_solver_destroy(solver: *mut DssSolver) {
    if solver.is_null() {
        return;
    }
    let solver = Box::from_raw(solver);
    match solver.backend {
        Backend::Host(s) => s.into_engine().destroy(),
        #[cfg(feature = "cuda")]
        Backend::Cuda(s) => s.into_engine().destroy(),
    }
}

/// Whether the CUDA runtime and cuDSS can be loaded (1) or not (0).
#[no_mangle]
pub extern "C" fn dss_cuda_available() -> c_int {
    #[cfg(feature = "cuda")]
    {
        c_int::from(dss_core::device::cuda::is_cuda_available())
    }
    #[cfg(not(feature = "cuda"))]
    {
        0
    }
}

/// Declare the upper-triangular CSR pattern: `ia` holds `dim + 1` row
/// offsets and `ja` holds `nonzeros` column indices, both zero-based.
///
/// # Safety
/// `solver` must be valid; `ia` and `ja` must hold the stated lengths.
#[no_mangle]
pub unsafe extern "C" fn dss_initialize_structure(
    solver: *mut DssSolver,
    dim: c_int,
    nonzeros: c_int,
    ia: *const c_int,
    ja: *const c_int,
) -> c_int {
    let Some(solver) = solver.as_mut() else {
        return DSS_STATUS_FATAL_ERROR;
    };
    if ia.is_null() || ja.is_null() {
        return solver.fail(EngineError::InvalidPattern("null pattern array".into()));
    }
    let ia = borrow(ia, len_of(dim) + 1);
    let ja = borrow(ja, len_of(nonzeros));
    let status = solver.solver().initialize_structure(dim, nonzeros, ia, ja);
    solver.finish(status)
}

/// Value array to fill before the next solve, one entry per pattern
/// position. Null before the structure is set or after a fatal error.
///
/// The pointer stays valid until the solver is destroyed and may be kept
/// across solves; every solve with `new_matrix` set re-reads it.
///
/// # Safety
/// `solver` must be valid.
#[no_mangle]
pub unsafe extern "C" fn dss_values(solver: *mut DssSolver) -> *mut c_double {
    let Some(solver) = solver.as_mut() else {
        return ptr::null_mut();
    };
    match solver.solver().values_mut() {
        Some(values) => values.as_mut_ptr(),
        None => ptr::null_mut(),
    }
}

/// Solve for `nrhs` column-major right-hand sides in `rhs_vals`, in place.
///
/// A nonzero `new_matrix` refactorizes with the current values first. `ia`,
/// `ja`, `check_neg_evals` and `number_of_neg_evals` are ignored and may be
/// null or zero.
///
/// # Safety
/// `solver` must be valid; `rhs_vals` must hold `dim * nrhs` doubles.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn dss_multi_solve(
    solver: *mut DssSolver,
    new_matrix: c_int,
    ia: *const c_int,
    ja: *const c_int,
    nrhs: c_int,
    rhs_vals: *mut c_double,
    check_neg_evals: c_int,
    number_of_neg_evals: c_int,
) -> c_int {
    let Some(solver) = solver.as_mut() else {
        return DSS_STATUS_FATAL_ERROR;
    };
    let _ = (ia, ja);
    let Some(rows) = solver.rows() else {
        return solver.fail(EngineError::InvalidState {
            operation: "multi_solve",
            state: dss_core::EngineState::Uninitialized,
        });
    };
    if rhs_vals.is_null() {
        return solver.fail(EngineError::DimensionMismatch {
            expected: rows * len_of(nrhs),
            actual: 0,
            context: "right-hand sides",
        });
    }
    let rhs = std::slice::from_raw_parts_mut(rhs_vals, rows * len_of(nrhs));
    let status = solver.solver().multi_solve(
        new_matrix != 0,
        &[],
        &[],
        nrhs,
        rhs,
        check_neg_evals != 0,
        number_of_neg_evals,
    );
    solver.finish(status)
}

/// Negative eigenvalue count of the last factorization. Always fails on
/// this solver.
///
/// # Safety
/// `solver` must be valid; `count`, if not null, must be writable.
#[no_mangle]
pub unsafe extern "C" fn dss_number_of_neg_evals(solver: *mut DssSolver, count: *mut c_int) -> c_int {
    let Some(solver) = solver.as_mut() else {
        return DSS_STATUS_FATAL_ERROR;
    };
    match solver.solver().number_of_neg_evals() {
        Ok(n) => {
            if let Some(count) = count.as_mut() {
                *count = n;
            }
            DSS_STATUS_SUCCESS
        }
        Err(e) => solver.fail(e),
    }
}

/// Linearly dependent rows of a constraint Jacobian given as CSR with
/// `rows` rows. Always fails on this solver.
///
/// # Safety
/// `solver` must be valid; `ia` must hold `rows + 1` offsets and `ja` as many
/// indices as `ia[rows]`; `dependent` must have room for `rows` entries and
/// `count` must be writable.
#[no_mangle]
pub unsafe extern "C" fn dss_determine_dependent_rows(
    solver: *mut DssSolver,
    rows: c_int,
    ia: *const c_int,
    ja: *const c_int,
    dependent: *mut c_int,
    count: *mut c_int,
) -> c_int {
    let Some(solver) = solver.as_mut() else {
        return DSS_STATUS_FATAL_ERROR;
    };
    let ia = borrow(ia, if ia.is_null() { 0 } else { len_of(rows) + 1 });
    let ja = borrow(ja, ia.last().map_or(0, |&end| len_of(end)));
    match solver.solver().determine_dependent_rows(ia, ja) {
        Ok(found) => {
            if !dependent.is_null() {
                let out = std::slice::from_raw_parts_mut(dependent, len_of(rows));
                for (dst, &row) in out.iter_mut().zip(&found) {
                    *dst = row;
                }
            }
            if let Some(count) = count.as_mut() {
                *count = found.len().min(len_of(rows)) as c_int;
            }
            DSS_STATUS_SUCCESS
        }
        Err(e) => solver.fail(e),
    }
}

/// Ask for a more accurate factorization next time. Returns 1 if the
/// solver could comply; this one never can.
///
/// # Safety
/// `solver` must be valid.
#[no_mangle]
pub unsafe extern "C" fn dss_increase_quality(solver: *mut DssSolver) -> c_int {
    solver
        .as_mut()
        .map_or(0, |s| c_int::from(s.solver().increase_quality()))
}

/// 1 if inertia is reported.
///
/// # Safety
/// `solver` must be valid.
#[no_mangle]
pub unsafe extern "C" fn dss_provides_inertia(solver: *mut DssSolver) -> c_int {
    solver
        .as_mut()
        .map_or(0, |s| c_int::from(s.solver().provides_inertia()))
}

/// 1 if dependent-row detection is available.
///
/// # Safety
/// `solver` must be valid.
#[no_mangle]
pub unsafe extern "C" fn dss_provides_degeneracy_detection(solver: *mut DssSolver) -> c_int {
    solver
        .as_mut()
        .map_or(0, |s| c_int::from(s.solver().provides_degeneracy_detection()))
}

/// Expected matrix storage, one of the `DSS_FORMAT_*` codes.
///
/// # Safety
/// `solver` must be valid.
#[no_mangle]
pub unsafe extern "C" fn dss_matrix_format(solver: *mut DssSolver) -> c_int {
    solver
        .as_mut()
        .map_or(DSS_FORMAT_CSR_0_OFFSET, |s| format_code(s.solver().matrix_format()))
}

/// Text of the most recent failure, empty if none. Owned by the solver and
/// valid until the next call on it.
///
/// # Safety
/// `solver` must be valid.
#[no_mangle]
pub unsafe extern "C" fn dss_last_error(solver: *const DssSolver) -> *const c_char {
    match solver.as_ref() {
        Some(s) => s.message.as_ptr(),
        None => ptr::null(),
    }
}
