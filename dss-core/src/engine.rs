//! Factorization engine.
//!
//! Drives one device through the three solver phases for a single sparsity
//! pattern:
//!
//! 1. **Structural setup**: buffers, descriptors and symbolic analysis, once.
//! 2. **Factorization**: numeric factorization of the current host values,
//!    whenever the caller says they changed.
//! 3. **Solve**: a batch of right-hand sides against the current factors,
//!    written back into the caller's buffer.
//!
//! ```
//! use dss_core::{EngineConfig, FactorizationEngine};
//! use dss_core::device::host::{HostConfig, HostDevice};
//!
//! // [[2, 1], [1, 3]], upper triangle
//! let mut engine =
//!     FactorizationEngine::<f64, HostDevice>::host(EngineConfig::default(), HostConfig::default());
//! engine.structural_setup(2, 3, &[0, 2, 3], &[0, 1, 1])?;
//! engine.host_values_mut()?.copy_from_slice(&[2.0, 1.0, 3.0]);
//!
//! let mut rhs = [1.0, 1.0];
//! engine.solve(true, 1, &mut rhs)?;
//! assert!((rhs[0] - 0.4).abs() < 1e-12 && (rhs[1] - 0.2).abs() < 1e-12);
//! # Ok::<(), dss_core::EngineError>(())
//! ```

use crate::config::EngineConfig;
use crate::device::host::{HostConfig, HostDevice};
use crate::device::{CsrDescriptor, Device, IndexBase, MatrixView, Phase};
use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::pattern::SparsityPattern;
use crate::scalar::{DeviceIndex, Scalar, INDEX_TYPE};
use crate::staging::{reconcile_width, MirroredValues, OperandPair};
use std::time::Instant;

/// Lifecycle state of a [`FactorizationEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No pattern yet.
    Uninitialized,
    /// Pattern analysed, no valid factors.
    StructurallyReady,
    /// Factors match the device values.
    Factorized,
    /// At least one solve completed against the current factors.
    Solved,
    /// A resource error left device state inconsistent.
    Failed,
}

/// Optional features a backend may offer. This engine offers none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub quality_improvement: bool,
    pub inertia: bool,
    pub degeneracy_detection: bool,
}

/// Engine statistics.
#[derive(Debug, Default, Clone)]
pub struct EngineStats {
    /// Symbolic analyses performed.
    pub num_analyses: usize,

    /// Numeric factorizations performed.
    pub num_factorizations: usize,

    /// Solve calls completed.
    pub num_solves: usize,

    /// Right-hand-side columns solved.
    pub num_rhs_columns: usize,

    /// Host value mirror uploads.
    pub value_uploads: usize,

    /// Factorizations that found the device values already current.
    pub skipped_value_uploads: usize,

    /// Right-hand-side/solution reallocations after setup.
    pub operand_reallocations: usize,

    pub bytes_to_device: usize,
    pub bytes_to_host: usize,

    /// Total time in analysis (seconds).
    pub time_analysis: f64,

    /// Total time in factorization (seconds).
    pub time_factorization: f64,

    /// Total time in solves, transfers included (seconds).
    pub time_solve: f64,
}

/// Device resources tied to one sparsity pattern.
///
/// Fields drop in declaration order: descriptors go before the buffers
/// they reference.
struct Workspace<T: Scalar, D: Device> {
    matrix: D::Matrix,
    operands: Option<OperandPair<D>>,
    values: MirroredValues<T, D>,
    _row_ptr: D::Buffer,
    _col_ind: D::Buffer,
    pattern: SparsityPattern,
}

/// Sparse symmetric factorization engine over a [`Device`].
///
/// Every mutating operation takes `&mut self`; the engine is meant for one
/// caller driving it sequentially.
pub struct FactorizationEngine<T: Scalar, D: Device> {
    // Declared before `device` so all resources are released before the
    // session that owns them.
    workspace: Option<Workspace<T, D>>,
    device: D,
    state: EngineState,
    config: EngineConfig,
    stats: EngineStats,
}

macro_rules! phase_log {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            log::info!($($arg)+);
        } else {
            log::debug!($($arg)+);
        }
    };
}

impl<T: Scalar> FactorizationEngine<T, HostDevice> {
    /// Engine on the CPU device.
    pub fn host(config: EngineConfig, host: HostConfig) -> Self {
        Self::with_device(HostDevice::new(host), config)
    }
}

#[cfg(feature = "cuda")]
impl<T: Scalar> FactorizationEngine<T, crate::device::cuda::CudaDevice> {
    /// Engine on a CUDA GPU through cuDSS.
    pub fn cuda(config: EngineConfig, cuda: crate::device::cuda::CudaConfig) -> EngineResult<Self> {
        let device = crate::device::cuda::CudaDevice::new(cuda)?;
        Ok(Self::with_device(device, config))
    }
}

impl<T: Scalar, D: Device> FactorizationEngine<T, D> {
    /// Engine over an existing device session.
    pub fn with_device(device: D, config: EngineConfig) -> Self {
        log::debug!(
            "factorization engine created on {} device ({:?}, {:?})",
            device.name(),
            T::DATA_TYPE,
            config.matrix_type
        );
        Self {
            workspace: None,
            device,
            state: EngineState::Uninitialized,
            config,
            stats: EngineStats::default(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Counters and timings accumulated since construction.
    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Device the engine drives.
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Matrix dimension, once set up.
    pub fn rows(&self) -> Option<usize> {
        self.workspace.as_ref().map(|ws| ws.pattern.rows())
    }

    /// Declared nonzeros, once set up.
    pub fn nnz(&self) -> Option<usize> {
        self.workspace.as_ref().map(|ws| ws.pattern.nnz())
    }

    /// Right-hand-side columns the device operands currently hold.
    pub fn batch_width(&self) -> Option<usize> {
        self.workspace
            .as_ref()
            .and_then(|ws| ws.operands.as_ref())
            .map(OperandPair::width)
    }

    /// Validate a CSR pattern and run [`setup_pattern`](Self::setup_pattern).
    pub fn structural_setup(
        &mut self,
        rows: usize,
        nnz: usize,
        row_ptr: &[usize],
        col_ind: &[usize],
    ) -> EngineResult<()> {
        self.expect_state("structural_setup", &[EngineState::Uninitialized])?;
        let pattern = SparsityPattern::new(rows, nnz, row_ptr, col_ind)?;
        self.setup_pattern(pattern)
    }

    /// Allocate every pattern-sized buffer, stage the pattern with
    /// placeholder values of 1, build the descriptors and run the analysis.
    ///
    /// Allowed once, from [`EngineState::Uninitialized`].
    pub fn setup_pattern(&mut self, pattern: SparsityPattern) -> EngineResult<()> {
        self.expect_state("structural_setup", &[EngineState::Uninitialized])?;
        let start = Instant::now();
        let result = self.build_workspace(pattern);
        let workspace = self.track(result)?;

        let lower = workspace.pattern.lower_entries();
        if lower > 0 {
            log::warn!(
                "{} entries below the diagonal are ignored by the upper-triangular view",
                lower
            );
        }
        phase_log!(
            self.config.verbose,
            "structural setup on {}: n={}, nnz={}, {:.3} ms",
            self.device.name(),
            workspace.pattern.rows(),
            workspace.pattern.nnz(),
            start.elapsed().as_secs_f64() * 1e3
        );

        self.stats.num_analyses += 1;
        self.stats.time_analysis += start.elapsed().as_secs_f64();
        self.workspace = Some(workspace);
        self.state = EngineState::StructurallyReady;
        Ok(())
    }

    fn build_workspace(&mut self, pattern: SparsityPattern) -> EngineResult<Workspace<T, D>> {
        let rows = pattern.rows();
        let nnz = pattern.nnz();
        let index_size = std::mem::size_of::<DeviceIndex>();
        let device = &mut self.device;

        // Locals drop in reverse order, so on failure descriptors created
        // below are released before these buffers.
        let mut values = MirroredValues::<T, D>::new(device, nnz, T::one())?;
        let mut row_ptr = device.allocate((rows + 1) * index_size)?;
        let mut col_ind = device.allocate(nnz * index_size)?;
        let operands = OperandPair::new(device, rows, 1, T::DATA_TYPE)?;

        let row_ptr_host = pattern.device_row_ptr();
        let col_ind_host = pattern.device_col_ind();
        device.upload(&mut row_ptr, row_ptr_host.as_slice())?;
        device.upload(&mut col_ind, col_ind_host.as_slice())?;
        let mut to_device = std::mem::size_of_val(row_ptr_host.as_slice())
            + std::mem::size_of_val(col_ind_host.as_slice());
        to_device += values.sync(device)?;

        let desc = CsrDescriptor {
            rows,
            nnz,
            index_type: INDEX_TYPE,
            value_type: T::DATA_TYPE,
            matrix_type: self.config.matrix_type,
            view: MatrixView::Upper,
            base: IndexBase::Zero,
        };
        let matrix = device.create_csr(&desc, &row_ptr, &col_ind, values.buffer())?;

        device.execute(
            Phase::Analysis,
            &matrix,
            operands.solution.matrix(),
            operands.rhs.matrix(),
        )?;
        device.synchronize()?;

        self.stats.value_uploads += 1;
        self.stats.bytes_to_device += to_device;

        Ok(Workspace {
            matrix,
            operands: Some(operands),
            values,
            _row_ptr: row_ptr,
            _col_ind: col_ind,
            pattern,
        })
    }

    /// Host value mirror, one entry per pattern position.
    pub fn host_values(&self) -> EngineResult<&[T]> {
        self.expect_state("host_values", READY_STATES)?;
        Ok(self.workspace()?.values.host())
    }

    /// Host value mirror for in-place updates.
    ///
    /// Position `i` is the `i`-th column index of the pattern. Edits reach the
    /// device at the next factorization.
    pub fn host_values_mut(&mut self) -> EngineResult<&mut [T]> {
        self.expect_state("host_values_mut", READY_STATES)?;
        Ok(self.workspace_mut()?.values.host_mut())
    }

    /// Stage the host values if edited and run the numeric factorization.
    pub fn factorize(&mut self) -> EngineResult<()> {
        self.expect_state("factorize", READY_STATES)?;
        self.run_factorization()
    }

    fn run_factorization(&mut self) -> EngineResult<()> {
        let start = Instant::now();
        let result = self.factorize_on_device();
        match result {
            Ok(uploaded) => {
                if uploaded > 0 {
                    self.stats.value_uploads += 1;
                    self.stats.bytes_to_device += uploaded;
                } else {
                    self.stats.skipped_value_uploads += 1;
                }
                self.stats.num_factorizations += 1;
                self.stats.time_factorization += start.elapsed().as_secs_f64();
                self.state = EngineState::Factorized;
                phase_log!(
                    self.config.verbose,
                    "factorization #{} ({:.3} ms, values {})",
                    self.stats.num_factorizations,
                    start.elapsed().as_secs_f64() * 1e3,
                    if uploaded > 0 { "staged" } else { "unchanged" }
                );
                Ok(())
            }
            Err(e) if e.is_singular() => {
                // The session is intact; only the factors are gone.
                log::debug!("factorization hit a zero pivot");
                self.state = EngineState::StructurallyReady;
                Err(e)
            }
            Err(e) => self.track(Err(e)),
        }
    }

    /// Returns the bytes staged before factorizing.
    fn factorize_on_device(&mut self) -> EngineResult<usize> {
        let ws = self
            .workspace
            .as_mut()
            .ok_or(EngineError::InvalidState {
                operation: "factorize",
                state: self.state,
            })?;
        let operands = ws.operands.as_ref().ok_or(EngineError::InvalidState {
            operation: "factorize",
            state: self.state,
        })?;
        let uploaded = ws.values.sync(&mut self.device)?;
        self.device.execute(
            Phase::Factorization,
            &ws.matrix,
            operands.solution.matrix(),
            operands.rhs.matrix(),
        )?;
        self.device.synchronize()?;
        Ok(uploaded)
    }

    /// Solve for `nrhs` column-major right-hand sides, in place.
    ///
    /// With `matrix_changed` the host values are staged unconditionally and
    /// refactorized first, since callers may write them through a slice
    /// obtained long before; without it the current factors are reused as
    /// they are.
    pub fn solve(&mut self, matrix_changed: bool, nrhs: usize, rhs: &mut [T]) -> EngineResult<()> {
        self.expect_state("solve", READY_STATES)?;
        if nrhs == 0 {
            return Err(EngineError::EmptyBatch);
        }
        let rows = self.workspace()?.pattern.rows();
        if rhs.len() != rows * nrhs {
            return Err(EngineError::DimensionMismatch {
                expected: rows * nrhs,
                actual: rhs.len(),
                context: "right-hand sides",
            });
        }
        if !matrix_changed && self.state == EngineState::StructurallyReady {
            return Err(EngineError::InvalidState {
                operation: "solve with unchanged matrix before any factorization",
                state: self.state,
            });
        }

        let start = Instant::now();
        let resized = self.prepare_operands(nrhs, rhs);
        let resized = self.track(resized)?;

        if matrix_changed {
            self.workspace_mut()?.values.mark_stale();
            self.run_factorization()?;
        } else if self.workspace()?.values.is_stale() {
            log::warn!("solving with previous factors while host values have unstaged edits");
        }

        let result = self.solve_on_device(rhs);
        let downloaded = self.track(result)?;

        self.stats.num_solves += 1;
        self.stats.num_rhs_columns += nrhs;
        self.stats.bytes_to_host += downloaded;
        if resized {
            self.stats.operand_reallocations += 1;
        }
        self.stats.time_solve += start.elapsed().as_secs_f64();
        self.state = EngineState::Solved;
        phase_log!(
            self.config.verbose,
            "solve #{}: {} column(s), {:.3} ms",
            self.stats.num_solves,
            nrhs,
            start.elapsed().as_secs_f64() * 1e3
        );
        Ok(())
    }

    /// Resize the operands to `nrhs` columns and upload the right-hand sides.
    fn prepare_operands(&mut self, nrhs: usize, rhs: &[T]) -> EngineResult<bool> {
        let ws = self.workspace.as_mut().ok_or(EngineError::InvalidState {
            operation: "solve",
            state: self.state,
        })?;
        let rows = ws.pattern.rows();
        let resized = reconcile_width(&mut ws.operands, &mut self.device, rows, nrhs, T::DATA_TYPE)?;
        let operands = ws.operands.as_mut().ok_or(EngineError::InvalidState {
            operation: "solve",
            state: self.state,
        })?;
        let uploaded = operands.rhs.upload(&mut self.device, rhs)?;
        self.stats.bytes_to_device += uploaded;
        Ok(resized)
    }

    fn solve_on_device(&mut self, rhs: &mut [T]) -> EngineResult<usize> {
        let ws = self.workspace.as_ref().ok_or(EngineError::InvalidState {
            operation: "solve",
            state: self.state,
        })?;
        let operands = ws.operands.as_ref().ok_or(EngineError::InvalidState {
            operation: "solve",
            state: self.state,
        })?;
        self.device.execute(
            Phase::Solve,
            &ws.matrix,
            operands.solution.matrix(),
            operands.rhs.matrix(),
        )?;
        self.device.synchronize()?;
        operands.solution.download(&mut self.device, rhs)
    }

    /// Inertia is not available from this backend.
    pub fn number_of_negative_eigenvalues(&self) -> EngineResult<usize> {
        Err(EngineError::Unsupported("number of negative eigenvalues"))
    }

    /// Rank-deficiency detection is not available from this backend.
    pub fn determine_dependent_rows(&mut self, _row_ptr: &[usize], _col_ind: &[usize]) -> EngineResult<Vec<usize>> {
        Err(EngineError::Unsupported("dependent row detection"))
    }

    /// Optional features; all off for this engine.
    pub fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// No pivot tolerance to tighten; always `false`.
    pub fn increase_quality(&mut self) -> bool {
        false
    }

    /// Release every device resource, then the session.
    pub fn destroy(mut self) {
        let had_workspace = self.workspace.take().is_some();
        log::debug!(
            "destroying factorization engine on {} device (workspace: {}, state: {:?})",
            self.device.name(),
            had_workspace,
            self.state
        );
    }

    fn workspace(&self) -> EngineResult<&Workspace<T, D>> {
        self.workspace.as_ref().ok_or(EngineError::InvalidState {
            operation: "workspace access",
            state: self.state,
        })
    }

    fn workspace_mut(&mut self) -> EngineResult<&mut Workspace<T, D>> {
        let state = self.state;
        self.workspace.as_mut().ok_or(EngineError::InvalidState {
            operation: "workspace access",
            state,
        })
    }

    fn expect_state(&self, operation: &'static str, allowed: &[EngineState]) -> EngineResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(EngineError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    /// Move to [`EngineState::Failed`] on resource errors.
    fn track<R>(&mut self, result: EngineResult<R>) -> EngineResult<R> {
        if let Err(e) = &result {
            if e.kind() == ErrorKind::Resource {
                log::error!("{} device failure: {}", self.device.name(), e);
                self.state = EngineState::Failed;
            }
        }
        result
    }
}

const READY_STATES: &[EngineState] = &[
    EngineState::StructurallyReady,
    EngineState::Factorized,
    EngineState::Solved,
];

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> FactorizationEngine<f64, HostDevice> {
        FactorizationEngine::host(EngineConfig::default(), HostConfig::default())
    }

    #[test]
    fn test_setup_transitions_and_placeholders() {
        let mut engine = engine();
        assert_eq!(engine.state(), EngineState::Uninitialized);
        engine.structural_setup(2, 3, &[0, 2, 3], &[0, 1, 1]).unwrap();
        assert_eq!(engine.state(), EngineState::StructurallyReady);
        assert_eq!(engine.host_values().unwrap(), &[1.0, 1.0, 1.0]);
        assert_eq!(engine.batch_width(), Some(1));
        assert_eq!(engine.stats().num_analyses, 1);
        // row_ptr + col_ind as i32, values as f64
        assert_eq!(engine.stats().bytes_to_device, 3 * 4 + 3 * 4 + 3 * 8);
    }

    #[test]
    fn test_second_setup_rejected() {
        let mut engine = engine();
        engine.structural_setup(2, 3, &[0, 2, 3], &[0, 1, 1]).unwrap();
        let err = engine.structural_setup(2, 3, &[0, 2, 3], &[0, 1, 1]).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidState {
                state: EngineState::StructurallyReady,
                ..
            }
        ));
        assert_eq!(engine.state(), EngineState::StructurallyReady);
    }

    #[test]
    fn test_invalid_pattern_does_not_poison() {
        let mut engine = engine();
        let err = engine.structural_setup(2, 3, &[0, 2], &[0, 1, 1]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContractViolation);
        assert_eq!(engine.state(), EngineState::Uninitialized);
        engine.structural_setup(2, 3, &[0, 2, 3], &[0, 1, 1]).unwrap();
    }

    #[test]
    fn test_calls_before_setup_rejected() {
        let mut engine = engine();
        assert!(engine.host_values().is_err());
        assert!(engine.host_values_mut().is_err());
        assert!(engine.factorize().is_err());
        let mut rhs = [1.0, 1.0];
        assert!(matches!(
            engine.solve(true, 1, &mut rhs),
            Err(EngineError::InvalidState {
                state: EngineState::Uninitialized,
                ..
            })
        ));
    }

    #[test]
    fn test_solve_argument_checks() {
        let mut engine = engine();
        engine.structural_setup(2, 3, &[0, 2, 3], &[0, 1, 1]).unwrap();
        let mut rhs = [1.0, 1.0, 1.0];
        assert!(matches!(engine.solve(true, 0, &mut rhs), Err(EngineError::EmptyBatch)));
        assert!(matches!(
            engine.solve(true, 1, &mut rhs),
            Err(EngineError::DimensionMismatch {
                expected: 2,
                actual: 3,
                ..
            })
        ));
        let mut rhs = [1.0, 1.0];
        assert!(engine.solve(false, 1, &mut rhs).is_err());
        assert_eq!(engine.state(), EngineState::StructurallyReady);
        assert_eq!(rhs, [1.0, 1.0]);
    }

    #[test]
    fn test_explicit_factorize_then_reuse() {
        let mut engine = engine();
        engine.structural_setup(2, 3, &[0, 2, 3], &[0, 1, 1]).unwrap();
        engine.host_values_mut().unwrap().copy_from_slice(&[2.0, 1.0, 3.0]);
        engine.factorize().unwrap();
        assert_eq!(engine.state(), EngineState::Factorized);

        let mut rhs = [1.0, 1.0];
        engine.solve(false, 1, &mut rhs).unwrap();
        assert!((rhs[0] - 0.4).abs() < 1e-12);
        assert!((rhs[1] - 0.2).abs() < 1e-12);
        assert_eq!(engine.stats().num_factorizations, 1);
    }

    #[test]
    fn test_unchanged_values_skip_upload() {
        let mut engine = engine();
        engine.structural_setup(2, 3, &[0, 2, 3], &[0, 1, 1]).unwrap();
        engine.host_values_mut().unwrap().copy_from_slice(&[2.0, 1.0, 3.0]);
        engine.factorize().unwrap();
        let uploads = engine.stats().value_uploads;

        engine.factorize().unwrap();
        assert_eq!(engine.stats().value_uploads, uploads);
        assert_eq!(engine.stats().skipped_value_uploads, 1);
        assert_eq!(engine.stats().num_factorizations, 2);
    }

    #[test]
    fn test_flagged_solve_always_stages_values() {
        let mut engine = engine();
        engine.structural_setup(2, 3, &[0, 2, 3], &[0, 1, 1]).unwrap();
        let values: *mut f64 = engine.host_values_mut().unwrap().as_mut_ptr();

        // Writes through a pointer taken once, as C callers do.
        unsafe { std::ptr::copy_nonoverlapping([2.0, 1.0, 3.0].as_ptr(), values, 3) };
        let mut rhs = [1.0, 1.0];
        engine.solve(true, 1, &mut rhs).unwrap();
        assert!((rhs[0] - 0.4).abs() < 1e-12);

        unsafe { std::ptr::copy_nonoverlapping([4.0, 1.0, 3.0].as_ptr(), values, 3) };
        let mut rhs = [1.0, 1.0];
        engine.solve(true, 1, &mut rhs).unwrap();
        assert!((rhs[0] - 2.0 / 11.0).abs() < 1e-12, "{:?}", rhs);
        assert!((rhs[1] - 3.0 / 11.0).abs() < 1e-12, "{:?}", rhs);
        // Placeholders at setup, then one per flagged solve.
        assert_eq!(engine.stats().value_uploads, 3);
        assert_eq!(engine.stats().skipped_value_uploads, 0);
    }

    #[test]
    fn test_singular_matrix_keeps_engine_usable() {
        let mut engine = engine();
        engine.structural_setup(2, 3, &[0, 2, 3], &[0, 1, 1]).unwrap();
        // Placeholder values give [[1, 1], [1, 1]].
        let mut rhs = [1.0, 1.0];
        let err = engine.solve(true, 1, &mut rhs).unwrap_err();
        assert!(err.is_singular());
        assert_eq!(engine.state(), EngineState::StructurallyReady);

        engine.host_values_mut().unwrap().copy_from_slice(&[2.0, 1.0, 3.0]);
        let mut rhs = [1.0, 1.0];
        engine.solve(true, 1, &mut rhs).unwrap();
        assert_eq!(engine.state(), EngineState::Solved);
    }

    #[test]
    fn test_unsupported_diagnostics() {
        let mut engine = engine();
        assert!(matches!(
            engine.number_of_negative_eigenvalues(),
            Err(EngineError::Unsupported(_))
        ));
        assert!(matches!(
            engine.determine_dependent_rows(&[0, 1], &[0]),
            Err(EngineError::Unsupported(_))
        ));
        assert_eq!(engine.capabilities(), Capabilities::default());
        assert!(!engine.increase_quality());
    }

    #[test]
    fn test_single_precision_engine() {
        let mut engine: FactorizationEngine<f32, HostDevice> =
            FactorizationEngine::host(EngineConfig::default(), HostConfig::default());
        engine.structural_setup(2, 3, &[0, 2, 3], &[0, 1, 1]).unwrap();
        engine.host_values_mut().unwrap().copy_from_slice(&[2.0, 1.0, 3.0]);
        let mut rhs = [1.0f32, 1.0];
        engine.solve(true, 1, &mut rhs).unwrap();
        assert!((rhs[0] - 0.4).abs() < 1e-6);
        assert!((rhs[1] - 0.2).abs() < 1e-6);
    }
}
