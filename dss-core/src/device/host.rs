//! CPU emulation of the accelerator.
//!
//! "Device" memory is plain host memory owned by [`HostBuffer`]; descriptors
//! hold weak references to it so a phase run against a released buffer is
//! reported instead of reading freed data. Phases run the in-crate sparse
//! LDL^T in double precision regardless of the value type and report
//! failures with the same status codes as cuDSS.

use super::{CsrDescriptor, DenseDescriptor, Device, DeviceBuffer, IndexBase, Layout, MatrixView, Phase};
use crate::error::{EngineError, EngineResult, LibraryStatus};
use crate::linalg::ldlt::{FillOrdering, LdltError, NumericLdlt, PivotPolicy, SymbolicLdlt};
use crate::pattern::SparsityPattern;
use crate::scalar::{DataType, Scalar};
use bytemuck::Pod;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

/// Storage unit. Eight-byte words keep every element type aligned.
type Words = RefCell<Vec<u64>>;

/// Configuration for [`HostDevice`].
#[derive(Debug, Clone, Default)]
pub struct HostConfig {
    /// Fill-reducing ordering used by the analysis phase.
    pub ordering: FillOrdering,

    /// Cap on live device bytes. Allocations past it fail like an
    /// exhausted accelerator.
    pub memory_limit: Option<usize>,

    /// Zero-pivot handling for symmetric indefinite matrices.
    pub pivots: PivotPolicy,
}

impl HostConfig {
    /// Defaults overridden by `DSS_HOST_ORDERING` (`natural` or `rcm`) and
    /// `DSS_HOST_PIVOT_PERTURBATION` (relative diagonal shift, 0 disables).
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("DSS_HOST_ORDERING") {
            match v.trim().to_ascii_lowercase().as_str() {
                "natural" | "none" => config.ordering = FillOrdering::Natural,
                "rcm" => config.ordering = FillOrdering::ReverseCuthillMcKee,
                other => log::warn!("ignoring unknown DSS_HOST_ORDERING value {:?}", other),
            }
        }
        if let Ok(v) = std::env::var("DSS_HOST_PIVOT_PERTURBATION") {
            match v.trim().parse::<f64>() {
                Ok(eps) if eps >= 0.0 => config.pivots.perturbation = eps,
                _ => log::warn!("ignoring invalid DSS_HOST_PIVOT_PERTURBATION value {:?}", v),
            }
        }
        config
    }
}

/// Live-resource counters shared between a device and what it hands out.
#[derive(Debug, Default)]
struct Ledger {
    bytes: Cell<usize>,
    buffers: Cell<usize>,
    descriptors: Cell<usize>,
}

/// Host allocation standing in for device memory.
#[derive(Debug)]
pub struct HostBuffer {
    words: Rc<Words>,
    bytes: usize,
    ledger: Rc<Ledger>,
}

impl DeviceBuffer for HostBuffer {
    fn size_bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        self.ledger.bytes.set(self.ledger.bytes.get() - self.bytes);
        self.ledger.buffers.set(self.ledger.buffers.get() - 1);
    }
}

/// View of a buffer held by a descriptor.
#[derive(Debug)]
struct BufferRef {
    words: Weak<Words>,
}

impl BufferRef {
    fn new(buffer: &HostBuffer) -> Self {
        Self {
            words: Rc::downgrade(&buffer.words),
        }
    }

    fn upgrade(&self, what: &str) -> EngineResult<Rc<Words>> {
        self.words
            .upgrade()
            .ok_or_else(|| EngineError::library(LibraryStatus::InvalidValue, format!("{} (released buffer)", what)))
    }
}

#[derive(Debug)]
enum MatrixKind {
    Csr {
        desc: CsrDescriptor,
        row_ptr: BufferRef,
        col_ind: BufferRef,
        values: BufferRef,
    },
    Dense {
        desc: DenseDescriptor,
        values: BufferRef,
    },
}

/// Matrix descriptor over [`HostBuffer`]s.
#[derive(Debug)]
pub struct HostMatrix {
    kind: MatrixKind,
    ledger: Rc<Ledger>,
}

impl Drop for HostMatrix {
    fn drop(&mut self) {
        self.ledger.descriptors.set(self.ledger.descriptors.get() - 1);
    }
}

/// CPU device.
///
/// Holds one solver session: the symbolic analysis of the last analysed
/// matrix and the factors of the last factorization.
pub struct HostDevice {
    config: HostConfig,
    ledger: Rc<Ledger>,
    symbolic: Option<SymbolicLdlt>,
    factor: Option<NumericLdlt>,
}

impl HostDevice {
    pub fn new(config: HostConfig) -> Self {
        Self {
            config,
            ledger: Rc::new(Ledger::default()),
            symbolic: None,
            factor: None,
        }
    }

    /// Bytes currently allocated and not yet released.
    pub fn live_bytes(&self) -> usize {
        self.ledger.bytes.get()
    }

    /// Buffers currently allocated.
    pub fn live_buffers(&self) -> usize {
        self.ledger.buffers.get()
    }

    /// Descriptors currently alive.
    pub fn live_descriptors(&self) -> usize {
        self.ledger.descriptors.get()
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    fn track_descriptor(&self, kind: MatrixKind) -> HostMatrix {
        self.ledger.descriptors.set(self.ledger.descriptors.get() + 1);
        HostMatrix {
            kind,
            ledger: Rc::clone(&self.ledger),
        }
    }

    fn analyze(&mut self, matrix: &HostMatrix) -> EngineResult<()> {
        let (desc, row_ptr, col_ind, _) = csr_parts(matrix, Phase::Analysis)?;
        let row_ptr = read_indices(&*row_ptr.upgrade("row pointers")?, desc.index_type, desc.rows + 1)?;
        let col_ind = read_indices(&*col_ind.upgrade("column indices")?, desc.index_type, desc.nnz)?;
        let offset = match desc.base {
            IndexBase::Zero => 0,
            IndexBase::One => 1,
        };
        let row_ptr = rebase(&row_ptr, offset)?;
        let col_ind = rebase(&col_ind, offset)?;

        let pattern = SparsityPattern::new(desc.rows, desc.nnz, &row_ptr, &col_ind)
            .map_err(|_| EngineError::library(LibraryStatus::InvalidValue, Phase::Analysis.name()))?;
        let symbolic =
            SymbolicLdlt::analyze(&pattern, self.config.ordering).map_err(|e| ldlt_error(e, Phase::Analysis))?;
        log::trace!(
            "host analysis: n={}, nnz={}, nnz(L)={}",
            desc.rows,
            desc.nnz,
            symbolic.nnz_l()
        );
        self.symbolic = Some(symbolic);
        self.factor = None;
        Ok(())
    }

    fn factorize(&mut self, phase: Phase, matrix: &HostMatrix) -> EngineResult<()> {
        let (desc, _, _, values) = csr_parts(matrix, phase)?;
        let symbolic = self
            .symbolic
            .as_ref()
            .ok_or_else(|| EngineError::library(LibraryStatus::InvalidValue, phase.name()))?;
        if symbolic.n() != desc.rows {
            return Err(EngineError::library(LibraryStatus::InvalidValue, phase.name()));
        }
        let values = read_values(&*values.upgrade("matrix values")?, desc.value_type, desc.nnz)?;

        // Drop old factors first so a failed factorization leaves none behind.
        self.factor = None;
        let factor = symbolic
            .factorize(&values, desc.matrix_type, &self.config.pivots)
            .map_err(|e| ldlt_error(e, phase))?;
        if factor.shift() != 0.0 || factor.dynamic_bumps() > 0 {
            log::debug!(
                "host {}: diagonal shift {:e}, {} bumped pivots",
                phase.name(),
                factor.shift(),
                factor.dynamic_bumps()
            );
        }
        self.factor = Some(factor);
        Ok(())
    }

    fn solve(&mut self, solution: &HostMatrix, rhs: &HostMatrix) -> EngineResult<()> {
        let phase = Phase::Solve;
        let (symbolic, factor) = match (&self.symbolic, &self.factor) {
            (Some(s), Some(f)) => (s, f),
            _ => return Err(EngineError::library(LibraryStatus::InvalidValue, phase.name())),
        };
        let (rhs_desc, rhs_values) = dense_parts(rhs, phase)?;
        let (sol_desc, sol_values) = dense_parts(solution, phase)?;
        if rhs_desc.rows != symbolic.n()
            || sol_desc.rows != rhs_desc.rows
            || sol_desc.cols != rhs_desc.cols
            || sol_desc.value_type != rhs_desc.value_type
        {
            return Err(EngineError::library(LibraryStatus::InvalidValue, phase.name()));
        }
        if rhs_desc.layout != Layout::ColMajor || sol_desc.layout != Layout::ColMajor {
            return Err(EngineError::library(LibraryStatus::NotSupported, phase.name()));
        }

        let rhs_words = rhs_values.upgrade("right-hand side")?;
        let sol_words = sol_values.upgrade("solution")?;
        let b = read_values(&*rhs_words, rhs_desc.value_type, rhs_desc.ld * rhs_desc.cols)?;
        let mut x = vec![0.0; sol_desc.ld * sol_desc.cols];

        let n = rhs_desc.rows;
        for col in 0..rhs_desc.cols {
            let src = &b[col * rhs_desc.ld..col * rhs_desc.ld + n];
            let dst = &mut x[col * sol_desc.ld..col * sol_desc.ld + n];
            dst.copy_from_slice(src);
            symbolic
                .solve_in_place(factor, dst)
                .map_err(|e| ldlt_error(e, phase))?;
        }

        write_values(&*sol_words, sol_desc.value_type, &x)
    }
}

impl Default for HostDevice {
    fn default() -> Self {
        Self::new(HostConfig::default())
    }
}

impl Device for HostDevice {
    type Buffer = HostBuffer;
    type Matrix = HostMatrix;

    fn name(&self) -> &str {
        "host"
    }

    fn allocate(&mut self, bytes: usize) -> EngineResult<HostBuffer> {
        let live = self.ledger.bytes.get();
        if let Some(limit) = self.config.memory_limit {
            if live + bytes > limit {
                return Err(EngineError::Allocation {
                    bytes,
                    reason: format!("{} of {} bytes already in use", live, limit),
                });
            }
        }
        let words = vec![0u64; bytes.div_ceil(8)];
        self.ledger.bytes.set(live + bytes);
        self.ledger.buffers.set(self.ledger.buffers.get() + 1);
        Ok(HostBuffer {
            words: Rc::new(RefCell::new(words)),
            bytes,
            ledger: Rc::clone(&self.ledger),
        })
    }

    fn upload<E: Pod>(&mut self, dst: &mut HostBuffer, src: &[E]) -> EngineResult<()> {
        let bytes: &[u8] = bytemuck::cast_slice(src);
        if bytes.len() > dst.bytes {
            return Err(copy_overflow("upload", bytes.len(), dst.bytes));
        }
        let mut words = dst.words.borrow_mut();
        let target: &mut [u8] = bytemuck::cast_slice_mut(words.as_mut_slice());
        target[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn download<E: Pod>(&mut self, dst: &mut [E], src: &HostBuffer) -> EngineResult<()> {
        let target: &mut [u8] = bytemuck::cast_slice_mut(dst);
        if target.len() > src.bytes {
            return Err(copy_overflow("download", target.len(), src.bytes));
        }
        let words = src.words.borrow();
        let source: &[u8] = bytemuck::cast_slice(words.as_slice());
        let len = target.len();
        target.copy_from_slice(&source[..len]);
        Ok(())
    }

    fn create_csr(
        &mut self,
        desc: &CsrDescriptor,
        row_ptr: &HostBuffer,
        col_ind: &HostBuffer,
        values: &HostBuffer,
    ) -> EngineResult<HostMatrix> {
        let index_size = desc.index_type.size_bytes();
        let fits = row_ptr.bytes >= (desc.rows + 1) * index_size
            && col_ind.bytes >= desc.nnz * index_size
            && values.bytes >= desc.nnz * desc.value_type.size_bytes();
        let index_ok = matches!(desc.index_type, DataType::R32I | DataType::R64I);
        let value_ok = matches!(desc.value_type, DataType::R32F | DataType::R64F);
        if !fits || !index_ok || !value_ok {
            return Err(EngineError::library(LibraryStatus::InvalidValue, "create CSR matrix"));
        }
        // The kernel reads the upper triangle only.
        if desc.view == MatrixView::Lower {
            return Err(EngineError::library(LibraryStatus::NotSupported, "create CSR matrix"));
        }
        Ok(self.track_descriptor(MatrixKind::Csr {
            desc: *desc,
            row_ptr: BufferRef::new(row_ptr),
            col_ind: BufferRef::new(col_ind),
            values: BufferRef::new(values),
        }))
    }

    fn create_dense(
        &mut self,
        desc: &DenseDescriptor,
        values: &HostBuffer,
    ) -> EngineResult<HostMatrix> {
        if desc.ld < desc.rows || values.bytes < desc.size_bytes() {
            return Err(EngineError::library(LibraryStatus::InvalidValue, "create dense matrix"));
        }
        Ok(self.track_descriptor(MatrixKind::Dense {
            desc: *desc,
            values: BufferRef::new(values),
        }))
    }

    fn execute(
        &mut self,
        phase: Phase,
        matrix: &HostMatrix,
        solution: &HostMatrix,
        rhs: &HostMatrix,
    ) -> EngineResult<()> {
        match phase {
            Phase::Analysis => self.analyze(matrix),
            Phase::Factorization | Phase::Refactorization => self.factorize(phase, matrix),
            Phase::Solve => self.solve(solution, rhs),
        }
    }

    fn synchronize(&mut self) -> EngineResult<()> {
        // Every phase completes before `execute` returns.
        Ok(())
    }
}

fn csr_parts(
    matrix: &HostMatrix,
    phase: Phase,
) -> EngineResult<(&CsrDescriptor, &BufferRef, &BufferRef, &BufferRef)> {
    match &matrix.kind {
        MatrixKind::Csr {
            desc,
            row_ptr,
            col_ind,
            values,
        } => Ok((desc, row_ptr, col_ind, values)),
        MatrixKind::Dense { .. } => Err(EngineError::library(LibraryStatus::InvalidValue, phase.name())),
    }
}

fn dense_parts(matrix: &HostMatrix, phase: Phase) -> EngineResult<(&DenseDescriptor, &BufferRef)> {
    match &matrix.kind {
        MatrixKind::Dense { desc, values } => Ok((desc, values)),
        MatrixKind::Csr { .. } => Err(EngineError::library(LibraryStatus::InvalidValue, phase.name())),
    }
}

fn ldlt_error(err: LdltError, phase: Phase) -> EngineError {
    let status = match err {
        LdltError::ZeroPivot | LdltError::NotPositiveDefinite { .. } => LibraryStatus::ZeroPivot,
        LdltError::DimensionMismatch { .. } => LibraryStatus::InvalidValue,
        LdltError::Structure => LibraryStatus::InternalError,
    };
    log::debug!("host {} failed: {}", phase.name(), err);
    EngineError::library(status, phase.name())
}

fn copy_overflow(direction: &str, requested: usize, available: usize) -> EngineError {
    EngineError::Runtime {
        // cudaErrorInvalidValue
        code: 1,
        context: format!("host {}", direction),
        message: format!("{} bytes requested, buffer holds {}", requested, available),
    }
}

/// Typed view of the first `count` elements of a buffer.
fn typed<E: Pod>(words: &[u64], count: usize) -> EngineResult<&[E]> {
    let bytes: &[u8] = bytemuck::cast_slice(words);
    let len = count * std::mem::size_of::<E>();
    let prefix = bytes
        .get(..len)
        .ok_or_else(|| EngineError::library(LibraryStatus::InvalidValue, "buffer read"))?;
    bytemuck::try_cast_slice(prefix)
        .map_err(|_| EngineError::library(LibraryStatus::InternalError, "buffer read"))
}

fn read_indices(words: &Words, index_type: DataType, count: usize) -> EngineResult<Vec<i64>> {
    let words = words.borrow();
    let indices = match index_type {
        DataType::R32I => typed::<i32>(&words, count)?.iter().map(|&v| v as i64).collect(),
        DataType::R64I => typed::<i64>(&words, count)?.to_vec(),
        _ => return Err(EngineError::library(LibraryStatus::InvalidValue, "index read")),
    };
    Ok(indices)
}

fn rebase(indices: &[i64], offset: i64) -> EngineResult<Vec<usize>> {
    indices
        .iter()
        .map(|&v| usize::try_from(v - offset))
        .collect::<Result<_, _>>()
        .map_err(|_| EngineError::library(LibraryStatus::InvalidValue, Phase::Analysis.name()))
}

fn read_values(words: &Words, value_type: DataType, count: usize) -> EngineResult<Vec<f64>> {
    let words = words.borrow();
    match value_type {
        DataType::R32F => widen::<f32>(&words, count),
        DataType::R64F => widen::<f64>(&words, count),
        _ => Err(EngineError::library(LibraryStatus::InvalidValue, "value read")),
    }
}

fn widen<T: Scalar>(words: &[u64], count: usize) -> EngineResult<Vec<f64>> {
    let values = typed::<T>(words, count)?.iter().map(|&v| v.as_f64()).collect();
    Ok(values)
}

fn write_values(words: &Words, value_type: DataType, values: &[f64]) -> EngineResult<()> {
    let mut words = words.borrow_mut();
    let bytes: &mut [u8] = bytemuck::cast_slice_mut(words.as_mut_slice());
    match value_type {
        DataType::R32F => narrow::<f32>(bytes, values),
        DataType::R64F => narrow::<f64>(bytes, values),
        _ => Err(EngineError::library(LibraryStatus::InvalidValue, "value write")),
    }
}

fn narrow<T: Scalar>(bytes: &mut [u8], values: &[f64]) -> EngineResult<()> {
    let converted: Vec<T> = values.iter().map(|&v| T::from_f64(v)).collect();
    let src: &[u8] = bytemuck::cast_slice(&converted);
    let available = bytes.len();
    let dst = bytes
        .get_mut(..src.len())
        .ok_or_else(|| copy_overflow("value write", src.len(), available))?;
    dst.copy_from_slice(src);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatrixType;

    fn upper_2x2(device: &mut HostDevice) -> (HostBuffer, HostBuffer, HostBuffer) {
        let mut row_ptr = device.allocate(3 * 4).unwrap();
        let mut col_ind = device.allocate(3 * 4).unwrap();
        let mut values = device.allocate(3 * 8).unwrap();
        device.upload(&mut row_ptr, &[0i32, 2, 3]).unwrap();
        device.upload(&mut col_ind, &[0i32, 1, 1]).unwrap();
        device.upload(&mut values, &[2.0f64, 1.0, 3.0]).unwrap();
        (row_ptr, col_ind, values)
    }

    fn csr_desc(rows: usize, nnz: usize) -> CsrDescriptor {
        CsrDescriptor {
            rows,
            nnz,
            index_type: DataType::R32I,
            value_type: DataType::R64F,
            matrix_type: MatrixType::Symmetric,
            view: MatrixView::Upper,
            base: IndexBase::Zero,
        }
    }

    #[test]
    fn test_transfers_round_trip_and_are_bounded() {
        let mut device = HostDevice::default();
        let mut buf = device.allocate(4 * 8).unwrap();
        device.upload(&mut buf, &[1.0f64, 2.0, 3.0]).unwrap();
        let mut out = [0.0f64; 3];
        device.download(&mut out, &buf).unwrap();
        assert_eq!(out, [1.0, 2.0, 3.0]);

        let err = device.upload(&mut buf, &[0.0f64; 5]).unwrap_err();
        assert!(matches!(err, EngineError::Runtime { code: 1, .. }));
    }

    #[test]
    fn test_ledger_tracks_buffers_and_descriptors() {
        let mut device = HostDevice::default();
        {
            let (row_ptr, col_ind, values) = upper_2x2(&mut device);
            assert_eq!(device.live_buffers(), 3);
            assert_eq!(device.live_bytes(), 12 + 12 + 24);
            let matrix = device
                .create_csr(&csr_desc(2, 3), &row_ptr, &col_ind, &values)
                .unwrap();
            assert_eq!(device.live_descriptors(), 1);
            drop(matrix);
            assert_eq!(device.live_descriptors(), 0);
        }
        assert_eq!(device.live_buffers(), 0);
        assert_eq!(device.live_bytes(), 0);
    }

    #[test]
    fn test_memory_limit() {
        let mut device = HostDevice::new(HostConfig {
            memory_limit: Some(64),
            ..HostConfig::default()
        });
        let _a = device.allocate(48).unwrap();
        let err = device.allocate(32).unwrap_err();
        assert!(matches!(err, EngineError::Allocation { bytes: 32, .. }));
    }

    #[test]
    fn test_three_phases() {
        let mut device = HostDevice::default();
        let (row_ptr, col_ind, values) = upper_2x2(&mut device);
        let mut b = device.allocate(2 * 8).unwrap();
        let x = device.allocate(2 * 8).unwrap();
        device.upload(&mut b, &[1.0f64, 1.0]).unwrap();

        let a = device
            .create_csr(&csr_desc(2, 3), &row_ptr, &col_ind, &values)
            .unwrap();
        let dense = DenseDescriptor::column_major(2, 1, DataType::R64F);
        let b_mat = device.create_dense(&dense, &b).unwrap();
        let x_mat = device.create_dense(&dense, &x).unwrap();

        device.execute(Phase::Analysis, &a, &x_mat, &b_mat).unwrap();
        device.execute(Phase::Factorization, &a, &x_mat, &b_mat).unwrap();
        device.execute(Phase::Solve, &a, &x_mat, &b_mat).unwrap();
        device.synchronize().unwrap();

        let mut out = [0.0f64; 2];
        device.download(&mut out, &x).unwrap();
        assert!((out[0] - 0.4).abs() < 1e-12);
        assert!((out[1] - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_solve_before_factorization_is_rejected() {
        let mut device = HostDevice::default();
        let (row_ptr, col_ind, values) = upper_2x2(&mut device);
        let b = device.allocate(16).unwrap();
        let x = device.allocate(16).unwrap();
        let a = device
            .create_csr(&csr_desc(2, 3), &row_ptr, &col_ind, &values)
            .unwrap();
        let dense = DenseDescriptor::column_major(2, 1, DataType::R64F);
        let b_mat = device.create_dense(&dense, &b).unwrap();
        let x_mat = device.create_dense(&dense, &x).unwrap();

        device.execute(Phase::Analysis, &a, &x_mat, &b_mat).unwrap();
        let err = device.execute(Phase::Solve, &a, &x_mat, &b_mat).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Library {
                status: LibraryStatus::InvalidValue,
                ..
            }
        ));
    }

    #[test]
    fn test_zero_pivot_status() {
        let mut device = HostDevice::default();
        let (row_ptr, col_ind, mut values) = upper_2x2(&mut device);
        device.upload(&mut values, &[1.0f64, 1.0, 1.0]).unwrap();
        let b = device.allocate(16).unwrap();
        let x = device.allocate(16).unwrap();
        let a = device
            .create_csr(&csr_desc(2, 3), &row_ptr, &col_ind, &values)
            .unwrap();
        let dense = DenseDescriptor::column_major(2, 1, DataType::R64F);
        let b_mat = device.create_dense(&dense, &b).unwrap();
        let x_mat = device.create_dense(&dense, &x).unwrap();

        device.execute(Phase::Analysis, &a, &x_mat, &b_mat).unwrap();
        let err = device
            .execute(Phase::Factorization, &a, &x_mat, &b_mat)
            .unwrap_err();
        assert!(err.is_singular());
    }

    /// [[0, 1], [1, 0]] x = [1, 1] through all three phases.
    fn solve_swap_matrix(config: HostConfig) -> EngineResult<[f64; 2]> {
        let mut device = HostDevice::new(config);
        let (row_ptr, col_ind, mut values) = upper_2x2(&mut device);
        device.upload(&mut values, &[0.0f64, 1.0, 0.0]).unwrap();
        let mut b = device.allocate(16).unwrap();
        let x = device.allocate(16).unwrap();
        device.upload(&mut b, &[1.0f64, 1.0]).unwrap();
        let a = device
            .create_csr(&csr_desc(2, 3), &row_ptr, &col_ind, &values)
            .unwrap();
        let dense = DenseDescriptor::column_major(2, 1, DataType::R64F);
        let b_mat = device.create_dense(&dense, &b).unwrap();
        let x_mat = device.create_dense(&dense, &x).unwrap();
        for phase in [Phase::Analysis, Phase::Factorization, Phase::Solve] {
            device.execute(phase, &a, &x_mat, &b_mat)?;
        }
        let mut out = [0.0f64; 2];
        device.download(&mut out, &x).unwrap();
        Ok(out)
    }

    #[test]
    fn test_zero_diagonal_indefinite_matrix_solves() {
        let out = solve_swap_matrix(HostConfig::default()).unwrap();
        assert!((out[0] - 1.0).abs() < 1e-12, "{:?}", out);
        assert!((out[1] - 1.0).abs() < 1e-12, "{:?}", out);

        let strict = HostConfig {
            pivots: PivotPolicy {
                perturbation: 0.0,
                ..PivotPolicy::default()
            },
            ..HostConfig::default()
        };
        assert!(solve_swap_matrix(strict).unwrap_err().is_singular());
    }

    #[test]
    fn test_released_buffer_detected() {
        let mut device = HostDevice::default();
        let b = device.allocate(16).unwrap();
        let x = device.allocate(16).unwrap();
        let dense = DenseDescriptor::column_major(2, 1, DataType::R64F);
        let b_mat = device.create_dense(&dense, &b).unwrap();
        drop(b);
        let ref_b = match &b_mat.kind {
            MatrixKind::Dense { values, .. } => values,
            MatrixKind::Csr { .. } => unreachable!(),
        };
        assert!(ref_b.upgrade("rhs").is_err());
        drop(x);
    }

    #[test]
    fn test_one_based_f32_matrix() {
        let mut device = HostDevice::default();
        let mut row_ptr = device.allocate(3 * 4).unwrap();
        let mut col_ind = device.allocate(3 * 4).unwrap();
        let mut values = device.allocate(3 * 4).unwrap();
        device.upload(&mut row_ptr, &[1i32, 3, 4]).unwrap();
        device.upload(&mut col_ind, &[1i32, 2, 2]).unwrap();
        device.upload(&mut values, &[2.0f32, 1.0, 3.0]).unwrap();
        let mut b = device.allocate(8).unwrap();
        let x = device.allocate(8).unwrap();
        device.upload(&mut b, &[1.0f32, 1.0]).unwrap();

        let desc = CsrDescriptor {
            value_type: DataType::R32F,
            base: IndexBase::One,
            ..csr_desc(2, 3)
        };
        let a = device.create_csr(&desc, &row_ptr, &col_ind, &values).unwrap();
        let dense = DenseDescriptor::column_major(2, 1, DataType::R32F);
        let b_mat = device.create_dense(&dense, &b).unwrap();
        let x_mat = device.create_dense(&dense, &x).unwrap();
        for phase in [Phase::Analysis, Phase::Factorization, Phase::Solve] {
            device.execute(phase, &a, &x_mat, &b_mat).unwrap();
        }
        let mut out = [0.0f32; 2];
        device.download(&mut out, &x).unwrap();
        assert!((out[0] - 0.4).abs() < 1e-6);
        assert!((out[1] - 0.2).abs() < 1e-6);
    }
}
