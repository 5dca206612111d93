//! Accelerator backends.
//!
//! A [`Device`] exposes the handful of operations the engine needs from a
//! sparse direct solver library: raw buffers, synchronous transfers, matrix
//! descriptors over those buffers and the phase executor. The call sequence
//! mirrors cuDSS, which is the production backend
//! ([`cuda::CudaDevice`]); [`host::HostDevice`] emulates the same contract on
//! the CPU.
//!
//! Ownership rules shared by every backend:
//!
//! * a [`Device::Buffer`] releases its memory when dropped;
//! * a [`Device::Matrix`] references buffers without owning them and must be
//!   dropped before them;
//! * all buffers and matrices must be dropped before the device.

pub mod host;

#[cfg(feature = "cuda")]
pub mod cuda;

use crate::config::MatrixType;
use crate::error::EngineResult;
use crate::scalar::DataType;
use bytemuck::Pod;

/// Solver phases (`cudssPhase_t` values).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Phase {
    /// Reordering and symbolic factorization.
    Analysis = 1,
    /// Numeric factorization.
    Factorization = 2,
    /// Numeric factorization reusing the previous pivot sequence.
    Refactorization = 4,
    /// Forward, diagonal and backward solves.
    Solve = 8,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Phase::Analysis => "analysis",
            Phase::Factorization => "factorization",
            Phase::Refactorization => "refactorization",
            Phase::Solve => "solve",
        }
    }
}

/// Triangle of a symmetric matrix the library reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum MatrixView {
    Full = 0,
    Lower = 1,
    Upper = 2,
}

/// Base of stored indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum IndexBase {
    Zero = 0,
    One = 1,
}

/// Dense storage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Layout {
    ColMajor = 0,
    RowMajor = 1,
}

/// Shape and typing of a square sparse matrix in CSR form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CsrDescriptor {
    pub rows: usize,
    pub nnz: usize,
    pub index_type: DataType,
    pub value_type: DataType,
    pub matrix_type: MatrixType,
    pub view: MatrixView,
    pub base: IndexBase,
}

/// Shape and typing of a dense multi-vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DenseDescriptor {
    pub rows: usize,
    pub cols: usize,
    /// Leading dimension (elements between consecutive columns).
    pub ld: usize,
    pub value_type: DataType,
    pub layout: Layout,
}

impl DenseDescriptor {
    /// Column-major `rows x cols` with a packed leading dimension.
    pub fn column_major(rows: usize, cols: usize, value_type: DataType) -> Self {
        Self {
            rows,
            cols,
            ld: rows,
            value_type,
            layout: Layout::ColMajor,
        }
    }

    /// Bytes spanned by the multi-vector.
    pub fn size_bytes(&self) -> usize {
        self.ld * self.cols * self.value_type.size_bytes()
    }
}

/// Device memory allocation.
pub trait DeviceBuffer {
    fn size_bytes(&self) -> usize;
}

/// A sparse direct solver session bound to one accelerator and one stream.
pub trait Device {
    type Buffer: DeviceBuffer;
    type Matrix;

    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Allocate `bytes` of device memory.
    fn allocate(&mut self, bytes: usize) -> EngineResult<Self::Buffer>;

    /// Copy `src` into the start of `dst`. Returns once the copy is complete.
    fn upload<E: Pod>(&mut self, dst: &mut Self::Buffer, src: &[E]) -> EngineResult<()>;

    /// Copy the start of `src` into `dst`. Returns once the copy is complete.
    fn download<E: Pod>(&mut self, dst: &mut [E], src: &Self::Buffer) -> EngineResult<()>;

    /// Describe a CSR matrix stored in three device buffers.
    fn create_csr(
        &mut self,
        desc: &CsrDescriptor,
        row_ptr: &Self::Buffer,
        col_ind: &Self::Buffer,
        values: &Self::Buffer,
    ) -> EngineResult<Self::Matrix>;

    /// Describe a dense multi-vector stored in one device buffer.
    fn create_dense(
        &mut self,
        desc: &DenseDescriptor,
        values: &Self::Buffer,
    ) -> EngineResult<Self::Matrix>;

    /// Run one phase on the session's stream.
    fn execute(
        &mut self,
        phase: Phase,
        matrix: &Self::Matrix,
        solution: &Self::Matrix,
        rhs: &Self::Matrix,
    ) -> EngineResult<()>;

    /// Block until all work on the stream has finished.
    fn synchronize(&mut self) -> EngineResult<()>;
}
