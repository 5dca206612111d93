//! Error types for the factorization engine and its device backends.

use crate::engine::EngineState;
use thiserror::Error;

/// Result type for engine and device operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Status codes reported by the sparse direct solver library.
///
/// Values follow `cudssStatus_t`; the host device reports the same codes so
/// both backends surface failures identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryStatus {
    NotInitialized,
    AllocFailed,
    InvalidValue,
    NotSupported,
    ArchMismatch,
    ExecutionFailed,
    InternalError,
    ZeroPivot,
    /// A code outside the documented range.
    Unknown(i32),
}

impl LibraryStatus {
    /// Map a raw status code. Returns `None` for success (code 0).
    pub fn from_code(code: i32) -> Option<Self> {
        let status = match code {
            0 => return None,
            1 => LibraryStatus::NotInitialized,
            2 => LibraryStatus::AllocFailed,
            3 => LibraryStatus::InvalidValue,
            4 => LibraryStatus::NotSupported,
            5 => LibraryStatus::ArchMismatch,
            6 => LibraryStatus::ExecutionFailed,
            7 => LibraryStatus::InternalError,
            8 => LibraryStatus::ZeroPivot,
            other => LibraryStatus::Unknown(other),
        };
        Some(status)
    }

    /// Raw status code.
    pub fn code(self) -> i32 {
        match self {
            LibraryStatus::NotInitialized => 1,
            LibraryStatus::AllocFailed => 2,
            LibraryStatus::InvalidValue => 3,
            LibraryStatus::NotSupported => 4,
            LibraryStatus::ArchMismatch => 5,
            LibraryStatus::ExecutionFailed => 6,
            LibraryStatus::InternalError => 7,
            LibraryStatus::ZeroPivot => 8,
            LibraryStatus::Unknown(code) => code,
        }
    }
}

/// Coarse classification of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Allocation failure or non-success status from the accelerator stack.
    /// The engine instance is unusable afterwards.
    Resource,
    /// A diagnostic this backend cannot produce.
    Unsupported,
    /// The caller broke the call-sequence or dimension contract.
    ContractViolation,
}

/// Errors raised by the engine, the staging layer and the devices.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Device memory allocation failed.
    #[error("failed to allocate {bytes} bytes of device memory: {reason}")]
    Allocation { bytes: usize, reason: String },

    /// Accelerator runtime call returned an error code.
    #[error("accelerator runtime error {code} in {context}: {message}")]
    Runtime {
        code: i32,
        context: String,
        message: String,
    },

    /// Solver library returned a non-success status.
    #[error("solver library returned {status:?} (code {}) during {phase}", .status.code())]
    Library { status: LibraryStatus, phase: String },

    /// Runtime or solver shared library could not be loaded.
    #[error("accelerator library not found: {0}")]
    LibraryNotFound(String),

    /// No accelerator device present.
    #[error("no accelerator device available")]
    NoDevice,

    /// The backend declines this diagnostic.
    #[error("operation not supported by this backend: {0}")]
    Unsupported(&'static str),

    /// Operation requested in a state that does not allow it.
    #[error("{operation} is not allowed in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: EngineState,
    },

    /// Sparsity pattern failed validation.
    #[error("invalid sparsity pattern: {0}")]
    InvalidPattern(String),

    /// Buffer length does not match the engine dimensions.
    #[error("dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        expected: usize,
        actual: usize,
        context: &'static str,
    },

    /// Solve requested with zero right-hand sides.
    #[error("solve requires at least one right-hand side")]
    EmptyBatch,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Allocation { .. }
            | EngineError::Runtime { .. }
            | EngineError::Library { .. }
            | EngineError::LibraryNotFound(_)
            | EngineError::NoDevice => ErrorKind::Resource,
            EngineError::Unsupported(_) => ErrorKind::Unsupported,
            EngineError::InvalidState { .. }
            | EngineError::InvalidPattern(_)
            | EngineError::DimensionMismatch { .. }
            | EngineError::EmptyBatch => ErrorKind::ContractViolation,
        }
    }

    pub(crate) fn library(status: LibraryStatus, phase: impl Into<String>) -> Self {
        EngineError::Library {
            status,
            phase: phase.into(),
        }
    }

    /// True when the library reported a zero (or, for SPD, non-positive) pivot.
    pub fn is_singular(&self) -> bool {
        matches!(
            self,
            EngineError::Library {
                status: LibraryStatus::ZeroPivot,
                ..
            }
        )
    }
}
