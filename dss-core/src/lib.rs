//! Sparse symmetric direct-solver engine for iterative optimizers.
//!
//! An outer optimization loop hands the engine one sparsity pattern, then on
//! every iteration new matrix values and a batch of right-hand sides. The
//! engine keeps the symbolic analysis of the pattern, refactorizes only when
//! told the values changed and solves on an accelerator.
//!
//! # Layout
//!
//! - [`engine`]: the [`FactorizationEngine`] state machine
//! - [`staging`]: host value mirror and dense operands, all host/device copies
//! - [`device`]: the [`device::Device`] seam with the cuDSS backend (feature
//!   `cuda`) and a CPU emulation
//! - [`interface`]: the adapter contract an optimization framework calls
//! - [`linalg`]: sparse LDL^T used by the CPU device
//!
//! # Logging
//!
//! Uses the `log` facade. Phase summaries are `debug` (`info` with
//! [`EngineConfig::verbose`]), transfers are `trace`.

#![warn(clippy::all)]

pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod interface;
pub mod linalg;
pub mod pattern;
pub mod scalar;
pub mod staging;

pub use config::{EngineConfig, MatrixType};
pub use engine::{Capabilities, EngineState, EngineStats, FactorizationEngine};
pub use error::{EngineError, EngineResult, ErrorKind, LibraryStatus};
pub use interface::{DssSolverInterface, MatrixFormat, SparseSymLinearSolver, SymSolverStatus};
pub use pattern::SparsityPattern;
pub use scalar::Scalar;
