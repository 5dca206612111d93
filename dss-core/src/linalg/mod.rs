//! Host-side sparse linear algebra.
//!
//! Sparse helpers on `sprs` matrices and the LDL^T kernel that backs the
//! emulated accelerator.

pub mod ldlt;
pub mod sparse;
