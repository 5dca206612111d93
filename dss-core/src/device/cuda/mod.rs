//! NVIDIA backend: CUDA runtime + cuDSS, loaded at runtime.
//!
//! cuDSS runs the three phases on the GPU:
//!
//! 1. **Analysis**: reordering and symbolic factorization
//! 2. **Factorization**: numeric LDL^T / Cholesky
//! 3. **Solve**: forward, diagonal and backward substitution
//!
//! ```ignore
//! use dss_core::device::cuda::{CudaConfig, CudaDevice};
//! use dss_core::{EngineConfig, FactorizationEngine};
//!
//! let device = CudaDevice::new(CudaConfig::from_env())?;
//! let mut engine = FactorizationEngine::<f64, _>::with_device(device, EngineConfig::default());
//! ```

mod ffi;
mod handle;

pub use ffi::is_cuda_available;
pub use handle::{AlgType, CudaBuffer, CudaConfig, CudaDevice, CudaMatrix};
