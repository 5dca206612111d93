//! Numeric precision policy.
//!
//! The value width is a property of the engine type, not of a global build
//! switch: `FactorizationEngine<f32, _>` and `FactorizationEngine<f64, _>` can
//! coexist in one binary.

use bytemuck::Pod;
use num_traits::Float;
use std::fmt::{Debug, Display};

/// Element type tags understood by the accelerator libraries
/// (`cudaDataType_t` values).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum DataType {
    R32F = 0,
    R64F = 1,
    R32I = 10,
    R64I = 24,
}

impl DataType {
    /// Size of one element in bytes.
    pub fn size_bytes(self) -> usize {
        match self {
            DataType::R32F | DataType::R32I => 4,
            DataType::R64F | DataType::R64I => 8,
        }
    }
}

/// Floating-point type the engine stores matrix values and vectors in.
pub trait Scalar: Float + Pod + Default + Debug + Display + Send + Sync + 'static {
    /// Tag passed to descriptor creation.
    const DATA_TYPE: DataType;

    fn from_f64(value: f64) -> Self;

    /// Widen to `f64` (the host kernel's working precision).
    fn as_f64(self) -> f64;
}

impl Scalar for f32 {
    const DATA_TYPE: DataType = DataType::R32F;

    fn from_f64(value: f64) -> Self {
        value as f32
    }

    fn as_f64(self) -> f64 {
        self as f64
    }
}

impl Scalar for f64 {
    const DATA_TYPE: DataType = DataType::R64F;

    fn from_f64(value: f64) -> Self {
        value
    }

    fn as_f64(self) -> f64 {
        self
    }
}

/// Index type of the device-side CSR arrays.
pub type DeviceIndex = i32;

/// Tag for [`DeviceIndex`].
pub const INDEX_TYPE: DataType = DataType::R32I;
