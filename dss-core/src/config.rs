//! Engine configuration.
//!
//! Backend-specific knobs live next to their device
//! ([`crate::device::host::HostConfig`], `device::cuda::CudaConfig`).

/// Symmetric matrix class handed to the solver library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatrixType {
    /// Symmetric indefinite (LDL^T). Interior-point KKT systems land here.
    #[default]
    Symmetric,
    /// Symmetric positive definite (Cholesky-type factorization).
    Spd,
}

impl MatrixType {
    /// `cudssMatrixType_t` value.
    pub fn code(self) -> i32 {
        match self {
            MatrixType::Symmetric => 1,
            MatrixType::Spd => 3,
        }
    }
}

/// Configuration for [`crate::engine::FactorizationEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Matrix class declared on the CSR descriptor.
    pub matrix_type: MatrixType,

    /// Report phase summaries at `info` level instead of `debug`.
    pub verbose: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            matrix_type: MatrixType::Symmetric,
            verbose: false,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `DSS_VERBOSE` and `DSS_MATRIX_TYPE`.
    ///
    /// `DSS_VERBOSE` accepts anything but `0`/`false`; `DSS_MATRIX_TYPE`
    /// accepts `symmetric` or `spd`. Unparseable values keep the default.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("DSS_VERBOSE") {
            config.verbose = parse_flag(&v);
        }
        if let Ok(v) = std::env::var("DSS_MATRIX_TYPE") {
            if let Some(matrix_type) = parse_matrix_type(&v) {
                config.matrix_type = matrix_type;
            }
        }
        config
    }
}

pub(crate) fn parse_flag(value: &str) -> bool {
    let value = value.trim();
    value != "0" && !value.eq_ignore_ascii_case("false")
}

fn parse_matrix_type(value: &str) -> Option<MatrixType> {
    match value.trim().to_ascii_lowercase().as_str() {
        "symmetric" | "sym" | "indefinite" => Some(MatrixType::Symmetric),
        "spd" | "posdef" => Some(MatrixType::Spd),
        _ => None,
    }
}
