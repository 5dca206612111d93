//! CUDA stream + cuDSS session.

use super::ffi::{
    check_cudss, check_runtime, error_string, get_cuda_libs, ConfigParam, CudaLibraries,
    CudaStream, CudssConfig, CudssData, CudssHandle, CudssMatrix, MemcpyKind,
};
use crate::device::{CsrDescriptor, DenseDescriptor, Device, DeviceBuffer, Phase};
use crate::error::{EngineError, EngineResult};
use bytemuck::Pod;
use std::ffi::c_void;
use std::ptr;

/// cuDSS algorithm selector (`cudssAlgType_t`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i32)]
pub enum AlgType {
    /// Library default (nested dissection for reordering).
    #[default]
    Default = 0,
    Alg1 = 1,
    Alg2 = 2,
    Alg3 = 3,
}

/// Configuration for [`CudaDevice`].
///
/// Unset options keep the cuDSS defaults.
#[derive(Debug, Clone, Default)]
pub struct CudaConfig {
    /// CUDA device index (0 for the default GPU).
    pub device_index: i32,

    /// Fill-reducing reordering algorithm.
    pub reordering: AlgType,

    /// Iterative refinement steps after each solve.
    pub refine_iters: Option<i32>,

    /// Magnitude below which pivots are perturbed.
    pub pivot_epsilon: Option<f64>,
}

impl CudaConfig {
    /// Defaults overridden by `DSS_DEVICE` and `DSS_REFINE_ITERS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(index) = env_parse::<i32>("DSS_DEVICE") {
            config.device_index = index;
        }
        if let Some(steps) = env_parse::<i32>("DSS_REFINE_ITERS") {
            config.refine_iters = Some(steps);
        }
        config
    }
}

fn env_parse<V: std::str::FromStr>(key: &str) -> Option<V> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("ignoring unparseable {}={:?}", key, raw);
            None
        }
    }
}

/// `cudaMalloc` allocation, freed on drop.
pub struct CudaBuffer {
    ptr: *mut c_void,
    bytes: usize,
    libs: &'static CudaLibraries,
}

impl DeviceBuffer for CudaBuffer {
    fn size_bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for CudaBuffer {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            // SAFETY: ptr came from cudaMalloc and is freed exactly once.
            let code = unsafe { (self.libs.cuda_free)(self.ptr) };
            if code != 0 {
                log::warn!("cudaFree failed: {}", error_string(self.libs, code));
            }
        }
    }
}

/// cuDSS matrix object, destroyed on drop.
pub struct CudaMatrix {
    ptr: CudssMatrix,
    libs: &'static CudaLibraries,
}

impl Drop for CudaMatrix {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            // SAFETY: ptr came from cudssMatrixCreate* and is destroyed once.
            let code = unsafe { (self.libs.cudss_matrix_destroy)(self.ptr) };
            if code != 0 {
                log::warn!("cudssMatrixDestroy returned status {}", code);
            }
        }
    }
}

// SAFETY: the raw handles are only used through `&mut` access on one thread
// at a time; CUDA allows using a stream and its allocations from any thread.
unsafe impl Send for CudaBuffer {}
unsafe impl Send for CudaMatrix {}
unsafe impl Send for CudaDevice {}

/// One CUDA stream plus the cuDSS handle, config and data objects bound to it.
pub struct CudaDevice {
    libs: &'static CudaLibraries,
    config: CudaConfig,
    stream: CudaStream,
    handle: CudssHandle,
    solver_config: CudssConfig,
    data: CudssData,
}

impl CudaDevice {
    /// Select the configured GPU and create the solver session.
    ///
    /// Fails with [`EngineError::LibraryNotFound`] when the libraries are
    /// missing and [`EngineError::NoDevice`] when no usable GPU exists.
    pub fn new(config: CudaConfig) -> EngineResult<Self> {
        let libs = get_cuda_libs()?;

        let mut count = 0;
        // SAFETY: count is a valid out-pointer.
        let code = unsafe { (libs.cuda_get_device_count)(&mut count) };
        if code != 0 || count <= 0 {
            return Err(EngineError::NoDevice);
        }
        if config.device_index < 0 || config.device_index >= count {
            log::error!(
                "CUDA device {} requested, {} available",
                config.device_index,
                count
            );
            return Err(EngineError::NoDevice);
        }
        // SAFETY: index checked against the device count.
        check_runtime(libs, unsafe { (libs.cuda_set_device)(config.device_index) }, "cudaSetDevice")?;

        // Null handles first; Drop releases whatever was created if a later
        // step fails.
        let mut device = Self {
            libs,
            config,
            stream: ptr::null_mut(),
            handle: ptr::null_mut(),
            solver_config: ptr::null_mut(),
            data: ptr::null_mut(),
        };

        // SAFETY: each call writes a fresh handle into a null field.
        unsafe {
            check_runtime(libs, (libs.cuda_stream_create)(&mut device.stream), "cudaStreamCreate")?;
            check_cudss((libs.cudss_create)(&mut device.handle), "cudssCreate")?;
            check_cudss((libs.cudss_set_stream)(device.handle, device.stream), "cudssSetStream")?;
            check_cudss((libs.cudss_config_create)(&mut device.solver_config), "cudssConfigCreate")?;
        }
        device.apply_config()?;
        // SAFETY: handle is valid; data is a null out-field.
        check_cudss(
            unsafe { (libs.cudss_data_create)(device.handle, &mut device.data) },
            "cudssDataCreate",
        )?;

        log::debug!("cuDSS session created on CUDA device {}", device.config.device_index);
        Ok(device)
    }

    pub fn config(&self) -> &CudaConfig {
        &self.config
    }

    fn apply_config(&self) -> EngineResult<()> {
        if self.config.reordering != AlgType::Default {
            self.set_param(ConfigParam::ReorderingAlg, &(self.config.reordering as i32))?;
        }
        if let Some(steps) = self.config.refine_iters {
            self.set_param(ConfigParam::IrNSteps, &steps)?;
        }
        if let Some(epsilon) = self.config.pivot_epsilon {
            self.set_param(ConfigParam::PivotEpsilon, &epsilon)?;
        }
        Ok(())
    }

    fn set_param<V: Pod>(&self, param: ConfigParam, value: &V) -> EngineResult<()> {
        // SAFETY: cudssConfigSet reads size_of::<V>() bytes from value.
        let code = unsafe {
            (self.libs.cudss_config_set)(
                self.solver_config,
                param as i32,
                value as *const V as *mut c_void,
                std::mem::size_of::<V>(),
            )
        };
        check_cudss(code, "cudssConfigSet")
    }
}

impl Drop for CudaDevice {
    fn drop(&mut self) {
        // SAFETY: each handle is either null or owned by this device, and is
        // destroyed in reverse creation order.
        unsafe {
            if !self.data.is_null() {
                (self.libs.cudss_data_destroy)(self.handle, self.data);
            }
            if !self.solver_config.is_null() {
                (self.libs.cudss_config_destroy)(self.solver_config);
            }
            if !self.handle.is_null() {
                (self.libs.cudss_destroy)(self.handle);
            }
            if !self.stream.is_null() {
                (self.libs.cuda_stream_destroy)(self.stream);
            }
        }
    }
}

impl Device for CudaDevice {
    type Buffer = CudaBuffer;
    type Matrix = CudaMatrix;

    fn name(&self) -> &str {
        "cuda"
    }

    fn allocate(&mut self, bytes: usize) -> EngineResult<CudaBuffer> {
        let mut ptr = ptr::null_mut();
        // SAFETY: ptr is a valid out-pointer.
        let code = unsafe { (self.libs.cuda_malloc)(&mut ptr, bytes) };
        if code != 0 {
            return Err(EngineError::Allocation {
                bytes,
                reason: error_string(self.libs, code),
            });
        }
        Ok(CudaBuffer {
            ptr,
            bytes,
            libs: self.libs,
        })
    }

    fn upload<E: Pod>(&mut self, dst: &mut CudaBuffer, src: &[E]) -> EngineResult<()> {
        let bytes = std::mem::size_of_val(src);
        if bytes > dst.bytes {
            return Err(EngineError::DimensionMismatch {
                expected: dst.bytes,
                actual: bytes,
                context: "upload size",
            });
        }
        // SAFETY: dst holds at least `bytes` bytes; cudaMemcpy is synchronous
        // with respect to the host.
        let code = unsafe {
            (self.libs.cuda_memcpy)(
                dst.ptr,
                src.as_ptr() as *const c_void,
                bytes,
                MemcpyKind::HostToDevice,
            )
        };
        check_runtime(self.libs, code, "cudaMemcpy(HostToDevice)")
    }

    fn download<E: Pod>(&mut self, dst: &mut [E], src: &CudaBuffer) -> EngineResult<()> {
        let bytes = std::mem::size_of_val(dst);
        if bytes > src.bytes {
            return Err(EngineError::DimensionMismatch {
                expected: src.bytes,
                actual: bytes,
                context: "download size",
            });
        }
        // SAFETY: src holds at least `bytes` bytes.
        let code = unsafe {
            (self.libs.cuda_memcpy)(
                dst.as_mut_ptr() as *mut c_void,
                src.ptr,
                bytes,
                MemcpyKind::DeviceToHost,
            )
        };
        check_runtime(self.libs, code, "cudaMemcpy(DeviceToHost)")
    }

    fn create_csr(
        &mut self,
        desc: &CsrDescriptor,
        row_ptr: &CudaBuffer,
        col_ind: &CudaBuffer,
        values: &CudaBuffer,
    ) -> EngineResult<CudaMatrix> {
        let mut matrix = CudaMatrix {
            ptr: ptr::null_mut(),
            libs: self.libs,
        };
        // SAFETY: the buffers outlive the descriptor (enforced by the owner's
        // field order); a null row_end selects row_start + 1.
        let code = unsafe {
            (self.libs.cudss_matrix_create_csr)(
                &mut matrix.ptr,
                desc.rows as i64,
                desc.rows as i64,
                desc.nnz as i64,
                row_ptr.ptr,
                ptr::null_mut(),
                col_ind.ptr,
                values.ptr,
                desc.index_type as i32,
                desc.value_type as i32,
                desc.matrix_type.code(),
                desc.view as i32,
                desc.base as i32,
            )
        };
        check_cudss(code, "cudssMatrixCreateCsr")?;
        Ok(matrix)
    }

    fn create_dense(
        &mut self,
        desc: &DenseDescriptor,
        values: &CudaBuffer,
    ) -> EngineResult<CudaMatrix> {
        let mut matrix = CudaMatrix {
            ptr: ptr::null_mut(),
            libs: self.libs,
        };
        // SAFETY: values spans ld * cols elements.
        let code = unsafe {
            (self.libs.cudss_matrix_create_dn)(
                &mut matrix.ptr,
                desc.rows as i64,
                desc.cols as i64,
                desc.ld as i64,
                values.ptr,
                desc.value_type as i32,
                desc.layout as i32,
            )
        };
        check_cudss(code, "cudssMatrixCreateDn")?;
        Ok(matrix)
    }

    fn execute(
        &mut self,
        phase: Phase,
        matrix: &CudaMatrix,
        solution: &CudaMatrix,
        rhs: &CudaMatrix,
    ) -> EngineResult<()> {
        // SAFETY: all objects are live and belong to this session.
        let code = unsafe {
            (self.libs.cudss_execute)(
                self.handle,
                phase as i32,
                self.solver_config,
                self.data,
                matrix.ptr,
                solution.ptr,
                rhs.ptr,
            )
        };
        check_cudss(code, phase.name())
    }

    fn synchronize(&mut self) -> EngineResult<()> {
        // SAFETY: stream is live.
        let code = unsafe { (self.libs.cuda_stream_synchronize)(self.stream) };
        check_runtime(self.libs, code, "cudaStreamSynchronize")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::cuda::is_cuda_available;
    use crate::scalar::DataType;

    fn cuda_device() -> Option<CudaDevice> {
        if !is_cuda_available() {
            eprintln!("CUDA not available, skipping");
            return None;
        }
        match CudaDevice::new(CudaConfig::default()) {
            Ok(device) => Some(device),
            Err(e) => {
                eprintln!("CUDA device unusable ({}), skipping", e);
                None
            }
        }
    }

    #[test]
    fn test_config_defaults_leave_library_defaults() {
        let config = CudaConfig::default();
        assert_eq!(config.device_index, 0);
        assert_eq!(config.reordering, AlgType::Default);
        assert!(config.refine_iters.is_none());
        assert!(config.pivot_epsilon.is_none());
    }

    #[test]
    fn test_missing_libraries_reported() {
        if is_cuda_available() {
            return;
        }
        let err = CudaDevice::new(CudaConfig::default()).err();
        assert!(matches!(err, Some(EngineError::LibraryNotFound(_))));
    }

    #[test]
    fn test_transfer_round_trip() {
        let Some(mut device) = cuda_device() else {
            return;
        };
        let mut buf = device.allocate(3 * 8).unwrap();
        device.upload(&mut buf, &[1.0f64, 2.0, 3.0]).unwrap();
        let mut out = [0.0f64; 3];
        device.download(&mut out, &buf).unwrap();
        assert_eq!(out, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_dense_descriptor_creation() {
        let Some(mut device) = cuda_device() else {
            return;
        };
        let buf = device.allocate(4 * 2 * 8).unwrap();
        let desc = DenseDescriptor::column_major(4, 2, DataType::R64F);
        let matrix = device.create_dense(&desc, &buf).unwrap();
        drop(matrix);
        drop(buf);
    }
}
