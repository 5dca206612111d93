//! Dynamic FFI bindings for the CUDA runtime and cuDSS.
//!
//! Both libraries are loaded at runtime so the crate builds and runs on
//! machines without CUDA; every entry point then reports
//! [`EngineError::LibraryNotFound`].

use crate::error::{EngineError, EngineResult, LibraryStatus};
use libloading::Library;
use std::ffi::{c_char, c_void, CStr};
use std::sync::OnceLock;

/// `cudaError_t`
pub type CudaStatus = i32;

/// `cudssStatus_t`
pub type CudssStatus = i32;

pub type CudaStream = *mut c_void;
pub type CudssHandle = *mut c_void;
pub type CudssMatrix = *mut c_void;
pub type CudssData = *mut c_void;
pub type CudssConfig = *mut c_void;

/// `cudaMemcpyKind`
#[repr(i32)]
#[derive(Debug, Clone, Copy)]
pub enum MemcpyKind {
    HostToDevice = 1,
    DeviceToHost = 2,
}

/// The `cudssConfigParam_t` entries the device sets.
#[repr(i32)]
#[derive(Debug, Clone, Copy)]
pub enum ConfigParam {
    ReorderingAlg = 0,
    IrNSteps = 5,
    PivotEpsilon = 9,
}

// CUDA runtime
type CudaSetDeviceFn = unsafe extern "C" fn(device: i32) -> CudaStatus;
type CudaGetDeviceCountFn = unsafe extern "C" fn(count: *mut i32) -> CudaStatus;
type CudaStreamCreateFn = unsafe extern "C" fn(stream: *mut CudaStream) -> CudaStatus;
type CudaStreamDestroyFn = unsafe extern "C" fn(stream: CudaStream) -> CudaStatus;
type CudaStreamSynchronizeFn = unsafe extern "C" fn(stream: CudaStream) -> CudaStatus;
type CudaMallocFn = unsafe extern "C" fn(ptr: *mut *mut c_void, size: usize) -> CudaStatus;
type CudaFreeFn = unsafe extern "C" fn(ptr: *mut c_void) -> CudaStatus;
type CudaMemcpyFn = unsafe extern "C" fn(
    dst: *mut c_void,
    src: *const c_void,
    count: usize,
    kind: MemcpyKind,
) -> CudaStatus;
type CudaGetErrorStringFn = unsafe extern "C" fn(error: CudaStatus) -> *const c_char;

// cuDSS
type CudssCreateFn = unsafe extern "C" fn(handle: *mut CudssHandle) -> CudssStatus;
type CudssDestroyFn = unsafe extern "C" fn(handle: CudssHandle) -> CudssStatus;
type CudssSetStreamFn =
    unsafe extern "C" fn(handle: CudssHandle, stream: CudaStream) -> CudssStatus;
type CudssConfigCreateFn = unsafe extern "C" fn(config: *mut CudssConfig) -> CudssStatus;
type CudssConfigDestroyFn = unsafe extern "C" fn(config: CudssConfig) -> CudssStatus;
type CudssConfigSetFn = unsafe extern "C" fn(
    config: CudssConfig,
    param: i32,
    value: *mut c_void,
    size: usize,
) -> CudssStatus;
type CudssDataCreateFn =
    unsafe extern "C" fn(handle: CudssHandle, data: *mut CudssData) -> CudssStatus;
type CudssDataDestroyFn = unsafe extern "C" fn(handle: CudssHandle, data: CudssData) -> CudssStatus;
type CudssMatrixCreateCsrFn = unsafe extern "C" fn(
    matrix: *mut CudssMatrix,
    nrows: i64,
    ncols: i64,
    nnz: i64,
    row_start: *mut c_void,
    row_end: *mut c_void,
    col_indices: *mut c_void,
    values: *mut c_void,
    index_type: i32,
    value_type: i32,
    mtype: i32,
    mview: i32,
    index_base: i32,
) -> CudssStatus;
type CudssMatrixCreateDnFn = unsafe extern "C" fn(
    matrix: *mut CudssMatrix,
    nrows: i64,
    ncols: i64,
    ld: i64,
    values: *mut c_void,
    value_type: i32,
    layout: i32,
) -> CudssStatus;
type CudssMatrixDestroyFn = unsafe extern "C" fn(matrix: CudssMatrix) -> CudssStatus;
type CudssExecuteFn = unsafe extern "C" fn(
    handle: CudssHandle,
    phase: i32,
    config: CudssConfig,
    data: CudssData,
    matrix: CudssMatrix,
    solution: CudssMatrix,
    rhs: CudssMatrix,
) -> CudssStatus;

/// Dynamically loaded CUDA runtime and cuDSS.
pub struct CudaLibraries {
    _cuda_rt: Library,
    _cudss: Library,

    pub cuda_set_device: CudaSetDeviceFn,
    pub cuda_get_device_count: CudaGetDeviceCountFn,
    pub cuda_stream_create: CudaStreamCreateFn,
    pub cuda_stream_destroy: CudaStreamDestroyFn,
    pub cuda_stream_synchronize: CudaStreamSynchronizeFn,
    pub cuda_malloc: CudaMallocFn,
    pub cuda_free: CudaFreeFn,
    pub cuda_memcpy: CudaMemcpyFn,
    pub cuda_get_error_string: CudaGetErrorStringFn,

    pub cudss_create: CudssCreateFn,
    pub cudss_destroy: CudssDestroyFn,
    pub cudss_set_stream: CudssSetStreamFn,
    pub cudss_config_create: CudssConfigCreateFn,
    pub cudss_config_destroy: CudssConfigDestroyFn,
    pub cudss_config_set: CudssConfigSetFn,
    pub cudss_data_create: CudssDataCreateFn,
    pub cudss_data_destroy: CudssDataDestroyFn,
    pub cudss_matrix_create_csr: CudssMatrixCreateCsrFn,
    pub cudss_matrix_create_dn: CudssMatrixCreateDnFn,
    pub cudss_matrix_destroy: CudssMatrixDestroyFn,
    pub cudss_execute: CudssExecuteFn,
}

/// Resolve a symbol into a plain function pointer.
///
/// The pointer stays valid as long as the owning `Library` is alive, which
/// `CudaLibraries` guarantees by storing both.
macro_rules! symbol {
    ($lib:expr, $ty:ty, $name:literal) => {{
        // SAFETY: `$ty` matches the C prototype of `$name`.
        let sym = unsafe { $lib.get::<$ty>($name.as_bytes()) }
            .map_err(|e| format!("{}: {}", $name, e))?;
        let f: $ty = *sym;
        f
    }};
}

impl CudaLibraries {
    fn load() -> Result<Self, String> {
        let cuda_rt_names: &[&str] = if cfg!(target_os = "windows") {
            &["cudart64_12.dll", "cudart64_11.dll", "cudart64.dll"]
        } else {
            &["libcudart.so.12", "libcudart.so.11", "libcudart.so"]
        };
        let cudss_names: &[&str] = if cfg!(target_os = "windows") {
            &["cudss64_0.dll", "cudss64.dll"]
        } else {
            &["libcudss.so.0", "libcudss.so"]
        };

        let cuda_rt = open_first(cuda_rt_names)
            .map_err(|e| format!("CUDA runtime library not found ({})", e))?;
        let cudss =
            open_first(cudss_names).map_err(|e| format!("cuDSS library not found ({})", e))?;

        Ok(Self {
            cuda_set_device: symbol!(cuda_rt, CudaSetDeviceFn, "cudaSetDevice"),
            cuda_get_device_count: symbol!(cuda_rt, CudaGetDeviceCountFn, "cudaGetDeviceCount"),
            cuda_stream_create: symbol!(cuda_rt, CudaStreamCreateFn, "cudaStreamCreate"),
            cuda_stream_destroy: symbol!(cuda_rt, CudaStreamDestroyFn, "cudaStreamDestroy"),
            cuda_stream_synchronize: symbol!(
                cuda_rt,
                CudaStreamSynchronizeFn,
                "cudaStreamSynchronize"
            ),
            cuda_malloc: symbol!(cuda_rt, CudaMallocFn, "cudaMalloc"),
            cuda_free: symbol!(cuda_rt, CudaFreeFn, "cudaFree"),
            cuda_memcpy: symbol!(cuda_rt, CudaMemcpyFn, "cudaMemcpy"),
            cuda_get_error_string: symbol!(cuda_rt, CudaGetErrorStringFn, "cudaGetErrorString"),

            cudss_create: symbol!(cudss, CudssCreateFn, "cudssCreate"),
            cudss_destroy: symbol!(cudss, CudssDestroyFn, "cudssDestroy"),
            cudss_set_stream: symbol!(cudss, CudssSetStreamFn, "cudssSetStream"),
            cudss_config_create: symbol!(cudss, CudssConfigCreateFn, "cudssConfigCreate"),
            cudss_config_destroy: symbol!(cudss, CudssConfigDestroyFn, "cudssConfigDestroy"),
            cudss_config_set: symbol!(cudss, CudssConfigSetFn, "cudssConfigSet"),
            cudss_data_create: symbol!(cudss, CudssDataCreateFn, "cudssDataCreate"),
            cudss_data_destroy: symbol!(cudss, CudssDataDestroyFn, "cudssDataDestroy"),
            cudss_matrix_create_csr: symbol!(cudss, CudssMatrixCreateCsrFn, "cudssMatrixCreateCsr"),
            cudss_matrix_create_dn: symbol!(cudss, CudssMatrixCreateDnFn, "cudssMatrixCreateDn"),
            cudss_matrix_destroy: symbol!(cudss, CudssMatrixDestroyFn, "cudssMatrixDestroy"),
            cudss_execute: symbol!(cudss, CudssExecuteFn, "cudssExecute"),

            _cuda_rt: cuda_rt,
            _cudss: cudss,
        })
    }
}

fn open_first(names: &[&str]) -> Result<Library, String> {
    let mut errors = Vec::with_capacity(names.len());
    for name in names {
        // SAFETY: loading runs the library initializers; these are the
        // vendor-shipped CUDA libraries.
        match unsafe { Library::new(name) } {
            Ok(lib) => return Ok(lib),
            Err(e) => errors.push(format!("{}: {}", name, e)),
        }
    }
    Err(errors.join("; "))
}

static CUDA_LIBS: OnceLock<Result<CudaLibraries, String>> = OnceLock::new();

/// The process-wide libraries, loaded on first use.
pub fn get_cuda_libs() -> EngineResult<&'static CudaLibraries> {
    CUDA_LIBS
        .get_or_init(CudaLibraries::load)
        .as_ref()
        .map_err(|e| EngineError::LibraryNotFound(e.clone()))
}

/// Whether both libraries can be loaded.
pub fn is_cuda_available() -> bool {
    get_cuda_libs().is_ok()
}

/// Map a CUDA runtime status.
pub fn check_runtime(libs: &CudaLibraries, code: CudaStatus, context: &str) -> EngineResult<()> {
    if code == 0 {
        return Ok(());
    }
    Err(EngineError::Runtime {
        code,
        context: context.to_string(),
        message: error_string(libs, code),
    })
}

/// Map a cuDSS status.
pub fn check_cudss(code: CudssStatus, phase: &str) -> EngineResult<()> {
    match LibraryStatus::from_code(code) {
        None => Ok(()),
        Some(status) => Err(EngineError::library(status, phase)),
    }
}

pub fn error_string(libs: &CudaLibraries, code: CudaStatus) -> String {
    // SAFETY: cudaGetErrorString returns a static string or null.
    let ptr = unsafe { (libs.cuda_get_error_string)(code) };
    if ptr.is_null() {
        format!("unknown error {}", code)
    } else {
        // SAFETY: non-null pointers from cudaGetErrorString are NUL-terminated.
        unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
    }
}
