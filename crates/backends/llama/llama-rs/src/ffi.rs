// halo-llama/src/ffi.rs
//
// Focused FFI helpers around llama.cpp.
// Parameter structs start from upstream defaults so new header fields keep sane values.

use std::ffi::CString;
use std::path::Path;

use halo_abi::{ContextParams, ModelParams, RuntimeError};
use llama_sys::{
    llama_backend_init, llama_context_default_params, llama_context_params,
    llama_model_default_params, llama_model_params,
};
use once_cell::sync::OnceCell;

/// one-time flag; llama.cpp has no use for a second init
static INIT_CALLED: OnceCell<()> = OnceCell::new();

#[inline]
pub(crate) fn trace(msg: &str) {
    #[cfg(feature = "ffi-trace")]
    tracing::trace!(target: "halo_llama::ffi", "{msg}");
    #[cfg(not(feature = "ffi-trace"))]
    let _ = msg;
}

/// Process-wide llama.cpp init. Later calls are ignored.
pub fn init_backend() -> Result<(), RuntimeError> {
    if INIT_CALLED.set(()).is_ok() {
        trace("[FFI] llama_backend_init()");
        unsafe { llama_backend_init() };
    } else {
        trace("[FFI] init_backend() called again; ignored");
    }
    Ok(())
}

/// Full weight load: mmap/mlock as requested, everything else upstream default.
pub(crate) fn model_params(params: &ModelParams) -> llama_model_params {
    let mut p = unsafe { llama_model_default_params() };
    p.use_mmap = params.use_mmap;
    p.use_mlock = params.use_mlock;
    p
}

/// Header-only open: vocab and metadata, no tensors, no GPU.
pub(crate) fn header_params() -> llama_model_params {
    let mut p = unsafe { llama_model_default_params() };
    p.vocab_only = true;
    p.use_mmap = true;
    p.n_gpu_layers = 0;
    p
}

pub(crate) fn context_params(params: &ContextParams) -> llama_context_params {
    let mut p = unsafe { llama_context_default_params() };
    let threads = if params.n_threads > 0 {
        params.n_threads
    } else {
        num_cpus::get().max(1) as i32
    };

    p.n_ctx = params.n_ctx;
    p.n_batch = params.n_batch;
    p.n_threads = threads;
    p.n_threads_batch = threads;
    p.no_perf = true;
    p
}

pub(crate) fn c_path(path: &Path) -> Result<CString, RuntimeError> {
    let s = path
        .to_str()
        .ok_or_else(|| RuntimeError::InvalidInput(format!("non-UTF-8 path {}", path.display())))?;
    CString::new(s).map_err(|_| RuntimeError::InvalidInput("model path contains NUL".into()))
}

/// Clamp a buffer length to what the C API's `int32_t` length parameters accept.
#[inline]
pub(crate) fn c_len(len: usize) -> i32 {
    i32::try_from(len).unwrap_or(i32::MAX)
}
