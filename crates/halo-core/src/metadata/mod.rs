//! Pre-flight metadata for a model file, without loading weights.
//!
//! Two paths:
//! - gguf.rs: direct header parse (fast, no runtime involved)
//! - the runtime's own header-only load, used when the direct parse fails
//!
//! Neither path holds a handle after returning, and neither ever errors: failures come
//! back as `ModelMetadata::invalid()`.

use std::path::Path;

use halo_abi::metadata::DEFAULT_CONTEXT_SIZE;
use halo_abi::{InferenceRuntime, ModelMetadata};
use tracing::{debug, warn};

pub mod gguf;

/// Read metadata via the direct GGUF header parse only.
pub fn read_metadata<P: AsRef<Path>>(path: P) -> ModelMetadata {
    let path = path.as_ref();
    match gguf::read_header(path) {
        Ok(h) => {
            debug!(path = %path.display(), version = h.version, "gguf header parsed");
            ModelMetadata {
                context_size: normalize_ctx(h.context_length),
                chat_template: h.chat_template.unwrap_or_default(),
                architecture: h.architecture.unwrap_or_default(),
                valid: true,
            }
        }
        Err(e) => {
            warn!(path = %path.display(), "metadata read failed: {e}");
            ModelMetadata::invalid()
        }
    }
}

/// Direct parse first; on failure, fall back to the runtime's header-only load.
pub fn read_metadata_with<R: InferenceRuntime, P: AsRef<Path>>(runtime: &R, path: P) -> ModelMetadata {
    let path = path.as_ref();
    let fast = read_metadata(path);
    if fast.valid {
        return fast;
    }
    if !path.is_file() {
        return fast;
    }

    debug!(path = %path.display(), "falling back to runtime header probe");
    match runtime.read_header(path) {
        Ok(mut md) => {
            if md.context_size == 0 {
                md.context_size = DEFAULT_CONTEXT_SIZE;
            }
            md.valid = true;
            md
        }
        Err(e) => {
            warn!(path = %path.display(), "runtime header probe failed: {e}");
            ModelMetadata::invalid()
        }
    }
}

fn normalize_ctx(n: Option<u64>) -> u32 {
    match n {
        Some(n) if n > 0 => u32::try_from(n).unwrap_or(u32::MAX),
        _ => DEFAULT_CONTEXT_SIZE,
    }
}
