//! llama.cpp implementation of the Halo runtime contracts.
//!
//! Built without the `llama-cpp` feature the crate still compiles and links, but
//! [`LlamaRuntime`] reports every load as [`RuntimeError::Unavailable`].

use std::path::Path;

use halo_abi::{InferenceRuntime, ModelMetadata, ModelParams, RuntimeError};

#[cfg_attr(not(feature = "llama-cpp"), allow(dead_code))]
mod metadata;

#[cfg(feature = "llama-cpp")]
mod context;
#[cfg(feature = "llama-cpp")]
mod ffi;
#[cfg(feature = "llama-cpp")]
mod model;
#[cfg(feature = "llama-cpp")]
mod sampling;
#[cfg(not(feature = "llama-cpp"))]
mod unavailable;

#[cfg(feature = "llama-cpp")]
pub use context::LlamaContext;
#[cfg(feature = "llama-cpp")]
pub use ffi::init_backend;
#[cfg(feature = "llama-cpp")]
pub use model::LlamaModel;
#[cfg(feature = "llama-cpp")]
pub use sampling::LlamaSampler;
#[cfg(not(feature = "llama-cpp"))]
pub use unavailable::{init_backend, LlamaContext, LlamaModel, LlamaSampler};

/// Stateless handle; all llama.cpp state lives in the model, context and sampler it hands out.
#[derive(Debug, Clone, Copy, Default)]
pub struct LlamaRuntime;

impl LlamaRuntime {
    pub fn new() -> Self {
        Self
    }

    /// Whether this build links llama.cpp.
    pub const fn is_available() -> bool {
        cfg!(feature = "llama-cpp")
    }
}

impl InferenceRuntime for LlamaRuntime {
    type Model = LlamaModel;
    type Context = LlamaContext;
    type Sampler = LlamaSampler;

    fn backend_init(&self) -> Result<(), RuntimeError> {
        init_backend()
    }

    fn load_model(&self, path: &Path, params: &ModelParams) -> Result<LlamaModel, RuntimeError> {
        tracing::debug!(path = %path.display(), ?params, "llama.cpp model load");
        LlamaModel::load(path, params)
    }

    fn read_header(&self, path: &Path) -> Result<ModelMetadata, RuntimeError> {
        #[cfg(feature = "llama-cpp")]
        {
            metadata::read_header(path)
        }
        #[cfg(not(feature = "llama-cpp"))]
        {
            unavailable::read_header(path)
        }
    }
}

#[cfg(all(test, not(feature = "llama-cpp")))]
mod tests {
    use super::*;

    #[test]
    fn reports_unavailable_without_llama_cpp() {
        let rt = LlamaRuntime::new();
        assert!(!LlamaRuntime::is_available());
        assert!(matches!(rt.backend_init(), Err(RuntimeError::Unavailable(_))));
        assert!(matches!(
            rt.load_model(Path::new("model.gguf"), &ModelParams::default()),
            Err(RuntimeError::Unavailable(_))
        ));
        assert!(matches!(
            rt.read_header(Path::new("model.gguf")),
            Err(RuntimeError::Unavailable(_))
        ));
    }
}
