use thiserror::Error;

/// Failures reported by an inference runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("inference runtime not available: {0}")]
    Unavailable(String),

    #[error("model load failed: {0}")]
    ModelLoad(String),

    #[error("context creation failed: {0}")]
    ContextCreate(String),

    #[error("sampler creation failed: {0}")]
    SamplerCreate(String),

    #[error("decode failed with code {0}")]
    Decode(i32),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
