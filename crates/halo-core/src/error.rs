use halo_abi::RuntimeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("model not loaded")]
    NotReady,

    #[error("load failed: {0}")]
    Load(String),

    #[error("chat template could not be applied ({0})")]
    Template(i32),

    #[error("tokenization failed ({0})")]
    Tokenize(i32),

    #[error("context overflow: {used} used + {prompt} prompt + {reserved} reserved > {n_ctx}")]
    ContextOverflow {
        used: usize,
        prompt: usize,
        reserved: usize,
        n_ctx: usize,
    },

    #[error("prompt produced no tokens")]
    EmptyPrompt,

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("no generation in progress")]
    NotStreaming,

    #[error("unknown session id {0}")]
    UnknownSession(u64),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

pub type Result<T> = std::result::Result<T, SessionError>;
