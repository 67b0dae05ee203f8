//! Halo core: single-session orchestration around an inference runtime.

pub mod backend;
pub mod config;
pub mod conversation;
pub mod engine;
pub mod error;
pub mod metadata;
pub mod prompt;
pub mod registry;
pub mod sanitize;

pub use backend::BackendInit;
pub use config::{EngineConfig, KvPolicy};
pub use conversation::Conversation;
pub use engine::{Engine, GenerationState, Step, StopReason, Utf8Policy};
pub use error::{Result, SessionError};
pub use metadata::{read_metadata, read_metadata_with};
pub use prompt::PromptStrategy;
pub use registry::{SessionId, SessionRegistry, END_SENTINEL, ERROR_SENTINEL};
pub use sanitize::sanitize;

pub use halo_abi::{ChatTurn, ModelMetadata, Role, Token};
