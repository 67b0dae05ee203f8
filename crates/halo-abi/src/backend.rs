use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use thiserror::Error;

use crate::error::RuntimeError;
use crate::metadata::ModelMetadata;
use crate::params::{ContextParams, ModelParams, SamplerChainParams};
use crate::token::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Role name as chat templates expect it.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A role name that is not `system`, `user` or `assistant`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown role '{0}'")]
pub struct ParseRoleError(pub String);

impl FromStr for Role {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(ParseRoleError(other.to_string())),
        }
    }
}

/// One immutable conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    role: Role,
    content: String,
}

impl ChatTurn {
    #[inline]
    pub fn new<S: Into<String>>(role: Role, content: S) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
    #[inline]
    pub fn system<S: Into<String>>(s: S) -> Self {
        Self::new(Role::System, s)
    }
    #[inline]
    pub fn user<S: Into<String>>(s: S) -> Self {
        Self::new(Role::User, s)
    }
    #[inline]
    pub fn assistant<S: Into<String>>(s: S) -> Self {
        Self::new(Role::Assistant, s)
    }

    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    #[inline]
    pub fn content(&self) -> &str {
        &self.content
    }
}

/// Capability set of a tensor-inference runtime.
///
/// Handles are plain owned values; dropping one frees the underlying runtime object.
/// A context keeps whatever it needs of its model alive on its own, so the engine
/// can store model, context and sampler side by side.
pub trait InferenceRuntime {
    type Model: RuntimeModel<Context = Self::Context, Sampler = Self::Sampler>;
    type Context: RuntimeContext;
    type Sampler: RuntimeSampler<Context = Self::Context>;

    /// Process-wide backend initialisation. Callers guarantee a single invocation.
    fn backend_init(&self) -> Result<(), RuntimeError>;

    /// Load model weights.
    fn load_model(&self, path: &Path, params: &ModelParams) -> Result<Self::Model, RuntimeError>;

    /// Weight-free header load used as the metadata fallback path.
    fn read_header(&self, path: &Path) -> Result<ModelMetadata, RuntimeError>;
}

pub trait RuntimeModel {
    type Context;
    type Sampler;

    fn new_context(&self, params: &ContextParams) -> Result<Self::Context, RuntimeError>;

    fn new_sampler(&self, params: &SamplerChainParams) -> Result<Self::Sampler, RuntimeError>;

    /// Tokenize `text` into `out`.
    ///
    /// Returns the number of tokens written, or `-n` when `out` is too small and `n`
    /// tokens are required.
    fn tokenize(&self, text: &str, out: &mut [Token], add_special: bool, parse_special: bool)
    -> i32;

    /// Render `token` into `buf` as raw bytes (not necessarily valid UTF-8).
    ///
    /// Returns the number of bytes written, or `-n` when `buf` is too small.
    fn token_to_piece(&self, token: Token, buf: &mut [u8]) -> i32;

    /// End-of-generation predicate.
    fn is_eog(&self, token: Token) -> bool;

    /// Model's embedded chat template, if any.
    fn chat_template(&self) -> Option<String>;

    /// Render `turns` through `template` into `buf`.
    ///
    /// Returns the full rendered length, which may exceed `buf.len()` (the caller grows
    /// and retries), or a negative value when the template cannot be applied.
    fn apply_chat_template(
        &self,
        template: &str,
        turns: &[ChatTurn],
        add_assistant: bool,
        buf: &mut [u8],
    ) -> i32;

    fn n_vocab(&self) -> usize;

    /// Context length the model was trained with.
    fn n_ctx_train(&self) -> u32;

    /// Short human-readable description (architecture, size, quantization).
    fn description(&self) -> Option<String> {
        None
    }
}

pub trait RuntimeContext {
    /// Active context window.
    fn n_ctx(&self) -> u32;

    /// Decode a batch of tokens appended after the current cache contents.
    fn decode(&mut self, tokens: &[Token]) -> Result<(), RuntimeError>;

    fn clear_kv_cache(&mut self);

    /// Highest committed sequence position, or -1 when the cache is empty.
    fn kv_pos_max(&self) -> i32;
}

pub trait RuntimeSampler {
    type Context;

    /// Draw one token from the logits of the last decoded position.
    fn sample(&mut self, ctx: &Self::Context) -> Token;

    /// Feed a chosen token back into the chain state.
    fn accept(&mut self, token: Token);

    /// Reset chain state between independent generations.
    fn reset(&mut self);
}
