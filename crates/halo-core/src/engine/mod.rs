//! Halo engine: one loaded model, one conversation, one generation at a time.

use std::sync::Arc;

use halo_abi::{ChatTurn, InferenceRuntime, Role, RuntimeContext};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::BackendInit;
use crate::config::EngineConfig;
use crate::conversation::Conversation;
use crate::error::{Result, SessionError};
use crate::prompt::FormattedBuffer;

// Child modules (private to this crate). They can access private fields here.
mod decode;
mod lifecycle;
mod metrics;
mod prime;
mod utf8;

pub use metrics::Metrics;
pub use utf8::{Utf8Assembler, Utf8Policy};

/// Where the engine is in its generation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    Idle,
    Priming,
    Streaming,
    Done(StopReason),
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model produced an end-of-generation token.
    Eos,
    /// The configured `max_tokens` cap was reached.
    MaxTokens,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Eos => "eos_token",
            StopReason::MaxTokens => "max_tokens_reached",
        }
    }
}

/// Result of one [`Engine::step`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Newly emittable text; may be empty while a multi-byte character is incomplete.
    Fragment(String),
    End(StopReason),
    Error(String),
}

impl Step {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Step::Fragment(_))
    }
}

/// Runtime handles that live exactly as long as a load.
pub(crate) struct Loaded<R: InferenceRuntime> {
    pub(crate) sampler: R::Sampler,
    pub(crate) context: R::Context,
    pub(crate) model: R::Model,
}

/// Engine = {loaded runtime handles} + {prompt strategy} + {conversation} + {generation state}.
/// One `Engine` is one logical chat session.
pub struct Engine<R: InferenceRuntime> {
    runtime: R,
    backend: Arc<BackendInit>,
    config: EngineConfig,
    loaded: Option<Loaded<R>>,
    template: String,
    conversation: Conversation,
    formatted: FormattedBuffer,
    // ========== per-generation state ==========
    state: GenerationState,
    utf8: Utf8Assembler,
    metrics: Metrics,
    response: String,
    recorded: bool,
    last_prompt_tokens: usize,
    last_stop: Option<StopReason>,
}

impl<R: InferenceRuntime> Engine<R> {
    /// Engine bound to the process-wide backend guard.
    pub fn with_runtime(runtime: R) -> Self {
        Self::new(runtime, BackendInit::process())
    }

    /// Construct with an explicit backend guard. Nothing is loaded yet.
    pub fn new(runtime: R, backend: Arc<BackendInit>) -> Self {
        let config = EngineConfig::default();
        Self {
            runtime,
            backend,
            utf8: Utf8Assembler::new(config.utf8_policy),
            config,
            loaded: None,
            template: String::new(),
            conversation: Conversation::new(),
            formatted: FormattedBuffer::default(),
            state: GenerationState::Idle,
            metrics: Metrics::default(),
            response: String::new(),
            recorded: false,
            last_prompt_tokens: 0,
            last_stop: None,
        }
    }

    #[inline]
    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[inline]
    pub fn state(&self) -> GenerationState {
        self.state
    }

    /// Active chat template (the model's own, or the plain-text fallback). Empty when unloaded.
    #[inline]
    pub fn template(&self) -> &str {
        &self.template
    }

    // ─────────────────────────────────────────────
    // Conversation store (thin wrappers)
    // ─────────────────────────────────────────────

    #[inline]
    pub fn turns(&self) -> &[ChatTurn] {
        self.conversation.turns()
    }

    pub fn add_message<S: Into<String>>(&mut self, role: Role, content: S) {
        self.conversation.append(role, content);
    }

    pub fn add_system_prompt<S: Into<String>>(&mut self, content: S) {
        self.add_message(Role::System, content);
    }

    pub fn add_user_message<S: Into<String>>(&mut self, content: S) {
        self.add_message(Role::User, content);
    }

    pub fn add_assistant_message<S: Into<String>>(&mut self, content: S) {
        self.add_message(Role::Assistant, content);
    }

    /// Drop every turn and forget the consumed prefix.
    pub fn clear_messages(&mut self) {
        self.conversation.clear();
        self.formatted.set_prev_len(0);
        debug!("conversation cleared");
    }

    /// New logical conversation on the same model: clear plus a blank formatted buffer.
    pub fn start_fresh_conversation(&mut self) {
        self.clear_messages();
        let cap = self
            .loaded
            .as_ref()
            .map(|l| l.context.n_ctx() as usize)
            .unwrap_or(self.config.context_length as usize);
        self.formatted.reset(cap);
    }

    /// Byte offset of the formatted transcript already fed to the model.
    #[inline]
    pub fn consumed_prefix_len(&self) -> usize {
        self.formatted.prev_len()
    }

    // ─────────────────────────────────────────────
    // Generation results and metrics
    // ─────────────────────────────────────────────

    /// Text streamed so far in the current (or last) generation, unsanitized.
    #[inline]
    pub fn response(&self) -> &str {
        &self.response
    }

    /// Token count of the most recent incremental prompt.
    #[inline]
    pub fn last_prompt_tokens(&self) -> usize {
        self.last_prompt_tokens
    }

    #[inline]
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.last_stop
    }

    #[inline]
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Tokens per second over the last generation.
    pub fn generation_rate(&self) -> f32 {
        self.metrics.tokens_per_second()
    }

    /// Live cache occupancy: highest committed position + 1.
    pub fn context_used(&self) -> i32 {
        self.loaded
            .as_ref()
            .map(|l| (l.context.kv_pos_max() + 1).max(0))
            .unwrap_or(0)
    }

    /// Pull fragments until the generation ends.
    pub fn fragments(&mut self) -> Fragments<'_, R> {
        Fragments {
            engine: self,
            finished: false,
        }
    }
}

/// Synchronous iterator over [`Engine::step`]. Yields text until end-of-generation,
/// yields one error and stops if the generation fails.
pub struct Fragments<'a, R: InferenceRuntime> {
    engine: &'a mut Engine<R>,
    finished: bool,
}

impl<R: InferenceRuntime> Iterator for Fragments<'_, R> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.engine.step() {
            Step::Fragment(text) => Some(Ok(text)),
            Step::End(_) => {
                self.finished = true;
                None
            }
            Step::Error(msg) => {
                self.finished = true;
                Some(Err(SessionError::Decode(msg)))
            }
        }
    }
}

// NOTE: The heavy lifting lives in child modules as `impl Engine<R>`:
//
// - lifecycle.rs: load(...), unload(), is_ready(), model_info()
// - prime.rs:     start_completion(...)
// - decode.rs:    step(), stop_completion()
// - utf8.rs:      Utf8Assembler + lead/continuation byte rules
// - metrics.rs:   Metrics
