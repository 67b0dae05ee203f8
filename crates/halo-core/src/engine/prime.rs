use halo_abi::{ChatTurn, InferenceRuntime, RuntimeContext, RuntimeSampler};
use tracing::{error, info, warn};

use super::{Engine, GenerationState};
use crate::config::KvPolicy;
use crate::error::{Result, SessionError};
use crate::prompt::{PromptStrategy, raw, template};

impl<R: InferenceRuntime> Engine<R> {
    /// Assemble the prompt for `query`, check the context budget and decode the prompt.
    ///
    /// On success the engine is `Streaming` and [`step`](Self::step) yields the reply.
    /// A budget failure leaves the KV cache untouched; a decode failure leaves the
    /// engine in `Error` but still loaded.
    pub fn start_completion(&mut self, query: &str) -> Result<()> {
        if !self.is_ready() {
            warn!("start_completion on an unloaded engine");
            return Err(SessionError::NotReady);
        }
        if matches!(self.state, GenerationState::Streaming) {
            warn!("abandoning in-flight generation");
        }

        self.reset_generation();
        self.state = GenerationState::Priming;

        match self.prime(query) {
            Ok(()) => {
                self.state = GenerationState::Streaming;
                Ok(())
            }
            Err(e) => {
                error!("priming failed: {e}");
                self.state = match e {
                    SessionError::Decode(_) => GenerationState::Error,
                    _ => GenerationState::Idle,
                };
                Err(e)
            }
        }
    }

    fn prime(&mut self, query: &str) -> Result<()> {
        let Some(loaded) = self.loaded.as_mut() else {
            return Err(SessionError::NotReady);
        };
        let n_ctx = loaded.context.n_ctx() as usize;
        let store = self.config.store_history;

        if !store {
            self.formatted.reset(n_ctx);
        }

        // The user turn is committed only once priming succeeds.
        let pending = ChatTurn::user(query);
        let tokens = match self.config.strategy {
            PromptStrategy::Raw => raw::build(&loaded.model, query)?,
            PromptStrategy::Template => {
                let turns = self.conversation.with_pending(&pending);
                match template::build(&loaded.model, &self.template, &mut self.formatted, &turns) {
                    Ok(prompt) => prompt.tokens,
                    Err(SessionError::Template(code)) => {
                        warn!(code, "chat template failed; using raw framing for this turn");
                        raw::build(&loaded.model, query)?
                    }
                    Err(e) => return Err(e),
                }
            }
        };
        if tokens.is_empty() {
            return Err(SessionError::EmptyPrompt);
        }

        let used = match self.config.kv_policy {
            KvPolicy::ClearEachTurn => 0,
            KvPolicy::Retain => (loaded.context.kv_pos_max() + 1).max(0) as usize,
        };
        let reserved = self.config.reserved_margin;
        if used + tokens.len() + reserved > n_ctx {
            return Err(SessionError::ContextOverflow {
                used,
                prompt: tokens.len(),
                reserved,
                n_ctx,
            });
        }

        if self.config.kv_policy == KvPolicy::ClearEachTurn {
            loaded.context.clear_kv_cache();
        }
        loaded.sampler.reset();

        info!(used, n_prompt = tokens.len(), n_ctx, "decoding prompt");
        loaded
            .context
            .decode(&tokens)
            .map_err(|e| SessionError::Decode(e.to_string()))?;

        self.last_prompt_tokens = tokens.len();
        if store {
            self.conversation.push(pending);
        }
        Ok(())
    }
}
