use std::time::Instant;

use halo_abi::{InferenceRuntime, Role, RuntimeContext, RuntimeModel, RuntimeSampler, Token};
use tracing::{debug, error, info, warn};

use super::{Engine, GenerationState, Step, StopReason};
use crate::error::{Result, SessionError};
use crate::prompt::PromptStrategy;
use crate::sanitize::sanitize;

/// Initial piece buffer; longer pieces trigger one resize.
const PIECE_BUF: usize = 256;

impl<R: InferenceRuntime> Engine<R> {
    /// Advance the generation by exactly one token.
    pub fn step(&mut self) -> Step {
        match self.state {
            GenerationState::Streaming => {}
            GenerationState::Done(reason) => return Step::End(reason),
            _ => return Step::Error(SessionError::NotStreaming.to_string()),
        }

        if let Some(max) = self.config.max_tokens {
            if self.metrics.n_tokens() >= max {
                return self.finish(StopReason::MaxTokens);
            }
        }

        let Some(loaded) = self.loaded.as_mut() else {
            self.state = GenerationState::Error;
            return Step::Error(SessionError::NotReady.to_string());
        };

        let started = Instant::now();
        let token = loaded.sampler.sample(&loaded.context);
        loaded.sampler.accept(token);

        if loaded.model.is_eog(token) {
            return self.finish(StopReason::Eos);
        }

        let piece = match token_piece(&loaded.model, token) {
            Ok(piece) => piece,
            Err(e) => {
                error!(token = token.0, "detokenize failed: {e}");
                self.state = GenerationState::Error;
                return Step::Error(e.to_string());
            }
        };
        self.metrics.record(started.elapsed());

        let fragment = self.utf8.push(&piece);

        if let Err(e) = loaded.context.decode(&[token]) {
            error!(token = token.0, n_tokens = self.metrics.n_tokens(), "decode failed: {e}");
            self.state = GenerationState::Error;
            return Step::Error(e.to_string());
        }

        self.response.push_str(&fragment);
        Step::Fragment(fragment)
    }

    /// Finalize the current generation: sanitize, record the reply once, and set up the
    /// consumed prefix for the next turn. Returns the sanitized reply.
    pub fn stop_completion(&mut self) -> String {
        let cleaned = sanitize(&self.response);
        if self.config.store_history && !self.recorded && !cleaned.is_empty() {
            self.conversation.append(Role::Assistant, cleaned.as_str());
        }
        self.recorded = true;

        let prev_len = match (self.config.strategy, self.config.store_history) {
            (PromptStrategy::Template, true) => self.transcript_len().unwrap_or_else(|e| {
                warn!("could not re-render transcript: {e}; next prompt starts from scratch");
                0
            }),
            _ => 0,
        };
        self.formatted.set_prev_len(prev_len);

        info!(
            chars = cleaned.len(),
            n_tokens = self.metrics.n_tokens(),
            rate = self.metrics.tokens_per_second(),
            prev_len,
            "generation stopped"
        );
        self.state = GenerationState::Idle;
        cleaned
    }

    fn finish(&mut self, reason: StopReason) -> Step {
        let residue = self.utf8.flush();
        self.response.push_str(&residue);
        self.state = GenerationState::Done(reason);
        self.last_stop = Some(reason);
        debug!(reason = reason.as_str(), n_tokens = self.metrics.n_tokens(), "end of generation");

        if self.config.store_history && !self.recorded {
            let cleaned = sanitize(&self.response);
            if !cleaned.is_empty() {
                self.conversation.append(Role::Assistant, cleaned);
            }
            self.recorded = true;
        }

        if residue.is_empty() {
            Step::End(reason)
        } else {
            Step::Fragment(residue)
        }
    }

    /// Rendered length of the stored transcript without an assistant prompt.
    fn transcript_len(&mut self) -> Result<usize> {
        let Some(loaded) = self.loaded.as_ref() else {
            return Err(SessionError::NotReady);
        };
        self.formatted
            .render(&loaded.model, &self.template, self.conversation.turns(), false)
    }
}

/// Token → raw piece bytes, resizing once if the runtime asks for more room.
fn token_piece<M: RuntimeModel>(model: &M, token: Token) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; PIECE_BUF];
    let mut n = model.token_to_piece(token, &mut buf);
    if n < 0 {
        buf.resize(n.unsigned_abs() as usize, 0);
        n = model.token_to_piece(token, &mut buf);
    }
    if n < 0 {
        return Err(SessionError::Tokenize(n));
    }
    buf.truncate((n as usize).min(buf.len()));
    Ok(buf)
}
