use std::path::Path;

use halo_abi::{InferenceRuntime, Role, RuntimeContext, RuntimeModel};
use tracing::{error, info, warn};

use super::{Engine, GenerationState, Loaded, Utf8Assembler};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::prompt::FALLBACK_TEMPLATE;

impl<R: InferenceRuntime> Engine<R> {
    /// Load model, context and sampler chain.
    ///
    /// On failure, whatever was already allocated is released before returning and the
    /// engine is left unloaded. Loading over a live model unloads it first.
    pub fn load<P: AsRef<Path>>(&mut self, path: P, config: EngineConfig) -> Result<()> {
        let path = path.as_ref();
        config.validate()?;

        if self.loaded.is_some() {
            info!("replacing loaded model");
            self.unload();
        }

        self.backend.ensure(&self.runtime)?;

        info!(
            path = %path.display(),
            threads = config.threads,
            n_ctx = config.context_length,
            temperature = config.temperature,
            store_history = config.store_history,
            strategy = ?config.strategy,
            "loading model"
        );

        // Locals drop in reverse order on early return: context before model.
        let model = self
            .runtime
            .load_model(path, &config.model_params())
            .inspect_err(|e| error!(path = %path.display(), "model load failed: {e}"))?;
        let context = model
            .new_context(&config.context_params())
            .inspect_err(|e| error!("context creation failed: {e}"))?;
        let sampler = model
            .new_sampler(&config.sampler_params())
            .inspect_err(|e| error!("sampler creation failed: {e}"))?;

        self.template = match model.chat_template() {
            Some(t) if !t.trim().is_empty() => t,
            _ => {
                warn!("model has no chat template; using role-prefixed plain-text fallback");
                FALLBACK_TEMPLATE.to_string()
            }
        };

        let n_ctx = context.n_ctx() as usize;
        self.loaded = Some(Loaded {
            sampler,
            context,
            model,
        });

        self.utf8 = Utf8Assembler::new(config.utf8_policy);
        self.config = config;
        self.conversation.clear();
        self.formatted.reset(n_ctx);
        self.reset_generation();
        if let Some(sys) = self.config.system_prompt.clone() {
            self.conversation.append(Role::System, sys);
        }

        info!(n_ctx, "model ready");
        Ok(())
    }

    /// Release sampler, context and model (in that order), then clear the conversation.
    /// Calling this on an unloaded engine does nothing harmful.
    pub fn unload(&mut self) {
        if let Some(Loaded {
            sampler,
            context,
            model,
        }) = self.loaded.take()
        {
            drop(sampler);
            drop(context);
            drop(model);
            info!("model resources released");
        }
        self.template.clear();
        self.clear_messages();
        self.reset_generation();
    }

    /// True iff model and context are both live.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.loaded.is_some()
    }

    /// Human-readable summary of the loaded model.
    pub fn model_info(&self) -> String {
        match &self.loaded {
            None => "Model not loaded".to_string(),
            Some(l) => format!(
                "Context: {} | Vocab: {} | Threads: {}",
                l.context.n_ctx(),
                l.model.n_vocab(),
                self.config.threads
            ),
        }
    }

    /// Model description from the runtime, if it provides one.
    pub fn model_description(&self) -> Option<String> {
        self.loaded.as_ref().and_then(|l| l.model.description())
    }

    pub(super) fn reset_generation(&mut self) {
        self.state = GenerationState::Idle;
        self.utf8.clear();
        self.metrics.reset();
        self.response.clear();
        self.recorded = false;
        self.last_prompt_tokens = 0;
        self.last_stop = None;
    }
}
