//! Engine configuration: serde defaults, JSON file loading and `HALO_*` env overrides.

use std::path::Path;

use halo_abi::params::{ContextParams, DEFAULT_SEED, ModelParams, SamplerChainParams};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::Utf8Policy;
use crate::error::{Result, SessionError};
use crate::prompt::PromptStrategy;

/// What happens to the KV cache when a new generation is primed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KvPolicy {
    /// Every generation starts from an empty cache.
    #[default]
    ClearEachTurn,
    /// Keep the cache so incremental prompts extend the previous turns.
    Retain,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub threads: usize,
    pub context_length: u32,
    pub temperature: f32,
    pub store_history: bool,
    pub strategy: PromptStrategy,
    pub utf8_policy: Utf8Policy,
    pub kv_policy: KvPolicy,
    /// Per-response token cap; `None` runs until end-of-generation.
    pub max_tokens: Option<usize>,
    /// Tokens kept free for the response when checking the prompt budget.
    pub reserved_margin: usize,
    pub top_k: i32,
    pub top_p: f32,
    pub seed: u32,
    pub system_prompt: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threads: num_cpus::get().max(1),
            context_length: 2048,
            temperature: 0.8,
            store_history: true,
            strategy: PromptStrategy::Template,
            utf8_policy: Utf8Policy::Strict,
            kv_policy: KvPolicy::ClearEachTurn,
            max_tokens: None,
            reserved_margin: 512,
            top_k: 40,
            top_p: 0.95,
            seed: DEFAULT_SEED,
            system_prompt: None,
        }
    }
}

impl EngineConfig {
    /// The five load-time knobs exposed at the session boundary.
    pub fn for_load(threads: usize, context_length: u32, temperature: f32, store_history: bool) -> Self {
        Self {
            threads,
            context_length,
            temperature,
            store_history,
            ..Self::default()
        }
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let cfg: Self = serde_json::from_str(&text)?;
        debug!(path = %path.as_ref().display(), "loaded engine config");
        Ok(cfg)
    }

    /// Apply `HALO_N_CTX`, `HALO_THREADS`, `HALO_TEMPERATURE`, `HALO_MAX_TOKENS`
    /// and `HALO_STRATEGY` from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|k| std::env::var(k).ok())
    }

    /// Same as [`with_env_overrides`](Self::with_env_overrides) with an injectable lookup.
    /// Unparseable values are ignored.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("HALO_N_CTX").and_then(|s| s.trim().parse().ok()) {
            self.context_length = v;
        }
        if let Some(v) = lookup("HALO_THREADS").and_then(|s| s.trim().parse().ok()) {
            self.threads = v;
        }
        if let Some(v) = lookup("HALO_TEMPERATURE").and_then(|s| s.trim().parse().ok()) {
            self.temperature = v;
        }
        if let Some(v) = lookup("HALO_MAX_TOKENS").and_then(|s| s.trim().parse().ok()) {
            self.max_tokens = Some(v);
        }
        if let Some(s) = lookup("HALO_STRATEGY") {
            match s.trim().to_ascii_lowercase().as_str() {
                "template" => self.strategy = PromptStrategy::Template,
                "raw" => self.strategy = PromptStrategy::Raw,
                _ => {}
            }
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.context_length == 0 {
            return Err(SessionError::Config("context_length must be > 0".into()));
        }
        if self.threads == 0 {
            return Err(SessionError::Config("threads must be > 0".into()));
        }
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(SessionError::Config(format!(
                "temperature must be finite and >= 0 (got {})",
                self.temperature
            )));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(SessionError::Config(format!(
                "top_p must be in (0, 1] (got {})",
                self.top_p
            )));
        }
        Ok(())
    }

    pub(crate) fn model_params(&self) -> ModelParams {
        ModelParams {
            use_mmap: true,
            use_mlock: false,
        }
    }

    pub(crate) fn context_params(&self) -> ContextParams {
        let threads = i32::try_from(self.threads).unwrap_or(i32::MAX);
        ContextParams::single_batch(self.context_length, threads)
    }

    pub(crate) fn sampler_params(&self) -> SamplerChainParams {
        SamplerChainParams {
            top_k: self.top_k,
            top_p: self.top_p,
            min_keep: 1,
            temperature: self.temperature,
            seed: self.seed,
        }
    }
}
