//! Parameter structs handed to a runtime at load time.

use serde::{Deserialize, Serialize};

/// Seed value that lets the runtime pick its default RNG seed.
pub const DEFAULT_SEED: u32 = 0xFFFF_FFFF;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelParams {
    pub use_mmap: bool,
    pub use_mlock: bool,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            use_mmap: true,
            use_mlock: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextParams {
    pub n_ctx: u32,
    pub n_batch: u32,
    pub n_threads: i32,
}

impl ContextParams {
    /// Context whose batch size equals its window, so a whole prompt decodes in one call.
    pub fn single_batch(n_ctx: u32, n_threads: i32) -> Self {
        Self {
            n_ctx,
            n_batch: n_ctx,
            n_threads,
        }
    }
}

/// Fixed-order chain: top-k, top-p, temperature, then a seeded weighted draw.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerChainParams {
    pub top_k: i32,
    pub top_p: f32,
    pub min_keep: usize,
    pub temperature: f32,
    pub seed: u32,
}

impl Default for SamplerChainParams {
    fn default() -> Self {
        Self {
            top_k: 40,
            top_p: 0.95,
            min_keep: 1,
            temperature: 0.8,
            seed: DEFAULT_SEED,
        }
    }
}
