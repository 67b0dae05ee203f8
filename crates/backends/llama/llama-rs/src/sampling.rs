//! Persistent sampler chain: top-k → top-p → temperature → seeded distribution.

use std::ptr::NonNull;

use halo_abi::{RuntimeError, RuntimeSampler, SamplerChainParams, Token};
use llama_sys::{
    llama_sampler, llama_sampler_accept, llama_sampler_chain_add,
    llama_sampler_chain_default_params, llama_sampler_chain_init, llama_sampler_free,
    llama_sampler_init_dist, llama_sampler_init_temp, llama_sampler_init_top_k,
    llama_sampler_init_top_p, llama_sampler_reset, llama_sampler_sample,
};

use crate::context::LlamaContext;
use crate::ffi::trace;

pub struct LlamaSampler {
    chain: NonNull<llama_sampler>,
}

// SAFETY: the chain is owned exclusively and only touched through `&mut self`.
unsafe impl Send for LlamaSampler {}

impl LlamaSampler {
    pub(crate) fn chain(params: &SamplerChainParams) -> Result<Self, RuntimeError> {
        trace("[FFI] llama_sampler_chain_init()");
        let chain = unsafe { llama_sampler_chain_init(llama_sampler_chain_default_params()) };
        let chain = NonNull::new(chain)
            .ok_or_else(|| RuntimeError::SamplerCreate("llama_sampler_chain_init returned null".into()))?;
        let sp = chain.as_ptr();

        // Ownership of each stage passes to the chain.
        unsafe {
            llama_sampler_chain_add(sp, llama_sampler_init_top_k(params.top_k));
            llama_sampler_chain_add(sp, llama_sampler_init_top_p(params.top_p, params.min_keep));
            llama_sampler_chain_add(sp, llama_sampler_init_temp(params.temperature));
            llama_sampler_chain_add(sp, llama_sampler_init_dist(params.seed));
        }
        Ok(Self { chain })
    }
}

impl RuntimeSampler for LlamaSampler {
    type Context = LlamaContext;

    fn sample(&mut self, ctx: &LlamaContext) -> Token {
        Token(unsafe { llama_sampler_sample(self.chain.as_ptr(), ctx.as_ptr(), -1) })
    }

    fn accept(&mut self, token: Token) {
        unsafe { llama_sampler_accept(self.chain.as_ptr(), token.0) };
    }

    fn reset(&mut self) {
        unsafe { llama_sampler_reset(self.chain.as_ptr()) };
    }
}

impl Drop for LlamaSampler {
    fn drop(&mut self) {
        trace("[FFI] llama_sampler_free()");
        unsafe { llama_sampler_free(self.chain.as_ptr()) };
    }
}
