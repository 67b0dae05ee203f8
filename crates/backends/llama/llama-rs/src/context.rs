// Decode context. All per-conversation mutation lives here; the model it was built
// from stays alive through the shared handle.

use std::ptr::NonNull;
use std::sync::Arc;

use halo_abi::{RuntimeContext, RuntimeError, Token};
use llama_sys::{
    llama_batch_get_one, llama_context, llama_decode, llama_free, llama_get_memory,
    llama_memory_clear, llama_memory_seq_pos_max, llama_n_ctx,
};

use crate::ffi::{c_len, trace};
use crate::model::ModelHandle;

pub struct LlamaContext {
    ctx: NonNull<llama_context>,
    /// Active runtime context window recorded at construction.
    n_ctx: u32,
    // Dropped after `ctx` is freed.
    _model: Arc<ModelHandle>,
}

// SAFETY: a context is only ever used through `&mut`/`&` from one thread at a time.
unsafe impl Send for LlamaContext {}

impl LlamaContext {
    pub(crate) fn new(model: Arc<ModelHandle>, ctx: NonNull<llama_context>) -> Self {
        let n_ctx = unsafe { llama_n_ctx(ctx.as_ptr()) };
        Self {
            ctx,
            n_ctx,
            _model: model,
        }
    }

    #[inline]
    pub(crate) fn as_ptr(&self) -> *mut llama_context {
        self.ctx.as_ptr()
    }
}

impl RuntimeContext for LlamaContext {
    fn n_ctx(&self) -> u32 {
        self.n_ctx
    }

    /// One `llama_batch_get_one` batch appended after the current cache contents.
    fn decode(&mut self, tokens: &[Token]) -> Result<(), RuntimeError> {
        if tokens.is_empty() {
            return Ok(());
        }
        let mut ids: Vec<i32> = tokens.iter().map(|t| t.0).collect();
        let rc = unsafe {
            let batch = llama_batch_get_one(ids.as_mut_ptr(), c_len(ids.len()));
            llama_decode(self.as_ptr(), batch)
        };
        if rc != 0 {
            return Err(RuntimeError::Decode(rc));
        }
        Ok(())
    }

    fn clear_kv_cache(&mut self) {
        unsafe {
            let mem = llama_get_memory(self.as_ptr());
            // `true` also clears the data buffers, not just sequence bookkeeping.
            llama_memory_clear(mem, true);
        }
    }

    fn kv_pos_max(&self) -> i32 {
        unsafe { llama_memory_seq_pos_max(llama_get_memory(self.as_ptr()), 0) }
    }
}

impl Drop for LlamaContext {
    fn drop(&mut self) {
        trace("[FFI] llama_free(context)");
        unsafe { llama_free(self.ctx.as_ptr()) };
    }
}
