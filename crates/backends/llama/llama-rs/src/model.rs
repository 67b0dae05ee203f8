// halo-llama/src/model.rs

use std::ffi::{c_char, CStr, CString};
use std::path::Path;
use std::ptr::NonNull;
use std::sync::Arc;

use halo_abi::{
    ChatTurn, ContextParams, ModelParams, Role, RuntimeError, RuntimeModel, SamplerChainParams,
    Token,
};
use llama_sys::{
    llama_chat_apply_template, llama_chat_message, llama_init_from_model, llama_model,
    llama_model_chat_template, llama_model_desc, llama_model_free, llama_model_get_vocab,
    llama_model_load_from_file, llama_model_n_ctx_train, llama_model_params, llama_token_to_piece,
    llama_tokenize, llama_vocab, llama_vocab_is_eog, llama_vocab_n_tokens,
};
use tracing::debug;

use crate::context::LlamaContext;
use crate::ffi::{self, c_len, trace};
use crate::sampling::LlamaSampler;

/// Control tokens (turn markers and the like) render as empty pieces, so they never
/// reach the streamed text.
pub(crate) const RENDER_SPECIAL_PIECES: bool = false;

/// Owns `llama_model*`; freed when the last holder (model or context) drops.
pub(crate) struct ModelHandle(NonNull<llama_model>);

impl ModelHandle {
    #[inline]
    pub(crate) fn as_ptr(&self) -> *mut llama_model {
        self.0.as_ptr()
    }
}

impl Drop for ModelHandle {
    fn drop(&mut self) {
        trace("[FFI] llama_model_free()");
        unsafe { llama_model_free(self.0.as_ptr()) };
    }
}

// SAFETY: llama.cpp models are immutable after load; all mutable state lives in
// contexts and samplers.
unsafe impl Send for ModelHandle {}
unsafe impl Sync for ModelHandle {}

/// Safe wrapper around a loaded `llama_model*`.
pub struct LlamaModel {
    handle: Arc<ModelHandle>,
}

impl LlamaModel {
    pub(crate) fn load(path: &Path, params: &ModelParams) -> Result<Self, RuntimeError> {
        Self::open(path, ffi::model_params(params))
    }

    pub(crate) fn open(path: &Path, params: llama_model_params) -> Result<Self, RuntimeError> {
        let c_path = ffi::c_path(path)?;
        trace(&format!("[FFI] load_model: {}", path.display()));
        let ptr = unsafe { llama_model_load_from_file(c_path.as_ptr(), params) };
        let model = NonNull::new(ptr).ok_or_else(|| {
            RuntimeError::ModelLoad(format!("llama_model_load_from_file failed for {}", path.display()))
        })?;
        Ok(Self {
            handle: Arc::new(ModelHandle(model)),
        })
    }

    #[inline]
    pub(crate) fn as_ptr(&self) -> *mut llama_model {
        self.handle.as_ptr()
    }

    #[inline]
    fn vocab(&self) -> *const llama_vocab {
        unsafe { llama_model_get_vocab(self.as_ptr()) }
    }

    /// Raw metadata value by key, if present.
    pub(crate) fn meta_str(&self, key: &str) -> Option<String> {
        let c_key = CString::new(key).ok()?;
        let mut cap = 1024usize;
        for _ in 0..4 {
            let mut buf = vec![0u8; cap];
            let wrote = unsafe {
                llama_sys::llama_model_meta_val_str(
                    self.as_ptr(),
                    c_key.as_ptr(),
                    buf.as_mut_ptr() as *mut c_char,
                    buf.len(),
                )
            };
            if wrote < 0 {
                return None;
            }
            let wrote = wrote as usize;
            if wrote >= cap {
                // truncated; the return value is the full length
                cap = wrote + 1;
                continue;
            }
            buf.truncate(wrote);
            return Some(String::from_utf8_lossy(&buf).into_owned());
        }
        None
    }
}

fn role_cstr(role: Role) -> &'static CStr {
    match role {
        Role::System => c"system",
        Role::User => c"user",
        Role::Assistant => c"assistant",
    }
}

/// C string without interior NULs (they are dropped, not an error).
fn lossless_cstring(s: &str) -> CString {
    CString::new(s.replace('\0', "")).unwrap_or_default()
}

impl RuntimeModel for LlamaModel {
    type Context = LlamaContext;
    type Sampler = LlamaSampler;

    fn new_context(&self, params: &ContextParams) -> Result<LlamaContext, RuntimeError> {
        trace("[FFI] llama_init_from_model()");
        let raw = ffi::context_params(params);
        let ptr = unsafe { llama_init_from_model(self.as_ptr(), raw) };
        let ctx = NonNull::new(ptr).ok_or_else(|| {
            RuntimeError::ContextCreate(format!("llama_init_from_model failed (n_ctx={})", params.n_ctx))
        })?;
        Ok(LlamaContext::new(Arc::clone(&self.handle), ctx))
    }

    fn new_sampler(&self, params: &SamplerChainParams) -> Result<LlamaSampler, RuntimeError> {
        LlamaSampler::chain(params)
    }

    fn tokenize(&self, text: &str, out: &mut [Token], add_special: bool, parse_special: bool) -> i32 {
        let mut ids = vec![0i32; out.len()];
        let n = unsafe {
            llama_tokenize(
                self.vocab(),
                text.as_ptr() as *const c_char,
                c_len(text.len()),
                ids.as_mut_ptr(),
                c_len(ids.len()),
                add_special,
                parse_special,
            )
        };
        if n > 0 {
            for (slot, id) in out.iter_mut().zip(&ids[..n as usize]) {
                *slot = Token(*id);
            }
        }
        n
    }

    fn token_to_piece(&self, token: Token, buf: &mut [u8]) -> i32 {
        unsafe {
            llama_token_to_piece(
                self.vocab(),
                token.0,
                buf.as_mut_ptr() as *mut c_char,
                c_len(buf.len()),
                0,
                RENDER_SPECIAL_PIECES,
            )
        }
    }

    fn is_eog(&self, token: Token) -> bool {
        unsafe { llama_vocab_is_eog(self.vocab(), token.0) }
    }

    fn chat_template(&self) -> Option<String> {
        let ptr = unsafe { llama_model_chat_template(self.as_ptr(), std::ptr::null::<c_char>()) };
        if ptr.is_null() {
            return None;
        }
        let s = unsafe { CStr::from_ptr(ptr) }
            .to_string_lossy()
            .into_owned();
        (!s.is_empty()).then_some(s)
    }

    fn apply_chat_template(
        &self,
        template: &str,
        turns: &[ChatTurn],
        add_assistant: bool,
        buf: &mut [u8],
    ) -> i32 {
        let tmpl = lossless_cstring(template);
        let contents: Vec<CString> = turns.iter().map(|t| lossless_cstring(t.content())).collect();
        let messages: Vec<llama_chat_message> = turns
            .iter()
            .zip(&contents)
            .map(|(t, c)| llama_chat_message {
                role: role_cstr(t.role()).as_ptr(),
                content: c.as_ptr(),
            })
            .collect();

        let n = unsafe {
            llama_chat_apply_template(
                tmpl.as_ptr(),
                messages.as_ptr(),
                messages.len(),
                add_assistant,
                buf.as_mut_ptr() as *mut c_char,
                c_len(buf.len()),
            )
        };
        debug!(n_msgs = messages.len(), rendered = n, "llama_chat_apply_template");
        n
    }

    fn n_vocab(&self) -> usize {
        unsafe { llama_vocab_n_tokens(self.vocab()) }.max(0) as usize
    }

    fn n_ctx_train(&self) -> u32 {
        unsafe { llama_model_n_ctx_train(self.as_ptr()) }.max(0) as u32
    }

    fn description(&self) -> Option<String> {
        let mut buf = vec![0u8; 256];
        let wrote = unsafe { llama_model_desc(self.as_ptr(), buf.as_mut_ptr() as *mut c_char, buf.len()) };
        if wrote <= 0 {
            return None;
        }
        buf.truncate((wrote as usize).min(buf.len() - 1));
        Some(String::from_utf8_lossy(&buf).into_owned())
    }
}
