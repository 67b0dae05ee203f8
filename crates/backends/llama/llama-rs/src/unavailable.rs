// Stand-ins used when the crate is built without llama.cpp.
// The handle types are uninhabited: nothing can construct them, so every method body
// is an empty match.

use std::path::Path;

use halo_abi::{
    ChatTurn, ContextParams, ModelMetadata, ModelParams, RuntimeContext, RuntimeError,
    RuntimeModel, RuntimeSampler, SamplerChainParams, Token,
};

const REASON: &str = "halo-llama was built without the `llama-cpp` feature";

pub(crate) fn unavailable() -> RuntimeError {
    RuntimeError::Unavailable(REASON.into())
}

pub fn init_backend() -> Result<(), RuntimeError> {
    Err(unavailable())
}

pub(crate) fn read_header(_path: &Path) -> Result<ModelMetadata, RuntimeError> {
    Err(unavailable())
}

pub enum LlamaModel {}
pub enum LlamaContext {}
pub enum LlamaSampler {}

impl LlamaModel {
    pub(crate) fn load(_path: &Path, _params: &ModelParams) -> Result<Self, RuntimeError> {
        Err(unavailable())
    }
}

impl RuntimeModel for LlamaModel {
    type Context = LlamaContext;
    type Sampler = LlamaSampler;

    fn new_context(&self, _params: &ContextParams) -> Result<LlamaContext, RuntimeError> {
        match *self {}
    }

    fn new_sampler(&self, _params: &SamplerChainParams) -> Result<LlamaSampler, RuntimeError> {
        match *self {}
    }

    fn tokenize(&self, _text: &str, _out: &mut [Token], _add: bool, _parse: bool) -> i32 {
        match *self {}
    }

    fn token_to_piece(&self, _token: Token, _buf: &mut [u8]) -> i32 {
        match *self {}
    }

    fn is_eog(&self, _token: Token) -> bool {
        match *self {}
    }

    fn chat_template(&self) -> Option<String> {
        match *self {}
    }

    fn apply_chat_template(&self, _t: &str, _turns: &[ChatTurn], _add: bool, _buf: &mut [u8]) -> i32 {
        match *self {}
    }

    fn n_vocab(&self) -> usize {
        match *self {}
    }

    fn n_ctx_train(&self) -> u32 {
        match *self {}
    }
}

impl RuntimeContext for LlamaContext {
    fn n_ctx(&self) -> u32 {
        match *self {}
    }

    fn decode(&mut self, _tokens: &[Token]) -> Result<(), RuntimeError> {
        match *self {}
    }

    fn clear_kv_cache(&mut self) {
        match *self {}
    }

    fn kv_pos_max(&self) -> i32 {
        match *self {}
    }
}

impl RuntimeSampler for LlamaSampler {
    type Context = LlamaContext;

    fn sample(&mut self, _ctx: &LlamaContext) -> Token {
        match *self {}
    }

    fn accept(&mut self, _token: Token) {
        match *self {}
    }

    fn reset(&mut self) {
        match *self {}
    }
}
