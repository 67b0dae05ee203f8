//! Scripted in-memory runtime for integration tests.
//!
//! - tokenizer: one token per byte (`byte + BYTE_BASE`), BOS prepended on `add_special`
//! - template: `<|role|>content\n` per turn, plus `<|assistant|>` when asked
//! - sampler: pops a scripted queue, then yields EOG forever
//! - context: tracks cache contents so `kv_pos_max` is real
//!
//! All handles share one `MockState` so tests can inject faults and inspect calls.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use halo_abi::{
    ChatTurn, ContextParams, InferenceRuntime, ModelMetadata, ModelParams, RuntimeContext, RuntimeError,
    RuntimeModel, RuntimeSampler, SamplerChainParams, Token,
};
use halo_core::{BackendInit, Engine, EngineConfig, Step};

pub const BOS: Token = Token(1);
pub const EOG: Token = Token(2);
pub const BYTE_BASE: i32 = 3;
/// Token whose piece is longer than the engine's first piece buffer.
pub const LONG_PIECE: Token = Token(1000);
pub const LONG_PIECE_LEN: usize = 300;

#[derive(Debug, Default)]
pub struct MockState {
    // ---- script / faults ----
    pub replies: VecDeque<Token>,
    pub chat_template: Option<String>,
    pub header: Option<ModelMetadata>,
    pub fail_backend_init: bool,
    pub fail_load: bool,
    pub fail_context: bool,
    pub fail_sampler: bool,
    /// Fail the n-th decode call (0-based, counted across the whole test).
    pub fail_decode_at: Option<usize>,
    /// Tokens produced per input byte; >1 makes long prompts overflow the first buffer.
    pub tokens_per_byte: usize,
    pub tokenize_always_fails: bool,
    pub template_fails: bool,

    // ---- observations ----
    pub backend_inits: usize,
    pub loads: usize,
    pub load_params: Vec<ModelParams>,
    pub context_params: Vec<ContextParams>,
    pub sampler_params: Vec<SamplerChainParams>,
    pub tokenize_calls: Vec<(String, bool, usize)>,
    pub rendered_templates: Vec<String>,
    pub kv: Vec<Token>,
    pub kv_clears: usize,
    pub decode_calls: usize,
    pub prompt_decodes: Vec<Vec<Token>>,
    pub sampler_resets: usize,
    pub accepted: Vec<Token>,
    pub dropped: Vec<&'static str>,
}

#[derive(Debug, Clone)]
pub struct MockRuntime {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRuntime {
    pub fn new() -> Self {
        let state = MockState {
            tokens_per_byte: 1,
            chat_template: Some("mock-template".to_string()),
            ..MockState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Queue `text` as the next sampled bytes. EOG follows once the queue runs dry.
    pub fn reply(&self, text: &str) {
        self.reply_bytes(text.as_bytes());
    }

    pub fn reply_bytes(&self, bytes: &[u8]) {
        self.state().replies.extend(bytes.iter().map(|b| byte_token(*b)));
    }

    pub fn reply_tokens(&self, tokens: &[Token]) {
        self.state().replies.extend(tokens.iter().copied());
    }
}

pub fn byte_token(b: u8) -> Token {
    Token(b as i32 + BYTE_BASE)
}

/// Render turns the way the mock template does.
pub fn render(turns: &[ChatTurn], add_assistant: bool) -> String {
    let mut s = String::new();
    for t in turns {
        s.push_str(&format!("<|{}|>{}\n", t.role(), t.content()));
    }
    if add_assistant {
        s.push_str("<|assistant|>");
    }
    s
}

impl InferenceRuntime for MockRuntime {
    type Model = MockModel;
    type Context = MockContext;
    type Sampler = MockSampler;

    fn backend_init(&self) -> Result<(), RuntimeError> {
        let mut st = self.state();
        st.backend_inits += 1;
        if st.fail_backend_init {
            return Err(RuntimeError::Unavailable("scripted backend failure".into()));
        }
        Ok(())
    }

    fn load_model(&self, _path: &Path, params: &ModelParams) -> Result<MockModel, RuntimeError> {
        let mut st = self.state();
        st.load_params.push(params.clone());
        if st.fail_load {
            return Err(RuntimeError::ModelLoad("scripted load failure".into()));
        }
        st.loads += 1;
        Ok(MockModel {
            state: Arc::clone(&self.state),
        })
    }

    fn read_header(&self, _path: &Path) -> Result<ModelMetadata, RuntimeError> {
        self.state()
            .header
            .clone()
            .ok_or_else(|| RuntimeError::Unavailable("no scripted header".into()))
    }
}

pub struct MockModel {
    state: Arc<Mutex<MockState>>,
}

impl MockModel {
    fn st(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }
}

impl Drop for MockModel {
    fn drop(&mut self) {
        if let Ok(mut st) = self.state.lock() {
            st.dropped.push("model");
        }
    }
}

impl RuntimeModel for MockModel {
    type Context = MockContext;
    type Sampler = MockSampler;

    fn new_context(&self, params: &ContextParams) -> Result<MockContext, RuntimeError> {
        let mut st = self.st();
        st.context_params.push(params.clone());
        if st.fail_context {
            return Err(RuntimeError::ContextCreate("scripted context failure".into()));
        }
        st.kv.clear();
        Ok(MockContext {
            state: Arc::clone(&self.state),
            n_ctx: params.n_ctx,
        })
    }

    fn new_sampler(&self, params: &SamplerChainParams) -> Result<MockSampler, RuntimeError> {
        let mut st = self.st();
        st.sampler_params.push(params.clone());
        if st.fail_sampler {
            return Err(RuntimeError::SamplerCreate("scripted sampler failure".into()));
        }
        Ok(MockSampler {
            state: Arc::clone(&self.state),
        })
    }

    fn tokenize(&self, text: &str, out: &mut [Token], add_special: bool, _parse_special: bool) -> i32 {
        let mut st = self.st();
        st.tokenize_calls.push((text.to_string(), add_special, out.len()));
        if st.tokenize_always_fails {
            return -1;
        }
        let mut tokens = Vec::new();
        if add_special {
            tokens.push(BOS);
        }
        for b in text.bytes() {
            for _ in 0..st.tokens_per_byte {
                tokens.push(byte_token(b));
            }
        }
        if tokens.len() > out.len() {
            return -(tokens.len() as i32);
        }
        out[..tokens.len()].copy_from_slice(&tokens);
        tokens.len() as i32
    }

    fn token_to_piece(&self, token: Token, buf: &mut [u8]) -> i32 {
        let piece: Vec<u8> = if token == LONG_PIECE {
            vec![b'z'; LONG_PIECE_LEN]
        } else if (BYTE_BASE..BYTE_BASE + 256).contains(&token.0) {
            vec![(token.0 - BYTE_BASE) as u8]
        } else {
            Vec::new()
        };
        if piece.len() > buf.len() {
            return -(piece.len() as i32);
        }
        buf[..piece.len()].copy_from_slice(&piece);
        piece.len() as i32
    }

    fn is_eog(&self, token: Token) -> bool {
        token == EOG
    }

    fn chat_template(&self) -> Option<String> {
        self.st().chat_template.clone()
    }

    fn apply_chat_template(&self, template: &str, turns: &[ChatTurn], add_assistant: bool, buf: &mut [u8]) -> i32 {
        let mut st = self.st();
        st.rendered_templates.push(template.to_string());
        if st.template_fails {
            return -1;
        }
        let text = render(turns, add_assistant);
        let n = text.len().min(buf.len());
        buf[..n].copy_from_slice(&text.as_bytes()[..n]);
        text.len() as i32
    }

    fn n_vocab(&self) -> usize {
        256 + BYTE_BASE as usize
    }

    fn n_ctx_train(&self) -> u32 {
        4096
    }

    fn description(&self) -> Option<String> {
        Some("mock 0B byte-level".to_string())
    }
}

pub struct MockContext {
    state: Arc<Mutex<MockState>>,
    n_ctx: u32,
}

impl Drop for MockContext {
    fn drop(&mut self) {
        if let Ok(mut st) = self.state.lock() {
            st.dropped.push("context");
        }
    }
}

impl RuntimeContext for MockContext {
    fn n_ctx(&self) -> u32 {
        self.n_ctx
    }

    fn decode(&mut self, tokens: &[Token]) -> Result<(), RuntimeError> {
        let mut st = self.state.lock().unwrap();
        let call = st.decode_calls;
        st.decode_calls += 1;
        if st.fail_decode_at == Some(call) {
            return Err(RuntimeError::Decode(-1));
        }
        if st.kv.len() + tokens.len() > self.n_ctx as usize {
            return Err(RuntimeError::Decode(1));
        }
        if tokens.len() > 1 {
            st.prompt_decodes.push(tokens.to_vec());
        }
        st.kv.extend_from_slice(tokens);
        Ok(())
    }

    fn clear_kv_cache(&mut self) {
        let mut st = self.state.lock().unwrap();
        st.kv.clear();
        st.kv_clears += 1;
    }

    fn kv_pos_max(&self) -> i32 {
        self.state.lock().unwrap().kv.len() as i32 - 1
    }
}

pub struct MockSampler {
    state: Arc<Mutex<MockState>>,
}

impl Drop for MockSampler {
    fn drop(&mut self) {
        if let Ok(mut st) = self.state.lock() {
            st.dropped.push("sampler");
        }
    }
}

impl RuntimeSampler for MockSampler {
    type Context = MockContext;

    fn sample(&mut self, _ctx: &MockContext) -> Token {
        self.state.lock().unwrap().replies.pop_front().unwrap_or(EOG)
    }

    fn accept(&mut self, token: Token) {
        self.state.lock().unwrap().accepted.push(token);
    }

    fn reset(&mut self) {
        self.state.lock().unwrap().sampler_resets += 1;
    }
}

// ─────────────────────────────────────────────
// Engine helpers
// ─────────────────────────────────────────────

pub fn engine(rt: &MockRuntime) -> Engine<MockRuntime> {
    Engine::new(rt.clone(), Arc::new(BackendInit::new()))
}

pub fn config() -> EngineConfig {
    EngineConfig::for_load(2, 2048, 0.8, true)
}

pub fn loaded(rt: &MockRuntime, cfg: EngineConfig) -> Engine<MockRuntime> {
    let mut e = engine(rt);
    e.load("mock.gguf", cfg).unwrap();
    e
}

/// Step until a terminal result (bounded). Returns concatenated fragments, the
/// fragments themselves and the terminal step.
pub fn drain(e: &mut Engine<MockRuntime>) -> (String, Vec<String>, Step) {
    let mut text = String::new();
    let mut parts = Vec::new();
    for _ in 0..1024 {
        match e.step() {
            Step::Fragment(f) => {
                text.push_str(&f);
                parts.push(f);
            }
            terminal => return (text, parts, terminal),
        }
    }
    panic!("generation did not terminate");
}
