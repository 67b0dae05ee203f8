//! Host-facing boundary: opaque session ids mapped to engines.
//!
//! Every operation takes a [`SessionId`] and absorbs failures into plain values
//! (`bool`, `0`, sentinel strings) so a foreign host never has to handle a Rust error.
//! Unknown ids are logged and answered with the same neutral values.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use halo_abi::{InferenceRuntime, ModelMetadata, Role};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::backend::BackendInit;
use crate::config::EngineConfig;
use crate::engine::{Engine, Step};
use crate::error::{Result, SessionError};
use crate::metadata::read_metadata_with;

/// Returned by [`SessionRegistry::step`] once generation has ended.
pub const END_SENTINEL: &str = "[EOG]";
/// Returned by [`SessionRegistry::step`] on any failure.
pub const ERROR_SENTINEL: &str = "[ERROR]";

/// Opaque session handle. Never 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub struct SessionRegistry<R: InferenceRuntime + Clone> {
    runtime: R,
    backend: Arc<BackendInit>,
    sessions: Mutex<HashMap<SessionId, Engine<R>>>,
    next_id: AtomicU64,
}

impl<R: InferenceRuntime + Clone> SessionRegistry<R> {
    /// Registry whose engines share the process-wide backend guard.
    pub fn new(runtime: R) -> Self {
        Self::with_backend(runtime, BackendInit::process())
    }

    pub fn with_backend(runtime: R, backend: Arc<BackendInit>) -> Self {
        Self {
            runtime,
            backend,
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, Engine<R>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against a session's engine under the registry lock.
    pub fn with_engine<T>(&self, id: SessionId, f: impl FnOnce(&mut Engine<R>) -> T) -> Result<T> {
        let mut sessions = self.lock();
        sessions
            .get_mut(&id)
            .map(f)
            .ok_or(SessionError::UnknownSession(id.0))
    }

    fn call<T>(&self, id: SessionId, op: &'static str, fallback: T, f: impl FnOnce(&mut Engine<R>) -> T) -> T {
        match self.with_engine(id, f) {
            Ok(v) => v,
            Err(e) => {
                warn!(%id, op, "{e}");
                fallback
            }
        }
    }

    // ─────────────────────────────────────────────
    // Session lifecycle
    // ─────────────────────────────────────────────

    pub fn create(&self) -> SessionId {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let engine = Engine::new(self.runtime.clone(), Arc::clone(&self.backend));
        self.lock().insert(id, engine);
        info!(%id, "session created");
        id
    }

    /// Unload and forget a session. Returns false for unknown ids.
    pub fn release(&self, id: SessionId) -> bool {
        let removed = self.lock().remove(&id);
        match removed {
            Some(mut engine) => {
                engine.unload();
                info!(%id, "session released");
                true
            }
            None => {
                warn!(%id, op = "release", "unknown session");
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Header-only metadata probe; no session involved.
    pub fn read_metadata<P: AsRef<Path>>(&self, path: P) -> ModelMetadata {
        read_metadata_with(&self.runtime, path)
    }

    pub fn load<P: AsRef<Path>>(
        &self,
        id: SessionId,
        path: P,
        threads: usize,
        context_length: u32,
        temperature: f32,
        store_history: bool,
    ) -> bool {
        let config = EngineConfig::for_load(threads, context_length, temperature, store_history);
        self.load_with_config(id, path, config)
    }

    pub fn load_with_config<P: AsRef<Path>>(&self, id: SessionId, path: P, config: EngineConfig) -> bool {
        let path = path.as_ref();
        self.call(id, "load", false, |e| match e.load(path, config) {
            Ok(()) => true,
            Err(err) => {
                warn!(%id, path = %path.display(), "load failed: {err}");
                false
            }
        })
    }

    pub fn is_ready(&self, id: SessionId) -> bool {
        self.call(id, "is_ready", false, |e| e.is_ready())
    }

    pub fn unload(&self, id: SessionId) -> bool {
        self.call(id, "unload", false, |e| {
            e.unload();
            true
        })
    }

    pub fn model_info(&self, id: SessionId) -> String {
        self.call(id, "model_info", "Model not loaded".to_string(), |e| e.model_info())
    }

    // ─────────────────────────────────────────────
    // Conversation
    // ─────────────────────────────────────────────

    /// Append a turn; `role` is `system`, `user` or `assistant` in any case.
    pub fn add_message(&self, id: SessionId, content: &str, role: &str) -> bool {
        let role: Role = match role.parse() {
            Ok(r) => r,
            Err(e) => {
                warn!(%id, "add_message rejected: {e}");
                return false;
            }
        };
        self.call(id, "add_message", false, |e| {
            e.add_message(role, content);
            true
        })
    }

    pub fn add_system_prompt(&self, id: SessionId, content: &str) -> bool {
        self.add_message(id, content, Role::System.as_str())
    }

    pub fn add_user_message(&self, id: SessionId, content: &str) -> bool {
        self.add_message(id, content, Role::User.as_str())
    }

    pub fn add_assistant_message(&self, id: SessionId, content: &str) -> bool {
        self.add_message(id, content, Role::Assistant.as_str())
    }

    pub fn clear_messages(&self, id: SessionId) -> bool {
        self.call(id, "clear_messages", false, |e| {
            e.clear_messages();
            true
        })
    }

    pub fn start_fresh_conversation(&self, id: SessionId) -> bool {
        self.call(id, "start_fresh_conversation", false, |e| {
            e.start_fresh_conversation();
            true
        })
    }

    // ─────────────────────────────────────────────
    // Generation
    // ─────────────────────────────────────────────

    pub fn start_completion(&self, id: SessionId, query: &str) -> bool {
        self.call(id, "start_completion", false, |e| match e.start_completion(query) {
            Ok(()) => true,
            Err(err) => {
                warn!(%id, "start_completion failed: {err}");
                false
            }
        })
    }

    /// One token's worth of text, [`END_SENTINEL`] once finished, or [`ERROR_SENTINEL`].
    pub fn step(&self, id: SessionId) -> String {
        self.call(id, "step", ERROR_SENTINEL.to_string(), |e| match e.step() {
            Step::Fragment(text) => text,
            Step::End(_) => END_SENTINEL.to_string(),
            Step::Error(msg) => {
                warn!(%id, "step failed: {msg}");
                ERROR_SENTINEL.to_string()
            }
        })
    }

    /// Finish the current generation and return the sanitized reply (empty for unknown ids).
    pub fn stop_completion(&self, id: SessionId) -> String {
        self.call(id, "stop_completion", String::new(), |e| e.stop_completion())
    }

    /// Drive one full turn: start, stream every fragment into `on_fragment`, then
    /// [`stop_completion`](Self::stop_completion) on both end and failure so the next
    /// prompt only feeds the new suffix. `None` if the prompt was rejected or the
    /// generation failed; the sanitized reply otherwise.
    pub fn complete(&self, id: SessionId, query: &str, mut on_fragment: impl FnMut(&str)) -> Option<String> {
        if !self.start_completion(id, query) {
            return None;
        }
        let failed = loop {
            let piece = self.step(id);
            if piece == END_SENTINEL {
                break false;
            }
            if piece == ERROR_SENTINEL {
                break true;
            }
            on_fragment(&piece);
        };
        let reply = self.stop_completion(id);
        (!failed).then_some(reply)
    }

    pub fn generation_rate(&self, id: SessionId) -> f32 {
        self.call(id, "generation_rate", 0.0, |e| e.generation_rate())
    }

    pub fn context_used(&self, id: SessionId) -> i32 {
        self.call(id, "context_used", 0, |e| e.context_used())
    }
}
