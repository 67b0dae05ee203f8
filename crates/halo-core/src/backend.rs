//! One-shot runtime backend initialisation.
//!
//! The runtime's global init must run exactly once per process. `BackendInit` owns
//! that fact: engines receive an `Arc<BackendInit>` at construction and call
//! [`BackendInit::ensure`] before their first load. There is no teardown; the
//! runtime's globals live until process exit.

use std::sync::Arc;

use halo_abi::InferenceRuntime;
use once_cell::sync::{Lazy, OnceCell};
use tracing::{debug, info};

use crate::error::{Result, SessionError};

static PROCESS: Lazy<Arc<BackendInit>> = Lazy::new(|| Arc::new(BackendInit::new()));

#[derive(Debug, Default)]
pub struct BackendInit {
    // Ok(()) once initialised, Err(msg) if the single attempt failed.
    outcome: OnceCell<std::result::Result<(), String>>,
}

impl BackendInit {
    /// Fresh, un-initialised guard. Tests use this for isolation.
    pub fn new() -> Self {
        Self {
            outcome: OnceCell::new(),
        }
    }

    /// The process-wide guard shared by every engine in this process.
    pub fn process() -> Arc<BackendInit> {
        Arc::clone(&PROCESS)
    }

    /// Run `runtime.backend_init()` on the first call only. Later calls replay the outcome.
    pub fn ensure<R: InferenceRuntime>(&self, runtime: &R) -> Result<()> {
        let mut ran = false;
        let outcome = self.outcome.get_or_init(|| {
            ran = true;
            runtime.backend_init().map_err(|e| e.to_string())
        });
        if ran {
            info!(ok = outcome.is_ok(), "runtime backend initialised");
        } else {
            debug!("runtime backend already initialised");
        }
        outcome.clone().map_err(SessionError::Load)
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.outcome.get(), Some(Ok(())))
    }
}
