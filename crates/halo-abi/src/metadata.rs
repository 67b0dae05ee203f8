//! Pre-flight model metadata.

use serde::{Deserialize, Serialize};

/// Context size reported when a model does not declare one.
pub const DEFAULT_CONTEXT_SIZE: u32 = 4096;

/// What the UI needs to know before committing to a full model load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub context_size: u32,
    /// Empty when the model carries no template.
    pub chat_template: String,
    pub architecture: String,
    pub valid: bool,
}

impl ModelMetadata {
    /// Result of a failed probe.
    pub fn invalid() -> Self {
        Self {
            context_size: DEFAULT_CONTEXT_SIZE,
            chat_template: String::new(),
            architecture: String::new(),
            valid: false,
        }
    }

    pub fn has_chat_template(&self) -> bool {
        !self.chat_template.is_empty()
    }
}

impl Default for ModelMetadata {
    fn default() -> Self {
        Self::invalid()
    }
}
