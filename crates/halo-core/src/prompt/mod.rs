//! Prompt assembly: conversation (or a single raw query) → prompt tokens.
//!
//! - template.rs: chat-template rendering into a formatted buffer, delta-only tokenization
//! - raw.rs:      natural-language instruction framing without any template

use halo_abi::{RuntimeModel, Token};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SessionError};

pub mod raw;
pub mod template;

pub use template::{FALLBACK_TEMPLATE, FormattedBuffer, TemplatePrompt};

/// How a turn becomes prompt text. Chosen once at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptStrategy {
    /// Render the running transcript through the model's chat template.
    #[default]
    Template,
    /// Frame only the latest query; no transcript is carried between generations.
    Raw,
}

/// Extra token slots beyond the byte length of the text on the first attempt.
const TOKEN_HEADROOM: usize = 256;

/// Tokenize `text` with special-token parsing disabled.
///
/// A negative count from the runtime means the buffer was too small; the buffer is
/// resized to the reported size and tokenization retried exactly once.
pub fn tokenize_with_retry<M: RuntimeModel>(
    model: &M,
    text: &str,
    add_special: bool,
) -> Result<Vec<Token>> {
    let mut buf = vec![Token::default(); text.len() + TOKEN_HEADROOM];
    let mut n = model.tokenize(text, &mut buf, add_special, false);
    if n < 0 {
        let needed = n.unsigned_abs() as usize;
        debug!(needed, have = buf.len(), "token buffer too small; retrying once");
        buf.resize(needed, Token::default());
        n = model.tokenize(text, &mut buf, add_special, false);
    }
    if n < 0 {
        return Err(SessionError::Tokenize(n));
    }
    buf.truncate((n as usize).min(buf.len()));
    Ok(buf)
}
