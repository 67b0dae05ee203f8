use halo_abi::{ChatTurn, RuntimeModel, Token};
use tracing::{debug, warn};

use super::tokenize_with_retry;
use crate::error::{Result, SessionError};

/// Role-prefixed plain-text template used when the model ships none.
pub const FALLBACK_TEMPLATE: &str = "{% for message in messages %}{{ message['role'] }}: {{ message['content'] }}\n{% endfor %}assistant:";

/// Growth attempts after the first render reports a larger size.
const MAX_RENDER_GROWS: usize = 3;

/// Rendered transcript plus the byte offset already fed to the model.
///
/// Invariant: `prev_len <= bytes.len()` after every render; only `[prev_len, new_len)`
/// is tokenized for the next generation.
#[derive(Debug, Clone, Default)]
pub struct FormattedBuffer {
    bytes: Vec<u8>,
    prev_len: usize,
}

/// Output of one template-strategy assembly.
#[derive(Debug, Clone)]
pub struct TemplatePrompt {
    pub tokens: Vec<Token>,
    /// Rendered transcript length including the assistant prompt.
    pub rendered_len: usize,
    /// Offset the incremental text started at.
    pub start: usize,
}

impl FormattedBuffer {
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            bytes: vec![0; cap],
            prev_len: 0,
        }
    }

    /// Blank buffer of `cap` bytes; nothing consumed.
    pub fn reset(&mut self, cap: usize) {
        self.bytes.clear();
        self.bytes.resize(cap, 0);
        self.prev_len = 0;
    }

    #[inline]
    pub fn prev_len(&self) -> usize {
        self.prev_len
    }

    #[inline]
    pub fn set_prev_len(&mut self, len: usize) {
        self.prev_len = len;
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Render `turns` into the buffer, growing it whenever the runtime reports a larger size.
    /// Returns the rendered length.
    pub fn render<M: RuntimeModel>(
        &mut self,
        model: &M,
        template: &str,
        turns: &[ChatTurn],
        add_assistant: bool,
    ) -> Result<usize> {
        let mut n = model.apply_chat_template(template, turns, add_assistant, &mut self.bytes);
        let mut grows = 0;
        while n > 0 && n as usize > self.bytes.len() {
            if grows == MAX_RENDER_GROWS {
                return Err(SessionError::Template(n));
            }
            debug!(needed = n, have = self.bytes.len(), "growing formatted buffer");
            self.bytes.resize(n as usize, 0);
            n = model.apply_chat_template(template, turns, add_assistant, &mut self.bytes);
            grows += 1;
        }
        if n < 0 {
            return Err(SessionError::Template(n));
        }
        Ok(n as usize)
    }

    /// Lossy text of `[from, to)`.
    fn text(&self, from: usize, to: usize) -> String {
        String::from_utf8_lossy(&self.bytes[from..to]).into_owned()
    }
}

/// Render the transcript (with the pending user turn last) and tokenize only the new suffix.
///
/// Special tokens (BOS) are added only for the very first chunk of a conversation.
pub fn build<M: RuntimeModel>(
    model: &M,
    template: &str,
    buffer: &mut FormattedBuffer,
    turns: &[ChatTurn],
) -> Result<TemplatePrompt> {
    let new_len = buffer.render(model, template, turns, true)?;

    let mut start = buffer.prev_len();
    if start > new_len {
        warn!(
            prev_len = start,
            new_len, "rendered transcript shorter than consumed prefix; re-feeding from start"
        );
        start = 0;
        buffer.set_prev_len(0);
    }

    let text = buffer.text(start, new_len);
    let tokens = tokenize_with_retry(model, &text, start == 0)?;
    debug!(
        start,
        new_len,
        delta_chars = text.len(),
        n_tokens = tokens.len(),
        "incremental prompt tokenized"
    );

    Ok(TemplatePrompt {
        tokens,
        rendered_len: new_len,
        start,
    })
}
