//! UTF-8 assembly across token boundaries.
//!
//! Token pieces are raw bytes; a multi-byte character can be split across two or more
//! tokens. The assembler buffers pieces and decides what is safe to hand to the caller.

use serde::{Deserialize, Serialize};

/// When buffered bytes are released to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Utf8Policy {
    /// Release only whole sequences; an incomplete trailing sequence waits for the next piece.
    #[default]
    Strict,
    /// Release every piece immediately. Split characters come out as U+FFFD.
    Eager,
}

#[derive(Debug, Clone, Default)]
pub struct Utf8Assembler {
    policy: Utf8Policy,
    pending: Vec<u8>,
}

impl Utf8Assembler {
    pub fn new(policy: Utf8Policy) -> Self {
        Self {
            policy,
            pending: Vec::with_capacity(16),
        }
    }

    #[inline]
    pub fn policy(&self) -> Utf8Policy {
        self.policy
    }

    /// Append a token piece and return whatever may be emitted now (possibly empty).
    pub fn push(&mut self, piece: &[u8]) -> String {
        self.pending.extend_from_slice(piece);
        dump_bytes("utf8-pending", &self.pending);
        let take = match self.policy {
            Utf8Policy::Strict => complete_prefix_len(&self.pending),
            Utf8Policy::Eager => self.pending.len(),
        };
        if take == 0 {
            return String::new();
        }
        let taken: Vec<u8> = self.pending.drain(..take).collect();
        String::from_utf8_lossy(&taken).into_owned()
    }

    /// Release any residue regardless of completeness.
    pub fn flush(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        let out = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        out
    }

    #[inline]
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Sequence length announced by a lead byte, or `None` for a continuation/invalid byte.
#[inline]
fn sequence_len(lead: u8) -> Option<usize> {
    if lead & 0x80 == 0x00 {
        Some(1)
    } else if lead & 0xE0 == 0xC0 {
        Some(2)
    } else if lead & 0xF0 == 0xE0 {
        Some(3)
    } else if lead & 0xF8 == 0xF0 {
        Some(4)
    } else {
        None
    }
}

#[inline]
fn is_continuation(b: u8) -> bool {
    b & 0xC0 == 0x80
}

/// Length of the longest prefix that does not end inside an unfinished sequence.
///
/// Malformed bytes (stray continuations, bad leads, truncated sequences followed by a
/// new lead) count as complete so they are released as U+FFFD rather than stalling
/// the stream. Only a trailing lead byte still waiting for continuation bytes is held.
pub(crate) fn complete_prefix_len(bytes: &[u8]) -> usize {
    let mut i = 0;
    while i < bytes.len() {
        let Some(n) = sequence_len(bytes[i]) else {
            i += 1;
            continue;
        };
        let avail = bytes.len() - i;
        let want = n.min(avail);
        let conts = bytes[i + 1..i + want]
            .iter()
            .take_while(|b| is_continuation(**b))
            .count();
        if conts + 1 == n {
            i += n;
        } else if conts + 1 == avail {
            // Every remaining byte belongs to this sequence and more are expected.
            return i;
        } else {
            i += conts + 1;
        }
    }
    bytes.len()
}

#[cfg(feature = "utf8-trace")]
fn dump_bytes(label: &str, bytes: &[u8]) {
    use std::fmt::Write;
    let mut hex = String::with_capacity(bytes.len() * 3);
    for b in bytes {
        let _ = write!(&mut hex, "{:02X} ", b);
    }
    tracing::trace!(label, raw = %hex.trim_end(), "utf8 bytes");
}

#[cfg(not(feature = "utf8-trace"))]
#[inline]
fn dump_bytes(_label: &str, _bytes: &[u8]) {}
