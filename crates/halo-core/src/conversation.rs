//! Append-only, per-session record of chat turns.

use halo_abi::{ChatTurn, Role};

#[derive(Default, Debug, Clone)]
pub struct Conversation {
    turns: Vec<ChatTurn>,
}

impl Conversation {
    #[inline]
    pub fn new() -> Self {
        Self { turns: Vec::new() }
    }

    /// All stored turns (oldest → newest).
    #[inline]
    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn append<S: Into<String>>(&mut self, role: Role, content: S) {
        self.turns.push(ChatTurn::new(role, content));
    }

    #[inline]
    pub fn push(&mut self, turn: ChatTurn) {
        self.turns.push(turn);
    }

    /// Remove all history.
    #[inline]
    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Stored turns followed by one extra turn that is not (yet) committed.
    pub(crate) fn with_pending(&self, pending: &ChatTurn) -> Vec<ChatTurn> {
        let mut out = Vec::with_capacity(self.turns.len() + 1);
        out.extend_from_slice(&self.turns);
        out.push(pending.clone());
        out
    }
}
