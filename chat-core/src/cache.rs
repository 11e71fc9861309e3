//! Per-counterpart message cache.
//!
//! The cache is the single source of truth for message history. Each entry
//! maps a counterpart (the other participant in a one-to-one conversation)
//! to the ordered sequence of messages exchanged with them:
//! - history fetched once, on first selection
//! - stream-delivered messages, in arrival order
//! - locally sent messages, appended on transport success
//!
//! Entries are append-only and never reordered; once fetched history is
//! installed, a counterpart's history is never re-fetched for the lifetime
//! of the session. An entry seeded only by `append` (a stream message from
//! a counterpart never opened) is provisional: it holds real messages but
//! does not stand in for the server-side history, and `is_fetched` stays
//! false until `set_history` runs.

use std::collections::{HashMap, HashSet};

use chat_types::{Message, UserId};

/// Mapping from counterpart id to ordered message sequence.
#[derive(Debug, Clone, Default)]
pub struct MessageCache {
    entries: HashMap<UserId, Vec<Message>>,
    fetched: HashSet<UserId>,
}

impl MessageCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the cached sequence for a counterpart.
    ///
    /// `None` means the history has not been loaded yet and the caller
    /// should fetch it. An empty slice is a loaded-but-empty conversation.
    pub fn history(&self, counterpart: &UserId) -> Option<&[Message]> {
        self.entries.get(counterpart).map(Vec::as_slice)
    }

    /// Check whether a counterpart has any entry, fetched or seeded.
    pub fn is_loaded(&self, counterpart: &UserId) -> bool {
        self.entries.contains_key(counterpart)
    }

    /// Check whether a counterpart's server-side history has been installed.
    ///
    /// False for entries seeded only by `append`; those still need a fetch
    /// on first selection.
    pub fn is_fetched(&self, counterpart: &UserId) -> bool {
        self.fetched.contains(counterpart)
    }

    /// Install fetched history for a counterpart, overwriting any prior
    /// (including stream-seeded) entry.
    ///
    /// Called once per counterpart in normal operation; a failed fetch must
    /// never reach this method (an installed empty entry would be treated
    /// as cached truth from then on).
    pub fn set_history(&mut self, counterpart: UserId, messages: Vec<Message>) {
        self.entries.insert(counterpart, messages);
        self.fetched.insert(counterpart);
    }

    /// Append a message to a counterpart's sequence, creating the entry if
    /// absent.
    pub fn append(&mut self, counterpart: UserId, message: Message) {
        self.entries.entry(counterpart).or_default().push(message);
    }

    /// Number of counterparts with a loaded entry.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether no entry has been loaded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry. Used on session teardown only.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.fetched.clear();
    }
}
