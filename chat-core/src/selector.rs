//! Active-conversation selection.
//!
//! At most one counterpart is open at a time. Selecting a counterpart hands
//! out a [`FetchTicket`] stamped with the current selection epoch; a history
//! fetch started for that selection presents the ticket when it resolves,
//! and the result is discarded if the selection moved on in the meantime.
//! This keeps a slow fetch for a previously open conversation from
//! overwriting the transcript of the current one.

use chat_types::UserId;

/// Tracks which counterpart is currently open, if any.
#[derive(Debug, Clone, Default)]
pub struct ActiveConversation {
    current: Option<UserId>,
    epoch: u64,
}

/// Proof of which selection a history fetch was started for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    target: UserId,
    epoch: u64,
}

impl FetchTicket {
    /// The counterpart this fetch targets.
    pub fn target(&self) -> &UserId {
        &self.target
    }
}

impl ActiveConversation {
    /// Create with nothing selected.
    pub fn new() -> Self {
        Self::default()
    }

    /// The currently open counterpart, if any.
    pub fn current(&self) -> Option<&UserId> {
        self.current.as_ref()
    }

    /// Check whether the given counterpart is the open one.
    pub fn is_active(&self, counterpart: &UserId) -> bool {
        self.current.as_ref() == Some(counterpart)
    }

    /// Open a conversation with the given counterpart.
    ///
    /// Bumps the selection epoch and returns a ticket for any history fetch
    /// this selection triggers.
    pub fn select(&mut self, counterpart: UserId) -> FetchTicket {
        self.epoch += 1;
        self.current = Some(counterpart);
        FetchTicket {
            target: counterpart,
            epoch: self.epoch,
        }
    }

    /// Close the open conversation, if any.
    pub fn clear(&mut self) {
        self.epoch += 1;
        self.current = None;
    }

    /// Check whether a fetch ticket still matches the current selection.
    ///
    /// False once the user selected someone else (or deselected) after the
    /// fetch was started.
    pub fn ticket_is_current(&self, ticket: &FetchTicket) -> bool {
        self.epoch == ticket.epoch && self.current.as_ref() == Some(&ticket.target)
    }
}
