//! Stream-connection state machine.
//!
//! This module provides a pure, side-effect-free state machine for the
//! event-stream lifecycle. It takes lifecycle events as input and produces a
//! new state plus a list of actions to execute.
//!
//! The actual I/O (connecting, disconnecting) is performed by chat-client,
//! not by this module. The machine guarantees the session invariants:
//! at most one live connection, the old connection torn down before a new
//! one is requested on user-id change, and teardown issued at most once.
//! There is no automatic reconnect; loss of the stream simply lands back in
//! `Disconnected`.

use chat_types::UserId;

/// Stream connection state machine - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    /// No connection and none pending.
    Disconnected,
    /// Connection attempt in progress for this user.
    Connecting {
        /// The session user the attempt is for.
        user_id: UserId,
    },
    /// Live connection delivering events for this user.
    Connected {
        /// The session user the connection belongs to.
        user_id: UserId,
    },
}

impl LinkState {
    /// Create a new state machine in the Disconnected state.
    pub fn new() -> Self {
        Self::Disconnected
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller (chat-client)
    /// is responsible for executing the returned actions in order.
    pub fn on_event(self, event: LinkEvent) -> (Self, Vec<LinkAction>) {
        match (self, event) {
            // From Disconnected
            (Self::Disconnected, LinkEvent::SessionResolved { user_id }) => (
                Self::Connecting { user_id },
                vec![LinkAction::Connect { user_id }],
            ),

            // From Connecting
            (Self::Connecting { user_id }, LinkEvent::ConnectSucceeded) => (
                Self::Connected { user_id },
                vec![LinkAction::Emit(LinkSignal::Connected { user_id })],
            ),
            (Self::Connecting { .. }, LinkEvent::ConnectFailed { error }) => (
                Self::Disconnected,
                vec![LinkAction::Emit(LinkSignal::ConnectFailed { error })],
            ),
            (Self::Connecting { user_id }, LinkEvent::SessionResolved { user_id: next })
                if next != user_id =>
            {
                // Pending attempt superseded: tear down before requesting anew.
                (
                    Self::Connecting { user_id: next },
                    vec![LinkAction::Disconnect, LinkAction::Connect { user_id: next }],
                )
            }
            (Self::Connecting { .. }, LinkEvent::SessionCleared) => {
                (Self::Disconnected, vec![LinkAction::Disconnect])
            }

            // From Connected
            (Self::Connected { user_id }, LinkEvent::SessionResolved { user_id: next })
                if next != user_id =>
            {
                // User id changed: never two live connections.
                (
                    Self::Connecting { user_id: next },
                    vec![LinkAction::Disconnect, LinkAction::Connect { user_id: next }],
                )
            }
            (Self::Connected { user_id }, LinkEvent::SessionCleared) => (
                Self::Disconnected,
                vec![
                    LinkAction::Disconnect,
                    LinkAction::Emit(LinkSignal::Disconnected {
                        reason: "logged out".into(),
                        user_id,
                    }),
                ],
            ),
            (Self::Connected { user_id }, LinkEvent::StreamClosed { reason }) => (
                // Transport already gone; no teardown call, no auto-retry.
                Self::Disconnected,
                vec![LinkAction::Emit(LinkSignal::Disconnected { reason, user_id })],
            ),

            // Same-user resolve, repeated clears, late closes: no-ops.
            (state, _) => (state, vec![]),
        }
    }

    /// Check if a connection is live.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// Check if a connection attempt is pending.
    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting { .. })
    }

    /// The user the live or pending connection belongs to.
    pub fn user(&self) -> Option<&UserId> {
        match self {
            Self::Connecting { user_id } | Self::Connected { user_id } => Some(user_id),
            Self::Disconnected => None,
        }
    }
}

impl Default for LinkState {
    fn default() -> Self {
        Self::new()
    }
}

/// Events that can occur in the stream-connection lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The session produced a (new) non-null user id: login, reload with a
    /// stored token, or an id change.
    SessionResolved {
        /// The resolved session user.
        user_id: UserId,
    },
    /// Transport connection succeeded.
    ConnectSucceeded,
    /// Transport connection failed.
    ConnectFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// The session ended (logout or forced logout).
    SessionCleared,
    /// The transport dropped the connection.
    StreamClosed {
        /// Reason for the close.
        reason: String,
    },
}

/// Actions to be executed by chat-client, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAction {
    /// Establish a stream connection for the given user.
    Connect {
        /// The session user to connect as.
        user_id: UserId,
    },
    /// Tear down the live or pending connection.
    Disconnect,
    /// Surface a lifecycle signal to the application.
    Emit(LinkSignal),
}

/// Lifecycle signals surfaced to the application layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkSignal {
    /// A connection is live.
    Connected {
        /// The session user the connection belongs to.
        user_id: UserId,
    },
    /// The connection attempt failed (no retry is scheduled).
    ConnectFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// The connection ended.
    Disconnected {
        /// Reason for the disconnect.
        reason: String,
        /// The session user the connection belonged to.
        user_id: UserId,
    },
}
