//! # chat-core
//!
//! Pure chat-state logic for QuickChat (no I/O, instant tests).
//!
//! This crate implements the state the chat client protects — the message
//! cache, the unseen-count ledger, the active-conversation selector, the
//! roster/presence views, and the stream-connection state machine — without
//! any network I/O.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (REST calls, the event stream) is performed by
//! `chat-client`, which owns these structures and interprets the actions
//! produced by the [`link`] state machine.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod ledger;
pub mod link;
pub mod roster;
pub mod selector;

pub use cache::MessageCache;
pub use ledger::UnseenLedger;
pub use link::{LinkAction, LinkEvent, LinkSignal, LinkState};
pub use roster::{PresenceSet, Roster};
pub use selector::{ActiveConversation, FetchTicket};
