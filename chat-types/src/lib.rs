//! # chat-types
//!
//! Wire format types for the QuickChat direct-messaging client.
//!
//! This crate provides the foundational types used across all QuickChat crates:
//! - [`UserId`], [`MessageId`] - Identity types
//! - [`User`], [`Message`], [`MessageBody`] - Directory and chat records
//! - [`StreamEvent`] - Events pushed by the event-stream collaborator
//! - [`WireError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod events;
mod ids;
mod records;

pub use error::WireError;
pub use events::StreamEvent;
pub use ids::{MessageId, UserId};
pub use records::{Message, MessageBody, User};
