//! Directory and chat records for QuickChat.
//!
//! These are the JSON payloads exchanged with the REST and event-stream
//! collaborators.

use serde::{Deserialize, Serialize};

use crate::{MessageId, UserId, WireError};

/// A user as served by the directory.
///
/// Identity fields are immutable for the engine's purposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Stable user identifier.
    pub id: UserId,
    /// Human-readable display name.
    pub display_name: String,
    /// Optional avatar reference (URL or data URI).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_ref: Option<String>,
}

/// The content of a message: text, an image reference, or both.
///
/// A well-formed body carries at least one of the two; empty text is
/// permitted when an image is present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MessageBody {
    /// Plain text content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Image reference (URL or data URI).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
}

impl MessageBody {
    /// Create a text-only body.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            image_ref: None,
        }
    }

    /// Create an image-only body.
    pub fn image(image_ref: impl Into<String>) -> Self {
        Self {
            text: None,
            image_ref: Some(image_ref.into()),
        }
    }

    /// Check whether the body carries any content.
    ///
    /// Whitespace-only text without an image counts as empty.
    pub fn is_empty(&self) -> bool {
        let has_text = self
            .text
            .as_deref()
            .map(|t| !t.trim().is_empty())
            .unwrap_or(false);
        !has_text && self.image_ref.is_none()
    }
}

/// A single chat message.
///
/// The recipient is implicit: messages live under their counterpart's key
/// in the message cache. `created_at` is a unix-millisecond timestamp;
/// for locally sent messages it is client-assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Stable message identifier, assigned at persist time.
    pub id: MessageId,
    /// The user who sent this message.
    pub sender_id: UserId,
    /// Message content.
    #[serde(flatten)]
    pub body: MessageBody,
    /// Unix-millisecond timestamp.
    pub created_at: u64,
}

impl Message {
    /// Serialize to a JSON string.
    pub fn to_json(&self) -> Result<String, WireError> {
        serde_json::to_string(self).map_err(WireError::Serialization)
    }

    /// Deserialize from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, WireError> {
        serde_json::from_str(json).map_err(WireError::Deserialization)
    }
}
