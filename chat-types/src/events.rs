//! Events pushed by the event-stream collaborator.

use serde::{Deserialize, Serialize};

use crate::{Message, UserId, WireError};

/// All events the stream can deliver.
///
/// The tag values match the event names on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum StreamEvent {
    /// A message addressed to the session user arrived.
    #[serde(rename = "new-message")]
    NewMessage(Message),
    /// Full replacement set of currently-online user ids.
    #[serde(rename = "presence-snapshot")]
    PresenceSnapshot(Vec<UserId>),
}

impl StreamEvent {
    /// Serialize to a JSON string.
    pub fn to_json(&self) -> Result<String, WireError> {
        serde_json::to_string(self).map_err(WireError::Serialization)
    }

    /// Deserialize from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, WireError> {
        serde_json::from_str(json).map_err(WireError::Deserialization)
    }
}
