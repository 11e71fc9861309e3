//! Identity types for QuickChat.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::WireError;

/// A unique identifier for a user.
///
/// 12 bytes, displayed and transmitted as a fixed-length 24-character
/// lowercase hexadecimal string (the form the directory service assigns).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId([u8; 12]);

impl UserId {
    /// Parse a UserId from its 24-hex string form.
    pub fn parse(s: &str) -> Result<Self, WireError> {
        if s.len() != 24 {
            return Err(WireError::InvalidUserId(s.to_string()));
        }
        let mut bytes = [0u8; 12];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|_| WireError::InvalidUserId(s.to_string()))?;
        Ok(Self(bytes))
    }

    /// Check whether a string is a well-formed user id (24 hex chars).
    ///
    /// This is the single identifier-format predicate used to validate
    /// recipients before any network call.
    pub fn is_valid(s: &str) -> bool {
        s.len() == 24 && s.bytes().all(|b| b.is_ascii_hexdigit())
    }

    /// Create a UserId from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() == 12 {
            let mut arr = [0u8; 12];
            arr.copy_from_slice(bytes);
            Some(Self(arr))
        } else {
            None
        }
    }

    /// Get the raw bytes of this UserId.
    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }

    /// Create a new random UserId (for testing and fixtures).
    pub fn random() -> Self {
        let mut bytes = [0u8; 12];
        getrandom::getrandom(&mut bytes).expect("getrandom failed");
        Self(bytes)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self)
    }
}

impl Serialize for UserId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        UserId::parse(&s).map_err(de::Error::custom)
    }
}

/// A unique identifier for a message.
///
/// UUID v4, assigned when a message is persisted. Gives every message a
/// stable identity even though the engine never deduplicates by it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(uuid::Uuid);

impl MessageId {
    /// Create a new random MessageId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self.0)
    }
}
