//! Error types for QuickChat wire data.

use thiserror::Error;

/// Errors that can occur while encoding or decoding wire data.
#[derive(Debug, Error)]
pub enum WireError {
    /// JSON serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// JSON deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] serde_json::Error),

    /// Identifier is not a 24-character hexadecimal string
    #[error("invalid user id: {0:?}")]
    InvalidUserId(String),

    /// Message body carries neither text nor an image reference
    #[error("empty message body")]
    EmptyBody,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = WireError::InvalidUserId("nope".to_string());
        assert_eq!(err.to_string(), "invalid user id: \"nope\"");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<WireError>();
    }
}
