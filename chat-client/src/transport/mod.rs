//! Transport abstraction for the QuickChat engine.
//!
//! Two collaborators are abstracted behind traits so the engine can be
//! tested without a network:
//! - [`RestTransport`] - the request/response surface (roster, history, send)
//! - [`StreamTransport`] - the persistent event stream (new messages,
//!   presence snapshots)
//!
//! The stream hands back an ordered [`tokio::sync::mpsc`] channel rather
//! than registering callbacks; one consumer loop drains it, preserving
//! per-connection event order.

mod http;
mod mock;
mod ws;

pub use http::HttpRest;
pub use mock::{MockRest, MockStream, StreamOp};
pub use ws::WsStream;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use chat_types::{Message, MessageBody, StreamEvent, User, UserId};

/// REST transport errors.
#[derive(Debug, Error)]
pub enum RestError {
    /// The request never produced a response.
    #[error("request failed: {0}")]
    Network(String),

    /// The server answered with a non-success status.
    #[error("server returned status {0}")]
    Status(u16),

    /// The credential was rejected (401/403).
    #[error("authentication rejected")]
    Unauthorized,

    /// The response body did not decode.
    #[error("invalid response body: {0}")]
    Decode(String),
}

/// Event-stream transport errors.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Establishing the connection failed.
    #[error("connection failed: {0}")]
    ConnectFailed(String),

    /// No connection is live.
    #[error("not connected")]
    NotConnected,
}

/// The request/response collaborator.
///
/// Implementations attach the session credential themselves; the engine
/// never sees it.
#[async_trait]
pub trait RestTransport: Send + Sync {
    /// `GET /contacts` - fetch the full contact list.
    async fn contacts(&self) -> Result<Vec<User>, RestError>;

    /// `GET /messages/{counterpart}` - fetch the full history with one
    /// counterpart.
    async fn history(&self, counterpart: &UserId) -> Result<Vec<Message>, RestError>;

    /// `POST /messages/{recipient}` - send a message; returns the persisted
    /// record.
    async fn send(&self, recipient: &UserId, body: &MessageBody) -> Result<Message, RestError>;
}

/// The persistent event-stream collaborator.
///
/// `connect` returns the receiving half of an unbounded channel carrying
/// the connection's events in arrival order. Dropping the receiver does not
/// close the connection; `disconnect` does.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Connect to the stream endpoint, identifying as the given user.
    async fn connect(
        &self,
        url: &str,
        user_id: &UserId,
    ) -> Result<mpsc::UnboundedReceiver<StreamEvent>, StreamError>;

    /// Close the live connection. Idempotent.
    async fn disconnect(&self) -> Result<(), StreamError>;

    /// Check if a connection is live.
    fn is_connected(&self) -> bool;
}
