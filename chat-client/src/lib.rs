//! # chat-client
//!
//! Client-side chat state engine for QuickChat direct messaging.
//!
//! This crate provides [`ChatEngine`], the single injected object that owns
//! the authenticated user's chat state - per-contact message history, unseen
//! counts, online presence, and the event-stream connection lifecycle - and
//! reconciles the three asynchronous input sources feeding it: REST
//! responses, stream events, and local user actions.
//!
//! # Architecture
//!
//! ```text
//! Presentation → ChatEngine → RestTransport / StreamTransport → Network
//!                    ↓
//!               chat-core (pure state: cache, ledger, selector, link)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use quickchat_client::{ChatEngine, EngineConfig, HttpRest, WsStream};
//!
//! let rest = HttpRest::new("https://chat.example/api");
//! let (engine, mut notices) = ChatEngine::new(
//!     EngineConfig::new("wss://chat.example/stream"),
//!     rest,
//!     WsStream::new(),
//! );
//!
//! engine.session_resolved(user_id).await?;
//! engine.refresh_roster().await?;
//! engine.select(Some(counterpart)).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod engine;
pub mod transport;

pub use engine::{ChatEngine, EngineConfig, EngineError, Notice};
pub use transport::{
    HttpRest, MockRest, MockStream, RestError, RestTransport, StreamError, StreamTransport,
    WsStream,
};
