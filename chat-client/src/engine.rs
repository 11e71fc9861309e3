//! ChatEngine - the chat state engine for QuickChat.
//!
//! One engine instance owns the authenticated user's entire chat state:
//! the per-counterpart message cache, the unseen-count ledger, the active
//! conversation, the roster and presence views, and the event-stream
//! connection lifecycle. Consumers hold a reference and call the operations
//! here; nothing else mutates the state.
//!
//! # Architecture
//!
//! The engine interprets the pure state machines and collections from
//! chat-core and performs the actual I/O through the two transport traits.
//!
//! ```text
//! Presentation → ChatEngine → RestTransport / StreamTransport → Network
//!                    ↓
//!               chat-core (pure state, no I/O)
//! ```
//!
//! All mutation runs to completion under one lock per triggering input -
//! a local action, a REST response, or a stream event - so no two handlers
//! ever interleave mid-mutation. Suspension happens only at the network
//! boundaries, outside the lock.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

use chat_core::{
    ActiveConversation, LinkAction, LinkEvent, LinkSignal, LinkState, MessageCache, PresenceSet,
    Roster, UnseenLedger,
};
use chat_types::{Message, MessageBody, StreamEvent, User, UserId};

use crate::transport::{RestError, RestTransport, StreamError, StreamTransport};

/// Engine errors, one variant per failure class.
///
/// Every error is also surfaced as a user-visible [`Notice`] at the boundary
/// where it occurred; none of them leaves the cache or ledger in a modified
/// state.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Rejected locally, before any network call.
    #[error("validation error: {0}")]
    Validation(String),

    /// A REST call failed; state is as it was before the operation.
    #[error("transport error: {0}")]
    Transport(#[source] RestError),

    /// Establishing the event stream failed; no retry is scheduled.
    #[error("stream error: {0}")]
    Stream(#[source] StreamError),

    /// The credential was rejected; the session has been torn down.
    #[error("authentication rejected")]
    Auth,
}

/// User-visible notices emitted by the engine.
///
/// The presentation layer renders these however it likes (the reference UI
/// shows toasts). Delivery is best-effort: if nobody listens, notices are
/// dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The contact list could not be refreshed; the prior roster is kept.
    RosterFetchFailed(String),
    /// A history fetch failed; the transcript stays empty and the fetch
    /// will be retried on the next selection.
    HistoryFetchFailed(String),
    /// A send failed; nothing was appended.
    SendFailed(String),
    /// The recipient id was missing or malformed; no network call was made.
    InvalidRecipient(String),
    /// The event stream could not be established.
    StreamConnectFailed(String),
    /// The credential was rejected; the user has been logged out.
    SessionExpired,
}

/// Configuration for [`ChatEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Endpoint of the event-stream collaborator.
    pub stream_url: String,
    /// Human-readable client name, for diagnostics.
    pub client_name: String,
}

impl EngineConfig {
    /// Create a configuration pointing at the given stream endpoint.
    pub fn new(stream_url: impl Into<String>) -> Self {
        Self {
            stream_url: stream_url.into(),
            client_name: "quickchat client".to_string(),
        }
    }

    /// Set the client name.
    pub fn with_client_name(mut self, name: &str) -> Self {
        self.client_name = name.to_string();
        self
    }
}

#[derive(Debug, Default)]
struct EngineState {
    session_user: Option<UserId>,
    link: LinkState,
    cache: MessageCache,
    ledger: UnseenLedger,
    roster: Roster,
    presence: PresenceSet,
    active: ActiveConversation,
    transcript: Vec<Message>,
}

impl EngineState {
    /// Wipe everything tied to the session. The link is driven separately
    /// through its state machine.
    fn reset(&mut self) {
        self.session_user = None;
        self.active.clear();
        self.transcript.clear();
        self.presence.clear();
        self.roster.clear();
        self.cache.clear();
        self.ledger.clear();
    }
}

/// The chat state engine.
///
/// Generic over the two transports so tests run against mocks and
/// production wires up [`HttpRest`](crate::HttpRest) and
/// [`WsStream`](crate::WsStream).
pub struct ChatEngine<R: RestTransport, S: StreamTransport> {
    config: EngineConfig,
    rest: R,
    stream: S,
    state: Mutex<EngineState>,
    events: Mutex<EventChannel>,
    notices: mpsc::UnboundedSender<Notice>,
}

/// The installed event receiver, stamped with a generation so a consumer
/// woken by a closed old channel cannot tear down a newer one installed
/// while it was parked.
#[derive(Debug, Default)]
struct EventChannel {
    receiver: Option<mpsc::UnboundedReceiver<StreamEvent>>,
    generation: u64,
}

impl<R: RestTransport, S: StreamTransport> ChatEngine<R, S> {
    /// Create a new engine and the receiving half of its notice channel.
    pub fn new(config: EngineConfig, rest: R, stream: S) -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (notices, notice_rx) = mpsc::unbounded_channel();
        tracing::debug!("engine created: {}", config.client_name);
        let engine = Self {
            config,
            rest,
            stream,
            state: Mutex::new(EngineState::default()),
            events: Mutex::new(EventChannel::default()),
            notices,
        };
        (engine, notice_rx)
    }

    // ------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------

    /// The session produced a (new) user id: login, reload with a stored
    /// token, or an account switch.
    ///
    /// Establishes the event stream for that user, tearing down any prior
    /// connection first. Resolving the same user again is a no-op.
    pub async fn session_resolved(&self, user_id: UserId) -> Result<(), EngineError> {
        let actions = {
            let mut st = self.state.lock().await;
            st.session_user = Some(user_id);
            let (next, actions) = st
                .link
                .clone()
                .on_event(LinkEvent::SessionResolved { user_id });
            st.link = next;
            actions
        };
        self.run_link_actions(actions).await
    }

    /// The session ended: user logout or teardown.
    ///
    /// Disconnects the stream (at most once) and wipes all session state.
    pub async fn session_cleared(&self) -> Result<(), EngineError> {
        let actions = {
            let mut st = self.state.lock().await;
            st.reset();
            let (next, actions) = st.link.clone().on_event(LinkEvent::SessionCleared);
            st.link = next;
            actions
        };
        self.run_link_actions(actions).await
    }

    /// The auth collaborator reported a rejected credential.
    ///
    /// Forces a logout: stream teardown, state wipe, and a
    /// [`Notice::SessionExpired`].
    pub async fn auth_rejected(&self) {
        self.force_logout().await;
    }

    async fn force_logout(&self) {
        tracing::warn!("credential rejected, forcing logout");
        self.notify(Notice::SessionExpired);
        if let Err(err) = self.session_cleared().await {
            tracing::warn!("teardown after auth rejection failed: {}", err);
        }
    }

    /// Execute the actions produced by the link state machine, in order.
    async fn run_link_actions(&self, actions: Vec<LinkAction>) -> Result<(), EngineError> {
        let mut result = Ok(());
        for action in actions {
            match action {
                LinkAction::Disconnect => {
                    // Transport first: closing it unblocks any pump() parked
                    // on the event channel before we drop the receiver.
                    if let Err(err) = self.stream.disconnect().await {
                        tracing::warn!("stream teardown failed: {}", err);
                    }
                    self.events.lock().await.receiver.take();
                }
                LinkAction::Connect { user_id } => {
                    match self.stream.connect(&self.config.stream_url, &user_id).await {
                        Ok(receiver) => {
                            // Install and confirm under the channel lock so a
                            // consumer reporting the old channel's close can
                            // never interleave between the two.
                            let follow = {
                                let mut events = self.events.lock().await;
                                events.generation = events.generation.wrapping_add(1);
                                events.receiver = Some(receiver);
                                self.feed_link(LinkEvent::ConnectSucceeded).await
                            };
                            self.emit_signals(follow);
                        }
                        Err(err) => {
                            let follow = self
                                .feed_link(LinkEvent::ConnectFailed {
                                    error: err.to_string(),
                                })
                                .await;
                            self.emit_signals(follow);
                            result = Err(EngineError::Stream(err));
                        }
                    }
                }
                LinkAction::Emit(signal) => self.emit_signal(signal),
            }
        }
        result
    }

    async fn feed_link(&self, event: LinkEvent) -> Vec<LinkAction> {
        let mut st = self.state.lock().await;
        let (next, actions) = st.link.clone().on_event(event);
        st.link = next;
        actions
    }

    /// Connect-time follow-up actions are signal emissions only.
    fn emit_signals(&self, actions: Vec<LinkAction>) {
        for action in actions {
            if let LinkAction::Emit(signal) = action {
                self.emit_signal(signal);
            }
        }
    }

    fn emit_signal(&self, signal: LinkSignal) {
        match signal {
            LinkSignal::Connected { user_id } => {
                tracing::info!("event stream up for {}", user_id);
            }
            LinkSignal::ConnectFailed { error } => {
                tracing::warn!("event stream connect failed: {}", error);
                self.notify(Notice::StreamConnectFailed(error));
            }
            LinkSignal::Disconnected { reason, user_id } => {
                tracing::info!("event stream down for {}: {}", user_id, reason);
            }
        }
    }

    // ------------------------------------------------------------------
    // Conversation selection
    // ------------------------------------------------------------------

    /// Open a conversation, or close the open one with `None`.
    ///
    /// Opening clears the visible transcript before resolving history (no
    /// stale-content flash), loads history from the cache or - exactly once
    /// per counterpart - from the REST collaborator, and marks the
    /// counterpart seen. An entry seeded only by stream messages does not
    /// count as fetched: the first selection still loads the server-side
    /// history, which replaces the seeded tail. Re-selecting after a failed
    /// fetch retries it. A fetch still in flight when the selection moves
    /// on is discarded when it resolves.
    pub async fn select(&self, target: Option<UserId>) -> Result<(), EngineError> {
        let Some(target) = target else {
            let mut st = self.state.lock().await;
            st.active.clear();
            st.transcript.clear();
            return Ok(());
        };

        let ticket = {
            let mut guard = self.state.lock().await;
            let st = &mut *guard;
            if st.active.is_active(&target) && st.cache.is_fetched(&target) {
                st.ledger.mark_seen(&target);
                return Ok(());
            }
            let ticket = st.active.select(target);
            st.transcript.clear();
            if st.cache.is_fetched(&target) {
                if let Some(history) = st.cache.history(&target) {
                    st.transcript = history.to_vec();
                }
                st.ledger.mark_seen(&target);
                return Ok(());
            }
            ticket
        };

        tracing::debug!("fetching history for {}", target);
        match self.rest.history(&target).await {
            Ok(history) => {
                let mut st = self.state.lock().await;
                if !st.active.ticket_is_current(&ticket) {
                    tracing::debug!("discarding stale history fetch for {}", target);
                    return Ok(());
                }
                st.cache.set_history(target, history.clone());
                st.transcript = history;
                st.ledger.mark_seen(&target);
                Ok(())
            }
            Err(RestError::Unauthorized) => {
                self.force_logout().await;
                Err(EngineError::Auth)
            }
            Err(err) => {
                // The cache stays untouched so the next select retries the
                // fetch instead of trusting an empty entry.
                self.notify(Notice::HistoryFetchFailed(err.to_string()));
                Err(EngineError::Transport(err))
            }
        }
    }

    /// Zero the unseen count for a counterpart. Idempotent.
    pub async fn mark_seen(&self, counterpart: &UserId) {
        self.state.lock().await.ledger.mark_seen(counterpart);
    }

    // ------------------------------------------------------------------
    // Outbound send
    // ------------------------------------------------------------------

    /// Send a message to a recipient.
    ///
    /// The recipient must be present and pass the 24-hex id predicate, and
    /// the body must carry content; violations are rejected locally with a
    /// notice and no network call. On transport success the message is
    /// appended to the cache (and the transcript, if the recipient is the
    /// open conversation) with `sender_id = self` and a client-assigned
    /// timestamp. A failed send appends nothing.
    pub async fn send(
        &self,
        body: MessageBody,
        recipient: Option<&str>,
    ) -> Result<(), EngineError> {
        let Some(recipient) = recipient else {
            return Err(self.reject_send(Notice::InvalidRecipient(
                "no recipient selected".to_string(),
            )));
        };
        if !UserId::is_valid(recipient) {
            return Err(self.reject_send(Notice::InvalidRecipient(format!(
                "malformed recipient id {:?}",
                recipient
            ))));
        }
        if body.is_empty() {
            return Err(self.reject_send(Notice::SendFailed(
                "message body is empty".to_string(),
            )));
        }
        let recipient =
            UserId::parse(recipient).map_err(|e| EngineError::Validation(e.to_string()))?;

        let Some(sender) = self.state.lock().await.session_user else {
            return Err(self.reject_send(Notice::SendFailed("not signed in".to_string())));
        };

        match self.rest.send(&recipient, &body).await {
            Ok(persisted) => {
                // Keep the persisted id and body; the sender and timestamp
                // are the client's own (there is no stream echo to
                // reconcile against).
                let message = Message {
                    sender_id: sender,
                    created_at: now_millis(),
                    ..persisted
                };
                let mut guard = self.state.lock().await;
                let st = &mut *guard;
                st.cache.append(recipient, message.clone());
                if st.active.is_active(&recipient) {
                    st.transcript.push(message);
                }
                Ok(())
            }
            Err(RestError::Unauthorized) => {
                self.force_logout().await;
                Err(EngineError::Auth)
            }
            Err(err) => {
                self.notify(Notice::SendFailed(err.to_string()));
                Err(EngineError::Transport(err))
            }
        }
    }

    fn reject_send(&self, notice: Notice) -> EngineError {
        let reason = match &notice {
            Notice::InvalidRecipient(reason) | Notice::SendFailed(reason) => reason.clone(),
            _ => "rejected".to_string(),
        };
        self.notify(notice);
        EngineError::Validation(reason)
    }

    // ------------------------------------------------------------------
    // Directory sync
    // ------------------------------------------------------------------

    /// Refresh the contact list from the REST collaborator.
    ///
    /// The roster is replaced wholesale (self excluded by id). On failure
    /// the prior roster is retained - stale-but-present over empty.
    pub async fn refresh_roster(&self) -> Result<(), EngineError> {
        match self.rest.contacts().await {
            Ok(users) => {
                let mut guard = self.state.lock().await;
                let st = &mut *guard;
                st.roster.replace(users, st.session_user.as_ref());
                Ok(())
            }
            Err(RestError::Unauthorized) => {
                self.force_logout().await;
                Err(EngineError::Auth)
            }
            Err(err) => {
                self.notify(Notice::RosterFetchFailed(err.to_string()));
                Err(EngineError::Transport(err))
            }
        }
    }

    // ------------------------------------------------------------------
    // Stream event processing
    // ------------------------------------------------------------------

    /// Consume and handle the next stream event.
    ///
    /// Returns `Ok(true)` if an event was handled, `Ok(false)` if no stream
    /// is attached or the stream closed. Intended to be driven from one
    /// task so events are processed strictly in arrival order.
    pub async fn pump(&self) -> Result<bool, EngineError> {
        let (event, generation) = {
            let mut events = self.events.lock().await;
            let generation = events.generation;
            let Some(receiver) = events.receiver.as_mut() else {
                return Ok(false);
            };
            (receiver.recv().await, generation)
        };
        match event {
            Some(event) => {
                self.handle_stream_event(event).await?;
                Ok(true)
            }
            None => {
                // Only report the close if the channel we were draining is
                // still the installed one; a reconnect may have swapped in
                // a fresh receiver while this task was parked. The check and
                // the report stay under the channel lock so they cannot
                // interleave with a concurrent install.
                let actions = {
                    let mut events = self.events.lock().await;
                    if events.generation == generation {
                        events.receiver.take();
                        self.feed_link(LinkEvent::StreamClosed {
                            reason: "event channel closed".to_string(),
                        })
                        .await
                    } else {
                        Vec::new()
                    }
                };
                self.emit_signals(actions);
                Ok(false)
            }
        }
    }

    /// Handle one stream event as a single atomic step.
    ///
    /// A new message is appended to the cache first, then routed: from the
    /// open conversation it lands in the transcript with the counterpart
    /// kept at zero unseen; from anyone else it increments their unseen
    /// count and stays out of the transcript. A presence snapshot replaces
    /// the online set and triggers a roster refresh.
    pub async fn handle_stream_event(&self, event: StreamEvent) -> Result<(), EngineError> {
        match event {
            StreamEvent::NewMessage(message) => {
                let mut guard = self.state.lock().await;
                let st = &mut *guard;
                let sender = message.sender_id;
                st.cache.append(sender, message.clone());
                if st.active.is_active(&sender) {
                    st.ledger.mark_seen(&sender);
                    st.transcript.push(message);
                } else {
                    st.ledger.increment(&sender);
                }
                Ok(())
            }
            StreamEvent::PresenceSnapshot(ids) => {
                tracing::debug!("presence snapshot with {} users", ids.len());
                {
                    let mut st = self.state.lock().await;
                    st.presence.replace(ids);
                }
                // The directory refresh rides every presence change, as on
                // initial mount.
                self.refresh_roster().await
            }
        }
    }

    // ------------------------------------------------------------------
    // Read accessors for the presentation layer
    // ------------------------------------------------------------------

    /// The current contact list.
    pub async fn roster(&self) -> Vec<User> {
        self.state.lock().await.roster.contacts().to_vec()
    }

    /// The open conversation's counterpart, if any.
    pub async fn active(&self) -> Option<UserId> {
        self.state.lock().await.active.current().copied()
    }

    /// The visible transcript of the open conversation.
    pub async fn transcript(&self) -> Vec<Message> {
        self.state.lock().await.transcript.clone()
    }

    /// The cached history for a counterpart (`None` = not loaded).
    pub async fn history(&self, counterpart: &UserId) -> Option<Vec<Message>> {
        self.state
            .lock()
            .await
            .cache
            .history(counterpart)
            .map(<[Message]>::to_vec)
    }

    /// The unseen count for a counterpart.
    pub async fn unseen(&self, counterpart: &UserId) -> u32 {
        self.state.lock().await.ledger.count(counterpart)
    }

    /// All non-zero unseen counts.
    pub async fn unseen_counts(&self) -> HashMap<UserId, u32> {
        self.state.lock().await.ledger.counts()
    }

    /// Check whether a user is currently online.
    pub async fn is_online(&self, user_id: &UserId) -> bool {
        self.state.lock().await.presence.contains(user_id)
    }

    /// All currently online user ids.
    pub async fn online(&self) -> Vec<UserId> {
        self.state.lock().await.presence.snapshot()
    }

    /// The session user, if a session is live.
    pub async fn session_user(&self) -> Option<UserId> {
        self.state.lock().await.session_user
    }

    /// Check whether the event stream is connected.
    pub async fn is_stream_connected(&self) -> bool {
        self.state.lock().await.link.is_connected()
    }

    /// Get a reference to the REST transport (for testing).
    pub fn rest(&self) -> &R {
        &self.rest
    }

    /// Get a reference to the stream transport (for testing).
    pub fn stream(&self) -> &S {
        &self.stream
    }

    fn notify(&self, notice: Notice) {
        // Nobody listening is fine; notices are best-effort.
        let _ = self.notices.send(notice);
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockRest, MockStream, StreamOp};
    use chat_types::MessageId;
    use std::sync::Arc;

    fn alice() -> UserId {
        UserId::parse("aaaaaaaaaaaaaaaaaaaaaaaa").unwrap()
    }

    fn bella() -> UserId {
        UserId::parse("bbbbbbbbbbbbbbbbbbbbbbbb").unwrap()
    }

    fn carol() -> UserId {
        UserId::parse("cccccccccccccccccccccccc").unwrap()
    }

    fn user(id: UserId, name: &str) -> User {
        User {
            id,
            display_name: name.to_string(),
            avatar_ref: None,
        }
    }

    fn msg_from(sender: UserId, text: &str, at: u64) -> Message {
        Message {
            id: MessageId::new(),
            sender_id: sender,
            body: MessageBody::text(text),
            created_at: at,
        }
    }

    fn texts(messages: &[Message]) -> Vec<&str> {
        messages
            .iter()
            .map(|m| m.body.text.as_deref().unwrap_or(""))
            .collect()
    }

    fn engine() -> (
        ChatEngine<MockRest, MockStream>,
        MockRest,
        MockStream,
        mpsc::UnboundedReceiver<Notice>,
    ) {
        let rest = MockRest::new();
        let stream = MockStream::new();
        let (engine, notices) = ChatEngine::new(
            EngineConfig::new("ws://test/stream"),
            rest.clone(),
            stream.clone(),
        );
        (engine, rest, stream, notices)
    }

    /// Engine with a resolved session for `alice`.
    async fn signed_in_engine() -> (
        ChatEngine<MockRest, MockStream>,
        MockRest,
        MockStream,
        mpsc::UnboundedReceiver<Notice>,
    ) {
        let (engine, rest, stream, notices) = engine();
        engine.session_resolved(alice()).await.unwrap();
        (engine, rest, stream, notices)
    }

    // ===========================================
    // Session / stream lifecycle
    // ===========================================

    #[tokio::test]
    async fn session_resolved_connects_stream_for_user() {
        let (engine, _rest, stream, _notices) = engine();

        engine.session_resolved(alice()).await.unwrap();

        assert!(engine.is_stream_connected().await);
        assert_eq!(stream.connected_user(), Some(alice()));
        assert!(matches!(
            &stream.ops()[0],
            StreamOp::Connect { url, user_id } if url == "ws://test/stream" && *user_id == alice()
        ));
    }

    #[tokio::test]
    async fn resolving_same_user_again_does_not_reconnect() {
        let (engine, _rest, stream, _notices) = signed_in_engine().await;

        engine.session_resolved(alice()).await.unwrap();

        assert_eq!(stream.connect_count(), 1);
    }

    #[tokio::test]
    async fn user_change_tears_down_before_reconnecting() {
        let (engine, _rest, stream, _notices) = signed_in_engine().await;

        engine.session_resolved(bella()).await.unwrap();

        let ops = stream.ops();
        assert_eq!(ops.len(), 3);
        assert!(matches!(&ops[1], StreamOp::Disconnect));
        assert!(matches!(&ops[2], StreamOp::Connect { user_id, .. } if *user_id == bella()));
        assert_eq!(stream.connected_user(), Some(bella()));
    }

    #[tokio::test]
    async fn logout_disconnects_exactly_once() {
        let (engine, _rest, stream, _notices) = signed_in_engine().await;
        assert!(engine.is_stream_connected().await);

        engine.session_cleared().await.unwrap();
        engine.session_cleared().await.unwrap();

        assert!(!engine.is_stream_connected().await);
        assert_eq!(stream.disconnect_count(), 1);
        assert!(engine.session_user().await.is_none());
    }

    #[tokio::test]
    async fn logout_wipes_session_state() {
        let (engine, rest, stream, _notices) = signed_in_engine().await;
        rest.queue_history(vec![msg_from(bella(), "hi", 1)]);
        engine.select(Some(bella())).await.unwrap();
        stream.emit(StreamEvent::PresenceSnapshot(vec![bella()]));
        rest.queue_contacts(vec![user(bella(), "Bella")]);
        engine.pump().await.unwrap();

        engine.session_cleared().await.unwrap();

        assert!(engine.active().await.is_none());
        assert!(engine.transcript().await.is_empty());
        assert!(engine.roster().await.is_empty());
        assert!(engine.online().await.is_empty());
        assert!(engine.history(&bella()).await.is_none());
    }

    #[tokio::test]
    async fn stream_connect_failure_surfaces_notice_without_retry() {
        let (engine, _rest, stream, mut notices) = engine();
        stream.fail_next_connect("refused");

        let result = engine.session_resolved(alice()).await;

        assert!(matches!(result, Err(EngineError::Stream(_))));
        assert!(!engine.is_stream_connected().await);
        assert_eq!(stream.connect_count(), 0);
        assert!(matches!(
            notices.try_recv(),
            Ok(Notice::StreamConnectFailed(_))
        ));
    }

    #[tokio::test]
    async fn auth_rejection_forces_logout_and_teardown() {
        let (engine, _rest, stream, mut notices) = signed_in_engine().await;

        engine.auth_rejected().await;

        assert_eq!(notices.try_recv(), Ok(Notice::SessionExpired));
        assert!(!engine.is_stream_connected().await);
        assert_eq!(stream.disconnect_count(), 1);
        assert!(engine.session_user().await.is_none());
    }

    // ===========================================
    // Selection and history
    // ===========================================

    #[tokio::test]
    async fn first_select_fetches_once_then_serves_from_cache() {
        let (engine, rest, _stream, _notices) = signed_in_engine().await;
        rest.queue_history(vec![msg_from(bella(), "hi", 1)]);
        rest.queue_history(vec![]);

        engine.select(Some(bella())).await.unwrap();
        engine.select(None).await.unwrap();
        engine.select(Some(bella())).await.unwrap();

        // One fetch for B; the second selection was served from cache.
        assert_eq!(rest.history_requests(), vec![bella()]);
        assert_eq!(texts(&engine.transcript().await), vec!["hi"]);
        assert_eq!(engine.unseen(&bella()).await, 0);
    }

    #[tokio::test]
    async fn select_none_clears_transcript_and_active() {
        let (engine, rest, _stream, _notices) = signed_in_engine().await;
        rest.queue_history(vec![msg_from(bella(), "hi", 1)]);
        engine.select(Some(bella())).await.unwrap();

        engine.select(None).await.unwrap();

        assert!(engine.active().await.is_none());
        assert!(engine.transcript().await.is_empty());
        // Cache is untouched by deselection.
        assert_eq!(engine.history(&bella()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reselecting_active_counterpart_only_marks_seen() {
        let (engine, rest, _stream, _notices) = signed_in_engine().await;
        rest.queue_history(vec![msg_from(bella(), "hi", 1)]);
        engine.select(Some(bella())).await.unwrap();

        engine.select(Some(bella())).await.unwrap();

        assert_eq!(rest.history_requests().len(), 1);
        assert_eq!(texts(&engine.transcript().await), vec!["hi"]);
    }

    #[tokio::test]
    async fn failed_history_fetch_does_not_poison_cache() {
        let (engine, rest, _stream, mut notices) = signed_in_engine().await;
        rest.fail_next_history(RestError::Network("down".into()));

        let result = engine.select(Some(bella())).await;

        assert!(matches!(result, Err(EngineError::Transport(_))));
        assert!(matches!(
            notices.try_recv(),
            Ok(Notice::HistoryFetchFailed(_))
        ));
        assert!(engine.transcript().await.is_empty());
        // Not cached as an empty conversation: the next select retries.
        assert!(engine.history(&bella()).await.is_none());
        rest.queue_history(vec![msg_from(bella(), "recovered", 2)]);
        engine.select(Some(bella())).await.unwrap();
        assert_eq!(texts(&engine.transcript().await), vec!["recovered"]);
    }

    #[tokio::test]
    async fn reselecting_same_target_after_failed_fetch_retries() {
        let (engine, rest, _stream, _notices) = signed_in_engine().await;
        rest.fail_next_history(RestError::Network("down".into()));
        assert!(engine.select(Some(bella())).await.is_err());
        assert_eq!(engine.active().await, Some(bella()));

        // The target stayed active; selecting it again must not short-circuit
        // into an empty conversation.
        rest.queue_history(vec![msg_from(bella(), "hi", 1)]);
        engine.select(Some(bella())).await.unwrap();

        assert_eq!(rest.history_requests(), vec![bella(), bella()]);
        assert_eq!(texts(&engine.transcript().await), vec!["hi"]);
        assert_eq!(engine.unseen(&bella()).await, 0);
    }

    #[tokio::test]
    async fn stale_history_fetch_is_discarded() {
        let (engine, rest, _stream, _notices) = signed_in_engine().await;
        let engine = Arc::new(engine);

        // Hold B's fetch in flight, then switch to C while it hangs.
        let release = rest.hold_next_history();
        let slow = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.select(Some(bella())).await })
        };
        tokio::task::yield_now().await;

        rest.queue_history(vec![msg_from(carol(), "from carol", 2)]);
        engine.select(Some(carol())).await.unwrap();

        rest.queue_history(vec![msg_from(bella(), "slow history", 1)]);
        release.send(()).unwrap();
        slow.await.unwrap().unwrap();

        // The late result for B must not overwrite C's transcript, and B
        // stays unloaded.
        assert_eq!(engine.active().await, Some(carol()));
        assert_eq!(texts(&engine.transcript().await), vec!["from carol"]);
        assert!(engine.history(&bella()).await.is_none());
    }

    // ===========================================
    // Stream events: messages, unseen counts
    // ===========================================

    #[tokio::test]
    async fn message_from_active_counterpart_lands_in_transcript_seen() {
        let (engine, rest, stream, _notices) = signed_in_engine().await;
        rest.queue_history(vec![msg_from(bella(), "hi", 1)]);
        engine.select(Some(bella())).await.unwrap();

        stream.emit(StreamEvent::NewMessage(msg_from(bella(), "yo", 2)));
        engine.pump().await.unwrap();

        assert_eq!(texts(&engine.transcript().await), vec!["hi", "yo"]);
        assert_eq!(engine.unseen(&bella()).await, 0);
        assert_eq!(engine.history(&bella()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn message_from_other_counterpart_increments_unseen_only() {
        let (engine, rest, stream, _notices) = signed_in_engine().await;
        rest.queue_history(vec![]);
        engine.select(Some(bella())).await.unwrap();

        stream.emit(StreamEvent::NewMessage(msg_from(carol(), "psst", 3)));
        engine.pump().await.unwrap();

        assert!(engine.transcript().await.is_empty());
        assert_eq!(engine.unseen(&carol()).await, 1);
        assert_eq!(engine.history(&carol()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unseen_counts_accumulate_per_sender() {
        let (engine, _rest, stream, _notices) = signed_in_engine().await;

        for i in 0..3 {
            stream.emit(StreamEvent::NewMessage(msg_from(carol(), "m", i)));
            engine.pump().await.unwrap();
        }
        stream.emit(StreamEvent::NewMessage(msg_from(bella(), "b", 9)));
        engine.pump().await.unwrap();

        assert_eq!(engine.unseen(&carol()).await, 3);
        assert_eq!(engine.unseen(&bella()).await, 1);
        assert_eq!(engine.unseen_counts().await.len(), 2);
    }

    #[tokio::test]
    async fn selecting_counterpart_zeroes_their_unseen_count() {
        let (engine, rest, stream, _notices) = signed_in_engine().await;
        stream.emit(StreamEvent::NewMessage(msg_from(carol(), "waiting", 1)));
        engine.pump().await.unwrap();
        assert_eq!(engine.unseen(&carol()).await, 1);

        rest.queue_history(vec![msg_from(carol(), "waiting", 1)]);
        engine.select(Some(carol())).await.unwrap();

        assert_eq!(engine.unseen(&carol()).await, 0);
        assert_eq!(texts(&engine.transcript().await), vec!["waiting"]);
    }

    #[tokio::test]
    async fn first_select_after_cold_stream_message_still_fetches_history() {
        let (engine, rest, stream, _notices) = signed_in_engine().await;

        // A message from a never-opened counterpart seeds a cache entry.
        stream.emit(StreamEvent::NewMessage(msg_from(carol(), "new one", 5)));
        engine.pump().await.unwrap();
        assert_eq!(engine.history(&carol()).await.unwrap().len(), 1);

        // Opening the conversation must still load the server history; the
        // seeded entry holds only the streamed tail, not the full record.
        rest.queue_history(vec![
            msg_from(carol(), "old one", 1),
            msg_from(carol(), "new one", 5),
        ]);
        engine.select(Some(carol())).await.unwrap();

        assert_eq!(rest.history_requests(), vec![carol()]);
        assert_eq!(texts(&engine.transcript().await), vec!["old one", "new one"]);
        assert_eq!(engine.history(&carol()).await.unwrap().len(), 2);

        // From here on the entry is cached truth: no second fetch.
        engine.select(None).await.unwrap();
        engine.select(Some(carol())).await.unwrap();
        assert_eq!(rest.history_requests(), vec![carol()]);
    }

    #[tokio::test]
    async fn events_are_processed_in_arrival_order() {
        let (engine, rest, stream, _notices) = signed_in_engine().await;
        rest.queue_history(vec![]);
        engine.select(Some(bella())).await.unwrap();

        stream.emit(StreamEvent::NewMessage(msg_from(bella(), "one", 1)));
        stream.emit(StreamEvent::NewMessage(msg_from(bella(), "two", 2)));
        stream.emit(StreamEvent::NewMessage(msg_from(bella(), "three", 3)));
        while engine.pump().await.unwrap() {
            if engine.transcript().await.len() == 3 {
                break;
            }
        }

        assert_eq!(texts(&engine.transcript().await), vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn select_receive_deselect_full_flow() {
        let (engine, rest, stream, _notices) = signed_in_engine().await;

        // A selects B; history has one message from B.
        rest.queue_history(vec![msg_from(bella(), "hi", 10)]);
        engine.select(Some(bella())).await.unwrap();
        assert_eq!(texts(&engine.transcript().await), vec!["hi"]);
        assert_eq!(engine.unseen(&bella()).await, 0);

        // A stream message from B while B is open.
        stream.emit(StreamEvent::NewMessage(msg_from(bella(), "yo", 11)));
        engine.pump().await.unwrap();
        assert_eq!(texts(&engine.transcript().await), vec!["hi", "yo"]);
        assert_eq!(engine.unseen(&bella()).await, 0);

        // A deselects B; another message from B arrives.
        engine.select(None).await.unwrap();
        stream.emit(StreamEvent::NewMessage(msg_from(bella(), "still there?", 12)));
        engine.pump().await.unwrap();

        assert_eq!(engine.history(&bella()).await.unwrap().len(), 3);
        assert_eq!(engine.unseen(&bella()).await, 1);
        assert!(engine.transcript().await.is_empty());
    }

    // ===========================================
    // Presence and roster
    // ===========================================

    #[tokio::test]
    async fn presence_snapshot_replaces_online_set_and_refreshes_roster() {
        let (engine, rest, stream, _notices) = signed_in_engine().await;

        rest.queue_contacts(vec![user(bella(), "Bella")]);
        stream.emit(StreamEvent::PresenceSnapshot(vec![bella(), carol()]));
        engine.pump().await.unwrap();

        assert!(engine.is_online(&bella()).await);
        assert!(engine.is_online(&carol()).await);
        assert_eq!(engine.roster().await.len(), 1);
        assert_eq!(rest.contacts_requests(), 1);

        // Next snapshot replaces, never merges.
        rest.queue_contacts(vec![user(bella(), "Bella")]);
        stream.emit(StreamEvent::PresenceSnapshot(vec![carol()]));
        engine.pump().await.unwrap();
        assert!(!engine.is_online(&bella()).await);
    }

    #[tokio::test]
    async fn roster_excludes_session_user() {
        let (engine, rest, _stream, _notices) = signed_in_engine().await;
        rest.queue_contacts(vec![user(alice(), "Me"), user(bella(), "Bella")]);

        engine.refresh_roster().await.unwrap();

        let roster = engine.roster().await;
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].id, bella());
    }

    #[tokio::test]
    async fn failed_roster_refresh_retains_prior_roster() {
        let (engine, rest, _stream, mut notices) = signed_in_engine().await;
        rest.queue_contacts(vec![user(bella(), "Bella")]);
        engine.refresh_roster().await.unwrap();

        rest.fail_next_contacts(RestError::Status(503));
        let result = engine.refresh_roster().await;

        assert!(matches!(result, Err(EngineError::Transport(_))));
        assert!(matches!(
            notices.try_recv(),
            Ok(Notice::RosterFetchFailed(_))
        ));
        assert_eq!(engine.roster().await.len(), 1, "stale beats empty");
    }

    #[tokio::test]
    async fn unauthorized_roster_refresh_forces_logout() {
        let (engine, rest, stream, mut notices) = signed_in_engine().await;
        rest.fail_next_contacts(RestError::Unauthorized);

        let result = engine.refresh_roster().await;

        assert!(matches!(result, Err(EngineError::Auth)));
        assert_eq!(notices.try_recv(), Ok(Notice::SessionExpired));
        assert_eq!(stream.disconnect_count(), 1);
        assert!(engine.session_user().await.is_none());
    }

    // ===========================================
    // Outbound send
    // ===========================================

    #[tokio::test]
    async fn send_to_malformed_recipient_makes_no_network_call() {
        let (engine, rest, _stream, mut notices) = signed_in_engine().await;

        let result = engine.send(MessageBody::text("hi"), Some("not-24-hex")).await;

        assert!(matches!(result, Err(EngineError::Validation(_))));
        assert!(matches!(
            notices.try_recv(),
            Ok(Notice::InvalidRecipient(_))
        ));
        assert!(rest.sent().is_empty());
    }

    #[tokio::test]
    async fn send_without_recipient_is_rejected() {
        let (engine, rest, _stream, mut notices) = signed_in_engine().await;

        let result = engine.send(MessageBody::text("hi"), None).await;

        assert!(matches!(result, Err(EngineError::Validation(_))));
        assert!(matches!(
            notices.try_recv(),
            Ok(Notice::InvalidRecipient(_))
        ));
        assert!(rest.sent().is_empty());
    }

    #[tokio::test]
    async fn send_with_empty_body_is_rejected() {
        let (engine, rest, _stream, mut notices) = signed_in_engine().await;

        let result = engine
            .send(MessageBody::default(), Some(&bella().to_string()))
            .await;

        assert!(matches!(result, Err(EngineError::Validation(_))));
        assert!(matches!(notices.try_recv(), Ok(Notice::SendFailed(_))));
        assert!(rest.sent().is_empty());
    }

    #[tokio::test]
    async fn successful_send_appends_to_cache_and_open_transcript() {
        let (engine, rest, _stream, _notices) = signed_in_engine().await;
        rest.queue_history(vec![]);
        engine.select(Some(bella())).await.unwrap();

        engine
            .send(MessageBody::text("hello bella"), Some(&bella().to_string()))
            .await
            .unwrap();

        let transcript = engine.transcript().await;
        assert_eq!(texts(&transcript), vec!["hello bella"]);
        assert_eq!(transcript[0].sender_id, alice(), "sender is self");
        assert_eq!(
            transcript[0].id,
            rest.echoes()[0].id,
            "persisted id is kept"
        );
        assert!(
            transcript[0].created_at > rest.echoes()[0].created_at,
            "timestamp is client-assigned"
        );
        assert_eq!(engine.history(&bella()).await.unwrap().len(), 1);
        assert_eq!(rest.sent().len(), 1);
    }

    #[tokio::test]
    async fn send_to_non_active_recipient_skips_transcript() {
        let (engine, rest, _stream, _notices) = signed_in_engine().await;
        rest.queue_history(vec![]);
        engine.select(Some(bella())).await.unwrap();

        engine
            .send(MessageBody::text("side channel"), Some(&carol().to_string()))
            .await
            .unwrap();

        assert!(engine.transcript().await.is_empty());
        assert_eq!(engine.history(&carol()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_send_leaves_no_cache_entry() {
        let (engine, rest, _stream, mut notices) = signed_in_engine().await;
        rest.fail_next_send(RestError::Network("down".into()));

        let result = engine
            .send(MessageBody::text("lost"), Some(&bella().to_string()))
            .await;

        assert!(matches!(result, Err(EngineError::Transport(_))));
        assert!(matches!(notices.try_recv(), Ok(Notice::SendFailed(_))));
        assert!(engine.history(&bella()).await.is_none());
        assert!(engine.transcript().await.is_empty());
    }

    #[tokio::test]
    async fn send_image_body_is_accepted() {
        let (engine, rest, _stream, _notices) = signed_in_engine().await;

        engine
            .send(MessageBody::image("data:image/png;base64,xyz"), Some(&bella().to_string()))
            .await
            .unwrap();

        let sent = rest.sent();
        assert_eq!(sent[0].1.image_ref.as_deref(), Some("data:image/png;base64,xyz"));
    }

    // ===========================================
    // Pump without a stream
    // ===========================================

    #[tokio::test]
    async fn pump_without_stream_returns_false() {
        let (engine, _rest, _stream, _notices) = engine();
        assert!(!engine.pump().await.unwrap());
    }

    #[tokio::test]
    async fn pump_after_stream_close_reports_disconnect() {
        let (engine, _rest, stream, _notices) = signed_in_engine().await;

        // Server-side close: the sender goes away without a local teardown.
        stream.disconnect().await.unwrap();
        assert!(!engine.pump().await.unwrap());

        assert!(!engine.is_stream_connected().await);
        // No reconnect was attempted.
        assert_eq!(stream.connect_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reconnect_while_pump_is_parked_keeps_new_stream() {
        let (engine, _rest, stream, _notices) = signed_in_engine().await;
        let engine = Arc::new(engine);

        // Park a pump call on alice's (empty) event channel.
        let parked = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.pump().await })
        };
        // Wait until the pump holds the channel lock: once it does, it is
        // committed to recv() on alice's channel (a single yield does not
        // guarantee the spawned task has parked before we switch accounts).
        while engine.events.try_lock().is_ok() {
            tokio::task::yield_now().await;
        }

        // An account switch closes alice's channel and installs bella's.
        engine.session_resolved(bella()).await.unwrap();

        // The woken pump observed a closed channel, but it was the old one:
        // it must not tear down bella's fresh connection.
        assert!(!parked.await.unwrap().unwrap());
        assert!(engine.is_stream_connected().await);
        assert_eq!(stream.connected_user(), Some(bella()));

        // Events on the new channel still arrive.
        assert!(stream.emit(StreamEvent::NewMessage(msg_from(carol(), "post-switch", 1))));
        assert!(engine.pump().await.unwrap());
        assert_eq!(engine.unseen(&carol()).await, 1);
    }

    // ===========================================
    // Config
    // ===========================================

    #[test]
    fn config_builder() {
        let config = EngineConfig::new("ws://s").with_client_name("test rig");
        assert_eq!(config.stream_url, "ws://s");
        assert_eq!(config.client_name, "test rig");
    }
}
