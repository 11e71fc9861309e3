//! Mock transports for testing.
//!
//! Allow queueing responses, forcing failures, injecting stream events, and
//! capturing calls for verification.

use super::{RestError, RestTransport, StreamError, StreamTransport};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

use chat_types::{Message, MessageBody, MessageId, StreamEvent, User, UserId};

/// Mock REST transport.
///
/// Responses are queued per endpoint; requests and sent payloads are
/// recorded for verification.
#[derive(Debug, Default)]
pub struct MockRest {
    inner: Arc<Mutex<MockRestInner>>,
}

#[derive(Debug, Default)]
struct MockRestInner {
    contacts_queue: VecDeque<Vec<User>>,
    history_queue: VecDeque<Vec<Message>>,
    contacts_requests: usize,
    history_requests: Vec<UserId>,
    sent: Vec<(UserId, MessageBody)>,
    echoes: Vec<Message>,
    fail_next_contacts: Option<RestError>,
    fail_next_history: Option<RestError>,
    fail_next_send: Option<RestError>,
    hold_next_history: Option<oneshot::Receiver<()>>,
}

impl MockRest {
    /// Create a new mock REST transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a contact list for the next `contacts()` call.
    pub fn queue_contacts(&self, users: Vec<User>) {
        self.inner.lock().unwrap().contacts_queue.push_back(users);
    }

    /// Queue a history for the next `history()` call.
    pub fn queue_history(&self, messages: Vec<Message>) {
        self.inner.lock().unwrap().history_queue.push_back(messages);
    }

    /// Cause the next `contacts()` to fail with the given error.
    pub fn fail_next_contacts(&self, error: RestError) {
        self.inner.lock().unwrap().fail_next_contacts = Some(error);
    }

    /// Cause the next `history()` to fail with the given error.
    pub fn fail_next_history(&self, error: RestError) {
        self.inner.lock().unwrap().fail_next_history = Some(error);
    }

    /// Cause the next `send()` to fail with the given error.
    pub fn fail_next_send(&self, error: RestError) {
        self.inner.lock().unwrap().fail_next_send = Some(error);
    }

    /// Hold the next `history()` call until the returned sender fires.
    ///
    /// Lets tests keep a fetch in flight while other operations run.
    pub fn hold_next_history(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().unwrap().hold_next_history = Some(rx);
        tx
    }

    /// Number of `contacts()` calls made.
    pub fn contacts_requests(&self) -> usize {
        self.inner.lock().unwrap().contacts_requests
    }

    /// The counterparts `history()` was called for, in order.
    pub fn history_requests(&self) -> Vec<UserId> {
        self.inner.lock().unwrap().history_requests.clone()
    }

    /// The payloads `send()` was called with, in order.
    pub fn sent(&self) -> Vec<(UserId, MessageBody)> {
        self.inner.lock().unwrap().sent.clone()
    }

    /// The persisted records `send()` returned, in order.
    pub fn echoes(&self) -> Vec<Message> {
        self.inner.lock().unwrap().echoes.clone()
    }
}

impl Clone for MockRest {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl RestTransport for MockRest {
    async fn contacts(&self) -> Result<Vec<User>, RestError> {
        let mut inner = self.inner.lock().unwrap();
        inner.contacts_requests += 1;
        if let Some(error) = inner.fail_next_contacts.take() {
            return Err(error);
        }
        inner
            .contacts_queue
            .pop_front()
            .ok_or(RestError::Status(404))
    }

    async fn history(&self, counterpart: &UserId) -> Result<Vec<Message>, RestError> {
        let gate = self.inner.lock().unwrap().hold_next_history.take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.history_requests.push(*counterpart);
        if let Some(error) = inner.fail_next_history.take() {
            return Err(error);
        }
        inner
            .history_queue
            .pop_front()
            .ok_or(RestError::Status(404))
    }

    async fn send(&self, recipient: &UserId, body: &MessageBody) -> Result<Message, RestError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.fail_next_send.take() {
            return Err(error);
        }
        inner.sent.push((*recipient, body.clone()));
        // Persisted echo: server-assigned id and timestamp. The engine is
        // expected to override sender and timestamp with its own.
        let persisted = Message {
            id: MessageId::new(),
            sender_id: UserId::random(),
            body: body.clone(),
            created_at: 1,
        };
        inner.echoes.push(persisted.clone());
        Ok(persisted)
    }
}

/// One recorded stream-transport operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOp {
    /// `connect(url, user_id)` was called.
    Connect {
        /// The endpoint connected to.
        url: String,
        /// The user connected as.
        user_id: UserId,
    },
    /// `disconnect()` was called while a connection was live.
    Disconnect,
}

/// Mock event-stream transport.
///
/// Tests inject events with [`MockStream::emit`]; the op log records the
/// connect/disconnect order the engine drove.
#[derive(Debug, Default)]
pub struct MockStream {
    inner: Arc<Mutex<MockStreamInner>>,
}

#[derive(Debug, Default)]
struct MockStreamInner {
    sender: Option<mpsc::UnboundedSender<StreamEvent>>,
    connected_user: Option<UserId>,
    ops: Vec<StreamOp>,
    fail_next_connect: Option<String>,
}

impl MockStream {
    /// Create a new mock stream transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject an event into the live connection.
    ///
    /// Returns false if nothing is connected (the event is dropped).
    pub fn emit(&self, event: StreamEvent) -> bool {
        let inner = self.inner.lock().unwrap();
        match &inner.sender {
            Some(sender) => sender.send(event).is_ok(),
            None => false,
        }
    }

    /// Cause the next `connect()` to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_connect = Some(error.to_string());
    }

    /// The user the live connection was made for.
    pub fn connected_user(&self) -> Option<UserId> {
        self.inner.lock().unwrap().connected_user
    }

    /// All connect/disconnect operations, in order.
    pub fn ops(&self) -> Vec<StreamOp> {
        self.inner.lock().unwrap().ops.clone()
    }

    /// Number of successful `connect()` calls.
    pub fn connect_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .ops
            .iter()
            .filter(|op| matches!(op, StreamOp::Connect { .. }))
            .count()
    }

    /// Number of effective `disconnect()` calls.
    pub fn disconnect_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .ops
            .iter()
            .filter(|op| matches!(op, StreamOp::Disconnect))
            .count()
    }
}

impl Clone for MockStream {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl StreamTransport for MockStream {
    async fn connect(
        &self,
        url: &str,
        user_id: &UserId,
    ) -> Result<mpsc::UnboundedReceiver<StreamEvent>, StreamError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.fail_next_connect.take() {
            return Err(StreamError::ConnectFailed(error));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        inner.sender = Some(tx);
        inner.connected_user = Some(*user_id);
        inner.ops.push(StreamOp::Connect {
            url: url.to_string(),
            user_id: *user_id,
        });
        Ok(rx)
    }

    async fn disconnect(&self) -> Result<(), StreamError> {
        let mut inner = self.inner.lock().unwrap();
        // Idempotent: only a live connection records a teardown.
        if inner.sender.take().is_some() {
            inner.connected_user = None;
            inner.ops.push(StreamOp::Disconnect);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.lock().unwrap().sender.is_some()
    }
}
