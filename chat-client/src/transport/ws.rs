//! WebSocket implementation of the event-stream collaborator.
//!
//! Connects with the session user id as a query parameter, then runs a read
//! task that decodes incoming text frames into [`StreamEvent`]s and forwards
//! them, in arrival order, onto the channel handed back from `connect`.
//! Frames that do not decode are logged and dropped; they never tear the
//! connection down.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::{StreamError, StreamTransport};
use chat_types::{StreamEvent, UserId};

type WsConnection = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Live {
    writer: SplitSink<WsConnection, tungstenite::Message>,
    reader_task: tokio::task::JoinHandle<()>,
}

/// Event-stream transport over WebSocket, backed by `tokio-tungstenite`.
#[derive(Default)]
pub struct WsStream {
    live: Mutex<Option<Live>>,
    connected: Arc<AtomicBool>,
}

impl WsStream {
    /// Create a disconnected transport.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StreamTransport for WsStream {
    async fn connect(
        &self,
        url: &str,
        user_id: &UserId,
    ) -> Result<mpsc::UnboundedReceiver<StreamEvent>, StreamError> {
        let mut live = self.live.lock().await;
        if live.is_some() {
            return Err(StreamError::ConnectFailed(
                "a connection is already live".to_string(),
            ));
        }

        let endpoint = format!("{}?userId={}", url, user_id);
        let (connection, _) = connect_async(&endpoint)
            .await
            .map_err(|e| StreamError::ConnectFailed(e.to_string()))?;
        tracing::info!("event stream connected for {}", user_id);

        let (writer, mut reader) = connection.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let connected = Arc::clone(&self.connected);
        connected.store(true, Ordering::SeqCst);

        let reader_task = tokio::spawn(async move {
            while let Some(frame) = reader.next().await {
                match frame {
                    Ok(tungstenite::Message::Text(text)) => match StreamEvent::from_json(&text) {
                        Ok(event) => {
                            if tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            tracing::warn!("dropping undecodable stream frame: {}", err);
                        }
                    },
                    Ok(tungstenite::Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        tracing::debug!("event stream read ended: {}", err);
                        break;
                    }
                }
            }
            connected.store(false, Ordering::SeqCst);
        });

        *live = Some(Live {
            writer,
            reader_task,
        });
        Ok(rx)
    }

    async fn disconnect(&self) -> Result<(), StreamError> {
        let live = self.live.lock().await.take();
        if let Some(mut live) = live {
            let _ = live.writer.send(tungstenite::Message::Close(None)).await;
            let _ = live.writer.close().await;
            live.reader_task.abort();
            self.connected.store(false, Ordering::SeqCst);
            tracing::info!("event stream disconnected");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
