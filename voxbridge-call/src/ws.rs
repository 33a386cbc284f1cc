//! WebSocket client for the signaling relay.
//!
//! Registers with the relay as `callerId`, writes [`SignalingMessage`]s as
//! JSON text frames and decodes incoming frames into [`SignalingEvent`]s
//! delivered on a channel.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::error::{CallError, Result};
use crate::signaling::{SignalingEvent, SignalingMessage, SignalingSink};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = futures::stream::SplitSink<WsStream, Message>;

const EVENT_BUFFER: usize = 64;
const KNOWN_EVENTS: [&str; 4] = ["newCall", "callAnswered", "ICEcandidate", "callEnded"];

/// Decode one relay frame.
///
/// Returns `Ok(None)` for events this client does not handle (the relay also
/// sends greetings and debug events).
pub fn decode_event(raw: &str) -> Result<Option<SignalingEvent>> {
    let value: Value = serde_json::from_str(raw)?;
    let name = value.get("event").and_then(Value::as_str).unwrap_or_default();
    if !KNOWN_EVENTS.contains(&name) {
        tracing::debug!(event = name, "Ignoring relay event");
        return Ok(None);
    }
    Ok(Some(serde_json::from_value(value)?))
}

/// Relay URL with `callerId` appended to its query, percent-encoded.
pub fn registration_url(url: &str, caller_id: &str) -> Result<String> {
    let mut url = url::Url::parse(url)
        .map_err(|e| CallError::signaling(format!("Invalid relay URL '{url}': {e}")))?;
    url.query_pairs_mut().append_pair("callerId", caller_id);
    Ok(url.into())
}

/// Signaling relay connection.
pub struct WsSignalingClient {
    caller_id: String,
    sender: Mutex<WsSink>,
    closed: AtomicBool,
    reader: JoinHandle<()>,
}

impl WsSignalingClient {
    /// Connect to the relay at `url` as `caller_id`.
    ///
    /// Returns the client and the stream of relay events; the stream ends
    /// when the relay closes the connection.
    pub async fn connect(
        url: &str,
        caller_id: &str,
    ) -> Result<(Self, mpsc::Receiver<SignalingEvent>)> {
        let url = registration_url(url, caller_id)?;
        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| CallError::signaling(format!("WebSocket connect error: {e}")))?;
        tracing::info!(caller_id, "Connected to signaling relay");

        let (sink, mut source) = stream.split();
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(frame)) => {
                        tracing::info!(?frame, "Signaling relay closed the connection");
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!(error = %e, "Signaling receive error");
                        break;
                    }
                };
                match decode_event(text.as_str()) {
                    Ok(Some(event)) => {
                        if events_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!(error = %e, "Malformed relay frame"),
                }
            }
        });

        let client = Self {
            caller_id: caller_id.to_string(),
            sender: Mutex::new(sink),
            closed: AtomicBool::new(false),
            reader,
        };
        Ok((client, events_rx))
    }

    /// Id we registered with.
    pub fn caller_id(&self) -> &str {
        &self.caller_id
    }

    /// Close the connection. Closing twice is not an error.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.sender
            .lock()
            .await
            .send(Message::Close(None))
            .await
            .map_err(|e| CallError::signaling(format!("Close error: {e}")))
    }
}

#[async_trait]
impl SignalingSink for WsSignalingClient {
    async fn send(&self, message: SignalingMessage) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CallError::signaling("signaling connection closed"));
        }
        let text = serde_json::to_string(&message)?;
        tracing::debug!(event = message.event_name(), peer = message.peer(), "Signaling send");
        self.sender
            .lock()
            .await
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| CallError::signaling(format!("Send error: {e}")))
    }
}

impl Drop for WsSignalingClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl std::fmt::Debug for WsSignalingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsSignalingClient")
            .field("caller_id", &self.caller_id)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}
