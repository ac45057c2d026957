//! WebSocket signaling client
//!
//! Speaks the `{event, data}` protocol to a relay over one WebSocket. The
//! relay greets every connection with a `welcome` carrying the connection's
//! participant id; [`WebSocketSignaling::connect`] waits for it so the local
//! id is known before the client is handed to the orchestrator.

use crate::client::{HandlerTable, SignalHandler, SignalingClient, SubscriptionId};
use crate::error::SignalingError;
use crate::protocol::{InboundSignal, OutboundSignal};
use futures::{SinkExt, StreamExt};
use meshcall_core::ParticipantId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Default time to wait for the relay's welcome
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// [`SignalingClient`] over a WebSocket connection
#[derive(Debug)]
pub struct WebSocketSignaling {
    url: String,
    participant_id: ParticipantId,
    connected: Arc<AtomicBool>,
    handlers: Arc<HandlerTable>,
    outgoing: mpsc::UnboundedSender<Message>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WebSocketSignaling {
    /// Connect with the default handshake timeout
    pub async fn connect(url: &str) -> Result<Arc<Self>, SignalingError> {
        Self::connect_with_timeout(url, DEFAULT_HANDSHAKE_TIMEOUT).await
    }

    /// Connect, failing if the relay does not greet us within `handshake_timeout`
    pub async fn connect_with_timeout(
        url: &str,
        handshake_timeout: Duration,
    ) -> Result<Arc<Self>, SignalingError> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| SignalingError::Connect {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        debug!("Signaling websocket connected to {}", url);
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let welcome = async {
            while let Some(message) = ws_read.next().await {
                match message {
                    Ok(Message::Text(text)) => match InboundSignal::from_json(&text) {
                        Ok(InboundSignal::Welcome { participant_id }) => {
                            return Ok(participant_id);
                        }
                        Ok(other) => {
                            debug!("Ignoring {} before welcome", other.event_name());
                        }
                        Err(e) => warn!("Ignoring undecodable message before welcome: {}", e),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => return Err(SignalingError::from(e)),
                }
            }
            Err(SignalingError::Connect {
                url: url.to_string(),
                reason: "connection closed before welcome".to_string(),
            })
        };
        let participant_id = timeout(handshake_timeout, welcome)
            .await
            .map_err(|_| SignalingError::HandshakeTimeout {
                timeout_ms: handshake_timeout.as_millis() as u64,
            })??;
        info!("📡 Signaling connected to {} as {}", url, participant_id);

        let connected = Arc::new(AtomicBool::new(true));
        let handlers = Arc::new(HandlerTable::new());
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();

        let writer_connected = connected.clone();
        let writer = tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = ws_write.send(message).await {
                    warn!("Signaling websocket write failed: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
            writer_connected.store(false, Ordering::SeqCst);
        });

        let reader_connected = connected.clone();
        let reader_handlers = handlers.clone();
        let reader = tokio::spawn(async move {
            while let Some(message) = ws_read.next().await {
                match message {
                    Ok(Message::Text(text)) => match InboundSignal::from_json(&text) {
                        Ok(signal) => reader_handlers.dispatch(&signal),
                        Err(e) => warn!("Dropping signaling message: {}", e),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Signaling websocket error: {}", e);
                        break;
                    }
                }
            }
            reader_connected.store(false, Ordering::SeqCst);
            debug!("Signaling websocket reader finished");
        });

        Ok(Arc::new(Self {
            url: url.to_string(),
            participant_id,
            connected,
            handlers,
            outgoing,
            tasks: Mutex::new(vec![writer, reader]),
        }))
    }

    /// Endpoint this client is connected to
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send a close frame and stop delivering messages
    pub fn close(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            let _ = self.outgoing.send(Message::Close(None));
            info!("📡 Signaling connection to {} closed", self.url);
        }
    }
}

impl SignalingClient for WebSocketSignaling {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn local_participant_id(&self) -> Option<ParticipantId> {
        Some(self.participant_id.clone())
    }

    fn send(&self, signal: OutboundSignal) -> Result<(), SignalingError> {
        if !self.is_connected() {
            return Err(SignalingError::NotConnected);
        }
        let text = signal.to_json()?;
        self.outgoing
            .send(Message::Text(text))
            .map_err(|_| SignalingError::NotConnected)
    }

    fn subscribe(&self, handler: SignalHandler) -> SubscriptionId {
        self.handlers.insert(handler)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.handlers.remove(id)
    }
}

impl Drop for WebSocketSignaling {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}
