//! WebSocket relay server
//!
//! A minimal room relay for the signaling protocol: every accepted
//! connection gets a fresh participant id (announced with `welcome`), and
//! every message it sends is routed through a [`RoomRouter`].

use crate::error::SignalingError;
use crate::protocol::{InboundSignal, OutboundSignal};
use crate::relay::{Delivery, RoomRouter};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use meshcall_core::{ParticipantId, RoomId};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use uuid::Uuid;

/// Outgoing queues of live connections, keyed by participant
type Connections = Arc<DashMap<ParticipantId, mpsc::UnboundedSender<Message>>>;

/// Signaling relay listening for WebSocket connections
#[derive(Debug, Clone)]
pub struct RelayServer {
    local_addr: SocketAddr,
    listener: Arc<Mutex<Option<TcpListener>>>,
    router: Arc<Mutex<RoomRouter>>,
    connections: Connections,
}

impl RelayServer {
    /// Bind the relay; use port 0 to let the OS pick one
    pub async fn bind(addr: SocketAddr) -> Result<Self, SignalingError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| SignalingError::Bind {
                address: addr.to_string(),
                reason: e.to_string(),
            })?;
        let local_addr = listener.local_addr().map_err(|e| SignalingError::Bind {
            address: addr.to_string(),
            reason: e.to_string(),
        })?;

        tracing::info!("Signaling relay listening on {}", local_addr);
        Ok(Self {
            local_addr,
            listener: Arc::new(Mutex::new(Some(listener))),
            router: Arc::new(Mutex::new(RoomRouter::new())),
            connections: Arc::new(DashMap::new()),
        })
    }

    /// Address actually bound
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `ws://` URL clients should dial
    pub fn url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    /// Number of live connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Members currently in `room_id`
    pub fn members(&self, room_id: &RoomId) -> Vec<ParticipantId> {
        self.router.lock().members(room_id)
    }

    /// Run the accept loop on a background task
    pub fn spawn(&self) -> JoinHandle<()> {
        let server = self.clone();
        tokio::spawn(async move { server.run().await })
    }

    /// Accept connections until the listener fails; may only be called once
    pub async fn run(&self) {
        let Some(listener) = self.listener.lock().take() else {
            tracing::warn!("Relay on {} is already running", self.local_addr);
            return;
        };

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    tracing::debug!("New connection from {}", addr);
                    let server = self.clone();
                    tokio::spawn(async move { server.handle_connection(stream).await });
                }
                Err(e) => {
                    tracing::error!("Failed to accept connection: {}", e);
                }
            }
        }
    }

    /// Handle incoming WebSocket connection
    async fn handle_connection(&self, stream: TcpStream) {
        let ws_stream = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                tracing::error!("WebSocket handshake failed: {}", e);
                return;
            }
        };

        let participant_id = ParticipantId::new(Uuid::new_v4().to_string());
        tracing::debug!("WebSocket connection established: {}", participant_id);

        let (mut ws_write, mut ws_read) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        self.connections.insert(participant_id.clone(), tx);

        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if ws_write.send(message).await.is_err() {
                    break;
                }
            }
        });

        self.deliver(vec![(
            participant_id.clone(),
            InboundSignal::Welcome {
                participant_id: participant_id.clone(),
            },
        )]);

        while let Some(message) = ws_read.next().await {
            match message {
                Ok(Message::Text(text)) => match OutboundSignal::from_json(&text) {
                    Ok(signal) => {
                        let deliveries = self.router.lock().route(&participant_id, signal);
                        self.deliver(deliveries);
                    }
                    Err(e) => tracing::warn!("Invalid message from {}: {}", participant_id, e),
                },
                Ok(Message::Close(_)) => {
                    tracing::debug!("Connection {} closed", participant_id);
                    break;
                }
                Err(e) => {
                    tracing::error!("WebSocket error on connection {}: {}", participant_id, e);
                    break;
                }
                Ok(_) => {
                    // Binary, Ping, Pong and raw frames carry no signaling
                }
            }
        }

        // Cleanup on disconnect
        self.connections.remove(&participant_id);
        let deliveries = self.router.lock().disconnect(&participant_id);
        self.deliver(deliveries);
        writer.abort();
    }

    fn deliver(&self, deliveries: Vec<Delivery>) {
        for (to, signal) in deliveries {
            let text = match signal.to_json() {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("Failed to encode {}: {}", signal.event_name(), e);
                    continue;
                }
            };
            match self.connections.get(&to) {
                Some(connection) => {
                    if connection.send(Message::Text(text)).is_err() {
                        tracing::debug!("Connection {} already closing", to);
                    }
                }
                None => tracing::debug!("No connection for {}", to),
            }
        }
    }
}
