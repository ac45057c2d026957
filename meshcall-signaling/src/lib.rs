//! # meshcall Signaling
//!
//! The signaling side of meshcall: the `{event, data}` wire protocol, the
//! [`SignalingClient`] contract the orchestrator binds to, an in-memory
//! client and hub for tests and demos, a WebSocket client, and a small
//! WebSocket relay that routes messages between members of a room.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod error;
pub mod loopback;
pub mod protocol;
pub mod relay;
pub mod server;
pub mod websocket;

// Re-export main types
pub use client::{HandlerTable, SignalHandler, SignalingClient, SubscriptionId};
pub use error::SignalingError;
pub use loopback::{LoopbackHub, LoopbackSignaling};
pub use protocol::{InboundSignal, OutboundSignal, ParticipantProfile, ParticipantSnapshot};
pub use relay::{Delivery, RoomRouter};
pub use server::RelayServer;
pub use websocket::{WebSocketSignaling, DEFAULT_HANDSHAKE_TIMEOUT};
