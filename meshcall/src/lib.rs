//! # meshcall
//!
//! A client-side voice/video channel orchestrator for full-mesh calls:
//! every participant keeps one peer connection to every other participant.
//! The orchestrator keeps the set of peer links in step with room
//! membership, negotiates offers and answers without glare, switches the
//! outgoing video between a blank placeholder and a screen capture without
//! renegotiating, and presents each remote participant as one stable stream.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meshcall::{MockDeviceCapture, MockPeerFactory, VoiceChannelOrchestrator};
//! use meshcall_signaling::WebSocketSignaling;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let signaling = WebSocketSignaling::connect("ws://127.0.0.1:8080").await?;
//!
//!     let call = VoiceChannelOrchestrator::builder("my-room")
//!         .peer_factory(Arc::new(MockPeerFactory::new()))
//!         .device_capture(Arc::new(MockDeviceCapture::new()))
//!         .signaling(signaling)
//!         .build()?;
//!     let pump = call.spawn();
//!
//!     call.join().await?;
//!     call.start_share().await?;
//!
//!     let mut events = call.subscribe();
//!     while let Some(event) = events.next().await {
//!         println!("Call event: {:?}", event.event_type());
//!     }
//!
//!     call.leave();
//!     call.shutdown();
//!     pump.await?;
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

// Re-export core types for easy access
pub use meshcall_core::{
    IceCandidate, MediaTrack, MeshCallError, MeshCallResult, MockPeerConnection,
    MockPeerFactory, ParticipantId, PeerConnection, PeerConnectionFactory, PeerConnectionState,
    RoomId, SessionDescription, TrackKind, TrackSource,
};

pub use meshcall_media::{
    BlankVideoConfig, BlankVideoSourceFactory, DeviceCapture, MockDeviceCapture,
    SyntheticBlankVideo,
};

pub use meshcall_signaling::{
    InboundSignal, LoopbackHub, LoopbackSignaling, OutboundSignal, SignalingClient,
};

#[cfg(feature = "diagnostics")]
pub use meshcall_diagnostics::{init_logging, CallReport, ConnectionInfo, LogConfig};

// Public API modules
pub mod config;
pub mod event;
pub mod negotiation;
pub mod orchestrator;
pub mod participant;
pub mod peer;
pub mod stream;

// Re-export main API types
pub use config::{CallConfig, GlarePolicy};
pub use event::{CallEvent, EventStream};
pub use negotiation::{NegotiationCoordinator, NegotiationHost};
pub use orchestrator::{CallBuilder, CallPhase, VoiceChannelOrchestrator};
pub use participant::{InfoUpdate, ParticipantDirectory, ParticipantInfo};
pub use peer::{LinkState, PeerLink, PeerRegistry};
pub use stream::{RemoteEntry, RemoteStream, RemoteStreamAggregator, TrackUpdate};
