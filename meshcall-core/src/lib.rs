//! # meshcall core
//!
//! Shared vocabulary for the meshcall voice/video channel orchestrator:
//! identifiers, the shared [`MediaTrack`] handle, the error taxonomy, and the
//! [`PeerConnection`] capability that stands in for the media transport
//! (ICE/SDP negotiation, encoding, NAT traversal).
//!
//! Nothing in this crate talks to a network or a capture device. Concrete
//! transports plug in through [`PeerConnectionFactory`]; the [`mock`] module
//! provides a deterministic in-memory implementation for tests and demos.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod ids;
pub mod mock;
pub mod peer_link;
pub mod track;

// Re-export main types
pub use error::{MeshCallError, MeshCallResult};
pub use ids::{ParticipantId, RoomId};
pub use mock::{MockPeerConnection, MockPeerFactory};
pub use peer_link::{
    IceCandidate, PeerConnection, PeerConnectionEvent, PeerConnectionFactory,
    PeerConnectionState, PeerEvent, PeerEventReceiver, PeerEventSender, PeerEventSink, SdpType,
    SenderHandle, SenderId, SessionDescription, SignalingState, TransceiverDirection,
};
pub use track::{MediaTrack, TrackKind, TrackSource, TrackState};
