//! Peer-connection capability
//!
//! The orchestrator never touches ICE, SDP internals or codecs. It drives a
//! [`PeerConnection`] per remote participant through this trait and receives
//! the transport's callbacks (negotiation needed, ICE candidate, remote
//! track, connection state) as [`PeerEvent`] values through the
//! [`PeerEventSink`] handed to the [`PeerConnectionFactory`]. Each sink is
//! stamped with the generation of the link it serves, so callbacks from a
//! closed connection cannot be mistaken for its replacement's.

use crate::error::MeshCallError;
use crate::ids::ParticipantId;
use crate::track::{MediaTrack, TrackKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// SDP message type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Offer
    Offer,
    /// Provisional answer
    Pranswer,
    /// Final answer
    Answer,
    /// Roll back a pending local or remote offer
    Rollback,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpType::Offer => write!(f, "offer"),
            SdpType::Pranswer => write!(f, "pranswer"),
            SdpType::Answer => write!(f, "answer"),
            SdpType::Rollback => write!(f, "rollback"),
        }
    }
}

/// Session description exchanged over signaling (`{ "type", "sdp" }`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Description type
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    /// Raw SDP body
    #[serde(default)]
    pub sdp: String,
}

impl SessionDescription {
    /// Build an offer
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Build an answer
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    /// Build a rollback marker
    pub fn rollback() -> Self {
        Self {
            sdp_type: SdpType::Rollback,
            sdp: String::new(),
        }
    }
}

/// ICE candidate in the shape browsers exchange (`RTCIceCandidateInit`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// Candidate line
    pub candidate: String,
    /// Media stream identification tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Index of the m-line the candidate belongs to
    #[serde(
        default,
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,
    /// ICE username fragment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// Candidate with only the candidate line set
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
            username_fragment: None,
        }
    }
}

/// Offer/answer state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    /// No exchange in progress
    Stable,
    /// Local offer applied, waiting for the answer
    HaveLocalOffer,
    /// Remote offer applied, answer not yet applied locally
    HaveRemoteOffer,
    /// Connection closed
    Closed,
}

/// Transport connectivity state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    /// Created, nothing attempted yet
    New,
    /// ICE/DTLS in progress
    Connecting,
    /// Media can flow
    Connected,
    /// Temporarily lost connectivity
    Disconnected,
    /// Connectivity failed; no ICE restart is attempted
    Failed,
    /// Closed locally
    Closed,
}

/// Direction of a transceiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransceiverDirection {
    /// Send and receive
    SendRecv,
    /// Send only
    SendOnly,
    /// Receive only
    RecvOnly,
    /// Neither
    Inactive,
}

/// Index of a sender within one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SenderId(pub usize);

impl fmt::Display for SenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sender#{}", self.0)
    }
}

/// Callback raised by the transport for one connection
#[derive(Debug, Clone)]
pub enum PeerConnectionEvent {
    /// The transport wants a new offer/answer round
    NegotiationNeeded,
    /// A local ICE candidate was gathered
    IceCandidate(IceCandidate),
    /// A remote track became available on a receiver
    Track(MediaTrack),
    /// Connectivity changed
    ConnectionStateChanged(PeerConnectionState),
}

/// Transport callback tagged with the link whose connection raised it
#[derive(Debug, Clone)]
pub struct PeerEvent {
    /// Remote participant
    pub participant_id: ParticipantId,
    /// Generation of the peer link the connection was created for.
    ///
    /// A participant id outlives its links (leave and rejoin on the same
    /// signaling connection), so events are matched on both.
    pub link_id: u64,
    /// What happened
    pub event: PeerConnectionEvent,
}

/// Sending half of the transport callback channel
pub type PeerEventSender = mpsc::UnboundedSender<PeerEvent>;

/// Callback channel of one connection; every event leaves stamped with its link
#[derive(Debug, Clone)]
pub struct PeerEventSink {
    participant_id: ParticipantId,
    link_id: u64,
    tx: PeerEventSender,
}

impl PeerEventSink {
    /// Sink for the link `link_id` to `participant_id`
    pub fn new(participant_id: ParticipantId, link_id: u64, tx: PeerEventSender) -> Self {
        Self {
            participant_id,
            link_id,
            tx,
        }
    }

    /// Remote participant of the link
    pub fn participant_id(&self) -> &ParticipantId {
        &self.participant_id
    }

    /// Generation of the link
    pub fn link_id(&self) -> u64 {
        self.link_id
    }

    /// Report `event`; `false` once the receiving side is gone
    pub fn emit(&self, event: PeerConnectionEvent) -> bool {
        self.tx
            .send(PeerEvent {
                participant_id: self.participant_id.clone(),
                link_id: self.link_id,
                event,
            })
            .is_ok()
    }
}

/// Receiving half of the transport callback channel
pub type PeerEventReceiver = mpsc::UnboundedReceiver<PeerEvent>;

/// One media-transport connection to a remote participant
#[async_trait]
pub trait PeerConnection: Send + Sync + fmt::Debug {
    /// Add a transceiver and return the handle of its sender
    fn add_transceiver(
        &self,
        kind: TrackKind,
        direction: TransceiverDirection,
    ) -> Result<SenderId, MeshCallError>;

    /// Swap the track feeding `sender` without renegotiating.
    ///
    /// Synchronous with respect to the caller so that a loop over every
    /// connection re-points all senders in one pass.
    fn replace_track(&self, sender: SenderId, track: Option<MediaTrack>)
        -> Result<(), MeshCallError>;

    /// Track currently attached to `sender`
    fn sender_track(&self, sender: SenderId) -> Option<MediaTrack>;

    /// Tracks already available on the receivers, whether or not a
    /// [`PeerConnectionEvent::Track`] was raised for them yet
    fn receiver_tracks(&self) -> Vec<MediaTrack>;

    /// Create an offer
    async fn create_offer(&self) -> Result<SessionDescription, MeshCallError>;

    /// Create an answer to the applied remote offer
    async fn create_answer(&self) -> Result<SessionDescription, MeshCallError>;

    /// Apply a local description (offer, answer or rollback)
    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MeshCallError>;

    /// Apply a remote description
    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MeshCallError>;

    /// Add a remote ICE candidate
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MeshCallError>;

    /// Offer/answer state
    fn signaling_state(&self) -> SignalingState;

    /// Connectivity state
    fn connection_state(&self) -> PeerConnectionState;

    /// Close the transport, aborting ICE and discarding pending descriptions
    fn close(&self);
}

/// Creates connections for newly discovered participants
pub trait PeerConnectionFactory: Send + Sync {
    /// Create a connection to `participant_id`; transport callbacks go to `events`
    fn create(
        &self,
        participant_id: &ParticipantId,
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerConnection>, MeshCallError>;
}

/// A sender on a specific connection
#[derive(Debug, Clone)]
pub struct SenderHandle {
    /// Participant the connection belongs to
    pub participant_id: ParticipantId,
    /// Connection owning the sender
    pub connection: Arc<dyn PeerConnection>,
    /// Sender within the connection
    pub sender: SenderId,
}

impl SenderHandle {
    /// Replace the track feeding this sender
    pub fn replace_track(&self, track: Option<MediaTrack>) -> Result<(), MeshCallError> {
        self.connection.replace_track(self.sender, track)
    }

    /// Track currently feeding this sender
    pub fn track(&self) -> Option<MediaTrack> {
        self.connection.sender_track(self.sender)
    }
}
