//! Error types for meshcall

use thiserror::Error;

/// Convenience alias used across the workspace
pub type MeshCallResult<T> = Result<T, MeshCallError>;

/// Main error type for meshcall operations
#[derive(Error, Debug)]
pub enum MeshCallError {
    /// Initialization error
    #[error("Initialization failed: {reason}")]
    Initialization {
        /// Reason for initialization failure
        reason: String,
    },

    /// Missing configuration error
    #[error("Missing required configuration: {field}")]
    MissingConfiguration {
        /// Missing configuration field
        field: String,
    },

    /// Invalid configuration value
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidConfiguration {
        /// Offending configuration field
        field: String,
        /// Why the value was rejected
        reason: String,
    },

    /// A device capability (microphone, display capture) could not be used
    #[error("Capability unavailable: {capability}: {reason}")]
    CapabilityUnavailable {
        /// Capability that failed
        capability: String,
        /// Reason reported by the device layer
        reason: String,
    },

    /// The signaling transport is not attached or not connected
    #[error("Signaling transport unavailable")]
    SignalingUnavailable,

    /// Offer/answer/ICE step failed for a peer
    #[error("Negotiation with {participant_id} failed during {stage}: {reason}")]
    Negotiation {
        /// Remote participant
        participant_id: String,
        /// Negotiation step that failed (create-offer, set-remote-description, ...)
        stage: String,
        /// Reason reported by the transport
        reason: String,
    },

    /// Media transport error not tied to a negotiation step
    #[error("Transport error: {reason}")]
    Transport {
        /// Reason for transport error
        reason: String,
    },

    /// No peer link exists for the participant
    #[error("Peer link not found: {participant_id}")]
    PeerNotFound {
        /// Participant ID that was not found
        participant_id: String,
    },

    /// Operation attempted on a closed peer link
    #[error("Peer link closed: {participant_id}")]
    PeerClosed {
        /// Participant whose link is closed
        participant_id: String,
    },

    /// Sender handle does not belong to the connection
    #[error("Unknown sender {sender} on peer link {participant_id}")]
    SenderNotFound {
        /// Participant owning the connection
        participant_id: String,
        /// Sender index
        sender: usize,
    },

    /// Track kind does not match the transceiver it was offered to
    #[error("Invalid media type: expected {expected}, got {actual}")]
    InvalidMediaType {
        /// Expected media type
        expected: String,
        /// Actual media type
        actual: String,
    },

    /// Track has already ended and can no longer feed a sender
    #[error("Track ended: {track_id}")]
    TrackEnded {
        /// Track ID
        track_id: String,
    },

    /// Invalid state error
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },

    /// Invalid message format
    #[error("Invalid message format: {message}, error: {source}")]
    InvalidMessage {
        /// Invalid message content
        message: String,
        /// Parsing error
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl MeshCallError {
    /// Build a negotiation error for `participant_id` at `stage`
    pub fn negotiation(
        participant_id: impl Into<String>,
        stage: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        MeshCallError::Negotiation {
            participant_id: participant_id.into(),
            stage: stage.into(),
            reason: reason.into(),
        }
    }

    /// Get error code for programmatic handling
    pub fn error_code(&self) -> String {
        match self {
            MeshCallError::Initialization { .. } => "INITIALIZATION_FAILED".to_string(),
            MeshCallError::MissingConfiguration { .. } => "MISSING_CONFIGURATION".to_string(),
            MeshCallError::InvalidConfiguration { .. } => "INVALID_CONFIGURATION".to_string(),
            MeshCallError::CapabilityUnavailable { .. } => "CAPABILITY_UNAVAILABLE".to_string(),
            MeshCallError::SignalingUnavailable => "SIGNALING_UNAVAILABLE".to_string(),
            MeshCallError::Negotiation { .. } => "NEGOTIATION_FAILED".to_string(),
            MeshCallError::Transport { .. } => "TRANSPORT_ERROR".to_string(),
            MeshCallError::PeerNotFound { .. } => "PEER_NOT_FOUND".to_string(),
            MeshCallError::PeerClosed { .. } => "PEER_CLOSED".to_string(),
            MeshCallError::SenderNotFound { .. } => "SENDER_NOT_FOUND".to_string(),
            MeshCallError::InvalidMediaType { .. } => "INVALID_MEDIA_TYPE".to_string(),
            MeshCallError::TrackEnded { .. } => "TRACK_ENDED".to_string(),
            MeshCallError::InvalidState { .. } => "INVALID_STATE".to_string(),
            MeshCallError::InvalidMessage { .. } => "INVALID_MESSAGE".to_string(),
        }
    }

    /// Whether the call can continue after this error.
    ///
    /// Only configuration and initialization problems are fatal; everything
    /// else affects at most one peer or one command and is recoverable by
    /// retrying or by leaving and rejoining.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            MeshCallError::Initialization { .. }
                | MeshCallError::MissingConfiguration { .. }
                | MeshCallError::InvalidConfiguration { .. }
        )
    }
}
