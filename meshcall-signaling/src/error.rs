//! Signaling error types

use meshcall_core::MeshCallError;
use thiserror::Error;

/// Errors raised by signaling clients and the relay
#[derive(Error, Debug)]
pub enum SignalingError {
    /// The client is not (or no longer) connected
    #[error("Signaling client not connected")]
    NotConnected,

    /// Connecting or the handshake failed
    #[error("Signaling connection to {url} failed: {reason}")]
    Connect {
        /// Endpoint that was dialled
        url: String,
        /// Failure reason
        reason: String,
    },

    /// The relay did not greet the client in time
    #[error("No welcome received from relay within {timeout_ms} ms")]
    HandshakeTimeout {
        /// Timeout that elapsed
        timeout_ms: u64,
    },

    /// The relay could not bind its listener
    #[error("Failed to bind relay on {address}: {reason}")]
    Bind {
        /// Requested address
        address: String,
        /// Failure reason
        reason: String,
    },

    /// A wire message could not be decoded
    #[error("Invalid signaling message {message}: {source}")]
    Decode {
        /// Raw message text
        message: String,
        /// Parse error
        source: serde_json::Error,
    },

    /// A message could not be encoded
    #[error("Failed to encode signaling message: {0}")]
    Encode(#[from] serde_json::Error),

    /// The underlying socket failed
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl From<SignalingError> for MeshCallError {
    fn from(error: SignalingError) -> Self {
        match error {
            SignalingError::NotConnected => MeshCallError::SignalingUnavailable,
            SignalingError::Decode { message, source } => MeshCallError::InvalidMessage {
                message,
                source: source.into(),
            },
            other => MeshCallError::Transport {
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_connected_maps_to_signaling_unavailable() {
        let error: MeshCallError = SignalingError::NotConnected.into();
        assert_eq!(error.error_code(), "SIGNALING_UNAVAILABLE");
    }

    #[test]
    fn test_decode_maps_to_invalid_message() {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let error: MeshCallError = SignalingError::Decode {
            message: "{".to_string(),
            source,
        }
        .into();
        assert!(matches!(error, MeshCallError::InvalidMessage { .. }));
    }
}
