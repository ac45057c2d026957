//! Media error types
//!
//! Errors raised while acquiring local sources or re-pointing senders. A
//! failed acquisition never leaves a half-applied source switch behind.

use meshcall_core::MeshCallError;
use thiserror::Error;

/// Main error type for media source operations
#[derive(Error, Debug)]
pub enum MediaError {
    /// Device capability missing or refused (no microphone, display capture denied, ...)
    #[error("Capability unavailable: {capability} - {reason}")]
    CapabilityUnavailable {
        /// Capability name
        capability: String,
        /// Failure reason
        reason: String,
    },

    /// Permission denied error
    #[error("Permission denied: {operation}")]
    PermissionDenied {
        /// Operation that was denied
        operation: String,
    },

    /// Device not found error
    #[error("Device not found: {device_id}")]
    DeviceNotFound {
        /// Device identifier
        device_id: String,
    },

    /// Invalid configuration provided
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration {
        /// Error message
        message: String,
    },

    /// Capture not active error
    #[error("Capture not active")]
    CaptureNotActive,

    /// Invalid media type error
    #[error("Invalid media type: expected {expected}, got {actual}")]
    InvalidMediaType {
        /// Expected media type
        expected: String,
        /// Actual media type
        actual: String,
    },

    /// A captured track ended before it could be used
    #[error("Track ended before use: {track_id}")]
    TrackEnded {
        /// Track ID
        track_id: String,
    },

    /// A screen share acquisition is already waiting on the user
    #[error("Screen share acquisition already in progress")]
    ShareInProgress,

    /// Sources were reset while an acquisition was in flight
    #[error("Acquisition of {capability} cancelled by reset")]
    Cancelled {
        /// Capability whose acquisition was cancelled
        capability: String,
    },

    /// Sender update on a peer connection failed
    #[error("Sender update failed: {source}")]
    Sender {
        /// Underlying transport error
        #[from]
        source: MeshCallError,
    },
}

/// Result type alias for media operations
pub type MediaResult<T> = Result<T, MediaError>;

impl MediaError {
    /// Check if error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            MediaError::CapabilityUnavailable { .. } => true,
            MediaError::PermissionDenied { .. } => true,
            MediaError::TrackEnded { .. } => true,
            MediaError::ShareInProgress => true,
            MediaError::Cancelled { .. } => true,
            MediaError::Sender { source } => source.is_recoverable(),
            MediaError::DeviceNotFound { .. } => false,
            MediaError::InvalidConfiguration { .. } => false,
            MediaError::CaptureNotActive => false,
            MediaError::InvalidMediaType { .. } => false,
        }
    }

    /// Get error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            MediaError::CapabilityUnavailable { .. } => ErrorCategory::Device,
            MediaError::PermissionDenied { .. } => ErrorCategory::Permission,
            MediaError::DeviceNotFound { .. } => ErrorCategory::Device,
            MediaError::InvalidConfiguration { .. } => ErrorCategory::Configuration,
            MediaError::CaptureNotActive => ErrorCategory::State,
            MediaError::InvalidMediaType { .. } => ErrorCategory::Format,
            MediaError::TrackEnded { .. } => ErrorCategory::State,
            MediaError::ShareInProgress => ErrorCategory::State,
            MediaError::Cancelled { .. } => ErrorCategory::State,
            MediaError::Sender { .. } => ErrorCategory::Transport,
        }
    }
}

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Device and hardware errors
    Device,
    /// User or OS refused access
    Permission,
    /// Configuration and parameter errors
    Configuration,
    /// State management errors
    State,
    /// Format and data structure errors
    Format,
    /// Peer connection sender errors
    Transport,
}

impl From<MediaError> for MeshCallError {
    fn from(error: MediaError) -> Self {
        match error {
            MediaError::Sender { source } => source,
            MediaError::CapabilityUnavailable { capability, reason } => {
                MeshCallError::CapabilityUnavailable { capability, reason }
            }
            MediaError::PermissionDenied { operation } => MeshCallError::CapabilityUnavailable {
                capability: operation,
                reason: "permission denied".to_string(),
            },
            MediaError::DeviceNotFound { device_id } => MeshCallError::CapabilityUnavailable {
                capability: device_id,
                reason: "device not found".to_string(),
            },
            MediaError::InvalidConfiguration { message } => MeshCallError::InvalidConfiguration {
                field: "media".to_string(),
                reason: message,
            },
            MediaError::CaptureNotActive => MeshCallError::InvalidState {
                expected: "capture active".to_string(),
                actual: "capture inactive".to_string(),
            },
            MediaError::InvalidMediaType { expected, actual } => {
                MeshCallError::InvalidMediaType { expected, actual }
            }
            MediaError::TrackEnded { track_id } => MeshCallError::TrackEnded { track_id },
            MediaError::ShareInProgress => MeshCallError::InvalidState {
                expected: "no share pending".to_string(),
                actual: "share pending".to_string(),
            },
            MediaError::Cancelled { capability } => MeshCallError::CapabilityUnavailable {
                capability,
                reason: "cancelled by reset".to_string(),
            },
        }
    }
}
