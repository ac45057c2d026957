//! Signaling protocol messages
//!
//! Every message travels as `{ "event": <kebab-case name>, "data": <payload> }`
//! with camelCase payload fields. Messages a client sends carry the
//! *target* participant; the relay rewrites them so the receiver sees the
//! *origin* participant instead.

use crate::error::SignalingError;
use meshcall_core::{IceCandidate, ParticipantId, RoomId, SessionDescription};
use serde::{Deserialize, Serialize};

/// Soft profile metadata attached to a participant announcement
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantProfile {
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Avatar image URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl ParticipantProfile {
    /// Profile with a display name only
    pub fn named(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            avatar_url: None,
        }
    }
}

/// One room member as announced by the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantSnapshot {
    /// Signaling connection id of the member
    pub participant_id: ParticipantId,
    /// Profile, if the relay knows one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<ParticipantProfile>,
    /// Whether the member is currently sharing its screen
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sharing: Option<bool>,
}

impl ParticipantSnapshot {
    /// Snapshot carrying only an id
    pub fn new(participant_id: impl Into<ParticipantId>) -> Self {
        Self {
            participant_id: participant_id.into(),
            info: None,
            sharing: None,
        }
    }

    /// Attach a profile
    pub fn with_info(mut self, info: ParticipantProfile) -> Self {
        self.info = Some(info);
        self
    }

    /// Attach a sharing flag
    pub fn with_sharing(mut self, sharing: bool) -> Self {
        self.sharing = Some(sharing);
        self
    }
}

/// Messages delivered to a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum InboundSignal {
    /// Relay greeting carrying this connection's own participant id
    #[serde(rename_all = "camelCase")]
    Welcome {
        /// Id the relay assigned to this connection
        participant_id: ParticipantId,
    },
    /// Room membership snapshot, sent once in reply to `join-call`
    ExistingParticipants(Vec<ParticipantSnapshot>),
    /// A member joined the room
    UserJoined(ParticipantSnapshot),
    /// A member left the room or disconnected
    #[serde(rename_all = "camelCase")]
    UserLeft {
        /// Departed member
        participant_id: ParticipantId,
    },
    /// SDP offer from a member
    #[serde(rename_all = "camelCase")]
    Offer {
        /// Origin of the offer
        from_participant_id: ParticipantId,
        /// Offer description
        sdp: SessionDescription,
    },
    /// SDP answer from a member
    #[serde(rename_all = "camelCase")]
    Answer {
        /// Origin of the answer
        from_participant_id: ParticipantId,
        /// Answer description
        sdp: SessionDescription,
    },
    /// Trickled ICE candidate from a member
    #[serde(rename_all = "camelCase")]
    IceCandidate {
        /// Origin of the candidate
        from_participant_id: ParticipantId,
        /// Candidate
        candidate: IceCandidate,
    },
    /// A member toggled screen sharing
    #[serde(rename_all = "camelCase")]
    ScreenShare {
        /// Member whose flag changed
        participant_id: ParticipantId,
        /// New flag value
        on: bool,
    },
}

impl InboundSignal {
    /// Wire event name
    pub fn event_name(&self) -> &'static str {
        match self {
            InboundSignal::Welcome { .. } => "welcome",
            InboundSignal::ExistingParticipants(_) => "existing-participants",
            InboundSignal::UserJoined(_) => "user-joined",
            InboundSignal::UserLeft { .. } => "user-left",
            InboundSignal::Offer { .. } => "offer",
            InboundSignal::Answer { .. } => "answer",
            InboundSignal::IceCandidate { .. } => "ice-candidate",
            InboundSignal::ScreenShare { .. } => "screen-share",
        }
    }

    /// Decode one wire message
    pub fn from_json(text: &str) -> Result<Self, SignalingError> {
        serde_json::from_str(text).map_err(|source| SignalingError::Decode {
            message: text.to_string(),
            source,
        })
    }

    /// Encode to the wire format
    pub fn to_json(&self) -> Result<String, SignalingError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Messages a client sends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum OutboundSignal {
    /// Announce presence in a room
    #[serde(rename_all = "camelCase")]
    JoinCall {
        /// Room to join
        room_id: RoomId,
        /// Profile the relay attaches to this member's announcements
        #[serde(default, skip_serializing_if = "Option::is_none")]
        info: Option<ParticipantProfile>,
    },
    /// Announce departure from a room
    #[serde(rename_all = "camelCase")]
    LeaveCall {
        /// Room to leave
        room_id: RoomId,
    },
    /// SDP offer for one member
    #[serde(rename_all = "camelCase")]
    Offer {
        /// Recipient
        target_participant_id: ParticipantId,
        /// Offer description
        sdp: SessionDescription,
    },
    /// SDP answer for one member
    #[serde(rename_all = "camelCase")]
    Answer {
        /// Recipient
        target_participant_id: ParticipantId,
        /// Answer description
        sdp: SessionDescription,
    },
    /// ICE candidate for one member
    #[serde(rename_all = "camelCase")]
    IceCandidate {
        /// Recipient
        target_participant_id: ParticipantId,
        /// Candidate
        candidate: IceCandidate,
    },
    /// Broadcast this client's sharing flag to the room
    #[serde(rename_all = "camelCase")]
    ScreenShare {
        /// Room to broadcast to
        room_id: RoomId,
        /// New flag value
        on: bool,
    },
}

impl OutboundSignal {
    /// Wire event name
    pub fn event_name(&self) -> &'static str {
        match self {
            OutboundSignal::JoinCall { .. } => "join-call",
            OutboundSignal::LeaveCall { .. } => "leave-call",
            OutboundSignal::Offer { .. } => "offer",
            OutboundSignal::Answer { .. } => "answer",
            OutboundSignal::IceCandidate { .. } => "ice-candidate",
            OutboundSignal::ScreenShare { .. } => "screen-share",
        }
    }

    /// Recipient of a directed message
    pub fn target(&self) -> Option<&ParticipantId> {
        match self {
            OutboundSignal::Offer {
                target_participant_id,
                ..
            }
            | OutboundSignal::Answer {
                target_participant_id,
                ..
            }
            | OutboundSignal::IceCandidate {
                target_participant_id,
                ..
            } => Some(target_participant_id),
            _ => None,
        }
    }

    /// Decode one wire message
    pub fn from_json(text: &str) -> Result<Self, SignalingError> {
        serde_json::from_str(text).map_err(|source| SignalingError::Decode {
            message: text.to_string(),
            source,
        })
    }

    /// Encode to the wire format
    pub fn to_json(&self) -> Result<String, SignalingError> {
        Ok(serde_json::to_string(self)?)
    }
}
