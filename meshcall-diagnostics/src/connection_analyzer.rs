//! Connection state analysis and diagnostics
//!
//! A [`CallReport`] is a point-in-time snapshot of a call: local flags, the
//! current video source, and one [`ConnectionInfo`] per peer link. Its main
//! use is checking that every link's video sender still carries the current
//! video track.

use chrono::{DateTime, Utc};
use meshcall_core::{MeshCallError, MeshCallResult, PeerConnectionState};
use serde::{Deserialize, Serialize};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Created, nothing attempted yet
    New,
    /// Connecting
    Connecting,
    /// Connected
    Connected,
    /// Disconnected
    Disconnected,
    /// Failed
    Failed,
    /// Closed
    Closed,
}

impl From<PeerConnectionState> for ConnectionState {
    fn from(state: PeerConnectionState) -> Self {
        match state {
            PeerConnectionState::New => ConnectionState::New,
            PeerConnectionState::Connecting => ConnectionState::Connecting,
            PeerConnectionState::Connected => ConnectionState::Connected,
            PeerConnectionState::Disconnected => ConnectionState::Disconnected,
            PeerConnectionState::Failed => ConnectionState::Failed,
            PeerConnectionState::Closed => ConnectionState::Closed,
        }
    }
}

/// Connection information for one peer link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    /// Remote participant
    pub participant_id: String,
    /// Transport state
    pub state: ConnectionState,
    /// Whether the first offer/answer exchange completed
    pub negotiated: bool,
    /// Whether a local offer is in flight
    pub making_offer: bool,
    /// Track id on the video sender
    pub video_sender_track_id: Option<String>,
    /// Whether the video sender carries the current video track
    pub video_matches_current: bool,
    /// Tracks received from the participant
    pub remote_track_count: usize,
}

/// Snapshot of a whole call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallReport {
    /// When the snapshot was taken
    pub generated_at: DateTime<Utc>,
    /// Room of the call
    pub room_id: String,
    /// Local participant id, if known
    pub local_participant_id: Option<String>,
    /// Whether the local user is in the call
    pub joined: bool,
    /// Whether the microphone is on
    pub mic_on: bool,
    /// Whether inbound audio is muted locally
    pub deafened: bool,
    /// Whether the local screen is shared
    pub sharing: bool,
    /// Id of the current video track
    pub current_video_track_id: Option<String>,
    /// One entry per peer link
    pub peers: Vec<ConnectionInfo>,
}

impl CallReport {
    /// Every video sender carries the current video track
    pub fn is_video_consistent(&self) -> bool {
        self.peers.iter().all(|p| p.video_matches_current)
    }

    /// Peers whose transport reports connected
    pub fn connected_peers(&self) -> usize {
        self.peers
            .iter()
            .filter(|p| p.state == ConnectionState::Connected)
            .count()
    }

    /// Human-readable list of inconsistencies, empty when the call looks healthy
    pub fn issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        for peer in &self.peers {
            if !peer.video_matches_current {
                issues.push(format!(
                    "video sender to {} carries {:?}, expected {:?}",
                    peer.participant_id, peer.video_sender_track_id, self.current_video_track_id
                ));
            }
            if peer.state == ConnectionState::Failed {
                issues.push(format!("link to {} failed", peer.participant_id));
            }
            if !self.joined {
                issues.push(format!("link to {} outlived the call", peer.participant_id));
            }
        }
        issues
    }

    /// Pretty JSON rendering
    pub fn to_json(&self) -> MeshCallResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| MeshCallError::InvalidMessage {
            message: "call report".to_string(),
            source: e.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(id: &str, matches: bool, state: ConnectionState) -> ConnectionInfo {
        ConnectionInfo {
            participant_id: id.to_string(),
            state,
            negotiated: true,
            making_offer: false,
            video_sender_track_id: Some("t".to_string()),
            video_matches_current: matches,
            remote_track_count: 2,
        }
    }

    fn report(peers: Vec<ConnectionInfo>) -> CallReport {
        CallReport {
            generated_at: Utc::now(),
            room_id: "room".to_string(),
            local_participant_id: None,
            joined: true,
            mic_on: true,
            deafened: false,
            sharing: false,
            current_video_track_id: Some("t".to_string()),
            peers,
        }
    }

    #[test]
    fn test_consistency_and_counts() {
        let good = report(vec![
            info("a", true, ConnectionState::Connected),
            info("b", true, ConnectionState::New),
        ]);
        assert!(good.is_video_consistent());
        assert_eq!(good.connected_peers(), 1);

        let bad = report(vec![info("a", false, ConnectionState::Connected)]);
        assert!(!bad.is_video_consistent());
    }

    #[test]
    fn test_issues_name_the_offending_peer() {
        assert!(report(vec![info("a", true, ConnectionState::Connected)])
            .issues()
            .is_empty());

        let issues = report(vec![
            info("a", false, ConnectionState::Connected),
            info("b", true, ConnectionState::Failed),
        ])
        .issues();
        assert_eq!(issues.len(), 2);
        assert!(issues[0].contains("to a"));
        assert!(issues[1].contains("b failed"));
    }

    #[test]
    fn test_json_shape() {
        let json = report(vec![info("a", true, ConnectionState::Connected)])
            .to_json()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["roomId"], "room");
        assert_eq!(value["peers"][0]["state"], "connected");
        assert_eq!(value["peers"][0]["videoMatchesCurrent"], true);
    }
}
