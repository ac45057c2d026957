//! Remote stream aggregation
//!
//! Each remote participant is presented as one [`RemoteStream`] holding at
//! most one audio and one video track. The stream object is created with the
//! first track and then only its contents change, so a UI binding taken
//! early stays valid across blank/screen-share switches on the far side.

use meshcall_core::{MediaTrack, ParticipantId, TrackKind};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// What [`RemoteStream::upsert_track`] did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackUpdate {
    /// The stream had no track of that kind
    Added,
    /// A different track of the same kind was swapped out
    Replaced {
        /// Track that was removed
        previous: MediaTrack,
    },
    /// The track was already present
    Unchanged,
}

impl TrackUpdate {
    /// Whether the stream contents changed
    pub fn is_change(&self) -> bool {
        !matches!(self, TrackUpdate::Unchanged)
    }
}

/// Stable container of one participant's inbound tracks
pub struct RemoteStream {
    participant_id: ParticipantId,
    tracks: Mutex<Vec<MediaTrack>>,
}

impl fmt::Debug for RemoteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<String> = self
            .tracks
            .lock()
            .iter()
            .map(|t| format!("{}:{}", t.kind(), t.id()))
            .collect();
        f.debug_struct("RemoteStream")
            .field("participant_id", &self.participant_id)
            .field("tracks", &ids)
            .finish()
    }
}

impl RemoteStream {
    fn new(participant_id: ParticipantId) -> Self {
        Self {
            participant_id,
            tracks: Mutex::new(Vec::with_capacity(2)),
        }
    }

    /// Owner of the stream
    pub fn participant_id(&self) -> &ParticipantId {
        &self.participant_id
    }

    /// Current tracks, at most one per kind
    pub fn tracks(&self) -> Vec<MediaTrack> {
        self.tracks.lock().clone()
    }

    /// Current track of `kind`
    pub fn track_of_kind(&self, kind: TrackKind) -> Option<MediaTrack> {
        self.tracks.lock().iter().find(|t| t.kind() == kind).cloned()
    }

    /// Current audio track
    pub fn audio_track(&self) -> Option<MediaTrack> {
        self.track_of_kind(TrackKind::Audio)
    }

    /// Current video track
    pub fn video_track(&self) -> Option<MediaTrack> {
        self.track_of_kind(TrackKind::Video)
    }

    /// Number of tracks
    pub fn len(&self) -> usize {
        self.tracks.lock().len()
    }

    /// Whether the stream has no track
    pub fn is_empty(&self) -> bool {
        self.tracks.lock().is_empty()
    }

    /// Insert `track`, replacing a different track of the same kind in place
    pub fn upsert_track(&self, track: MediaTrack) -> TrackUpdate {
        let mut tracks = self.tracks.lock();
        if tracks.iter().any(|t| t == &track) {
            return TrackUpdate::Unchanged;
        }
        match tracks.iter_mut().find(|t| t.kind() == track.kind()) {
            Some(slot) => {
                let previous = std::mem::replace(slot, track);
                TrackUpdate::Replaced { previous }
            }
            None => {
                tracks.push(track);
                TrackUpdate::Added
            }
        }
    }

    /// Enable or disable every audio track; returns how many were touched
    pub fn set_audio_enabled(&self, enabled: bool) -> usize {
        let tracks = self.tracks.lock();
        let mut touched = 0;
        for track in tracks.iter().filter(|t| t.kind() == TrackKind::Audio) {
            track.set_enabled(enabled);
            touched += 1;
        }
        touched
    }
}

/// One row of the `remotes` read model
#[derive(Debug, Clone)]
pub struct RemoteEntry {
    /// Remote participant
    pub participant_id: ParticipantId,
    /// Its stable stream
    pub stream: Arc<RemoteStream>,
}

/// Per-participant inbound streams, in arrival order
#[derive(Debug, Default)]
pub struct RemoteStreamAggregator {
    entries: Vec<RemoteEntry>,
}

impl RemoteStreamAggregator {
    /// Empty aggregator
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an inbound track for `participant_id`, creating its stream on first use
    pub fn add_track_to_remote(
        &mut self,
        participant_id: &ParticipantId,
        track: MediaTrack,
    ) -> (Arc<RemoteStream>, TrackUpdate) {
        let stream = match self
            .entries
            .iter()
            .find(|e| &e.participant_id == participant_id)
        {
            Some(entry) => entry.stream.clone(),
            None => {
                let stream = Arc::new(RemoteStream::new(participant_id.clone()));
                self.entries.push(RemoteEntry {
                    participant_id: participant_id.clone(),
                    stream: stream.clone(),
                });
                stream
            }
        };
        let kind = track.kind();
        let update = stream.upsert_track(track);
        if update.is_change() {
            debug!("Remote {} stream {} ({})", participant_id, update_label(&update), kind);
        }
        (stream, update)
    }

    /// Stream of one participant
    pub fn stream(&self, participant_id: &ParticipantId) -> Option<Arc<RemoteStream>> {
        self.entries
            .iter()
            .find(|e| &e.participant_id == participant_id)
            .map(|e| e.stream.clone())
    }

    /// Drop a participant's stream
    pub fn remove(&mut self, participant_id: &ParticipantId) -> Option<Arc<RemoteStream>> {
        let index = self
            .entries
            .iter()
            .position(|e| &e.participant_id == participant_id)?;
        Some(self.entries.remove(index).stream)
    }

    /// `remotes` read model
    pub fn remotes(&self) -> Vec<RemoteEntry> {
        self.entries.clone()
    }

    /// Enable or disable inbound audio across every stream
    pub fn set_audio_enabled(&self, enabled: bool) -> usize {
        self.entries
            .iter()
            .map(|e| e.stream.set_audio_enabled(enabled))
            .sum()
    }

    /// Number of streams
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there is no stream
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every stream
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

fn update_label(update: &TrackUpdate) -> &'static str {
    match update {
        TrackUpdate::Added => "added",
        TrackUpdate::Replaced { .. } => "replaced",
        TrackUpdate::Unchanged => "unchanged",
    }
}
