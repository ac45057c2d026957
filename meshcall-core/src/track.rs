//! Shared media track handle
//!
//! A [`MediaTrack`] is a cheap-to-clone handle onto one media source. Clones
//! share state: disabling a track through one handle disables it for every
//! sender and every stream holding it. Equality is identity, so two handles
//! compare equal only when they refer to the same underlying track.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Track kind enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    /// Audio track
    Audio,
    /// Video track
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

/// Where a track's media comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackSource {
    /// Local microphone capture
    Microphone,
    /// Synthetic placeholder video used when nothing is shared
    BlankVideo,
    /// Screen or window capture
    Screen,
    /// Track received from a remote participant
    Remote,
}

impl fmt::Display for TrackSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackSource::Microphone => write!(f, "microphone"),
            TrackSource::BlankVideo => write!(f, "blank_video"),
            TrackSource::Screen => write!(f, "screen"),
            TrackSource::Remote => write!(f, "remote"),
        }
    }
}

/// Track lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    /// Source is producing media
    Live,
    /// Source was stopped and its resources released
    Ended,
}

type EndedHandler = Box<dyn FnOnce() + Send>;

struct TrackInner {
    id: String,
    kind: TrackKind,
    source: TrackSource,
    label: String,
    enabled: AtomicBool,
    state: Mutex<TrackState>,
    ended_handlers: Mutex<Vec<EndedHandler>>,
}

/// Handle onto a single audio or video source
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    /// Create a new live track with a generated id
    pub fn new(kind: TrackKind, source: TrackSource, label: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), kind, source, label)
    }

    /// Create a new live track with a transport-assigned id
    pub fn with_id(
        id: impl Into<String>,
        kind: TrackKind,
        source: TrackSource,
        label: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                id: id.into(),
                kind,
                source,
                label: label.into(),
                enabled: AtomicBool::new(true),
                state: Mutex::new(TrackState::Live),
                ended_handlers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Get track ID
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Get track kind
    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    /// Get track source
    pub fn source(&self) -> TrackSource {
        self.inner.source
    }

    /// Human readable label (device name, "blank", ...)
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Whether media from this track is currently let through
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// Enable or disable the track without releasing it
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Get track state
    pub fn state(&self) -> TrackState {
        *self.inner.state.lock()
    }

    /// Check if the track has ended
    pub fn is_ended(&self) -> bool {
        self.state() == TrackState::Ended
    }

    /// Register a handler fired when the source ends on its own
    /// (for example the user stops sharing from the OS picker).
    ///
    /// Registering on an already ended track is a no-op.
    pub fn on_ended<F>(&self, handler: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_ended() {
            return;
        }
        self.inner.ended_handlers.lock().push(Box::new(handler));
    }

    /// Stop the track from the application side and release its source.
    ///
    /// Ended handlers are discarded, not fired: they exist to report stops
    /// the application did not ask for.
    pub fn stop(&self) {
        let was_live = {
            let mut state = self.inner.state.lock();
            std::mem::replace(&mut *state, TrackState::Ended) == TrackState::Live
        };
        if was_live {
            debug!("Stopping {} track {} ({})", self.kind(), self.id(), self.source());
        }
        self.inner.ended_handlers.lock().clear();
    }

    /// Mark the track as ended by its source and fire ended handlers once
    pub fn notify_ended(&self) {
        let was_live = {
            let mut state = self.inner.state.lock();
            std::mem::replace(&mut *state, TrackState::Ended) == TrackState::Live
        };
        if !was_live {
            return;
        }
        debug!("Track {} ended by its source", self.id());
        let handlers: Vec<EndedHandler> = std::mem::take(&mut *self.inner.ended_handlers.lock());
        for handler in handlers {
            handler();
        }
    }

    /// Identity comparison, same as `==`
    pub fn same_track(&self, other: &MediaTrack) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for MediaTrack {
    fn eq(&self, other: &Self) -> bool {
        self.same_track(other)
    }
}

impl Eq for MediaTrack {}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("source", &self.inner.source)
            .field("enabled", &self.is_enabled())
            .field("state", &self.state())
            .finish()
    }
}
