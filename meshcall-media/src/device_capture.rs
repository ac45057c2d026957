//! Device capture capability
//!
//! Microphone and display capture are owned by the platform (browser
//! `getUserMedia`/`getDisplayMedia`, a native capture API, ...). The
//! orchestrator only needs a track back, or an error if the user or the OS
//! refused.

use crate::error::{MediaError, MediaResult};
use async_trait::async_trait;
use meshcall_core::{MediaTrack, TrackKind, TrackSource};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::info;

/// Capture capabilities the orchestrator asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureCapability {
    /// Microphone audio
    Microphone,
    /// Screen/window capture
    Display,
}

impl fmt::Display for CaptureCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureCapability::Microphone => write!(f, "microphone"),
            CaptureCapability::Display => write!(f, "display"),
        }
    }
}

/// Platform capture backend
#[async_trait]
pub trait DeviceCapture: Send + Sync {
    /// Open the default microphone
    async fn capture_microphone(&self) -> MediaResult<MediaTrack>;

    /// Ask the user for a screen or window and capture it
    async fn capture_display(&self) -> MediaResult<MediaTrack>;
}

/// Scriptable capture backend for tests, demos and headless runs
#[derive(Debug, Default)]
pub struct MockDeviceCapture {
    deny_microphone: AtomicBool,
    deny_display: AtomicBool,
    microphone_requests: AtomicUsize,
    display_requests: AtomicUsize,
    display_tracks: Mutex<Vec<MediaTrack>>,
    microphone_tracks: Mutex<Vec<MediaTrack>>,
}

impl MockDeviceCapture {
    /// Backend that grants every request
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse or grant requests for `capability`
    pub fn set_deny(&self, capability: CaptureCapability, deny: bool) {
        match capability {
            CaptureCapability::Microphone => self.deny_microphone.store(deny, Ordering::SeqCst),
            CaptureCapability::Display => self.deny_display.store(deny, Ordering::SeqCst),
        }
    }

    /// Number of requests made for `capability`
    pub fn requests(&self, capability: CaptureCapability) -> usize {
        match capability {
            CaptureCapability::Microphone => self.microphone_requests.load(Ordering::SeqCst),
            CaptureCapability::Display => self.display_requests.load(Ordering::SeqCst),
        }
    }

    /// Most recent display track handed out
    pub fn last_display_track(&self) -> Option<MediaTrack> {
        self.display_tracks.lock().last().cloned()
    }

    /// Most recent microphone track handed out
    pub fn last_microphone_track(&self) -> Option<MediaTrack> {
        self.microphone_tracks.lock().last().cloned()
    }
}

#[async_trait]
impl DeviceCapture for MockDeviceCapture {
    async fn capture_microphone(&self) -> MediaResult<MediaTrack> {
        self.microphone_requests.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if self.deny_microphone.load(Ordering::SeqCst) {
            return Err(MediaError::PermissionDenied {
                operation: CaptureCapability::Microphone.to_string(),
            });
        }
        let track = MediaTrack::new(TrackKind::Audio, TrackSource::Microphone, "Mock Microphone");
        info!("🎤 Mock microphone opened: {}", track.id());
        self.microphone_tracks.lock().push(track.clone());
        Ok(track)
    }

    async fn capture_display(&self) -> MediaResult<MediaTrack> {
        self.display_requests.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if self.deny_display.load(Ordering::SeqCst) {
            return Err(MediaError::PermissionDenied {
                operation: CaptureCapability::Display.to_string(),
            });
        }
        let track = MediaTrack::new(TrackKind::Video, TrackSource::Screen, "Mock Screen");
        info!("🖥️ Mock display capture started: {}", track.id());
        self.display_tracks.lock().push(track.clone());
        Ok(track)
    }
}
