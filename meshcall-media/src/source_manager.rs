//! Local media sources and track-source switching
//!
//! [`MediaSourceManager`] owns the microphone track and decides which video
//! track is *current*: the synthetic placeholder, or an active screen
//! capture. Every peer connection's video sender must carry the current
//! track, so switching sources re-points all senders in one synchronous
//! pass instead of renegotiating.
//!
//! Lock order: the manager's state lock is taken before whatever lock the
//! [`VideoSenders`] implementation takes, never the other way round.

use crate::blank_video::BlankVideoSourceFactory;
use crate::device_capture::{CaptureCapability, DeviceCapture};
use crate::error::{MediaError, MediaResult};
use meshcall_core::{MediaTrack, SenderHandle};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Something that can list every video sender currently registered
pub trait VideoSenders {
    /// Snapshot of the video senders to re-point
    fn video_senders(&self) -> Vec<SenderHandle>;
}

impl VideoSenders for [SenderHandle] {
    fn video_senders(&self) -> Vec<SenderHandle> {
        self.to_vec()
    }
}

impl VideoSenders for Vec<SenderHandle> {
    fn video_senders(&self) -> Vec<SenderHandle> {
        self.clone()
    }
}

#[derive(Debug, Default)]
struct SourceState {
    microphone: Option<MediaTrack>,
    blank: Option<MediaTrack>,
    current_video: Option<MediaTrack>,
    screen: Option<MediaTrack>,
    share_pending: bool,
    // bumped by reset(); acquisitions started under an older generation are discarded
    generation: u64,
}

/// Owner of the local audio capture and the current video source
pub struct MediaSourceManager {
    capture: Arc<dyn DeviceCapture>,
    blank_factory: Arc<dyn BlankVideoSourceFactory>,
    state: Mutex<SourceState>,
}

impl std::fmt::Debug for MediaSourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSourceManager")
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl MediaSourceManager {
    /// Create a manager over the given capabilities
    pub fn new(
        capture: Arc<dyn DeviceCapture>,
        blank_factory: Arc<dyn BlankVideoSourceFactory>,
    ) -> Self {
        Self {
            capture,
            blank_factory,
            state: Mutex::new(SourceState::default()),
        }
    }

    fn blank_locked(&self, state: &mut SourceState) -> MediaResult<MediaTrack> {
        if let Some(blank) = &state.blank {
            return Ok(blank.clone());
        }
        let blank = self.blank_factory.create_blank_track()?;
        debug!("Created blank video track {}", blank.id());
        state.blank = Some(blank.clone());
        Ok(blank)
    }

    fn current_locked(&self, state: &mut SourceState) -> MediaResult<MediaTrack> {
        if let Some(current) = &state.current_video {
            return Ok(current.clone());
        }
        let blank = self.blank_locked(state)?;
        state.current_video = Some(blank.clone());
        Ok(blank)
    }

    /// The memoized placeholder track, built on first use
    pub fn get_blank_video_track(&self) -> MediaResult<MediaTrack> {
        let mut state = self.state.lock();
        self.blank_locked(&mut state)
    }

    /// Drop the memoized placeholder so the next request builds a new one
    pub fn invalidate_blank_video_track(&self) {
        let mut state = self.state.lock();
        if let Some(blank) = state.blank.take() {
            if state.current_video.as_ref() == Some(&blank) {
                state.current_video = None;
            }
            blank.stop();
        }
    }

    /// The current video track, initialised to the placeholder on first use
    pub fn ensure_current_video_track(&self) -> MediaResult<MediaTrack> {
        let mut state = self.state.lock();
        self.current_locked(&mut state)
    }

    /// Run `f` with the current video track while no source switch can happen.
    ///
    /// Used when attaching the track to a new connection so the connection
    /// cannot miss a switch that happens at the same time.
    pub fn with_current_video_track<R>(&self, f: impl FnOnce(&MediaTrack) -> R) -> MediaResult<R> {
        let mut state = self.state.lock();
        let current = self.current_locked(&mut state)?;
        Ok(f(&current))
    }

    /// The current video track, if initialised
    pub fn current_video_track(&self) -> Option<MediaTrack> {
        self.state.lock().current_video.clone()
    }

    /// Open the microphone, reusing the existing track if already open
    pub async fn acquire_microphone(&self) -> MediaResult<MediaTrack> {
        let generation = {
            let state = self.state.lock();
            if let Some(mic) = &state.microphone {
                return Ok(mic.clone());
            }
            state.generation
        };

        let track = self.capture.capture_microphone().await?;

        let mut state = self.state.lock();
        if state.generation != generation {
            track.stop();
            return Err(MediaError::Cancelled {
                capability: CaptureCapability::Microphone.to_string(),
            });
        }
        if let Some(existing) = &state.microphone {
            // a concurrent acquisition won; keep a single microphone track
            track.stop();
            return Ok(existing.clone());
        }
        info!("🎤 Microphone acquired: {}", track.id());
        state.microphone = Some(track.clone());
        Ok(track)
    }

    /// The open microphone track
    pub fn microphone(&self) -> Option<MediaTrack> {
        self.state.lock().microphone.clone()
    }

    /// Enable or disable the microphone track; returns whether one is open
    pub fn set_microphone_enabled(&self, enabled: bool) -> bool {
        match &self.state.lock().microphone {
            Some(mic) => {
                mic.set_enabled(enabled);
                true
            }
            None => false,
        }
    }

    /// Stop and forget the microphone track
    pub fn release_microphone(&self) {
        if let Some(mic) = self.state.lock().microphone.take() {
            mic.stop();
        }
    }

    /// Whether a screen capture is the current video source
    pub fn is_sharing(&self) -> bool {
        self.state.lock().screen.is_some()
    }

    /// The active screen capture track
    pub fn screen_track(&self) -> Option<MediaTrack> {
        self.state.lock().screen.clone()
    }

    /// Capture the screen and make it the current video source on every sender.
    ///
    /// Nothing changes unless acquisition fully succeeds. `on_ended` receives
    /// the track id if the capture is later stopped by the OS or browser
    /// rather than by [`stop_share`](Self::stop_share).
    pub async fn start_share<S, F>(&self, senders: &S, on_ended: F) -> MediaResult<MediaTrack>
    where
        S: VideoSenders + ?Sized,
        F: FnOnce(String) + Send + 'static,
    {
        let generation = {
            let mut state = self.state.lock();
            if let Some(screen) = &state.screen {
                return Ok(screen.clone());
            }
            if state.share_pending {
                return Err(MediaError::ShareInProgress);
            }
            state.share_pending = true;
            state.generation
        };

        let acquired = self.capture.capture_display().await;

        let mut state = self.state.lock();
        if state.generation != generation {
            if let Ok(track) = acquired {
                track.stop();
            }
            return Err(MediaError::Cancelled {
                capability: CaptureCapability::Display.to_string(),
            });
        }
        state.share_pending = false;
        let track = acquired?;
        if track.is_ended() {
            return Err(MediaError::TrackEnded {
                track_id: track.id().to_string(),
            });
        }

        let updated = Self::replace_all(senders, &track);
        state.current_video = Some(track.clone());
        state.screen = Some(track.clone());
        let track_id = track.id().to_string();
        track.on_ended(move || on_ended(track_id));
        info!(
            "🖥️ Screen share {} is now the video source on {} sender(s)",
            track.id(),
            updated
        );
        Ok(track)
    }

    /// Revert every sender to the placeholder and release the screen capture.
    ///
    /// Returns `false` without touching any sender when nothing is shared.
    pub fn stop_share<S>(&self, senders: &S) -> MediaResult<bool>
    where
        S: VideoSenders + ?Sized,
    {
        let mut state = self.state.lock();
        if state.screen.is_none() {
            return Ok(false);
        }
        let blank = self.blank_locked(&mut state)?;
        let updated = Self::replace_all(senders, &blank);
        state.current_video = Some(blank);
        if let Some(screen) = state.screen.take() {
            screen.stop();
            info!(
                "🖥️ Screen share {} stopped, placeholder restored on {} sender(s)",
                screen.id(),
                updated
            );
        }
        Ok(true)
    }

    /// Release every source and return to the uninitialised state
    pub fn reset(&self) {
        let mut state = self.state.lock();
        for track in [
            state.microphone.take(),
            state.screen.take(),
            state.blank.take(),
            state.current_video.take(),
        ]
        .into_iter()
        .flatten()
        {
            track.stop();
        }
        state.share_pending = false;
        state.generation += 1;
        debug!("Media sources reset (generation {})", state.generation);
    }

    fn replace_all<S>(senders: &S, track: &MediaTrack) -> usize
    where
        S: VideoSenders + ?Sized,
    {
        let mut updated = 0;
        for sender in senders.video_senders() {
            match sender.replace_track(Some(track.clone())) {
                Ok(()) => updated += 1,
                Err(e) => warn!(
                    "Failed to switch video sender for {}: {}",
                    sender.participant_id, e
                ),
            }
        }
        updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blank_video::SyntheticBlankVideo;
    use crate::device_capture::MockDeviceCapture;
    use meshcall_core::{
        MockPeerConnection, ParticipantId, PeerConnection, PeerEventSink, TrackKind, TrackSource,
        TransceiverDirection,
    };
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::mpsc;

    fn manager() -> (MediaSourceManager, Arc<MockDeviceCapture>) {
        let capture = Arc::new(MockDeviceCapture::new());
        let manager =
            MediaSourceManager::new(capture.clone(), Arc::new(SyntheticBlankVideo::default()));
        (manager, capture)
    }

    fn video_sender(name: &str, initial: &MediaTrack) -> SenderHandle {
        let (tx, _rx) = mpsc::unbounded_channel();
        let connection = Arc::new(MockPeerConnection::new(PeerEventSink::new(ParticipantId::from(name), 0, tx), false));
        let sender = connection
            .add_transceiver(TrackKind::Video, TransceiverDirection::SendRecv)
            .unwrap();
        connection.replace_track(sender, Some(initial.clone())).unwrap();
        SenderHandle {
            participant_id: ParticipantId::from(name),
            connection,
            sender,
        }
    }

    #[test]
    fn test_blank_track_is_memoized() {
        let (manager, _) = manager();
        let first = manager.get_blank_video_track().unwrap();
        let second = manager.get_blank_video_track().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.source(), TrackSource::BlankVideo);

        manager.invalidate_blank_video_track();
        let third = manager.get_blank_video_track().unwrap();
        assert_ne!(first, third);
        assert!(first.is_ended());
    }

    #[test]
    fn test_current_video_defaults_to_blank() {
        let (manager, _) = manager();
        assert!(manager.current_video_track().is_none());
        let current = manager.ensure_current_video_track().unwrap();
        assert_eq!(current, manager.get_blank_video_track().unwrap());
    }

    #[tokio::test]
    async fn test_start_and_stop_share_repoint_every_sender() {
        let (manager, _) = manager();
        let blank = manager.ensure_current_video_track().unwrap();
        let senders = vec![video_sender("a", &blank), video_sender("b", &blank)];

        let screen = manager.start_share(&senders, |_| {}).await.unwrap();
        assert!(manager.is_sharing());
        assert_eq!(manager.current_video_track(), Some(screen.clone()));
        for sender in &senders {
            assert_eq!(sender.track(), Some(screen.clone()));
        }

        assert!(manager.stop_share(&senders).unwrap());
        assert!(screen.is_ended());
        for sender in &senders {
            assert_eq!(sender.track(), Some(blank.clone()));
        }
        assert_eq!(manager.current_video_track(), Some(blank));
    }

    #[tokio::test]
    async fn test_denied_share_changes_nothing() {
        let (manager, capture) = manager();
        capture.set_deny(CaptureCapability::Display, true);
        let blank = manager.ensure_current_video_track().unwrap();
        let senders = vec![video_sender("a", &blank)];

        let result = manager.start_share(&senders, |_| {}).await;
        assert!(matches!(result, Err(MediaError::PermissionDenied { .. })));
        assert!(!manager.is_sharing());
        assert_eq!(senders[0].track(), Some(blank.clone()));
        assert_eq!(manager.current_video_track(), Some(blank));

        // the failed attempt must not leave a pending marker behind
        capture.set_deny(CaptureCapability::Display, false);
        tokio_test::assert_ok!(manager.start_share(&senders, |_| {}).await);
    }

    #[test]
    fn test_stop_share_without_share_is_noop() {
        let (manager, _) = manager();
        let blank = manager.ensure_current_video_track().unwrap();
        let senders = vec![video_sender("a", &blank)];
        let calls_before = senders[0].track();

        assert!(!manager.stop_share(&senders).unwrap());
        assert_eq!(senders[0].track(), calls_before);
    }

    #[tokio::test]
    async fn test_ended_handler_fires_on_os_stop() {
        let (manager, _) = manager();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let senders: Vec<SenderHandle> = Vec::new();

        let screen = manager
            .start_share(&senders, move |_| flag.store(true, Ordering::SeqCst))
            .await
            .unwrap();
        screen.notify_ended();
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_reset_cancels_inflight_share() {
        let (manager, _) = manager();
        let senders: Vec<SenderHandle> = Vec::new();

        let (result, ()) = tokio::join!(manager.start_share(&senders, |_| {}), async {
            manager.reset();
        });
        assert!(matches!(result, Err(MediaError::Cancelled { .. })));
        assert!(!manager.is_sharing());
        assert!(manager.current_video_track().is_none());
    }

    #[tokio::test]
    async fn test_microphone_lifecycle() {
        let (manager, capture) = manager();
        let mic = manager.acquire_microphone().await.unwrap();
        let again = manager.acquire_microphone().await.unwrap();
        assert_eq!(mic, again);
        assert_eq!(capture.requests(CaptureCapability::Microphone), 1);

        assert!(manager.set_microphone_enabled(false));
        assert!(!mic.is_enabled());

        manager.release_microphone();
        assert!(mic.is_ended());
        assert!(manager.microphone().is_none());
        assert!(!manager.set_microphone_enabled(true));
    }
}
