//! Voice channel orchestrator
//!
//! [`VoiceChannelOrchestrator`] owns the media sources, the peer registry,
//! the remote streams and the participant directory of one call. Commands
//! (`join`, `leave`, toggles, sharing) are called directly; everything the
//! room or the transports report is queued and handled by the input pump
//! ([`run`](VoiceChannelOrchestrator::run) or
//! [`process_pending`](VoiceChannelOrchestrator::process_pending)), one item
//! at a time.
//!
//! Lock order: media, then peers, then streams. Flags, participants,
//! signaling and event subscribers are leaf locks. No lock is held across
//! an await.

use crate::config::CallConfig;
use crate::event::{CallEvent, EventBus, EventStream};
use crate::negotiation::{NegotiationCoordinator, NegotiationHost};
use crate::participant::{InfoUpdate, ParticipantDirectory, ParticipantInfo};
use crate::peer::{LinkState, LiveVideoSenders, PeerRegistry};
use crate::stream::{RemoteEntry, RemoteStream, RemoteStreamAggregator};
use meshcall_core::{
    MediaTrack, MeshCallError, MeshCallResult, ParticipantId, PeerConnectionEvent,
    PeerConnectionFactory, PeerConnectionState, PeerEvent, PeerEventReceiver, RoomId, TrackKind,
};
use meshcall_media::{
    BlankVideoSourceFactory, DeviceCapture, MediaError, MediaSourceManager, SyntheticBlankVideo,
};
use meshcall_signaling::{
    InboundSignal, OutboundSignal, ParticipantSnapshot, SignalingClient, SubscriptionId,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[cfg(feature = "diagnostics")]
use meshcall_diagnostics::{CallReport, ConnectionInfo};

/// Where the local user is in the call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    /// Not in the call
    Idle,
    /// Waiting for the microphone
    Joining,
    /// In the call
    Joined,
}

#[derive(Debug, Clone, Copy)]
struct CallFlags {
    phase: CallPhase,
    mic_on: bool,
    deafened: bool,
    sharing: bool,
    // bumped by leave(); a join started under an older epoch is stale
    epoch: u64,
}

impl Default for CallFlags {
    fn default() -> Self {
        Self {
            phase: CallPhase::Idle,
            mic_on: true,
            deafened: false,
            sharing: false,
            epoch: 0,
        }
    }
}

#[derive(Debug)]
enum CallInput {
    Signal(InboundSignal),
    ShareEnded(String),
}

struct Inputs {
    signals: mpsc::UnboundedReceiver<CallInput>,
    peer_events: PeerEventReceiver,
}

struct SignalingBinding {
    client: Arc<dyn SignalingClient>,
    subscription: SubscriptionId,
}

struct CallInner {
    room_id: RoomId,
    config: CallConfig,
    media: MediaSourceManager,
    peers: Mutex<PeerRegistry>,
    streams: Mutex<RemoteStreamAggregator>,
    participants: Mutex<ParticipantDirectory>,
    flags: Mutex<CallFlags>,
    signaling: Mutex<Option<SignalingBinding>>,
    negotiation: NegotiationCoordinator,
    events: EventBus,
    input_tx: mpsc::UnboundedSender<CallInput>,
    inputs: tokio::sync::Mutex<Inputs>,
    shutdown: Notify,
}

/// Builder for [`VoiceChannelOrchestrator`]
pub struct CallBuilder {
    room_id: RoomId,
    config: CallConfig,
    peer_factory: Option<Arc<dyn PeerConnectionFactory>>,
    device_capture: Option<Arc<dyn DeviceCapture>>,
    blank_video: Option<Arc<dyn BlankVideoSourceFactory>>,
    signaling: Option<Arc<dyn SignalingClient>>,
}

impl CallBuilder {
    fn new(room_id: RoomId) -> Self {
        Self {
            room_id,
            config: CallConfig::default(),
            peer_factory: None,
            device_capture: None,
            blank_video: None,
            signaling: None,
        }
    }

    /// Use `config` instead of the defaults
    pub fn config(mut self, config: CallConfig) -> Self {
        self.config = config;
        self
    }

    /// Media transport used to create peer links (required)
    pub fn peer_factory(mut self, factory: Arc<dyn PeerConnectionFactory>) -> Self {
        self.peer_factory = Some(factory);
        self
    }

    /// Microphone and display capture backend (required)
    pub fn device_capture(mut self, capture: Arc<dyn DeviceCapture>) -> Self {
        self.device_capture = Some(capture);
        self
    }

    /// Placeholder video source; defaults to [`SyntheticBlankVideo`]
    pub fn blank_video_factory(mut self, factory: Arc<dyn BlankVideoSourceFactory>) -> Self {
        self.blank_video = Some(factory);
        self
    }

    /// Signaling client to bind right away
    pub fn signaling(mut self, client: Arc<dyn SignalingClient>) -> Self {
        self.signaling = Some(client);
        self
    }

    /// Build the orchestrator
    pub fn build(self) -> MeshCallResult<VoiceChannelOrchestrator> {
        self.config.validate()?;
        let peer_factory = self
            .peer_factory
            .ok_or_else(|| MeshCallError::MissingConfiguration {
                field: "peer_factory".to_string(),
            })?;
        let device_capture =
            self.device_capture
                .ok_or_else(|| MeshCallError::MissingConfiguration {
                    field: "device_capture".to_string(),
                })?;
        let blank_video: Arc<dyn BlankVideoSourceFactory> = match self.blank_video {
            Some(factory) => factory,
            None => Arc::new(SyntheticBlankVideo::new(self.config.blank_video)?),
        };

        let (input_tx, signals) = mpsc::unbounded_channel();
        let (peer_tx, peer_events) = mpsc::unbounded_channel();
        let inner = Arc::new(CallInner {
            room_id: self.room_id,
            media: MediaSourceManager::new(device_capture, blank_video),
            peers: Mutex::new(PeerRegistry::new(peer_factory, peer_tx)),
            streams: Mutex::new(RemoteStreamAggregator::new()),
            participants: Mutex::new(ParticipantDirectory::new()),
            flags: Mutex::new(CallFlags::default()),
            signaling: Mutex::new(None),
            negotiation: NegotiationCoordinator::new(self.config.glare_policy),
            events: EventBus::new(self.config.emit_events),
            input_tx,
            inputs: tokio::sync::Mutex::new(Inputs {
                signals,
                peer_events,
            }),
            shutdown: Notify::new(),
            config: self.config,
        });

        let orchestrator = VoiceChannelOrchestrator { inner };
        if let Some(client) = self.signaling {
            orchestrator.attach_signaling(client);
        }
        info!("Call orchestrator ready for room {}", orchestrator.room_id());
        Ok(orchestrator)
    }
}

/// Façade over one voice/video call in a full mesh
#[derive(Clone)]
pub struct VoiceChannelOrchestrator {
    inner: Arc<CallInner>,
}

impl fmt::Debug for VoiceChannelOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoiceChannelOrchestrator")
            .field("room_id", &self.inner.room_id)
            .field("flags", &*self.inner.flags.lock())
            .field("peers", &self.inner.peers.lock().ids())
            .finish()
    }
}

impl VoiceChannelOrchestrator {
    /// Start building an orchestrator for `room_id`
    pub fn builder(room_id: impl Into<RoomId>) -> CallBuilder {
        CallBuilder::new(room_id.into())
    }

    /// Bind to `client`, replacing any other client.
    ///
    /// Binding the same instance twice is a no-op and returns `false`.
    pub fn attach_signaling(&self, client: Arc<dyn SignalingClient>) -> bool {
        let mut slot = self.inner.signaling.lock();
        if let Some(binding) = slot.as_ref() {
            if same_client(&binding.client, &client) {
                debug!("Signaling client already bound");
                return false;
            }
            binding.client.unsubscribe(binding.subscription);
        }

        let tx = self.inner.input_tx.clone();
        let subscription = client.subscribe(Arc::new(move |signal: &InboundSignal| {
            // the orchestrator may be gone; nothing to deliver to then
            let _ = tx.send(CallInput::Signal(signal.clone()));
        }));
        debug!("Signaling client bound ({})", subscription);
        *slot = Some(SignalingBinding {
            client,
            subscription,
        });
        true
    }

    /// Unbind the current signaling client; returns whether one was bound
    pub fn detach_signaling(&self) -> bool {
        match self.inner.signaling.lock().take() {
            Some(binding) => {
                binding.client.unsubscribe(binding.subscription);
                true
            }
            None => false,
        }
    }

    /// Join the call.
    ///
    /// A no-op when already joined or when signaling is unavailable. Fails
    /// with [`MeshCallError::CapabilityUnavailable`] if the microphone cannot
    /// be opened; the state is then unchanged.
    pub async fn join(&self) -> MeshCallResult<()> {
        let inner = &self.inner;
        if !inner.signaling_ready() {
            debug!("join ignored: signaling unavailable");
            return Ok(());
        }
        let epoch = {
            let mut flags = inner.flags.lock();
            if flags.phase != CallPhase::Idle {
                debug!("join ignored: already {:?}", flags.phase);
                return Ok(());
            }
            flags.phase = CallPhase::Joining;
            flags.epoch
        };

        let microphone = match inner.media.acquire_microphone().await {
            Ok(track) => track,
            Err(MediaError::Cancelled { .. }) => {
                debug!("join cancelled by leave");
                return Ok(());
            }
            Err(e) => {
                inner.abort_join(epoch);
                warn!("Failed to join {}: {}", inner.room_id, e);
                return Err(e.into());
            }
        };
        if let Err(e) = inner.media.ensure_current_video_track() {
            inner.abort_join(epoch);
            return Err(e.into());
        }

        let mic_on = inner.flags.lock().mic_on;
        microphone.set_enabled(mic_on);
        inner.peers.lock().attach_microphone(Some(&microphone));

        let announced = inner.send_signal(OutboundSignal::JoinCall {
            room_id: inner.room_id.clone(),
            info: inner.config.profile.clone(),
        });
        if !announced {
            debug!("join abandoned: signaling dropped");
            inner.abort_join(epoch);
            return Ok(());
        }

        {
            let mut flags = inner.flags.lock();
            if flags.epoch != epoch {
                return Ok(());
            }
            flags.phase = CallPhase::Joined;
        }
        info!("📞 Joined room {}", inner.room_id);
        inner.events.publish(CallEvent::Joined {
            room_id: inner.room_id.clone(),
        });
        Ok(())
    }

    /// Leave the call, closing every peer link and releasing local media
    pub fn leave(&self) {
        let inner = &self.inner;
        let (phase, was_sharing) = {
            let mut flags = inner.flags.lock();
            let before = *flags;
            flags.phase = CallPhase::Idle;
            flags.sharing = false;
            flags.epoch += 1;
            (before.phase, before.sharing)
        };
        if phase == CallPhase::Idle {
            debug!("leave ignored: not in a call");
            return;
        }

        if phase == CallPhase::Joined {
            inner.send_signal(OutboundSignal::LeaveCall {
                room_id: inner.room_id.clone(),
            });
        }
        let closed = inner.peers.lock().close_all();
        inner.streams.lock().clear();
        inner.participants.lock().clear();
        inner.media.reset();

        info!("📴 Left room {} ({} peer link(s) closed)", inner.room_id, closed);
        if was_sharing {
            inner
                .events
                .publish(CallEvent::LocalSharingChanged { sharing: false });
        }
        if phase == CallPhase::Joined {
            inner.events.publish(CallEvent::Left {
                room_id: inner.room_id.clone(),
            });
        }
    }

    /// Flip the microphone on or off; returns the new state
    pub fn toggle_mic(&self) -> bool {
        let on = {
            let mut flags = self.inner.flags.lock();
            flags.mic_on = !flags.mic_on;
            flags.mic_on
        };
        self.inner.media.set_microphone_enabled(on);
        debug!("Microphone {}", if on { "on" } else { "off" });
        self.inner.events.publish(CallEvent::MicChanged { on });
        on
    }

    /// Flip local playback of every remote audio track; returns the new state
    pub fn toggle_deafen(&self) -> bool {
        let deafened = {
            let mut flags = self.inner.flags.lock();
            flags.deafened = !flags.deafened;
            flags.deafened
        };
        let touched = self.inner.streams.lock().set_audio_enabled(!deafened);
        debug!("Deafened: {} ({} remote audio track(s))", deafened, touched);
        self.inner.events.publish(CallEvent::DeafenChanged { deafened });
        deafened
    }

    /// Share the screen on every peer link without renegotiating
    pub async fn start_share(&self) -> MeshCallResult<()> {
        let inner = &self.inner;
        if !self.is_joined() {
            return Err(MeshCallError::InvalidState {
                expected: "joined".to_string(),
                actual: format!("{:?}", self.phase()).to_lowercase(),
            });
        }
        if inner.media.is_sharing() {
            debug!("start_share ignored: already sharing");
            return Ok(());
        }

        let tx = inner.input_tx.clone();
        let shared = inner
            .media
            .start_share(&LiveVideoSenders(&inner.peers), move |track_id| {
                let _ = tx.send(CallInput::ShareEnded(track_id));
            })
            .await;
        match shared {
            Ok(_) => {}
            Err(MediaError::Cancelled { .. }) => {
                debug!("start_share cancelled by leave");
                return Ok(());
            }
            Err(e) => {
                warn!("Screen share failed: {}", e);
                return Err(e.into());
            }
        }

        inner.flags.lock().sharing = true;
        inner.send_signal(OutboundSignal::ScreenShare {
            room_id: inner.room_id.clone(),
            on: true,
        });
        inner
            .events
            .publish(CallEvent::LocalSharingChanged { sharing: true });
        Ok(())
    }

    /// Return every peer link to the placeholder video; no-op when not sharing
    pub fn stop_share(&self) -> MeshCallResult<()> {
        self.inner.stop_share()
    }

    /// Offer to `participant_id` now, unless an offer is already in flight
    pub async fn renegotiate(&self, participant_id: &ParticipantId) -> MeshCallResult<bool> {
        self.inner
            .negotiation
            .safe_make_offer(self.inner.as_ref(), participant_id)
            .await
    }

    /// Handle queued room messages and transport callbacks until [`shutdown`](Self::shutdown)
    pub async fn run(&self) {
        let mut inputs = self.inner.inputs.lock().await;
        let Inputs {
            signals,
            peer_events,
        } = &mut *inputs;
        loop {
            tokio::select! {
                _ = self.inner.shutdown.notified() => {
                    debug!("Input pump stopped");
                    break;
                }
                Some(input) = signals.recv() => self.inner.handle_input(input).await,
                Some(event) = peer_events.recv() => self.inner.handle_peer_event(event).await,
                else => break,
            }
        }
    }

    /// Run the input pump on a new task
    pub fn spawn(&self) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.run().await })
    }

    /// Stop [`run`](Self::run); a stop requested before `run` starts is remembered
    pub fn shutdown(&self) {
        self.inner.shutdown.notify_one();
    }

    /// Handle everything queued right now; returns how many items were handled.
    ///
    /// Waits for [`run`](Self::run) to stop if it is active.
    pub async fn process_pending(&self) -> usize {
        let mut inputs = self.inner.inputs.lock().await;
        let mut handled = 0;
        loop {
            let mut progressed = false;
            if let Ok(input) = inputs.signals.try_recv() {
                self.inner.handle_input(input).await;
                handled += 1;
                progressed = true;
            }
            if let Ok(event) = inputs.peer_events.try_recv() {
                self.inner.handle_peer_event(event).await;
                handled += 1;
                progressed = true;
            }
            if !progressed {
                break;
            }
        }
        handled
    }

    /// Room this call belongs to
    pub fn room_id(&self) -> &RoomId {
        &self.inner.room_id
    }

    /// Active configuration
    pub fn config(&self) -> &CallConfig {
        &self.inner.config
    }

    /// This client's participant id, if the relay assigned one
    pub fn local_participant_id(&self) -> Option<ParticipantId> {
        self.inner.local_participant_id()
    }

    /// Current phase
    pub fn phase(&self) -> CallPhase {
        self.inner.flags.lock().phase
    }

    /// Whether the local user is in the call
    pub fn is_joined(&self) -> bool {
        self.phase() == CallPhase::Joined
    }

    /// Whether the microphone is on
    pub fn mic_on(&self) -> bool {
        self.inner.flags.lock().mic_on
    }

    /// Whether remote audio is muted locally
    pub fn deafened(&self) -> bool {
        self.inner.flags.lock().deafened
    }

    /// Whether the screen is shared
    pub fn sharing(&self) -> bool {
        self.inner.flags.lock().sharing
    }

    /// Remote streams in arrival order
    pub fn remotes(&self) -> Vec<RemoteEntry> {
        self.inner.streams.lock().remotes()
    }

    /// Stream of one remote participant
    pub fn remote_stream(&self, participant_id: &ParticipantId) -> Option<Arc<RemoteStream>> {
        self.inner.streams.lock().stream(participant_id)
    }

    /// Metadata of every known remote participant
    pub fn remote_info(&self) -> BTreeMap<ParticipantId, ParticipantInfo> {
        self.inner.participants.lock().snapshot()
    }

    /// Participants with a peer link
    pub fn peer_ids(&self) -> Vec<ParticipantId> {
        self.inner.peers.lock().ids()
    }

    /// Lifecycle state of one peer link
    pub fn peer_state(&self, participant_id: &ParticipantId) -> Option<LinkState> {
        self.inner.peers.lock().get(participant_id).map(|l| l.state())
    }

    /// Track on the video sender of one peer link
    pub fn video_sender_track(&self, participant_id: &ParticipantId) -> Option<MediaTrack> {
        let sender = self
            .inner
            .peers
            .lock()
            .get(participant_id)
            .map(|l| l.video_sender())?;
        sender.track()
    }

    /// Track on the audio sender of one peer link
    pub fn audio_sender_track(&self, participant_id: &ParticipantId) -> Option<MediaTrack> {
        let sender = self
            .inner
            .peers
            .lock()
            .get(participant_id)
            .map(|l| l.audio_sender())?;
        sender.track()
    }

    /// Video track every sender should carry
    pub fn current_video_track(&self) -> Option<MediaTrack> {
        self.inner.media.current_video_track()
    }

    /// Open microphone track
    pub fn microphone_track(&self) -> Option<MediaTrack> {
        self.inner.media.microphone()
    }

    /// Subscribe to call events
    pub fn subscribe(&self) -> EventStream {
        self.inner.events.subscribe()
    }

    /// Snapshot of the call for diagnostics
    #[cfg(feature = "diagnostics")]
    pub fn report(&self) -> CallReport {
        let inner = &self.inner;
        let current = inner.media.current_video_track();
        let flags = *inner.flags.lock();
        let peers = {
            let peers = inner.peers.lock();
            let streams = inner.streams.lock();
            peers
                .links()
                .map(|link| {
                    let video = link.video_sender().track();
                    ConnectionInfo {
                        participant_id: link.participant_id().to_string(),
                        state: link.connection_state().into(),
                        negotiated: link.is_negotiated(),
                        making_offer: link.is_making_offer(),
                        video_sender_track_id: video.as_ref().map(|t| t.id().to_string()),
                        video_matches_current: video.is_some() && video == current,
                        remote_track_count: streams
                            .stream(link.participant_id())
                            .map_or(0, |s| s.len()),
                    }
                })
                .collect()
        };
        CallReport {
            generated_at: chrono::Utc::now(),
            room_id: inner.room_id.to_string(),
            local_participant_id: inner.local_participant_id().map(|id| id.to_string()),
            joined: flags.phase == CallPhase::Joined,
            mic_on: flags.mic_on,
            deafened: flags.deafened,
            sharing: flags.sharing,
            current_video_track_id: current.map(|t| t.id().to_string()),
            peers,
        }
    }
}

fn same_client(a: &Arc<dyn SignalingClient>, b: &Arc<dyn SignalingClient>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

impl CallInner {
    fn client(&self) -> Option<Arc<dyn SignalingClient>> {
        self.signaling.lock().as_ref().map(|b| b.client.clone())
    }

    fn signaling_ready(&self) -> bool {
        self.client().is_some_and(|c| c.is_connected())
    }

    fn is_joined(&self) -> bool {
        self.flags.lock().phase == CallPhase::Joined
    }

    fn is_local(&self, participant_id: &ParticipantId) -> bool {
        self.local_participant_id().as_ref() == Some(participant_id)
    }

    fn abort_join(&self, epoch: u64) {
        {
            let mut flags = self.flags.lock();
            if flags.epoch != epoch {
                return;
            }
            flags.phase = CallPhase::Idle;
        }
        self.media.reset();
    }

    fn stop_share(&self) -> MeshCallResult<()> {
        let stopped = self.media.stop_share(&LiveVideoSenders(&self.peers))?;
        if !stopped {
            debug!("stop_share ignored: not sharing");
            return Ok(());
        }
        self.flags.lock().sharing = false;
        if self.is_joined() {
            self.send_signal(OutboundSignal::ScreenShare {
                room_id: self.room_id.clone(),
                on: false,
            });
        }
        self.events
            .publish(CallEvent::LocalSharingChanged { sharing: false });
        Ok(())
    }

    async fn handle_input(&self, input: CallInput) {
        match input {
            CallInput::Signal(signal) => self.handle_signal(signal).await,
            CallInput::ShareEnded(track_id) => {
                let current = self.media.screen_track();
                if current.as_ref().map(|t| t.id()) != Some(track_id.as_str()) {
                    debug!("Ended share {} is no longer current", track_id);
                    return;
                }
                info!("🖥️ Screen share {} ended by its source", track_id);
                if let Err(e) = self.stop_share() {
                    warn!("Failed to restore placeholder video: {}", e);
                }
            }
        }
    }

    async fn handle_signal(&self, signal: InboundSignal) {
        if let InboundSignal::Welcome { participant_id } = &signal {
            debug!("Relay welcome as {}", participant_id);
            return;
        }
        if !self.is_joined() {
            debug!("{} ignored while not joined", signal.event_name());
            return;
        }

        match signal {
            InboundSignal::ExistingParticipants(snapshots) => {
                debug!("{} existing participant(s)", snapshots.len());
                for snapshot in snapshots {
                    if self.is_local(&snapshot.participant_id) {
                        continue;
                    }
                    self.upsert_participant(&snapshot);
                    match self.ensure_peer(&snapshot.participant_id) {
                        Ok(true) => self.make_offer(&snapshot.participant_id).await,
                        Ok(false) => {}
                        Err(e) => self.negotiation_failed(&snapshot.participant_id, &e),
                    }
                }
            }
            InboundSignal::UserJoined(snapshot) => {
                if self.is_local(&snapshot.participant_id) {
                    return;
                }
                self.upsert_participant(&snapshot);
                if let Err(e) = self.ensure_peer(&snapshot.participant_id) {
                    self.negotiation_failed(&snapshot.participant_id, &e);
                }
            }
            InboundSignal::UserLeft { participant_id } => {
                self.remove_participant(&participant_id);
            }
            InboundSignal::Offer {
                from_participant_id,
                sdp,
            } => {
                let result = self
                    .negotiation
                    .handle_offer(self, &from_participant_id, sdp)
                    .await;
                if let Err(e) = result {
                    self.negotiation_failed(&from_participant_id, &e);
                }
            }
            InboundSignal::Answer {
                from_participant_id,
                sdp,
            } => {
                let result = self
                    .negotiation
                    .handle_answer(self, &from_participant_id, sdp)
                    .await;
                if let Err(e) = result {
                    self.negotiation_failed(&from_participant_id, &e);
                }
            }
            InboundSignal::IceCandidate {
                from_participant_id,
                candidate,
            } => {
                self.negotiation
                    .handle_ice(self, &from_participant_id, candidate)
                    .await;
            }
            InboundSignal::ScreenShare { participant_id, on } => {
                self.remote_sharing_changed(&participant_id, on);
            }
            InboundSignal::Welcome { .. } => {}
        }
    }

    async fn handle_peer_event(&self, event: PeerEvent) {
        let PeerEvent {
            participant_id,
            link_id,
            event,
        } = event;
        if !self.peers.lock().is_current(&participant_id, link_id) {
            debug!(
                "Dropping {:?} from closed link {} (generation {})",
                event, participant_id, link_id
            );
            return;
        }
        match event {
            PeerConnectionEvent::NegotiationNeeded => {
                let result = self
                    .negotiation
                    .handle_negotiation_needed(self, &participant_id)
                    .await;
                if let Err(e) = result {
                    self.negotiation_failed(&participant_id, &e);
                }
            }
            PeerConnectionEvent::IceCandidate(candidate) => {
                self.send_signal(OutboundSignal::IceCandidate {
                    target_participant_id: participant_id,
                    candidate,
                });
            }
            PeerConnectionEvent::Track(track) => {
                self.add_remote_track(&participant_id, track);
            }
            PeerConnectionEvent::ConnectionStateChanged(state) => {
                let changed = self
                    .peers
                    .lock()
                    .set_connection_state(&participant_id, state);
                if !changed {
                    return;
                }
                match state {
                    PeerConnectionState::Failed => {
                        warn!("Peer link {} failed", participant_id)
                    }
                    _ => debug!("Peer link {} is {:?}", participant_id, state),
                }
                self.events.publish(CallEvent::PeerStateChanged {
                    participant_id,
                    state,
                });
            }
        }
    }

    async fn make_offer(&self, participant_id: &ParticipantId) {
        if let Err(e) = self.negotiation.safe_make_offer(self, participant_id).await {
            self.negotiation_failed(participant_id, &e);
        }
    }

    fn negotiation_failed(&self, participant_id: &ParticipantId, error: &MeshCallError) {
        warn!("Negotiation with {} failed: {}", participant_id, error);
        self.events.publish(CallEvent::NegotiationFailed {
            participant_id: participant_id.clone(),
            error: error.to_string(),
        });
    }

    fn upsert_participant(&self, snapshot: &ParticipantSnapshot) {
        let (update, info) = {
            let mut participants = self.participants.lock();
            let update = participants.upsert(snapshot);
            let info = participants
                .get(&snapshot.participant_id)
                .cloned()
                .unwrap_or_default();
            (update, info)
        };
        let participant_id = snapshot.participant_id.clone();
        match update {
            InfoUpdate::Inserted => self.events.publish(CallEvent::ParticipantJoined {
                participant_id,
                info,
            }),
            InfoUpdate::Changed => self.events.publish(CallEvent::ParticipantInfoChanged {
                participant_id,
                info,
            }),
            InfoUpdate::Unchanged => {}
        }
    }

    fn remove_participant(&self, participant_id: &ParticipantId) {
        let closed = self.peers.lock().close_peer(participant_id);
        let stream = self.streams.lock().remove(participant_id);
        let info = self.participants.lock().remove(participant_id);
        if closed || stream.is_some() || info.is_some() {
            info!("👋 Participant {} left", participant_id);
            self.events.publish(CallEvent::ParticipantLeft {
                participant_id: participant_id.clone(),
            });
        }
    }

    fn remote_sharing_changed(&self, participant_id: &ParticipantId, on: bool) {
        let known = self.peers.lock().contains(participant_id);
        let (changed, info) = {
            let mut participants = self.participants.lock();
            if !known && !participants.contains(participant_id) {
                debug!("screen-share from unknown participant {} dropped", participant_id);
                return;
            }
            let changed = participants.set_sharing(participant_id, on);
            (changed, participants.get(participant_id).cloned())
        };
        if let (true, Some(info)) = (changed, info) {
            self.events.publish(CallEvent::ParticipantInfoChanged {
                participant_id: participant_id.clone(),
                info,
            });
        }
        if on {
            self.sync_receivers(participant_id);
        }
    }

    fn add_remote_track(&self, participant_id: &ParticipantId, track: MediaTrack) {
        if !self.peers.lock().contains(participant_id) {
            debug!("Track {} for unknown peer {} dropped", track.id(), participant_id);
            return;
        }
        let kind = track.kind();
        if kind == TrackKind::Audio
            && self.config.mute_new_audio_while_deafened
            && self.flags.lock().deafened
        {
            track.set_enabled(false);
        }
        let (stream, update) = self
            .streams
            .lock()
            .add_track_to_remote(participant_id, track);
        if update.is_change() {
            self.events.publish(CallEvent::RemoteStreamUpdated {
                participant_id: participant_id.clone(),
                stream,
                kind,
            });
        }
    }
}

impl NegotiationHost for CallInner {
    fn peers(&self) -> &Mutex<PeerRegistry> {
        &self.peers
    }

    fn send_signal(&self, signal: OutboundSignal) -> bool {
        let Some(client) = self.client() else {
            debug!("{} not sent: no signaling client", signal.event_name());
            return false;
        };
        if !client.is_connected() {
            debug!("{} not sent: signaling disconnected", signal.event_name());
            return false;
        }
        let event = signal.event_name();
        match client.send(signal) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to send {}: {}", event, e);
                false
            }
        }
    }

    fn local_participant_id(&self) -> Option<ParticipantId> {
        self.client().and_then(|c| c.local_participant_id())
    }

    fn sync_receivers(&self, participant_id: &ParticipantId) {
        let Some((connection, _)) = self.peers.lock().connection(participant_id) else {
            return;
        };
        for track in connection.receiver_tracks() {
            self.add_remote_track(participant_id, track);
        }
    }

    fn ensure_peer(&self, participant_id: &ParticipantId) -> MeshCallResult<bool> {
        if self.is_local(participant_id) {
            return Err(MeshCallError::InvalidState {
                expected: "remote participant".to_string(),
                actual: format!("local participant {}", participant_id),
            });
        }
        let microphone = self.media.microphone();
        // media lock stays held so a concurrent share cannot miss the new link
        self.media.with_current_video_track(|video| {
            self.peers
                .lock()
                .create_peer(participant_id, microphone.as_ref(), video)
        })?
    }
}

impl Drop for CallInner {
    fn drop(&mut self) {
        if let Some(binding) = self.signaling.get_mut().take() {
            binding.client.unsubscribe(binding.subscription);
        }
        self.peers.get_mut().close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshcall_core::MockPeerFactory;
    use meshcall_media::MockDeviceCapture;
    use meshcall_signaling::LoopbackSignaling;

    fn orchestrator(signaling: Option<Arc<LoopbackSignaling>>) -> VoiceChannelOrchestrator {
        let mut builder = VoiceChannelOrchestrator::builder("room")
            .peer_factory(Arc::new(MockPeerFactory::new()))
            .device_capture(Arc::new(MockDeviceCapture::new()));
        if let Some(client) = signaling {
            builder = builder.signaling(client);
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_builder_requires_capabilities() {
        let missing = VoiceChannelOrchestrator::builder("room")
            .device_capture(Arc::new(MockDeviceCapture::new()))
            .build();
        assert!(matches!(
            missing,
            Err(MeshCallError::MissingConfiguration { ref field }) if field == "peer_factory"
        ));
    }

    #[test]
    fn test_attach_is_exactly_once_per_client() {
        let first = Arc::new(LoopbackSignaling::new("me"));
        let call = orchestrator(None);

        assert!(call.attach_signaling(first.clone()));
        assert!(!call.attach_signaling(first.clone()));
        assert_eq!(first.subscriber_count(), 1);

        let second = Arc::new(LoopbackSignaling::new("me"));
        assert!(call.attach_signaling(second.clone()));
        assert_eq!(first.subscriber_count(), 0);
        assert_eq!(second.subscriber_count(), 1);

        assert!(call.detach_signaling());
        assert!(!call.detach_signaling());
        assert_eq!(second.subscriber_count(), 0);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let client = Arc::new(LoopbackSignaling::new("me"));
        let call = orchestrator(Some(client.clone()));
        assert_eq!(client.subscriber_count(), 1);
        drop(call);
        assert_eq!(client.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_join_without_signaling_is_noop() {
        let call = orchestrator(None);
        call.join().await.unwrap();
        assert_eq!(call.phase(), CallPhase::Idle);
        assert!(call.microphone_track().is_none());
    }

    #[tokio::test]
    async fn test_toggles_before_join() {
        let call = orchestrator(Some(Arc::new(LoopbackSignaling::new("me"))));
        assert!(!call.toggle_mic());
        call.join().await.unwrap();
        // the preference carries into the call
        assert!(!call.microphone_track().unwrap().is_enabled());
        assert!(call.toggle_deafen());
        assert!(call.deafened());
    }

    #[tokio::test]
    async fn test_share_requires_join() {
        let call = orchestrator(Some(Arc::new(LoopbackSignaling::new("me"))));
        assert!(matches!(
            call.start_share().await,
            Err(MeshCallError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_shutdown_before_run_is_remembered() {
        let call = orchestrator(None);
        call.shutdown();
        tokio_test::assert_ok!(
            tokio::time::timeout(std::time::Duration::from_secs(1), call.run()).await
        );
    }
}
