//! Peer registry
//!
//! One [`PeerLink`] per known remote participant, each wrapping a
//! [`PeerConnection`] with an audio and a video send/receive transceiver.
//! The registry lives behind a mutex owned by the orchestrator; nothing in
//! here awaits, so the lock is never held across a suspension point.

use meshcall_core::{
    MediaTrack, MeshCallResult, ParticipantId, PeerConnection, PeerConnectionFactory,
    PeerConnectionState, PeerEventSender, PeerEventSink, SenderHandle, SenderId, TrackKind,
    TransceiverDirection,
};
use meshcall_media::VideoSenders;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Coarse lifecycle of a link: `absent → connecting → connected → closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Created, transport not up yet (or temporarily lost)
    Connecting,
    /// Media can flow
    Connected,
    /// Transport failed or closed
    Closed,
}

/// Connection to one remote participant
#[derive(Debug)]
pub struct PeerLink {
    participant_id: ParticipantId,
    connection: Arc<dyn PeerConnection>,
    audio_sender: SenderId,
    video_sender: SenderId,
    generation: u64,
    making_offer: bool,
    negotiated: bool,
    connection_state: PeerConnectionState,
}

impl PeerLink {
    /// Remote participant
    pub fn participant_id(&self) -> &ParticipantId {
        &self.participant_id
    }

    /// Underlying transport
    pub fn connection(&self) -> &Arc<dyn PeerConnection> {
        &self.connection
    }

    /// Sender carrying the microphone
    pub fn audio_sender(&self) -> SenderHandle {
        self.sender(self.audio_sender)
    }

    /// Sender carrying the current video track
    pub fn video_sender(&self) -> SenderHandle {
        self.sender(self.video_sender)
    }

    fn sender(&self, sender: SenderId) -> SenderHandle {
        SenderHandle {
            participant_id: self.participant_id.clone(),
            connection: self.connection.clone(),
            sender,
        }
    }

    /// Registry-wide creation counter; a re-created link gets a new one
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether a local offer is being produced
    pub fn is_making_offer(&self) -> bool {
        self.making_offer
    }

    /// Whether one offer/answer exchange completed
    pub fn is_negotiated(&self) -> bool {
        self.negotiated
    }

    /// Last transport state reported
    pub fn connection_state(&self) -> PeerConnectionState {
        self.connection_state
    }

    /// Coarse lifecycle state
    pub fn state(&self) -> LinkState {
        match self.connection_state {
            PeerConnectionState::Connected => LinkState::Connected,
            PeerConnectionState::Failed | PeerConnectionState::Closed => LinkState::Closed,
            PeerConnectionState::New
            | PeerConnectionState::Connecting
            | PeerConnectionState::Disconnected => LinkState::Connecting,
        }
    }
}

/// Participant id to [`PeerLink`]
pub struct PeerRegistry {
    links: BTreeMap<ParticipantId, PeerLink>,
    factory: Arc<dyn PeerConnectionFactory>,
    events: PeerEventSender,
    next_generation: u64,
}

impl fmt::Debug for PeerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerRegistry")
            .field("links", &self.links.keys().collect::<Vec<_>>())
            .field("next_generation", &self.next_generation)
            .finish()
    }
}

impl PeerRegistry {
    /// Registry creating connections with `factory`; transport callbacks go to `events`
    pub fn new(factory: Arc<dyn PeerConnectionFactory>, events: PeerEventSender) -> Self {
        Self {
            links: BTreeMap::new(),
            factory,
            events,
            next_generation: 1,
        }
    }

    /// Create the link to `participant_id` unless it exists.
    ///
    /// Returns `Ok(false)` for an already known participant. On failure the
    /// half-built connection is closed and nothing is registered.
    pub fn create_peer(
        &mut self,
        participant_id: &ParticipantId,
        microphone: Option<&MediaTrack>,
        video: &MediaTrack,
    ) -> MeshCallResult<bool> {
        if self.links.contains_key(participant_id) {
            return Ok(false);
        }

        let generation = self.next_generation;
        self.next_generation += 1;
        let sink = PeerEventSink::new(participant_id.clone(), generation, self.events.clone());
        let connection = self.factory.create(participant_id, sink)?;
        let senders = Self::add_senders(connection.as_ref(), microphone, video);
        let (audio_sender, video_sender) = match senders {
            Ok(senders) => senders,
            Err(e) => {
                warn!("Failed to set up peer link {}: {}", participant_id, e);
                connection.close();
                return Err(e);
            }
        };

        self.links.insert(
            participant_id.clone(),
            PeerLink {
                participant_id: participant_id.clone(),
                connection,
                audio_sender,
                video_sender,
                generation,
                making_offer: false,
                negotiated: false,
                connection_state: PeerConnectionState::New,
            },
        );
        info!(
            "🔗 Peer link {} created (generation {}, video {})",
            participant_id,
            generation,
            video.id()
        );
        Ok(true)
    }

    fn add_senders(
        connection: &dyn PeerConnection,
        microphone: Option<&MediaTrack>,
        video: &MediaTrack,
    ) -> MeshCallResult<(SenderId, SenderId)> {
        let audio = connection.add_transceiver(TrackKind::Audio, TransceiverDirection::SendRecv)?;
        let video_sender =
            connection.add_transceiver(TrackKind::Video, TransceiverDirection::SendRecv)?;
        connection.replace_track(audio, microphone.cloned())?;
        connection.replace_track(video_sender, Some(video.clone()))?;
        Ok((audio, video_sender))
    }

    /// Close and forget one link
    pub fn close_peer(&mut self, participant_id: &ParticipantId) -> bool {
        match self.links.remove(participant_id) {
            Some(link) => {
                link.connection.close();
                info!("Peer link {} closed", participant_id);
                true
            }
            None => false,
        }
    }

    /// Close and forget every link; returns how many were closed
    pub fn close_all(&mut self) -> usize {
        let links = std::mem::take(&mut self.links);
        for link in links.values() {
            link.connection.close();
        }
        if !links.is_empty() {
            info!("Closed {} peer link(s)", links.len());
        }
        links.len()
    }

    /// Link to one participant
    pub fn get(&self, participant_id: &ParticipantId) -> Option<&PeerLink> {
        self.links.get(participant_id)
    }

    /// Whether a link exists
    pub fn contains(&self, participant_id: &ParticipantId) -> bool {
        self.links.contains_key(participant_id)
    }

    /// Number of links
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Whether there is no link
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Known participants, sorted
    pub fn ids(&self) -> Vec<ParticipantId> {
        self.links.keys().cloned().collect()
    }

    /// Every link, sorted by participant id
    pub fn links(&self) -> impl Iterator<Item = &PeerLink> {
        self.links.values()
    }

    /// Connection and generation of one link
    pub fn connection(
        &self,
        participant_id: &ParticipantId,
    ) -> Option<(Arc<dyn PeerConnection>, u64)> {
        self.links
            .get(participant_id)
            .map(|link| (link.connection.clone(), link.generation))
    }

    /// Test-and-set the link's making-offer flag.
    ///
    /// `None` when the link is unknown or an offer is already in flight.
    pub fn try_begin_offer(
        &mut self,
        participant_id: &ParticipantId,
    ) -> Option<(Arc<dyn PeerConnection>, u64)> {
        let link = self.links.get_mut(participant_id)?;
        if link.making_offer {
            return None;
        }
        link.making_offer = true;
        Some((link.connection.clone(), link.generation))
    }

    /// Clear the making-offer flag set under `generation`
    pub fn finish_offer(&mut self, participant_id: &ParticipantId, generation: u64) {
        if let Some(link) = self.links.get_mut(participant_id) {
            if link.generation == generation {
                link.making_offer = false;
            }
        }
    }

    /// Whether the link created under `generation` is still registered
    pub fn is_current(&self, participant_id: &ParticipantId, generation: u64) -> bool {
        self.links
            .get(participant_id)
            .is_some_and(|link| link.generation == generation)
    }

    /// Record a completed offer/answer exchange
    pub fn mark_negotiated(&mut self, participant_id: &ParticipantId) {
        if let Some(link) = self.links.get_mut(participant_id) {
            if !link.negotiated {
                debug!("Peer link {} negotiated", participant_id);
            }
            link.negotiated = true;
        }
    }

    /// Record a transport state; returns whether it changed
    pub fn set_connection_state(
        &mut self,
        participant_id: &ParticipantId,
        state: PeerConnectionState,
    ) -> bool {
        match self.links.get_mut(participant_id) {
            Some(link) if link.connection_state != state => {
                link.connection_state = state;
                true
            }
            _ => false,
        }
    }

    /// Video sender of every link
    pub fn video_senders(&self) -> Vec<SenderHandle> {
        self.links.values().map(PeerLink::video_sender).collect()
    }

    /// Put `microphone` (or nothing) on every audio sender; returns how many were updated
    pub fn attach_microphone(&self, microphone: Option<&MediaTrack>) -> usize {
        let mut updated = 0;
        for link in self.links.values() {
            match link
                .connection
                .replace_track(link.audio_sender, microphone.cloned())
            {
                Ok(()) => updated += 1,
                Err(e) => warn!(
                    "Failed to attach microphone to {}: {}",
                    link.participant_id, e
                ),
            }
        }
        updated
    }
}

/// [`VideoSenders`] view that reads the registry at call time
pub(crate) struct LiveVideoSenders<'a>(pub(crate) &'a Mutex<PeerRegistry>);

impl VideoSenders for LiveVideoSenders<'_> {
    fn video_senders(&self) -> Vec<SenderHandle> {
        self.0.lock().video_senders()
    }
}
