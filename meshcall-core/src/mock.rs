//! In-memory peer connection for tests and demos
//!
//! [`MockPeerConnection`] follows the offer/answer state machine closely
//! enough to exercise negotiation logic: applying descriptions in the wrong
//! signaling state fails the way a real transport would, every async step
//! yields once to the scheduler, and every call is recorded.

use crate::error::MeshCallError;
use crate::ids::ParticipantId;
use crate::peer_link::{
    IceCandidate, PeerConnection, PeerConnectionEvent, PeerConnectionFactory,
    PeerConnectionState, PeerEventSink, SdpType, SenderId, SessionDescription,
    SignalingState, TransceiverDirection,
};
use crate::track::{MediaTrack, TrackKind};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
struct MockTransceiver {
    kind: TrackKind,
    #[allow(dead_code)]
    direction: TransceiverDirection,
    track: Option<MediaTrack>,
}

#[derive(Debug)]
struct MockState {
    transceivers: Vec<MockTransceiver>,
    receivers: Vec<MediaTrack>,
    signaling_state: SignalingState,
    connection_state: PeerConnectionState,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    remote_candidates: Vec<IceCandidate>,
    offers_created: usize,
    answers_created: usize,
    replace_track_calls: usize,
    fail_next_offer: bool,
    fail_next_remote_description: bool,
    sdp_version: u64,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            transceivers: Vec::new(),
            receivers: Vec::new(),
            signaling_state: SignalingState::Stable,
            connection_state: PeerConnectionState::New,
            local_description: None,
            remote_description: None,
            remote_candidates: Vec::new(),
            offers_created: 0,
            answers_created: 0,
            replace_track_calls: 0,
            fail_next_offer: false,
            fail_next_remote_description: false,
            sdp_version: 0,
        }
    }
}

/// Deterministic [`PeerConnection`] implementation
#[derive(Debug)]
pub struct MockPeerConnection {
    participant_id: ParticipantId,
    events: PeerEventSink,
    gather_ice: bool,
    state: Mutex<MockState>,
}

impl MockPeerConnection {
    /// Create a connection that reports its callbacks on `events`
    pub fn new(events: PeerEventSink, gather_ice: bool) -> Self {
        Self {
            participant_id: events.participant_id().clone(),
            events,
            gather_ice,
            state: Mutex::new(MockState::default()),
        }
    }

    fn emit(&self, event: PeerConnectionEvent) {
        // The orchestrator may already be gone; late callbacks are dropped like a closed transport would.
        let _ = self.events.emit(event);
    }

    fn ensure_open(&self, state: &MockState) -> Result<(), MeshCallError> {
        if state.signaling_state == SignalingState::Closed {
            return Err(MeshCallError::PeerClosed {
                participant_id: self.participant_id.to_string(),
            });
        }
        Ok(())
    }

    fn negotiation_error(&self, stage: &str, reason: impl Into<String>) -> MeshCallError {
        MeshCallError::negotiation(self.participant_id.as_str(), stage, reason)
    }

    /// Make a remote track available and raise the track callback
    pub fn push_remote_track(&self, track: MediaTrack) {
        self.state.lock().receivers.push(track.clone());
        self.emit(PeerConnectionEvent::Track(track));
    }

    /// Make a remote track available on a receiver without raising the callback
    pub fn buffer_remote_track(&self, track: MediaTrack) {
        self.state.lock().receivers.push(track);
    }

    /// Raise the local-candidate callback with `candidate`
    pub fn gather_candidate(&self, candidate: IceCandidate) {
        self.emit(PeerConnectionEvent::IceCandidate(candidate));
    }

    /// Raise the negotiation-needed callback
    pub fn request_negotiation(&self) {
        self.emit(PeerConnectionEvent::NegotiationNeeded);
    }

    /// Force a connectivity state and raise the callback
    pub fn set_connection_state(&self, connection_state: PeerConnectionState) {
        self.state.lock().connection_state = connection_state;
        self.emit(PeerConnectionEvent::ConnectionStateChanged(connection_state));
    }

    /// Make the next `create_offer` fail
    pub fn fail_next_offer(&self) {
        self.state.lock().fail_next_offer = true;
    }

    /// Make the next `set_remote_description` fail
    pub fn fail_next_remote_description(&self) {
        self.state.lock().fail_next_remote_description = true;
    }

    /// Link generation this connection was created for
    pub fn link_id(&self) -> u64 {
        self.events.link_id()
    }

    /// Remote participant of this connection
    pub fn participant_id(&self) -> &ParticipantId {
        &self.participant_id
    }

    /// Number of offers created
    pub fn offers_created(&self) -> usize {
        self.state.lock().offers_created
    }

    /// Number of answers created
    pub fn answers_created(&self) -> usize {
        self.state.lock().answers_created
    }

    /// Number of `replace_track` calls
    pub fn replace_track_calls(&self) -> usize {
        self.state.lock().replace_track_calls
    }

    /// Number of transceivers added
    pub fn transceiver_count(&self) -> usize {
        self.state.lock().transceivers.len()
    }

    /// Track attached to the first sender of `kind`
    pub fn sender_track_of_kind(&self, kind: TrackKind) -> Option<MediaTrack> {
        self.state
            .lock()
            .transceivers
            .iter()
            .find(|t| t.kind == kind)
            .and_then(|t| t.track.clone())
    }

    /// Last applied local description
    pub fn local_description(&self) -> Option<SessionDescription> {
        self.state.lock().local_description.clone()
    }

    /// Last applied remote description
    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.state.lock().remote_description.clone()
    }

    /// Remote ICE candidates added so far
    pub fn remote_candidates(&self) -> Vec<IceCandidate> {
        self.state.lock().remote_candidates.clone()
    }

    /// Whether `close` was called
    pub fn is_closed(&self) -> bool {
        self.state.lock().signaling_state == SignalingState::Closed
    }

    fn mark_connected_if_stable(&self, state: &mut MockState) -> bool {
        if state.signaling_state == SignalingState::Stable
            && state.local_description.is_some()
            && state.remote_description.is_some()
            && state.connection_state == PeerConnectionState::New
        {
            state.connection_state = PeerConnectionState::Connected;
            return true;
        }
        false
    }
}

#[async_trait]
impl PeerConnection for MockPeerConnection {
    fn add_transceiver(
        &self,
        kind: TrackKind,
        direction: TransceiverDirection,
    ) -> Result<SenderId, MeshCallError> {
        let mut state = self.state.lock();
        self.ensure_open(&state)?;
        state.transceivers.push(MockTransceiver {
            kind,
            direction,
            track: None,
        });
        Ok(SenderId(state.transceivers.len() - 1))
    }

    fn replace_track(
        &self,
        sender: SenderId,
        track: Option<MediaTrack>,
    ) -> Result<(), MeshCallError> {
        let mut state = self.state.lock();
        self.ensure_open(&state)?;
        state.replace_track_calls += 1;
        let transceiver =
            state
                .transceivers
                .get_mut(sender.0)
                .ok_or_else(|| MeshCallError::SenderNotFound {
                    participant_id: self.participant_id.to_string(),
                    sender: sender.0,
                })?;
        if let Some(track) = &track {
            if track.kind() != transceiver.kind {
                return Err(MeshCallError::InvalidMediaType {
                    expected: transceiver.kind.to_string(),
                    actual: track.kind().to_string(),
                });
            }
        }
        transceiver.track = track;
        Ok(())
    }

    fn sender_track(&self, sender: SenderId) -> Option<MediaTrack> {
        self.state
            .lock()
            .transceivers
            .get(sender.0)
            .and_then(|t| t.track.clone())
    }

    fn receiver_tracks(&self) -> Vec<MediaTrack> {
        self.state.lock().receivers.clone()
    }

    async fn create_offer(&self) -> Result<SessionDescription, MeshCallError> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        self.ensure_open(&state)?;
        if std::mem::take(&mut state.fail_next_offer) {
            return Err(self.negotiation_error("create-offer", "injected failure"));
        }
        state.offers_created += 1;
        state.sdp_version += 1;
        Ok(SessionDescription::offer(format!(
            "mock-offer {} v{}",
            self.participant_id, state.sdp_version
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription, MeshCallError> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        self.ensure_open(&state)?;
        if state.signaling_state != SignalingState::HaveRemoteOffer {
            return Err(self.negotiation_error("create-answer", "no remote offer applied"));
        }
        state.answers_created += 1;
        state.sdp_version += 1;
        Ok(SessionDescription::answer(format!(
            "mock-answer {} v{}",
            self.participant_id, state.sdp_version
        )))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MeshCallError> {
        tokio::task::yield_now().await;
        let connected = {
            let mut state = self.state.lock();
            self.ensure_open(&state)?;
            let next = match (description.sdp_type, state.signaling_state) {
                (SdpType::Offer, SignalingState::Stable)
                | (SdpType::Offer, SignalingState::HaveLocalOffer) => SignalingState::HaveLocalOffer,
                (SdpType::Answer, SignalingState::HaveRemoteOffer)
                | (SdpType::Pranswer, SignalingState::HaveRemoteOffer) => SignalingState::Stable,
                (SdpType::Rollback, SignalingState::HaveLocalOffer) => SignalingState::Stable,
                (sdp_type, current) => {
                    return Err(self.negotiation_error(
                        "set-local-description",
                        format!("cannot apply local {} in {:?}", sdp_type, current),
                    ))
                }
            };
            state.signaling_state = next;
            if description.sdp_type != SdpType::Rollback {
                state.local_description = Some(description.clone());
            }
            self.mark_connected_if_stable(&mut state)
        };

        if self.gather_ice && description.sdp_type != SdpType::Rollback {
            self.emit(PeerConnectionEvent::IceCandidate(IceCandidate {
                candidate: format!("candidate:mock 1 udp 2130706431 127.0.0.1 9 typ host ({})", self.participant_id),
                sdp_mid: Some("0".to_string()),
                sdp_m_line_index: Some(0),
                username_fragment: None,
            }));
        }
        if connected {
            self.emit(PeerConnectionEvent::ConnectionStateChanged(
                PeerConnectionState::Connected,
            ));
        }
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MeshCallError> {
        tokio::task::yield_now().await;
        let connected = {
            let mut state = self.state.lock();
            self.ensure_open(&state)?;
            if std::mem::take(&mut state.fail_next_remote_description) {
                return Err(self.negotiation_error("set-remote-description", "injected failure"));
            }
            let next = match (description.sdp_type, state.signaling_state) {
                (SdpType::Offer, SignalingState::Stable)
                | (SdpType::Offer, SignalingState::HaveRemoteOffer) => {
                    SignalingState::HaveRemoteOffer
                }
                (SdpType::Answer, SignalingState::HaveLocalOffer)
                | (SdpType::Pranswer, SignalingState::HaveLocalOffer) => SignalingState::Stable,
                (SdpType::Rollback, SignalingState::HaveRemoteOffer) => SignalingState::Stable,
                (sdp_type, current) => {
                    return Err(self.negotiation_error(
                        "set-remote-description",
                        format!("cannot apply remote {} in {:?}", sdp_type, current),
                    ))
                }
            };
            state.signaling_state = next;
            if description.sdp_type != SdpType::Rollback {
                state.remote_description = Some(description);
            }
            self.mark_connected_if_stable(&mut state)
        };

        if connected {
            self.emit(PeerConnectionEvent::ConnectionStateChanged(
                PeerConnectionState::Connected,
            ));
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MeshCallError> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        self.ensure_open(&state)?;
        if state.remote_description.is_none() {
            return Err(self.negotiation_error(
                "add-ice-candidate",
                "no remote description applied",
            ));
        }
        state.remote_candidates.push(candidate);
        Ok(())
    }

    fn signaling_state(&self) -> SignalingState {
        self.state.lock().signaling_state
    }

    fn connection_state(&self) -> PeerConnectionState {
        self.state.lock().connection_state
    }

    fn close(&self) {
        let mut state = self.state.lock();
        if state.signaling_state == SignalingState::Closed {
            return;
        }
        debug!("Closing mock connection to {}", self.participant_id);
        state.signaling_state = SignalingState::Closed;
        state.connection_state = PeerConnectionState::Closed;
        state.local_description = None;
        state.remote_description = None;
    }
}

/// Factory handing out [`MockPeerConnection`]s and remembering them
#[derive(Debug, Default)]
pub struct MockPeerFactory {
    connections: Mutex<Vec<Arc<MockPeerConnection>>>,
    gather_ice: bool,
    fail_creation: AtomicBool,
}

impl MockPeerFactory {
    /// Factory whose connections do not gather ICE candidates
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory whose connections emit one local candidate per local description
    pub fn with_ice_gathering() -> Self {
        Self {
            gather_ice: true,
            ..Self::default()
        }
    }

    /// Make subsequent `create` calls fail
    pub fn set_fail_creation(&self, fail: bool) {
        self.fail_creation.store(fail, Ordering::SeqCst);
    }

    /// Number of connections created so far
    pub fn created_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Most recent connection created for `participant_id`
    pub fn connection(&self, participant_id: &ParticipantId) -> Option<Arc<MockPeerConnection>> {
        self.connections
            .lock()
            .iter()
            .rev()
            .find(|c| c.participant_id() == participant_id)
            .cloned()
    }

    /// Every connection created for `participant_id`, oldest first
    pub fn connections_for(&self, participant_id: &ParticipantId) -> Vec<Arc<MockPeerConnection>> {
        self.connections
            .lock()
            .iter()
            .filter(|c| c.participant_id() == participant_id)
            .cloned()
            .collect()
    }
}

impl PeerConnectionFactory for MockPeerFactory {
    fn create(
        &self,
        participant_id: &ParticipantId,
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerConnection>, MeshCallError> {
        if self.fail_creation.load(Ordering::SeqCst) {
            return Err(MeshCallError::Transport {
                reason: format!("mock factory refused connection to {}", participant_id),
            });
        }
        let connection = Arc::new(MockPeerConnection::new(events, self.gather_ice));
        self.connections.lock().push(connection.clone());
        Ok(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer_link::PeerEvent;
    use crate::track::TrackSource;
    use tokio::sync::mpsc;

    fn connection() -> (MockPeerConnection, mpsc::UnboundedReceiver<PeerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = PeerEventSink::new(ParticipantId::from("peer-a"), 7, tx);
        (MockPeerConnection::new(sink, false), rx)
    }

    #[tokio::test]
    async fn test_offer_answer_reaches_connected() {
        let (caller, mut caller_events) = connection();
        let (callee, _callee_events) = connection();

        let offer = caller.create_offer().await.unwrap();
        caller.set_local_description(offer.clone()).await.unwrap();
        assert_eq!(caller.signaling_state(), SignalingState::HaveLocalOffer);

        callee.set_remote_description(offer).await.unwrap();
        let answer = callee.create_answer().await.unwrap();
        callee.set_local_description(answer.clone()).await.unwrap();
        caller.set_remote_description(answer).await.unwrap();

        assert_eq!(caller.signaling_state(), SignalingState::Stable);
        assert_eq!(caller.connection_state(), PeerConnectionState::Connected);
        let event = caller_events.try_recv().unwrap();
        assert_eq!(event.link_id, 7);
        assert_eq!(event.participant_id, ParticipantId::from("peer-a"));
        match event.event {
            PeerConnectionEvent::ConnectionStateChanged(PeerConnectionState::Connected) => {}
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_remote_offer_rejected_while_local_offer_pending() {
        let (pc, _events) = connection();
        let offer = pc.create_offer().await.unwrap();
        pc.set_local_description(offer).await.unwrap();

        let glare = pc
            .set_remote_description(SessionDescription::offer("other"))
            .await;
        tokio_test::assert_err!(glare);

        pc.set_local_description(SessionDescription::rollback())
            .await
            .unwrap();
        tokio_test::assert_ok!(
            pc.set_remote_description(SessionDescription::offer("other"))
                .await
        );
    }

    #[test]
    fn test_replace_track_checks_kind() {
        let (pc, _events) = connection();
        let video = pc
            .add_transceiver(TrackKind::Video, TransceiverDirection::SendRecv)
            .unwrap();
        let mic = MediaTrack::new(TrackKind::Audio, TrackSource::Microphone, "mic");
        assert!(pc.replace_track(video, Some(mic)).is_err());

        let screen = MediaTrack::new(TrackKind::Video, TrackSource::Screen, "screen");
        pc.replace_track(video, Some(screen.clone())).unwrap();
        assert_eq!(pc.sender_track(video), Some(screen));
    }

    #[test]
    fn test_closed_connection_rejects_calls() {
        let (pc, _events) = connection();
        pc.close();
        assert!(pc.is_closed());
        assert!(pc
            .add_transceiver(TrackKind::Audio, TransceiverDirection::SendRecv)
            .is_err());
    }
}
