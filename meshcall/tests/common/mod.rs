//! Shared fixtures for orchestrator tests

#![allow(dead_code)]

use meshcall::{
    CallConfig, CallEvent, EventStream, MediaTrack, MockDeviceCapture, MockPeerConnection,
    MockPeerFactory, ParticipantId, TrackKind, TrackSource, VoiceChannelOrchestrator,
};
use meshcall_signaling::{InboundSignal, LoopbackSignaling, ParticipantProfile, ParticipantSnapshot};
use std::sync::Arc;

/// One orchestrator wired to in-memory collaborators
pub struct Harness {
    pub call: VoiceChannelOrchestrator,
    pub signaling: Arc<LoopbackSignaling>,
    pub factory: Arc<MockPeerFactory>,
    pub capture: Arc<MockDeviceCapture>,
    pub events: EventStream,
}

impl Harness {
    pub fn new(local_id: &str) -> Self {
        Self::with_config(local_id, CallConfig::default())
    }

    pub fn with_config(local_id: &str, config: CallConfig) -> Self {
        let signaling = Arc::new(LoopbackSignaling::new(local_id));
        let factory = Arc::new(MockPeerFactory::new());
        let capture = Arc::new(MockDeviceCapture::new());
        let call = VoiceChannelOrchestrator::builder("room-1")
            .config(config)
            .peer_factory(factory.clone())
            .device_capture(capture.clone())
            .signaling(signaling.clone())
            .build()
            .expect("orchestrator builds");
        let events = call.subscribe();
        Self {
            call,
            signaling,
            factory,
            capture,
            events,
        }
    }

    /// Harness that already joined and cleared its outbound record
    pub async fn joined(local_id: &str) -> Self {
        let harness = Self::new(local_id);
        harness.call.join().await.expect("join succeeds");
        harness.call.process_pending().await;
        harness.signaling.take_sent();
        harness
    }

    /// Deliver `signal` and let the orchestrator handle everything it caused
    pub async fn inject(&self, signal: InboundSignal) {
        self.signaling.inject(signal);
        self.call.process_pending().await;
    }

    /// Announce `ids` as the room's current members and negotiate with each
    pub async fn with_peers(&self, ids: &[&str]) {
        let snapshots = ids.iter().map(|id| snapshot(id)).collect();
        self.inject(InboundSignal::ExistingParticipants(snapshots))
            .await;
        for id in ids {
            self.inject(InboundSignal::Answer {
                from_participant_id: pid(id),
                sdp: meshcall::SessionDescription::answer(format!("answer from {}", id)),
            })
            .await;
        }
    }

    pub fn connection(&self, id: &str) -> Arc<MockPeerConnection> {
        self.factory
            .connection(&pid(id))
            .expect("connection exists")
    }

    pub fn drain_events(&mut self) -> Vec<CallEvent> {
        self.events.drain()
    }
}

pub fn pid(id: &str) -> ParticipantId {
    ParticipantId::from(id)
}

pub fn snapshot(id: &str) -> ParticipantSnapshot {
    ParticipantSnapshot::new(id).with_info(ParticipantProfile::named(format!("user {}", id)))
}

pub fn remote_track(kind: TrackKind) -> MediaTrack {
    MediaTrack::new(kind, TrackSource::Remote, "remote")
}

/// Pump every orchestrator until none has anything left to do
pub async fn settle(calls: &[&VoiceChannelOrchestrator]) {
    for _ in 0..50 {
        let mut handled = 0;
        for call in calls {
            handled += call.process_pending().await;
        }
        if handled == 0 {
            return;
        }
    }
    panic!("mesh did not settle");
}
