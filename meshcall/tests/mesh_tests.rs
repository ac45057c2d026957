//! Several orchestrators talking through one in-memory relay

mod common;

use common::{pid, settle};
use meshcall::{
    CallConfig, CallEvent, LinkState, LoopbackHub, MockDeviceCapture, MockPeerFactory, ParticipantId,
    VoiceChannelOrchestrator,
};
use meshcall_core::SignalingState;
use meshcall_signaling::ParticipantProfile;
use std::sync::Arc;

struct Member {
    call: VoiceChannelOrchestrator,
    factory: Arc<MockPeerFactory>,
}

impl Member {
    fn connect(hub: &LoopbackHub, id: &str, name: &str) -> anyhow::Result<Self> {
        let factory = Arc::new(MockPeerFactory::with_ice_gathering());
        let call = VoiceChannelOrchestrator::builder("lounge")
            .peer_factory(factory.clone())
            .device_capture(Arc::new(MockDeviceCapture::new()))
            .signaling(hub.connect(id, Some(ParticipantProfile::named(name))))
            .build()?;
        Ok(Self { call, factory })
    }

    fn signaling_state(&self, id: &str) -> SignalingState {
        use meshcall::PeerConnection;
        self.factory
            .connection(&pid(id))
            .map(|c| c.signaling_state())
            .unwrap_or(SignalingState::Closed)
    }
}

async fn mesh_of_three() -> anyhow::Result<(LoopbackHub, [Member; 3])> {
    let hub = LoopbackHub::new();
    let members = [
        Member::connect(&hub, "alice", "Alice")?,
        Member::connect(&hub, "bob", "Bob")?,
        Member::connect(&hub, "carol", "Carol")?,
    ];
    let calls: Vec<&VoiceChannelOrchestrator> = members.iter().map(|m| &m.call).collect();
    for member in &members {
        member.call.join().await?;
        settle(&calls).await;
    }
    Ok((hub, members))
}

fn ids(list: &[&str]) -> Vec<ParticipantId> {
    list.iter().map(|id| pid(id)).collect()
}

#[tokio::test]
async fn test_three_members_form_a_full_mesh() -> anyhow::Result<()> {
    let (hub, [alice, bob, carol]) = mesh_of_three().await?;

    assert_eq!(hub.members(alice.call.room_id()).len(), 3);
    assert_eq!(alice.call.peer_ids(), ids(&["bob", "carol"]));
    assert_eq!(bob.call.peer_ids(), ids(&["alice", "carol"]));
    assert_eq!(carol.call.peer_ids(), ids(&["alice", "bob"]));

    for (member, others) in [
        (&alice, ["bob", "carol"]),
        (&bob, ["alice", "carol"]),
        (&carol, ["alice", "bob"]),
    ] {
        for other in others {
            assert_eq!(member.call.peer_state(&pid(other)), Some(LinkState::Connected));
            assert_eq!(member.signaling_state(other), SignalingState::Stable);
            let connection = member.factory.connection(&pid(other)).unwrap();
            assert!(!connection.remote_candidates().is_empty());
        }
    }

    let names: Vec<Option<String>> = carol
        .call
        .remote_info()
        .into_values()
        .map(|info| info.username)
        .collect();
    assert_eq!(names, vec![Some("Alice".to_string()), Some("Bob".to_string())]);

    // only the later joiner offers on each pair
    assert_eq!(alice.factory.connection(&pid("bob")).unwrap().offers_created(), 0);
    assert_eq!(bob.factory.connection(&pid("alice")).unwrap().offers_created(), 1);
    Ok(())
}

#[tokio::test]
async fn test_share_is_announced_to_the_room() -> anyhow::Result<()> {
    let (_hub, [alice, bob, carol]) = mesh_of_three().await?;
    let calls = [&alice.call, &bob.call, &carol.call];

    bob.call.start_share().await?;
    settle(&calls).await;
    assert!(alice.call.remote_info()[&pid("bob")].sharing);
    assert!(carol.call.remote_info()[&pid("bob")].sharing);
    let screen = bob.call.current_video_track().unwrap();
    assert_eq!(bob.call.video_sender_track(&pid("alice")), Some(screen.clone()));
    assert_eq!(bob.call.video_sender_track(&pid("carol")), Some(screen));

    bob.call.stop_share()?;
    settle(&calls).await;
    assert!(!alice.call.remote_info()[&pid("bob")].sharing);
    assert!(!carol.call.remote_info()[&pid("bob")].sharing);
    Ok(())
}

#[tokio::test]
async fn test_simultaneous_offers_resolve_without_failure() -> anyhow::Result<()> {
    let (_hub, [alice, bob, carol]) = mesh_of_three().await?;
    let calls = [&alice.call, &bob.call, &carol.call];
    let mut alice_events = alice.call.subscribe();
    let mut bob_events = bob.call.subscribe();

    // both offers are in flight before either side reads the other's
    assert!(alice.call.renegotiate(&pid("bob")).await?);
    assert!(bob.call.renegotiate(&pid("alice")).await?);
    assert_eq!(alice.signaling_state("bob"), SignalingState::HaveLocalOffer);
    assert_eq!(bob.signaling_state("alice"), SignalingState::HaveLocalOffer);
    settle(&calls).await;

    assert_eq!(alice.signaling_state("bob"), SignalingState::Stable);
    assert_eq!(bob.signaling_state("alice"), SignalingState::Stable);
    // the polite side answered the impolite side's offer
    assert_eq!(alice.factory.connection(&pid("bob")).unwrap().answers_created(), 2);

    let failed = |events: Vec<CallEvent>| {
        events
            .iter()
            .any(|e| matches!(e, CallEvent::NegotiationFailed { .. }))
    };
    assert!(!failed(alice_events.drain()));
    assert!(!failed(bob_events.drain()));
    Ok(())
}

#[tokio::test]
async fn test_leaving_member_is_dropped_everywhere() -> anyhow::Result<()> {
    let (hub, [alice, bob, carol]) = mesh_of_three().await?;
    let calls = [&alice.call, &bob.call, &carol.call];
    let carol_link = alice.factory.connection(&pid("carol")).unwrap();

    carol.call.leave();
    settle(&calls).await;

    assert_eq!(hub.members(alice.call.room_id()), ids(&["alice", "bob"]));
    assert_eq!(alice.call.peer_ids(), ids(&["bob"]));
    assert_eq!(bob.call.peer_ids(), ids(&["alice"]));
    assert!(carol.call.peer_ids().is_empty());
    assert!(carol_link.is_closed());
    assert!(!alice.call.remote_info().contains_key(&pid("carol")));
    assert_eq!(alice.call.peer_state(&pid("bob")), Some(LinkState::Connected));
    Ok(())
}

#[tokio::test]
async fn test_profile_from_config_reaches_the_room() -> anyhow::Result<()> {
    let hub = LoopbackHub::new();
    let mut members = Vec::new();
    for (id, name) in [("dana", "Dana"), ("eli", "Eli")] {
        let config = CallConfig {
            profile: Some(ParticipantProfile::named(name)),
            ..CallConfig::default()
        };
        let call = VoiceChannelOrchestrator::builder("lounge")
            .config(config)
            .peer_factory(Arc::new(MockPeerFactory::new()))
            .device_capture(Arc::new(MockDeviceCapture::new()))
            .signaling(hub.connect(id, None))
            .build()?;
        members.push(call);
    }
    let calls: Vec<&VoiceChannelOrchestrator> = members.iter().collect();
    for call in &members {
        call.join().await?;
        settle(&calls).await;
    }

    let seen_by_dana = members[0].remote_info()[&pid("eli")].username.clone();
    let seen_by_eli = members[1].remote_info()[&pid("dana")].username.clone();
    assert_eq!(seen_by_dana.as_deref(), Some("Eli"));
    assert_eq!(seen_by_eli.as_deref(), Some("Dana"));
    Ok(())
}
