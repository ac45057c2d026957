//! WebSocket client against a local relay

use meshcall_core::{RoomId, SessionDescription};
use meshcall_signaling::{
    InboundSignal, OutboundSignal, ParticipantProfile, RelayServer, SignalingClient,
    SignalingError, WebSocketSignaling,
};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_test::assert_ok;

async fn start_relay() -> RelayServer {
    let relay = RelayServer::bind(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0))
        .await
        .expect("relay binds");
    relay.spawn();
    relay
}

fn inbox(client: &WebSocketSignaling) -> mpsc::UnboundedReceiver<InboundSignal> {
    let (tx, rx) = mpsc::unbounded_channel();
    client.subscribe(Arc::new(move |signal: &InboundSignal| {
        let _ = tx.send(signal.clone());
    }));
    rx
}

async fn next(rx: &mut mpsc::UnboundedReceiver<InboundSignal>) -> InboundSignal {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("signal within timeout")
        .expect("channel open")
}

#[tokio::test]
async fn test_welcome_assigns_distinct_ids() {
    let relay = start_relay().await;
    let a = assert_ok!(WebSocketSignaling::connect(&relay.url()).await);
    let b = assert_ok!(WebSocketSignaling::connect(&relay.url()).await);

    let a_id = a.local_participant_id().unwrap();
    let b_id = b.local_participant_id().unwrap();
    assert_ne!(a_id, b_id);
    assert!(a.is_connected());
}

#[tokio::test]
async fn test_room_flow_over_websocket() {
    let relay = start_relay().await;
    let room = RoomId::from("standup");

    let alice = assert_ok!(WebSocketSignaling::connect(&relay.url()).await);
    let mut alice_rx = inbox(&alice);
    assert_ok!(alice.send(OutboundSignal::JoinCall {
        room_id: room.clone(),
        info: None,
    }));
    assert_eq!(
        next(&mut alice_rx).await,
        InboundSignal::ExistingParticipants(vec![])
    );

    let bob = assert_ok!(WebSocketSignaling::connect(&relay.url()).await);
    let mut bob_rx = inbox(&bob);
    let bob_id = bob.local_participant_id().unwrap();
    let alice_id = alice.local_participant_id().unwrap();
    assert_ok!(bob.send(OutboundSignal::JoinCall {
        room_id: room.clone(),
        info: Some(ParticipantProfile::named("Bob")),
    }));

    match next(&mut bob_rx).await {
        InboundSignal::ExistingParticipants(list) => {
            assert_eq!(list.len(), 1);
            assert_eq!(list[0].participant_id, alice_id);
        }
        other => panic!("unexpected signal {:?}", other),
    }
    match next(&mut alice_rx).await {
        InboundSignal::UserJoined(snapshot) => {
            assert_eq!(snapshot.participant_id, bob_id);
            let name = snapshot.info.and_then(|info| info.username);
            assert_eq!(name.as_deref(), Some("Bob"));
        }
        other => panic!("unexpected signal {:?}", other),
    }

    bob.send(OutboundSignal::Offer {
        target_participant_id: alice_id.clone(),
        sdp: SessionDescription::offer("v=0 bob"),
    })
    .unwrap();
    assert_eq!(
        next(&mut alice_rx).await,
        InboundSignal::Offer {
            from_participant_id: bob_id.clone(),
            sdp: SessionDescription::offer("v=0 bob"),
        }
    );

    bob.close();
    assert_eq!(
        next(&mut alice_rx).await,
        InboundSignal::UserLeft {
            participant_id: bob_id,
        }
    );
    assert!(matches!(
        bob.send(OutboundSignal::LeaveCall { room_id: room }),
        Err(SignalingError::NotConnected)
    ));
}

#[tokio::test]
async fn test_silent_relay_times_out() {
    let listener = tokio::net::TcpListener::bind(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let silent = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let _ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let result =
        WebSocketSignaling::connect_with_timeout(&format!("ws://{}", addr), Duration::from_millis(200))
            .await;
    assert!(matches!(
        result,
        Err(SignalingError::HandshakeTimeout { timeout_ms: 200 })
    ));
    silent.abort();
}
