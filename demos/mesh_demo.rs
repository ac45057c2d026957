//! Three-party mesh over a local WebSocket relay
//!
//! Starts a relay, connects three orchestrators to it through
//! `WebSocketSignaling`, joins them to one room and toggles a screen share.
//! Peer connections are in-memory mocks, so only the signaling and the
//! orchestration are real.

use meshcall::{
    init_logging, CallEvent, LogConfig, MockDeviceCapture, MockPeerFactory,
    VoiceChannelOrchestrator,
};
use meshcall_signaling::{RelayServer, WebSocketSignaling};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(&LogConfig::default())?;

    let relay = RelayServer::bind(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0)).await?;
    let _relay_task = relay.spawn();
    info!("🚀 Relay listening on {}", relay.url());

    let mut calls = Vec::new();
    for _ in 0..3 {
        let signaling = WebSocketSignaling::connect(&relay.url()).await?;
        let call = VoiceChannelOrchestrator::builder("demo-room")
            .peer_factory(Arc::new(MockPeerFactory::with_ice_gathering()))
            .device_capture(Arc::new(MockDeviceCapture::new()))
            .signaling(signaling)
            .build()?;
        let pump = call.spawn();
        calls.push((call, pump));
    }

    let mut events = calls[0].0.subscribe();
    for (call, _) in &calls {
        call.join().await?;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    tokio::time::sleep(Duration::from_millis(300)).await;

    for (call, _) in &calls {
        info!(
            "👥 {:?} has peer links to {:?}",
            call.local_participant_id(),
            call.peer_ids()
        );
    }

    calls[1].0.start_share().await?;
    tokio::time::sleep(Duration::from_millis(200)).await;
    calls[1].0.stop_share()?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    for event in events.drain() {
        match event {
            CallEvent::ParticipantInfoChanged {
                participant_id,
                info,
            } => info!("📝 {} sharing={}", participant_id, info.sharing),
            other => info!("📡 {}", other.event_type()),
        }
    }

    let report = calls[0].0.report();
    println!("{}", report.to_json()?);
    for issue in report.issues() {
        warn!("⚠️ {}", issue);
    }

    for (call, pump) in calls {
        call.leave();
        call.shutdown();
        pump.await?;
    }
    Ok(())
}
