//! Call-level guarantees: idempotent join, one video source, no glare,
//! stable remote streams, clean leave

mod common;

use common::{pid, remote_track, snapshot, Harness};
use meshcall::{CallPhase, TrackKind, TrackSource};
use meshcall_signaling::InboundSignal;
use std::sync::Arc;

#[tokio::test]
async fn test_join_twice_is_idempotent() {
    let harness = Harness::new("me");
    harness.call.join().await.unwrap();
    harness
        .inject(InboundSignal::ExistingParticipants(vec![snapshot("a")]))
        .await;
    let sent_before = harness.signaling.sent().len();

    harness.call.join().await.unwrap();
    harness.call.process_pending().await;

    assert_eq!(harness.signaling.sent().len(), sent_before);
    assert_eq!(harness.signaling.count_sent("join-call"), 1);
    assert_eq!(harness.factory.created_count(), 1);
}

#[tokio::test]
async fn test_concurrent_joins_announce_once() {
    let harness = Harness::new("me");
    let (first, second) = tokio::join!(harness.call.join(), harness.call.join());
    first.unwrap();
    second.unwrap();
    assert_eq!(harness.signaling.count_sent("join-call"), 1);
    assert_eq!(harness.call.phase(), CallPhase::Joined);
}

fn assert_single_video_source(harness: &Harness, ids: &[&str]) {
    let current = harness.call.current_video_track().unwrap();
    for id in ids {
        assert_eq!(
            harness.call.video_sender_track(&pid(id)),
            Some(current.clone()),
            "video sender of {} diverged",
            id
        );
    }
}

#[tokio::test]
async fn test_every_sender_carries_current_video() {
    let harness = Harness::joined("me").await;
    harness.with_peers(&["a", "b", "c"]).await;
    assert_single_video_source(&harness, &["a", "b", "c"]);

    let steps = [true, true, false, false, true, false, true];
    for share in steps {
        if share {
            harness.call.start_share().await.unwrap();
        } else {
            harness.call.stop_share().unwrap();
        }
        harness.call.process_pending().await;
        assert_eq!(harness.call.sharing(), share);
        assert_single_video_source(&harness, &["a", "b", "c"]);
    }

    // a link created mid-share starts on the shared track too
    harness
        .inject(InboundSignal::UserJoined(snapshot("d")))
        .await;
    assert_eq!(
        harness.call.current_video_track().map(|t| t.source()),
        Some(TrackSource::Screen)
    );
    assert_single_video_source(&harness, &["a", "b", "c", "d"]);

    // one screen-share message per real transition
    assert_eq!(harness.signaling.count_sent("screen-share"), 5);
}

#[tokio::test]
async fn test_concurrent_offers_to_one_peer_send_one() {
    let harness = Harness::joined("me").await;
    harness
        .inject(InboundSignal::UserJoined(snapshot("a")))
        .await;
    assert_eq!(harness.signaling.count_sent("offer"), 0);

    let a = pid("a");
    let (first, second) = tokio::join!(harness.call.renegotiate(&a), harness.call.renegotiate(&a));

    assert!(first.unwrap() ^ second.unwrap());
    assert_eq!(harness.signaling.count_sent("offer"), 1);
    assert_eq!(harness.connection("a").offers_created(), 1);

    // the lock is released once the offer is out
    assert!(harness.call.renegotiate(&a).await.unwrap());
}

#[tokio::test]
async fn test_remote_stream_survives_track_replacement() {
    let harness = Harness::joined("me").await;
    harness.with_peers(&["a"]).await;
    let connection = harness.connection("a");

    connection.push_remote_track(remote_track(TrackKind::Audio));
    connection.push_remote_track(remote_track(TrackKind::Video));
    harness.call.process_pending().await;
    let held = harness.call.remote_stream(&pid("a")).unwrap();

    for _ in 0..3 {
        let replacement = remote_track(TrackKind::Video);
        connection.push_remote_track(replacement.clone());
        harness.call.process_pending().await;

        let now = harness.call.remote_stream(&pid("a")).unwrap();
        assert!(Arc::ptr_eq(&held, &now));
        assert_eq!(held.video_track(), Some(replacement));
        assert_eq!(held.len(), 2);
    }
    assert_eq!(harness.call.remotes().len(), 1);
}

#[tokio::test]
async fn test_leave_cleans_up_and_rejoin_starts_blank() {
    let harness = Harness::joined("me").await;
    harness.with_peers(&["a", "b"]).await;
    harness
        .connection("a")
        .push_remote_track(remote_track(TrackKind::Audio));
    harness.call.process_pending().await;
    let blank_before = harness.call.current_video_track().unwrap();
    harness.call.start_share().await.unwrap();
    let mic = harness.call.microphone_track().unwrap();
    let screen = harness.capture.last_display_track().unwrap();

    harness.call.leave();

    assert!(harness.call.remotes().is_empty());
    assert!(harness.call.remote_info().is_empty());
    assert!(harness.call.peer_ids().is_empty());
    assert!(harness.connection("a").is_closed());
    assert!(harness.connection("b").is_closed());
    assert!(!harness.call.sharing());
    assert!(mic.is_ended() && screen.is_ended());
    assert!(harness.call.current_video_track().is_none());
    assert_eq!(harness.signaling.count_sent("leave-call"), 1);

    harness.call.join().await.unwrap();
    let blank_after = harness.call.current_video_track().unwrap();
    assert_eq!(blank_after.source(), TrackSource::BlankVideo);
    assert_ne!(blank_after, blank_before);
    assert!(!blank_after.is_ended());
}

#[tokio::test]
async fn test_leave_during_join_cancels_it() {
    let harness = Harness::new("me");
    // join is parked on the microphone prompt when leave runs
    let (joined, ()) = tokio::join!(harness.call.join(), async {
        harness.call.leave();
    });
    joined.unwrap();
    assert_eq!(harness.call.phase(), CallPhase::Idle);
    assert_eq!(harness.signaling.count_sent("join-call"), 0);
    assert!(harness.call.microphone_track().is_none());
}
