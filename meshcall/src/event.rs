//! Event system for call and participant events

use crate::participant::ParticipantInfo;
use crate::stream::RemoteStream;
use meshcall_core::{ParticipantId, PeerConnectionState, RoomId, TrackKind};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

/// Events published while a call runs
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// The local user joined the call
    Joined {
        /// Room joined
        room_id: RoomId,
    },
    /// The local user left the call
    Left {
        /// Room left
        room_id: RoomId,
    },
    /// A remote participant was announced
    ParticipantJoined {
        /// Participant ID
        participant_id: ParticipantId,
        /// Metadata known so far
        info: ParticipantInfo,
    },
    /// A remote participant left
    ParticipantLeft {
        /// Participant ID
        participant_id: ParticipantId,
    },
    /// A remote participant's metadata changed
    ParticipantInfoChanged {
        /// Participant ID
        participant_id: ParticipantId,
        /// Metadata after the change
        info: ParticipantInfo,
    },
    /// A remote stream gained or swapped a track
    RemoteStreamUpdated {
        /// Participant ID
        participant_id: ParticipantId,
        /// The (stable) stream object
        stream: Arc<RemoteStream>,
        /// Kind of the track that changed
        kind: TrackKind,
    },
    /// A peer link's transport state changed
    PeerStateChanged {
        /// Participant ID
        participant_id: ParticipantId,
        /// New transport state
        state: PeerConnectionState,
    },
    /// Local screen sharing started or stopped
    LocalSharingChanged {
        /// Whether the screen is now shared
        sharing: bool,
    },
    /// Local microphone toggled
    MicChanged {
        /// Whether the microphone is now on
        on: bool,
    },
    /// Local playback mute toggled
    DeafenChanged {
        /// Whether inbound audio is now muted
        deafened: bool,
    },
    /// An offer/answer/ICE step failed for one peer
    NegotiationFailed {
        /// Participant ID
        participant_id: ParticipantId,
        /// Error description
        error: String,
    },
}

impl CallEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            CallEvent::Joined { .. } => "joined",
            CallEvent::Left { .. } => "left",
            CallEvent::ParticipantJoined { .. } => "participant_joined",
            CallEvent::ParticipantLeft { .. } => "participant_left",
            CallEvent::ParticipantInfoChanged { .. } => "participant_info_changed",
            CallEvent::RemoteStreamUpdated { .. } => "remote_stream_updated",
            CallEvent::PeerStateChanged { .. } => "peer_state_changed",
            CallEvent::LocalSharingChanged { .. } => "local_sharing_changed",
            CallEvent::MicChanged { .. } => "mic_changed",
            CallEvent::DeafenChanged { .. } => "deafen_changed",
            CallEvent::NegotiationFailed { .. } => "negotiation_failed",
        }
    }

    /// Check if this is an error event
    pub fn is_error_event(&self) -> bool {
        matches!(self, CallEvent::NegotiationFailed { .. })
    }
}

/// One subscriber's view of the call's events, in publish order
///
/// Dropping the stream unsubscribes it.
#[derive(Debug)]
pub struct EventStream {
    receiver: mpsc::UnboundedReceiver<CallEvent>,
}

impl EventStream {
    /// Wait for the next event; `None` once the call is gone
    pub async fn next(&mut self) -> Option<CallEvent> {
        self.receiver.recv().await
    }

    /// Next queued event, without waiting
    pub fn try_next(&mut self) -> Option<CallEvent> {
        self.receiver.try_recv().ok()
    }

    /// Everything queued right now
    pub fn drain(&mut self) -> Vec<CallEvent> {
        std::iter::from_fn(|| self.try_next()).collect()
    }
}

/// Fan-out of call events to every live [`EventStream`]
#[derive(Debug)]
pub(crate) struct EventBus {
    enabled: bool,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<CallEvent>>>,
}

impl EventBus {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            enabled,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn subscribe(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        EventStream { receiver: rx }
    }

    pub(crate) fn publish(&self, event: CallEvent) {
        if !self.enabled {
            return;
        }
        trace!("📡 Publishing event: {}", event.event_type());
        // closed streams are dropped on the next publish
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn joined() -> CallEvent {
        CallEvent::ParticipantJoined {
            participant_id: ParticipantId::from("a"),
            info: ParticipantInfo::default(),
        }
    }

    #[test]
    fn test_event_type_names() {
        assert_eq!(joined().event_type(), "participant_joined");
        assert!(!joined().is_error_event());

        let error_event = CallEvent::NegotiationFailed {
            participant_id: ParticipantId::from("a"),
            error: "bad sdp".to_string(),
        };
        assert!(error_event.is_error_event());
        assert_eq!(error_event.event_type(), "negotiation_failed");
    }

    #[tokio::test]
    async fn test_bus_fans_out_and_prunes() {
        let bus = EventBus::new(true);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.publish(CallEvent::MicChanged { on: false });
        assert_eq!(first.next().await.unwrap().event_type(), "mic_changed");
        assert_eq!(second.drain().len(), 1);

        drop(second);
        bus.publish(CallEvent::MicChanged { on: true });
        assert_eq!(bus.subscribers.lock().len(), 1);
        assert!(first.try_next().is_some());
        assert!(first.try_next().is_none());
    }

    #[test]
    fn test_disabled_bus_is_silent() {
        let bus = EventBus::new(false);
        let mut stream = bus.subscribe();
        bus.publish(CallEvent::MicChanged { on: false });
        assert!(stream.drain().is_empty());
    }
}
