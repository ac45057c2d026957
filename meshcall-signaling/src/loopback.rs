//! In-memory signaling
//!
//! [`LoopbackSignaling`] records everything sent through it and delivers
//! whatever a test injects. Clients created from a [`LoopbackHub`] are also
//! routed to each other through a [`RoomRouter`], which gives a full
//! multi-party room without any socket.

use crate::client::{HandlerTable, SignalHandler, SignalingClient, SubscriptionId};
use crate::error::SignalingError;
use crate::protocol::{InboundSignal, OutboundSignal, ParticipantProfile};
use crate::relay::{Delivery, RoomRouter};
use meshcall_core::ParticipantId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// In-memory [`SignalingClient`]
#[derive(Debug)]
pub struct LoopbackSignaling {
    participant_id: Option<ParticipantId>,
    connected: AtomicBool,
    handlers: HandlerTable,
    sent: Mutex<Vec<OutboundSignal>>,
    hub: Option<Arc<HubInner>>,
}

impl LoopbackSignaling {
    /// Connected client with a known participant id
    pub fn new(participant_id: impl Into<ParticipantId>) -> Self {
        Self {
            participant_id: Some(participant_id.into()),
            connected: AtomicBool::new(true),
            handlers: HandlerTable::new(),
            sent: Mutex::new(Vec::new()),
            hub: None,
        }
    }

    /// Connected client that never learned its own participant id
    pub fn anonymous() -> Self {
        Self {
            participant_id: None,
            ..Self::new("")
        }
    }

    /// Simulate the transport connecting or dropping
    pub fn set_connected(&self, connected: bool) {
        let was = self.connected.swap(connected, Ordering::SeqCst);
        if was && !connected {
            if let (Some(hub), Some(me)) = (&self.hub, &self.participant_id) {
                hub.disconnect(me);
            }
        }
    }

    /// Deliver an inbound message to every subscriber
    pub fn inject(&self, signal: InboundSignal) {
        self.handlers.dispatch(&signal);
    }

    /// Everything sent so far
    pub fn sent(&self) -> Vec<OutboundSignal> {
        self.sent.lock().clone()
    }

    /// Everything sent so far, clearing the record
    pub fn take_sent(&self) -> Vec<OutboundSignal> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Event names of everything sent so far
    pub fn sent_events(&self) -> Vec<&'static str> {
        self.sent.lock().iter().map(|s| s.event_name()).collect()
    }

    /// Number of sent messages named `event`
    pub fn count_sent(&self, event: &str) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|s| s.event_name() == event)
            .count()
    }

    /// Number of registered handlers
    pub fn subscriber_count(&self) -> usize {
        self.handlers.len()
    }
}

impl SignalingClient for LoopbackSignaling {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn local_participant_id(&self) -> Option<ParticipantId> {
        self.participant_id.clone()
    }

    fn send(&self, signal: OutboundSignal) -> Result<(), SignalingError> {
        if !self.is_connected() {
            return Err(SignalingError::NotConnected);
        }
        debug!("Loopback send {}", signal.event_name());
        self.sent.lock().push(signal.clone());
        if let (Some(hub), Some(me)) = (&self.hub, &self.participant_id) {
            hub.route(me, signal);
        }
        Ok(())
    }

    fn subscribe(&self, handler: SignalHandler) -> SubscriptionId {
        self.handlers.insert(handler)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.handlers.remove(id)
    }
}

#[derive(Debug, Default)]
struct HubInner {
    router: Mutex<RoomRouter>,
    clients: Mutex<HashMap<ParticipantId, Weak<LoopbackSignaling>>>,
}

impl HubInner {
    fn route(&self, from: &ParticipantId, signal: OutboundSignal) {
        let deliveries = self.router.lock().route(from, signal);
        self.deliver(deliveries);
    }

    fn disconnect(&self, participant_id: &ParticipantId) {
        let deliveries = self.router.lock().disconnect(participant_id);
        self.clients.lock().remove(participant_id);
        self.deliver(deliveries);
    }

    fn deliver(&self, deliveries: Vec<Delivery>) {
        for (to, signal) in deliveries {
            let client = self.clients.lock().get(&to).and_then(Weak::upgrade);
            match client {
                Some(client) => client.inject(signal),
                None => debug!("Dropping {} for vanished client {}", signal.event_name(), to),
            }
        }
    }
}

/// In-memory relay connecting several [`LoopbackSignaling`] clients
#[derive(Debug, Clone, Default)]
pub struct LoopbackHub {
    inner: Arc<HubInner>,
}

impl LoopbackHub {
    /// Empty hub
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a client with id `participant_id` and an optional profile
    pub fn connect(
        &self,
        participant_id: impl Into<ParticipantId>,
        profile: Option<ParticipantProfile>,
    ) -> Arc<LoopbackSignaling> {
        let participant_id = participant_id.into();
        if let Some(profile) = profile {
            self.inner
                .router
                .lock()
                .set_profile(participant_id.clone(), profile);
        }
        let client = Arc::new(LoopbackSignaling {
            hub: Some(self.inner.clone()),
            ..LoopbackSignaling::new(participant_id.clone())
        });
        self.inner
            .clients
            .lock()
            .insert(participant_id, Arc::downgrade(&client));
        client
    }

    /// Members currently in `room_id`
    pub fn members(&self, room_id: &meshcall_core::RoomId) -> Vec<ParticipantId> {
        self.inner.router.lock().members(room_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshcall_core::RoomId;

    fn recorder(client: &LoopbackSignaling) -> Arc<Mutex<Vec<InboundSignal>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        client.subscribe(Arc::new(move |s: &InboundSignal| sink.lock().push(s.clone())));
        seen
    }

    #[test]
    fn test_standalone_records_and_injects() {
        let client = LoopbackSignaling::new("me");
        let seen = recorder(&client);

        client
            .send(OutboundSignal::JoinCall {
                room_id: RoomId::from("r"),
                info: None,
            })
            .unwrap();
        assert_eq!(client.sent_events(), vec!["join-call"]);

        client.inject(InboundSignal::ExistingParticipants(vec![]));
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_disconnected_client_refuses_to_send() {
        let client = LoopbackSignaling::anonymous();
        assert!(client.local_participant_id().is_none());
        client.set_connected(false);
        let result = client.send(OutboundSignal::LeaveCall {
            room_id: RoomId::from("r"),
        });
        assert!(matches!(result, Err(SignalingError::NotConnected)));
        assert!(client.sent().is_empty());
    }

    #[test]
    fn test_hub_routes_between_clients() {
        let hub = LoopbackHub::new();
        let alice = hub.connect("alice", Some(ParticipantProfile::named("Alice")));
        let bob = hub.connect("bob", None);
        let alice_seen = recorder(&alice);
        let bob_seen = recorder(&bob);
        let room = RoomId::from("r");

        alice
            .send(OutboundSignal::JoinCall {
                room_id: room.clone(),
                info: None,
            })
            .unwrap();
        bob.send(OutboundSignal::JoinCall {
            room_id: room.clone(),
            info: None,
        })
        .unwrap();

        assert_eq!(hub.members(&room).len(), 2);
        assert!(matches!(
            alice_seen.lock().last(),
            Some(InboundSignal::UserJoined(s)) if s.participant_id == ParticipantId::from("bob")
        ));
        assert!(matches!(
            bob_seen.lock().last(),
            Some(InboundSignal::ExistingParticipants(list)) if list.len() == 1
        ));

        bob.set_connected(false);
        assert!(matches!(
            alice_seen.lock().last(),
            Some(InboundSignal::UserLeft { participant_id }) if participant_id == &ParticipantId::from("bob")
        ));
    }
}
