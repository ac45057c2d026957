//! Signaling client contract
//!
//! A [`SignalingClient`] is the orchestrator's only link to the room: it
//! sends [`OutboundSignal`]s and hands every [`InboundSignal`] to the
//! handlers registered with [`SignalingClient::subscribe`]. Handlers are
//! called on whatever task delivers the message, so they should only
//! enqueue work.

use crate::error::SignalingError;
use crate::protocol::{InboundSignal, OutboundSignal};
use dashmap::DashMap;
use meshcall_core::ParticipantId;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Callback receiving every inbound signal
pub type SignalHandler = Arc<dyn Fn(&InboundSignal) + Send + Sync>;

/// Handle returned by [`SignalingClient::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// Bidirectional event channel to the room
pub trait SignalingClient: Send + Sync {
    /// Whether messages can currently be sent
    fn is_connected(&self) -> bool;

    /// This connection's participant id, once the relay has assigned one
    fn local_participant_id(&self) -> Option<ParticipantId>;

    /// Queue a message for the relay
    fn send(&self, signal: OutboundSignal) -> Result<(), SignalingError>;

    /// Register a handler for inbound messages
    fn subscribe(&self, handler: SignalHandler) -> SubscriptionId;

    /// Remove a handler; returns whether it was registered
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

/// Owned table of inbound handlers
#[derive(Default)]
pub struct HandlerTable {
    handlers: DashMap<SubscriptionId, SignalHandler>,
    next_id: AtomicU64,
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerTable")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl HandlerTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler
    pub fn insert(&self, handler: SignalHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.insert(id, handler);
        id
    }

    /// Remove a handler
    pub fn remove(&self, id: SubscriptionId) -> bool {
        self.handlers.remove(&id).is_some()
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is registered
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Deliver `signal` to every handler, in subscription order
    pub fn dispatch(&self, signal: &InboundSignal) {
        // snapshot first so a handler may (un)subscribe without deadlocking the map
        let mut handlers: Vec<(SubscriptionId, SignalHandler)> = self
            .handlers
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        handlers.sort_by_key(|(id, _)| *id);

        trace!(
            "Dispatching {} to {} handler(s)",
            signal.event_name(),
            handlers.len()
        );
        for (_, handler) in handlers {
            handler(signal);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_dispatch_reaches_every_handler_once() {
        let table = HandlerTable::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = seen.clone();
        let a = table.insert(Arc::new(move |s: &InboundSignal| {
            first.lock().push(("a", s.event_name()))
        }));
        let second = seen.clone();
        table.insert(Arc::new(move |s: &InboundSignal| {
            second.lock().push(("b", s.event_name()))
        }));

        table.dispatch(&InboundSignal::UserLeft {
            participant_id: ParticipantId::from("x"),
        });
        assert_eq!(*seen.lock(), vec![("a", "user-left"), ("b", "user-left")]);

        assert!(table.remove(a));
        assert!(!table.remove(a));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_handler_may_unsubscribe_itself() {
        let table = Arc::new(HandlerTable::new());
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));

        let weak = Arc::downgrade(&table);
        let own = slot.clone();
        let id = table.insert(Arc::new(move |_s: &InboundSignal| {
            if let (Some(table), Some(id)) = (weak.upgrade(), *own.lock()) {
                table.remove(id);
            }
        }));
        *slot.lock() = Some(id);

        table.dispatch(&InboundSignal::UserLeft {
            participant_id: ParticipantId::from("x"),
        });
        assert!(table.is_empty());
    }
}
