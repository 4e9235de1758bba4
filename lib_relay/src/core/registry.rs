//! # Connection Registry
//!
//! The live mapping from connection identifier to registered client. Whoever
//! is in here receives broadcasts; whoever is not, does not.
//!
//! The registry is a plain owned structure with no interior locking. It is
//! owned by the lifecycle coordinator, which runs inside a single task, so
//! every mutation is already serialized.

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::connection::{ConnectionHandle, ConnectionId, Payload};
use crate::core::errors::SendError;

/// # Registered Client
///
/// One open connection as seen by the engine: its identifier plus the handle
/// used to reach it. Cloning shares the same handle.
#[derive(Debug, Clone)]
pub struct RegisteredClient {
    id: ConnectionId,
    handle: Arc<dyn ConnectionHandle>,
}

impl RegisteredClient {
    /// The identifier this client was registered under.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues `payload` for this client only.
    pub fn send(&self, payload: Payload) -> Result<(), SendError> {
        self.handle.send(payload)
    }

    /// Forces this client's transport channel closed.
    pub fn close(&self) {
        self.handle.close();
    }
}

/// A recipient that could not be reached during a broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    /// The client the send was attempted for.
    pub id: ConnectionId,
    /// Why the send failed.
    pub error: SendError,
}

/// # Broadcast Report
///
/// Outcome of one fan-out. A broadcast as a whole never fails; individual
/// recipients either got the payload queued or show up in `failures`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Clients the payload was queued for.
    pub delivered: Vec<ConnectionId>,
    /// Clients the payload could not be queued for.
    pub failures: Vec<DeliveryFailure>,
}

impl BroadcastReport {
    /// Number of clients the broadcast targeted.
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failures.len()
    }
}

/// # Connection Registry
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    clients: HashMap<ConnectionId, RegisteredClient>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// # Register
    ///
    /// Adds a client for `id`, or returns the one already registered under
    /// `id`. In the latter case the existing entry is left untouched and
    /// `handle` is dropped.
    pub fn register(&mut self, id: ConnectionId, handle: Arc<dyn ConnectionHandle>) -> RegisteredClient {
        self.clients
            .entry(id)
            .or_insert_with(|| {
                log::debug!("Client '{}' registered", id);
                RegisteredClient { id, handle }
            })
            .clone()
    }

    /// Removes the client for `id`, if any, and hands it back so the caller
    /// can close it. Unknown identifiers are ignored.
    pub fn unregister(&mut self, id: ConnectionId) -> Option<RegisteredClient> {
        let removed = self.clients.remove(&id);
        if removed.is_some() {
            log::debug!("Client '{}' unregistered", id);
        }
        removed
    }

    /// # Broadcast
    ///
    /// Queues `content` for every registered client except `exclude`.
    ///
    /// Each send is independent: a client whose send fails is recorded in the
    /// report and the loop moves on. Failed clients stay registered; the
    /// caller decides what to do with them. Recipient order is
    /// whatever the map yields.
    pub fn broadcast(&self, content: &Payload, exclude: ConnectionId) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for client in self.clients.values().filter(|c| c.id != exclude) {
            match client.send(content.clone()) {
                Ok(()) => report.delivered.push(client.id),
                Err(error) => report.failures.push(DeliveryFailure { id: client.id, error }),
            }
        }

        report
    }

    /// The client registered under `id`.
    pub fn get(&self, id: ConnectionId) -> Option<&RegisteredClient> {
        self.clients.get(&id)
    }

    /// Whether `id` is currently registered.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.clients.contains_key(&id)
    }

    /// Identifiers of all registered clients, in no particular order.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.clients.keys().copied().collect()
    }

    /// Number of registered clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// `true` when nobody is registered.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Removes and returns every client.
    pub fn drain(&mut self) -> Vec<RegisteredClient> {
        self.clients.drain().map(|(_, client)| client).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_support::RecordingHandle;

    fn id(n: u64) -> ConnectionId {
        ConnectionId::new(n)
    }

    #[test]
    fn register_is_idempotent() {
        let mut registry = ConnectionRegistry::new();
        let first = RecordingHandle::new(id(1));
        let second = RecordingHandle::new(id(1));

        registry.register(id(1), first.clone());
        let again = registry.register(id(1), second.clone());
        assert_eq!(registry.len(), 1);

        again.send(Payload::from("x")).unwrap();
        assert_eq!(first.sent(), vec![Payload::from("x")]);
        assert!(second.sent().is_empty());
    }

    #[test]
    fn unregister_unknown_is_a_no_op() {
        let mut registry = ConnectionRegistry::new();
        registry.register(id(1), RecordingHandle::new(id(1)));

        assert!(registry.unregister(id(99)).is_none());
        assert_eq!(registry.len(), 1);

        let removed = registry.unregister(id(1)).expect("client 1 was registered");
        assert_eq!(removed.id(), id(1));
        assert!(registry.is_empty());
        assert!(registry.unregister(id(1)).is_none());
    }

    #[test]
    fn reregister_after_unregister_uses_the_new_handle() {
        let mut registry = ConnectionRegistry::new();
        let old = RecordingHandle::new(id(5));
        let new = RecordingHandle::new(id(5));

        registry.register(id(5), old.clone());
        registry.unregister(id(5));
        registry.register(id(5), new.clone());

        registry.broadcast(&Payload::from("hello"), id(0));
        assert!(old.sent().is_empty());
        assert_eq!(new.sent(), vec![Payload::from("hello")]);
    }

    #[test]
    fn broadcast_skips_the_excluded_client_and_reaches_everyone_else_once() {
        let mut registry = ConnectionRegistry::new();
        let handles: Vec<_> = (1..=4).map(|n| RecordingHandle::new(id(n))).collect();
        for h in &handles {
            registry.register(h.id(), h.clone());
        }

        let report = registry.broadcast(&Payload::from("buy milk"), id(2));

        assert_eq!(report.attempted(), 3);
        assert!(report.failures.is_empty());
        let mut delivered = report.delivered.clone();
        delivered.sort();
        assert_eq!(delivered, vec![id(1), id(3), id(4)]);

        for h in &handles {
            let expected = if h.id() == id(2) { vec![] } else { vec![Payload::from("buy milk")] };
            assert_eq!(h.sent(), expected, "unexpected deliveries for {}", h.id());
        }
    }

    #[test]
    fn failing_recipient_does_not_stop_the_fan_out() {
        let mut registry = ConnectionRegistry::new();
        let healthy_a = RecordingHandle::new(id(1));
        let broken = RecordingHandle::failing(id(2));
        let healthy_b = RecordingHandle::new(id(3));
        registry.register(id(1), healthy_a.clone());
        registry.register(id(2), broken.clone());
        registry.register(id(3), healthy_b.clone());

        let report = registry.broadcast(&Payload::from("eggs"), id(0));

        assert_eq!(report.delivered.len(), 2);
        assert_eq!(
            report.failures,
            vec![DeliveryFailure { id: id(2), error: SendError::Closed(id(2)) }]
        );
        assert_eq!(healthy_a.sent(), vec![Payload::from("eggs")]);
        assert_eq!(healthy_b.sent(), vec![Payload::from("eggs")]);
        // Failed recipients are left for the transport to tear down.
        assert!(registry.contains(id(2)));
    }

    #[test]
    fn drain_empties_the_registry() {
        let mut registry = ConnectionRegistry::new();
        registry.register(id(1), RecordingHandle::new(id(1)));
        registry.register(id(2), RecordingHandle::new(id(2)));

        let mut drained: Vec<_> = registry.drain().iter().map(RegisteredClient::id).collect();
        drained.sort();
        assert_eq!(drained, vec![id(1), id(2)]);
        assert!(registry.is_empty());
    }
}
