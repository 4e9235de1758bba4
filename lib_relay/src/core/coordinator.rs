//! # Lifecycle Coordinator
//!
//! Reacts to the four connection events (open, message, close, error) by
//! updating the shared document and driving fan-out through the registry.
//!
//! Every connection goes through exactly two states: **Open** from the moment
//! its open event is handled, and **Closed** (terminal) once its close or
//! error event is handled. A closed connection is absent from the registry and
//! never receives anything again.
//!
//! The coordinator owns both the registry and the document. It takes `&mut
//! self` everywhere and is meant to be driven from one task at a time (see
//! [`crate::core::dispatcher`]), which is what serializes the events.

use std::sync::Arc;

use serde::Serialize;

use crate::core::connection::{ConnectionHandle, ConnectionId, Payload};
use crate::core::document::DocumentStore;
use crate::core::errors::SendError;
use crate::core::registry::{BroadcastReport, ConnectionRegistry};

/// Point-in-time summary of the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RelayStatus {
    /// Connections currently registered.
    pub clients: usize,
    /// Size of the shared document in bytes.
    pub document_bytes: usize,
}

/// # Lifecycle Coordinator
#[derive(Debug, Default)]
pub struct LifecycleCoordinator {
    registry: ConnectionRegistry,
    document: DocumentStore,
}

impl LifecycleCoordinator {
    /// A coordinator with an empty registry and an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// # On Open
    ///
    /// Registers the connection (idempotently) and sends it the current
    /// document as its snapshot. This is the only way a newcomer learns the
    /// shared state.
    pub fn on_open(&mut self, id: ConnectionId, handle: Arc<dyn ConnectionHandle>) {
        let is_new = !self.registry.contains(id);
        let client = self.registry.register(id, handle);
        if is_new {
            log::info!("Client '{}' connected ({} online)", id, self.registry.len());
        }

        if let Err(e) = client.send(self.document.get()) {
            log::warn!("Snapshot delivery to '{}' failed: {}", id, e);
            if matches!(e, SendError::Rejected { .. }) {
                self.evict(id);
            }
        }
    }

    /// # On Message
    ///
    /// Replaces the document with `content`, then forwards `content` to every
    /// other registered connection. No validation or size check happens here.
    /// Delivery failures are logged and neither retried nor rolled back.
    /// A recipient whose queue rejected the payload is evicted: unregistered
    /// and force-closed. Recipients whose queue is already gone are left for
    /// their own close event.
    pub fn on_message(&mut self, id: ConnectionId, content: Payload) -> BroadcastReport {
        log::debug!("Client '{}' replaced the document ({} bytes)", id, content.len());
        self.document.set(content.clone());

        let report = self.registry.broadcast(&content, id);
        for failure in &report.failures {
            log::warn!("Relay from '{}' to '{}' failed: {}", id, failure.id, failure.error);
            if matches!(failure.error, SendError::Rejected { .. }) {
                self.evict(failure.id);
            }
        }
        report
    }

    /// # On Close
    ///
    /// Forgets the connection. Nobody else is notified.
    pub fn on_close(&mut self, id: ConnectionId) {
        if self.registry.unregister(id).is_some() {
            log::info!("Client '{}' disconnected ({} online)", id, self.registry.len());
        }
    }

    /// # On Error
    ///
    /// Forgets the connection and force-closes its transport handle, whatever
    /// the error was. Other connections are unaffected.
    pub fn on_error(&mut self, id: ConnectionId, error: &str) {
        log::warn!("Client '{}' failed: {}. Closing connection.", id, error);
        match self.registry.unregister(id) {
            Some(client) => client.close(),
            None => log::debug!("Client '{}' was not registered; nothing to close", id),
        }
    }

    fn evict(&mut self, id: ConnectionId) {
        if let Some(client) = self.registry.unregister(id) {
            log::warn!("Evicting slow client '{}' ({} online)", id, self.registry.len());
            client.close();
        }
    }

    /// Force-closes and forgets every connection. The document is kept.
    pub fn shutdown(&mut self) {
        let clients = self.registry.drain();
        if !clients.is_empty() {
            log::info!("Closing {} client connection(s)", clients.len());
        }
        for client in clients {
            client.close();
        }
    }

    /// Current client count and document size.
    pub fn status(&self) -> RelayStatus {
        RelayStatus {
            clients: self.registry.len(),
            document_bytes: self.document.len(),
        }
    }

    /// Read access to the registry.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Read access to the document.
    pub fn document(&self) -> &DocumentStore {
        &self.document
    }
}
