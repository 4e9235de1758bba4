//! Test doubles shared by the core unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::core::connection::{ConnectionHandle, ConnectionId, Payload};
use crate::core::errors::SendError;

/// How a [`RecordingHandle`] answers sends.
#[derive(Debug, Clone, Copy)]
enum Mode {
    Accept,
    Closed,
    Rejected,
}

/// Handle that records every payload and close request it receives.
#[derive(Debug)]
pub(crate) struct RecordingHandle {
    id: ConnectionId,
    mode: Mode,
    sent: Mutex<Vec<Payload>>,
    closed: AtomicBool,
}

impl RecordingHandle {
    fn with_mode(id: ConnectionId, mode: Mode) -> Arc<Self> {
        Arc::new(Self {
            id,
            mode,
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub(crate) fn new(id: ConnectionId) -> Arc<Self> {
        Self::with_mode(id, Mode::Accept)
    }

    /// A handle whose every send fails as if the peer had gone away.
    pub(crate) fn failing(id: ConnectionId) -> Arc<Self> {
        Self::with_mode(id, Mode::Closed)
    }

    /// A handle whose sends after the first are refused as if its queue were
    /// full.
    pub(crate) fn rejecting(id: ConnectionId) -> Arc<Self> {
        Self::with_mode(id, Mode::Rejected)
    }

    pub(crate) fn id(&self) -> ConnectionId {
        self.id
    }

    pub(crate) fn sent(&self) -> Vec<Payload> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl ConnectionHandle for RecordingHandle {
    fn send(&self, payload: Payload) -> Result<(), SendError> {
        let mut sent = self.sent.lock().unwrap();
        match self.mode {
            Mode::Closed => return Err(SendError::Closed(self.id)),
            Mode::Rejected if !sent.is_empty() => {
                return Err(SendError::Rejected { id: self.id, reason: "queue full".to_string() });
            }
            _ => {}
        }
        sent.push(payload);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
