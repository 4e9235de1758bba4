//! # Connection Contract
//!
//! The minimal surface the lifecycle engine needs from a transport: a stable
//! identifier per connection, an opaque payload type, and a handle that can
//! push bytes to a connection or force it closed.
//!
//! `ChannelHandle` is the stock implementation. Like the per-client queues of a
//! fan-out dispatcher, each connection owns a bounded MPSC channel whose
//! receiving half is drained by a dedicated writer task. Sending never waits on
//! the socket, so a slow peer cannot stall the lifecycle loop. A peer that
//! stops reading fills its queue, after which sends are rejected instead of
//! piling up stale documents.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio_util::sync::CancellationToken;

use crate::core::errors::SendError;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Outbound items a connection may have pending before sends are rejected.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 64;

/// # Connection Identifier
///
/// Stable identifier for one transport-level channel. Unique for the lifetime
/// of the process, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wraps a raw identifier. Transports normally use [`ConnectionId::next`].
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Allocates the next identifier from the process-wide counter.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// # Payload
///
/// An opaque, immutable message body. The relay never looks inside it; the
/// only thing preserved besides the bytes is whether the peer sent it as text
/// or binary, so it can be forwarded in the same form.
///
/// Cloning shares the underlying buffer, so fanning one payload out to many
/// connections does not copy it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// UTF-8 text.
    Text(Arc<str>),
    /// Arbitrary bytes.
    Binary(Bytes),
}

impl Payload {
    /// The empty text value the shared document starts with.
    pub fn empty() -> Self {
        Payload::Text(Arc::from(""))
    }

    /// Raw bytes of the payload, regardless of kind.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Text(text) => text.as_bytes(),
            Payload::Binary(bytes) => bytes.as_ref(),
        }
    }

    /// Text content, or `None` for binary payloads.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(&**text),
            Payload::Binary(_) => None,
        }
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// `true` when the payload carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Payload {
    fn default() -> Self {
        Payload::empty()
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(Arc::from(text))
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(Arc::from(text))
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Payload::Binary(bytes)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Binary(Bytes::from(bytes))
    }
}

/// # Connection Handle
///
/// Non-owning access to a transport channel. The transport owns the socket;
/// the engine only keeps one of these per registered connection.
///
/// Both operations must return promptly. `send` reports a failure instead of
/// retrying, and `close` is fire-and-forget.
pub trait ConnectionHandle: Send + Sync + fmt::Debug {
    /// Queues `payload` for delivery to this connection.
    fn send(&self, payload: Payload) -> Result<(), SendError>;

    /// Forces the underlying channel closed.
    fn close(&self);
}

/// Work item for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Write the payload to the socket.
    Deliver(Payload),
    /// Send a close frame and stop writing.
    Close,
}

/// # Channel Handle
///
/// [`ConnectionHandle`] backed by a bounded MPSC channel. The matching
/// [`OutboundQueue`] is handed to whichever task writes to the real socket.
///
/// `close` normally queues [`Outbound::Close`] behind pending deliveries. When
/// the queue is full it signals the writer out of band instead, and whatever
/// is still queued is abandoned.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    id: ConnectionId,
    sender: mpsc::Sender<Outbound>,
    force_close: CancellationToken,
}

impl ChannelHandle {
    /// Creates a handle for `id` with [`DEFAULT_OUTBOUND_CAPACITY`], along with
    /// the queue its writer drains.
    pub fn new(id: ConnectionId) -> (Self, OutboundQueue) {
        Self::with_capacity(id, DEFAULT_OUTBOUND_CAPACITY)
    }

    /// Like [`ChannelHandle::new`] with room for `capacity` pending items
    /// (at least one).
    pub fn with_capacity(id: ConnectionId, capacity: usize) -> (Self, OutboundQueue) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let force_close = CancellationToken::new();
        let queue = OutboundQueue {
            receiver,
            force_close: force_close.clone(),
            finished: false,
        };
        (Self { id, sender, force_close }, queue)
    }

    /// The connection this handle writes to.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl ConnectionHandle for ChannelHandle {
    fn send(&self, payload: Payload) -> Result<(), SendError> {
        self.sender.try_send(Outbound::Deliver(payload)).map_err(|e| match e {
            TrySendError::Full(_) => SendError::Rejected {
                id: self.id,
                reason: format!("outbound queue full (capacity {})", self.sender.max_capacity()),
            },
            TrySendError::Closed(_) => SendError::Closed(self.id),
        })
    }

    fn close(&self) {
        match self.sender.try_send(Outbound::Close) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.force_close.cancel(),
            // The writer is already gone; nothing left to close.
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

/// # Outbound Queue
///
/// Receiving side of a [`ChannelHandle`]. Yields [`Outbound::Close`] at most
/// once and nothing after it.
#[derive(Debug)]
pub struct OutboundQueue {
    receiver: mpsc::Receiver<Outbound>,
    force_close: CancellationToken,
    finished: bool,
}

impl OutboundQueue {
    /// Waits for the next item. `None` once the handle is dropped or a close
    /// has been handed out.
    pub async fn recv(&mut self) -> Option<Outbound> {
        if self.finished {
            return None;
        }
        let item = tokio::select! {
            biased;
            _ = self.force_close.cancelled() => Some(Outbound::Close),
            item = self.receiver.recv() => item,
        };
        self.track(item)
    }

    /// Takes the next item without waiting.
    pub fn try_recv(&mut self) -> Result<Outbound, TryRecvError> {
        if self.finished {
            return Err(TryRecvError::Disconnected);
        }
        if self.force_close.is_cancelled() {
            return self.track(Some(Outbound::Close)).ok_or(TryRecvError::Disconnected);
        }
        let item = self.receiver.try_recv()?;
        self.track(Some(item)).ok_or(TryRecvError::Disconnected)
    }

    fn track(&mut self, item: Option<Outbound>) -> Option<Outbound> {
        if matches!(item, None | Some(Outbound::Close)) {
            self.finished = true;
            self.receiver.close();
        }
        item
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_ids_are_unique_and_displayed() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert_eq!(ConnectionId::new(7).to_string(), "conn-7");
    }

    #[test]
    fn payload_kinds_keep_their_bytes() {
        let text = Payload::from("buy milk");
        assert_eq!(text.as_text(), Some("buy milk"));
        assert_eq!(text.len(), 8);

        let binary = Payload::from(vec![0u8, 159, 146, 150]);
        assert_eq!(binary.as_text(), None);
        assert_eq!(binary.as_bytes(), &[0u8, 159, 146, 150]);

        assert!(Payload::default().is_empty());
        assert_eq!(Payload::default(), Payload::from(""));
    }

    #[test]
    fn channel_handle_queues_and_reports_closed_receiver() {
        let id = ConnectionId::new(42);
        let (handle, mut rx) = ChannelHandle::new(id);

        handle.send(Payload::from("eggs")).unwrap();
        handle.close();
        assert_eq!(rx.try_recv().unwrap(), Outbound::Deliver(Payload::from("eggs")));
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close);

        drop(rx);
        assert_eq!(handle.send(Payload::from("late")), Err(SendError::Closed(id)));
        // Closing an already-dropped channel is silent.
        handle.close();
    }

    #[test]
    fn stalled_reader_turns_into_rejected_sends() {
        let id = ConnectionId::new(9);
        let (handle, mut rx) = ChannelHandle::with_capacity(id, 2);

        handle.send(Payload::from("v1")).unwrap();
        handle.send(Payload::from("v2")).unwrap();
        assert!(matches!(
            handle.send(Payload::from("v3")),
            Err(SendError::Rejected { id: rejected, .. }) if rejected == id
        ));

        // Closing a full queue skips the backlog.
        handle.close();
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close);
        assert!(rx.try_recv().is_err());
        assert_eq!(handle.send(Payload::from("v4")), Err(SendError::Closed(id)));
    }

    #[tokio::test]
    async fn queue_ends_after_close_or_when_handle_drops() {
        let (handle, mut rx) = ChannelHandle::new(ConnectionId::new(10));
        handle.send(Payload::from("last")).unwrap();
        handle.close();
        handle.send(Payload::from("too late")).ok();

        assert_eq!(rx.recv().await, Some(Outbound::Deliver(Payload::from("last"))));
        assert_eq!(rx.recv().await, Some(Outbound::Close));
        assert_eq!(rx.recv().await, None);

        let (handle, mut rx) = ChannelHandle::new(ConnectionId::new(11));
        drop(handle);
        assert_eq!(rx.recv().await, None);
    }
}
