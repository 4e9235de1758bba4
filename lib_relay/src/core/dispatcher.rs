//! # Lifecycle Event Dispatcher
//!
//! Funnels connection events from any number of transport tasks into a single
//! loop that exclusively owns the [`LifecycleCoordinator`]. Because only this
//! loop ever touches the registry and the document, neither needs a lock, and
//! every event sees the effects of all events processed before it.
//!
//! ## Ordering
//!
//! Events travel over one unbounded MPSC channel. Events from one connection
//! are therefore handled in the order that connection produced them; events
//! from different connections are handled in channel-arrival order. Last write
//! wins according to that order.
//!
//! ## Backpressure
//!
//! None at this layer. Outbound sends go through [`ConnectionHandle`]s that
//! queue without waiting, so the loop never blocks on a slow socket. A
//! connection whose queue is full gets evicted by the coordinator.
//!
//! ## Shutdown
//!
//! The loop exits when its `CancellationToken` fires or every
//! [`CoordinatorHandle`] has been dropped. On exit it force-closes all
//! remaining connections and hands the coordinator back through the
//! `JoinHandle`.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::connection::{ConnectionHandle, ConnectionId, Payload};
use crate::core::coordinator::{LifecycleCoordinator, RelayStatus};
use crate::core::errors::CoordinatorError;

/// An event delivered by the transport to the coordinator loop.
#[derive(Debug)]
pub enum LifecycleEvent {
    /// A connection finished its handshake.
    Open {
        /// The new connection.
        id: ConnectionId,
        /// How to reach it.
        handle: Arc<dyn ConnectionHandle>,
    },
    /// A connection sent an application message.
    Message {
        /// The sender.
        id: ConnectionId,
        /// The message body, taken as the new document.
        payload: Payload,
    },
    /// A connection closed normally.
    Close {
        /// The closed connection.
        id: ConnectionId,
    },
    /// The transport reported an error on a connection.
    Error {
        /// The failed connection.
        id: ConnectionId,
        /// Transport-provided description.
        error: String,
    },
    /// Request for the current [`RelayStatus`].
    Status {
        /// Where to send the answer.
        responder: oneshot::Sender<RelayStatus>,
    },
}

/// # Coordinator Handle
///
/// Cloneable sender side of the coordinator loop. Every transport task holds
/// one. All methods return immediately except [`CoordinatorHandle::status`],
/// which waits for the loop to answer.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    events: mpsc::UnboundedSender<LifecycleEvent>,
}

impl CoordinatorHandle {
    /// Reports a newly opened connection.
    pub fn open(&self, id: ConnectionId, handle: Arc<dyn ConnectionHandle>) -> Result<(), CoordinatorError> {
        self.dispatch(LifecycleEvent::Open { id, handle })
    }

    /// Reports a message received from `id`.
    pub fn message(&self, id: ConnectionId, payload: Payload) -> Result<(), CoordinatorError> {
        self.dispatch(LifecycleEvent::Message { id, payload })
    }

    /// Reports that `id` closed.
    pub fn close(&self, id: ConnectionId) -> Result<(), CoordinatorError> {
        self.dispatch(LifecycleEvent::Close { id })
    }

    /// Reports a transport error on `id`.
    pub fn error(&self, id: ConnectionId, error: impl Into<String>) -> Result<(), CoordinatorError> {
        self.dispatch(LifecycleEvent::Error { id, error: error.into() })
    }

    /// Asks the loop for the current client count and document size.
    pub async fn status(&self) -> Result<RelayStatus, CoordinatorError> {
        let (responder, answer) = oneshot::channel();
        self.dispatch(LifecycleEvent::Status { responder })?;
        answer.await.map_err(|_| CoordinatorError::Stopped)
    }

    /// `false` once the loop has exited.
    pub fn is_running(&self) -> bool {
        !self.events.is_closed()
    }

    fn dispatch(&self, event: LifecycleEvent) -> Result<(), CoordinatorError> {
        self.events.send(event).map_err(|_| CoordinatorError::Stopped)
    }
}

/// # Spawn
///
/// Starts the coordinator loop on the current Tokio runtime.
///
/// Returns the handle transports use to feed it events, and a `JoinHandle`
/// resolving to the coordinator once the loop has stopped.
pub fn spawn(
    coordinator: LifecycleCoordinator,
    shutdown: CancellationToken,
) -> (CoordinatorHandle, JoinHandle<LifecycleCoordinator>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(coordinator, rx, shutdown));
    (CoordinatorHandle { events: tx }, task)
}

async fn run(
    mut coordinator: LifecycleCoordinator,
    mut events: mpsc::UnboundedReceiver<LifecycleEvent>,
    shutdown: CancellationToken,
) -> LifecycleCoordinator {
    log::info!("Lifecycle coordinator started");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                log::info!("Lifecycle coordinator received shutdown signal");
                break;
            }
            event = events.recv() => match event {
                Some(event) => apply(&mut coordinator, event),
                None => {
                    log::info!("All coordinator handles dropped");
                    break;
                }
            }
        }
    }

    // Refuse further events before tearing connections down.
    events.close();
    coordinator.shutdown();
    log::info!("Lifecycle coordinator stopped");
    coordinator
}

fn apply(coordinator: &mut LifecycleCoordinator, event: LifecycleEvent) {
    match event {
        LifecycleEvent::Open { id, handle } => coordinator.on_open(id, handle),
        LifecycleEvent::Message { id, payload } => {
            coordinator.on_message(id, payload);
        }
        LifecycleEvent::Close { id } => coordinator.on_close(id),
        LifecycleEvent::Error { id, error } => coordinator.on_error(id, &error),
        LifecycleEvent::Status { responder } => {
            // The requester may have given up waiting.
            let _ = responder.send(coordinator.status());
        }
    }
}
