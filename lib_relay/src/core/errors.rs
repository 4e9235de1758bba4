//! Error types for the lifecycle engine.

use thiserror::Error;

use crate::core::connection::ConnectionId;

/// A payload could not be handed to a connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The connection's outbound queue is gone, usually because its writer
    /// task finished after the socket went away.
    #[error("connection {0} is closed")]
    Closed(ConnectionId),

    /// The transport refused the payload for its own reasons.
    #[error("transport rejected payload for {id}: {reason}")]
    Rejected {
        /// Recipient of the failed send.
        id: ConnectionId,
        /// Transport-provided description.
        reason: String,
    },
}

/// The lifecycle coordinator task can no longer accept events.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    /// The coordinator loop has exited (shutdown or all handles dropped).
    #[error("lifecycle coordinator is no longer running")]
    Stopped,
}
