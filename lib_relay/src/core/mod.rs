//! # Core Engine Module
//!
//! The connection-lifecycle engine of the relay. Everything in here is
//! transport-agnostic: a transport only needs to hand out [`ConnectionId`]s,
//! implement [`ConnectionHandle`], and feed events to a [`CoordinatorHandle`].
//!
//! ## Core Components:
//!
//! - **`connection`**: identifiers, the opaque `Payload`, the
//!   `ConnectionHandle` contract, and the channel-backed handle.
//!
//! - **`registry`**: who is currently connected, and fan-out to all of them
//!   except the sender.
//!
//! - **`document`**: the single shared value, replaced wholesale by every
//!   message.
//!
//! - **`coordinator`**: the open/message/close/error state machine tying the
//!   registry and document together.
//!
//! - **`dispatcher`**: the single task that owns the coordinator and applies
//!   events in arrival order.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Connection identifiers, payloads, and transport handles.
pub mod connection;
/// The lifecycle state machine.
pub mod coordinator;
/// The event loop owning the coordinator.
pub mod dispatcher;
/// The shared document.
pub mod document;
/// Error types.
pub mod errors;
/// The live connection registry and fan-out.
pub mod registry;

#[cfg(test)]
pub(crate) mod test_support;

// --- Public API Re-exports ---
pub use connection::{
    ChannelHandle, ConnectionHandle, ConnectionId, Outbound, OutboundQueue, Payload, DEFAULT_OUTBOUND_CAPACITY,
};
pub use coordinator::{LifecycleCoordinator, RelayStatus};
pub use dispatcher::{spawn, CoordinatorHandle, LifecycleEvent};
pub use document::DocumentStore;
pub use errors::{CoordinatorError, SendError};
pub use registry::{BroadcastReport, ConnectionRegistry, DeliveryFailure, RegisteredClient};
