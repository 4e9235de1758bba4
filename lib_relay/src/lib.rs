//! # lib_relay
//!
//! Building blocks for a real-time collaborative-state relay: many websocket
//! connections share one mutable document, and every update from one
//! connection is fanned out verbatim to all the others.
//!
//! Modules are gated by cargo features so that the lifecycle engine can be
//! pulled in without the web stack:
//!
//! - **`core`**: connection registry, shared document, lifecycle coordinator.
//! - **`loggers`**: console and file logging with rotation.
//! - **`transport`**: axum websocket transport driving the coordinator.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Connection lifecycle engine.
#[cfg(feature = "core")]
pub mod core;

/// Logging setup and log file rotation.
#[cfg(feature = "loggers")]
pub mod loggers;

/// Websocket transport for the lifecycle engine.
#[cfg(feature = "transport")]
pub mod transport;
