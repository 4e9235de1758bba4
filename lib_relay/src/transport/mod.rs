//! # Transport Module
//!
//! Adapters that turn real sockets into lifecycle events. Only websockets are
//! provided; each upgraded socket becomes one connection of the relay.

/// Axum websocket router and per-socket session handling.
pub mod websocket;

pub use websocket::{router, serve};
