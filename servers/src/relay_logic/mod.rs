//! Binary-side plumbing for `server_relay`.

pub mod config;
