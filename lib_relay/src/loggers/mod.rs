//! # Loggers
//!
//! Process-wide logging for the relay binaries. Library code only ever uses
//! the `log` macros; this module installs the backend.

/// Console and file logging through `fern`, plus log file rotation.
pub mod loggerlocal;

pub use loggerlocal::{parse_level, rotate_logs, setup_logging};
