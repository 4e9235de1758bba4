//! # Document Store
//!
//! Holds the one shared value every connection converges on. There is no
//! version, history, or structure: each accepted message replaces the whole
//! value (last write wins).

use crate::core::connection::Payload;

/// The process-wide shared document.
#[derive(Debug, Default)]
pub struct DocumentStore {
    current: Payload,
}

impl DocumentStore {
    /// Creates a store holding the empty text value.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with `initial`.
    pub fn with_value(initial: Payload) -> Self {
        Self { current: initial }
    }

    /// The current value. Cheap: the payload buffer is shared, not copied.
    pub fn get(&self) -> Payload {
        self.current.clone()
    }

    /// Replaces the current value unconditionally.
    pub fn set(&mut self, value: Payload) {
        self.current = value;
    }

    /// Size of the current value in bytes.
    pub fn len(&self) -> usize {
        self.current.len()
    }

    /// `true` while the document holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }
}
