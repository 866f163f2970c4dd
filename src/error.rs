//! Error types for the observable map.

use crate::types::ValueKind;
use thiserror::Error;

/// Main error type for map operations.
#[derive(Debug, Error)]
pub enum MapError {
    /// A value's kind differs from the kind pinned for its key.
    ///
    /// `key` holds the key's `Debug` text, so a `String` key `x` reads as
    /// `"x"` with the quotes.
    #[error("Type conflict for key {key}: expected {expected}, got {actual}")]
    TypeConflict {
        key: String,
        expected: ValueKind,
        actual: ValueKind,
    },

    #[error("Update stream is closed")]
    ClosedStream,

    /// `update` hit an absent key. `key` holds the key's `Debug` text.
    #[error("Key {key} is absent and no if-absent handler was supplied")]
    MissingAbsentHandler { key: String },

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl MapError {
    pub(crate) fn type_conflict<K: std::fmt::Debug>(
        key: &K,
        expected: ValueKind,
        actual: ValueKind,
    ) -> Self {
        MapError::TypeConflict {
            key: format!("{:?}", key),
            expected,
            actual,
        }
    }
}

impl From<serde_json::Error> for MapError {
    fn from(e: serde_json::Error) -> Self {
        MapError::Serialization(e.to_string())
    }
}

/// Result type for map operations.
pub type Result<T> = std::result::Result<T, MapError>;
