//! ATIMEFILE - Custom Error Types
//! Defines the error hierarchy for the access-time table.

use thiserror::Error;

/// Custom Result type for the atime table.
pub type Result<T> = std::result::Result<T, AtimeError>;

/// Error types for the atime table and its block stores.
#[derive(Error, Debug)]
pub enum AtimeError {
    /// I/O errors from the backing block store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A block buffer or handle could not be allocated.
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    /// The key has no recorded timestamp.
    #[error("No timestamp recorded for key {key}")]
    NotFound { key: u64 },

    /// A live-count would go negative or exceed the block capacity.
    #[error("Table invariant violated: {0}")]
    InvariantViolation(String),

    /// A block or metadata record failed to decode.
    #[error("Data corruption detected: {0}")]
    Corruption(String),

    /// Table metadata serialization errors.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The timestamp cannot be stored in this table's slot format.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<bincode::Error> for AtimeError {
    fn from(err: bincode::Error) -> Self {
        AtimeError::Serialization(err.to_string())
    }
}
