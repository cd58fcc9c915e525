//! Error types for index storage.

use thiserror::Error;

/// Result type alias using StoreError.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by index stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}
