//! Store error type.

use haggle_core::GatewayError;

/// Errors raised by the `SQLite` store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// `SQLite` rejected a statement or could not open the file.
    #[error("database error: {0}")]
    Database(String),

    /// A referenced row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Filesystem failure while preparing the database location.
    #[error("IO error: {0}")]
    Io(String),

    /// The blocking worker running a query panicked or was cancelled.
    #[error("worker error: {0}")]
    Worker(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        StoreError::Worker(e.to_string())
    }
}

impl From<StoreError> for GatewayError {
    fn from(e: StoreError) -> Self {
        GatewayError::Storage(e.to_string())
    }
}
