//! Error taxonomy shared by the storage, notification, and kernel layers.

use thiserror::Error;

/// Errors returned by the JSON path storage engine.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("malformed path: {0}")]
    InvalidPath(String),
    #[error("logical database {0:?} not found")]
    NotFound(String),
    #[error("logical database {0:?} already exists")]
    AlreadyExists(String),
    #[error("storage has been closed")]
    ClosedStore,
    #[error("subscription closed")]
    SubscriptionClosed,
    #[error("storage failure: {0}")]
    StoreFailure(String),
}

/// Convenience result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;
