//! Error kinds for queue operations.
//!
//! "Nothing to claim" and "no such item" are not errors: they come back as
//! `None` or `false`. What does come back as an error is anything that
//! means the queue's view of the world may now be wrong, and those always
//! reach the caller.

use docqueue_core::models::UnknownStatus;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The backing store failed (connection, lock timeout, constraint...).
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    /// The persisted schema exists but does not match what this build expects.
    #[error("incompatible schema: {0}")]
    IncompatibleSchema(String),

    /// A structured column could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A status column held a value this build does not recognise.
    #[error("invalid status in store: {0}")]
    InvalidStatus(#[from] UnknownStatus),
}

pub type QueueResult<T> = Result<T, QueueError>;
