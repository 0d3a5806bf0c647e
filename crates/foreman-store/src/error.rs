//! Error types for the store.

use thiserror::Error;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Schedule failed validation at the creation boundary.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Override expiry is not in the future.
    #[error("invalid override: {0}")]
    InvalidOverride(String),

    /// The backing store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
