//! Core error types for `SkyPanel`.

use thiserror::Error;

/// Core error type for `SkyPanel` operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Identity was empty or otherwise unusable.
    #[error("Invalid identity: {0:?}")]
    InvalidIdentity(String),

    /// Timestamp could not be parsed as RFC 3339.
    #[error("Invalid timestamp {value:?}: {reason}")]
    InvalidTimestamp {
        /// The raw value that failed to parse.
        value: String,
        /// Parser message.
        reason: String,
    },

    /// Invalid data from an API response.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
