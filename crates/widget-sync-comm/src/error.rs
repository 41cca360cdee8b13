//! Error types for the comm layer.

use thiserror::Error;

use crate::types::ModelId;

/// Errors that can occur on a comm channel.
#[derive(Debug, Error)]
pub enum CommError {
    /// The channel was closed locally or by the peer.
    #[error("comm {0} is closed")]
    Closed(ModelId),

    /// The other end of the channel went away without a close.
    #[error("comm {0} disconnected")]
    Disconnected(ModelId),

    /// Message did not match any known shape.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// JSON (de)serialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for comm operations.
pub type Result<T> = std::result::Result<T, CommError>;
