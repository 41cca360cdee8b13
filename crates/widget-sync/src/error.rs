//! Error types for the sync engine.

use thiserror::Error;
use widget_sync_comm::{CommError, ModelId};

/// Errors that can occur while syncing a model.
#[derive(Debug, Error)]
pub enum WidgetError {
    /// A flush was requested but no channel is bound to the model.
    #[error("model {0} has no channel to send on")]
    NoChannel(ModelId),

    /// An attribute encoder rejected a value.
    #[error("could not encode attribute '{attribute}': {reason}")]
    Encode { attribute: String, reason: String },

    /// An incoming attribute could not be decoded.
    #[error("could not decode attribute '{attribute}': {reason}")]
    Decode { attribute: String, reason: String },

    /// An attribute value failed validation.
    #[error("invalid value for attribute '{attribute}': {reason}")]
    Invalid { attribute: String, reason: String },

    /// A child view could not be created.
    #[error("could not create view for model {model}: {reason}")]
    ViewCreation { model: ModelId, reason: String },

    /// No model is registered under this id.
    #[error("model not found: {0}")]
    ModelNotFound(ModelId),

    /// The model was already closed.
    #[error("model {0} is closed")]
    Closed(ModelId),

    /// Channel error.
    #[error("comm error: {0}")]
    Comm(#[from] CommError),

    /// JSON error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WidgetError {
    pub(crate) fn encode(attribute: impl Into<String>, reason: impl ToString) -> Self {
        WidgetError::Encode {
            attribute: attribute.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn decode(attribute: impl Into<String>, reason: impl ToString) -> Self {
        WidgetError::Decode {
            attribute: attribute.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn invalid(attribute: impl Into<String>, reason: impl ToString) -> Self {
        WidgetError::Invalid {
            attribute: attribute.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for sync engine operations.
pub type Result<T> = std::result::Result<T, WidgetError>;
