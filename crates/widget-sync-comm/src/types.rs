//! Strong type definitions for the comm layer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Marker that turns a model id into a reference token.
///
/// A string of the form `IPY_MODEL_<id>` in serialized state names the model
/// registered under `<id>`.
pub const REFERENCE_PREFIX: &str = "IPY_MODEL_";

/// Identifier of a synced model, shared with its comm channel.
///
/// Immutable for the lifetime of the model.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(String);

impl ModelId {
    /// Create from any string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random 32-character hex id.
    pub fn random() -> Self {
        use rand::Rng;
        let bytes: [u8; 16] = rand::thread_rng().gen();
        Self(hex::encode(bytes))
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The reference token naming this model in serialized state.
    pub fn to_reference(&self) -> String {
        format!("{}{}", REFERENCE_PREFIX, self.0)
    }

    /// Parse a reference token. Returns `None` for any other string.
    pub fn from_reference(token: &str) -> Option<Self> {
        token
            .strip_prefix(REFERENCE_PREFIX)
            .map(|id| Self(id.to_string()))
    }
}

impl fmt::Debug for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModelId({})", self.0)
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModelId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ModelId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for ModelId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
