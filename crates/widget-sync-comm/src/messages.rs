//! Message shapes exchanged on a comm channel.
//!
//! Every message is a JSON `data` object plus an ordered list of binary
//! buffers carried out of band. Which key a buffer belongs to is recorded in
//! `buffer_keys`, positionally parallel to the buffer list.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::{CommError, Result};

/// A raw comm message: JSON data plus out-of-band binary buffers.
#[derive(Debug, Clone, PartialEq)]
pub struct CommMessage {
    /// The JSON payload.
    pub data: JsonValue,
    /// Binary payloads, in transport order.
    pub buffers: Vec<Bytes>,
}

impl CommMessage {
    /// Build a message from raw data and buffers.
    pub fn new(data: JsonValue, buffers: Vec<Bytes>) -> Self {
        Self { data, buffers }
    }

    /// Build an outbound message.
    pub fn outbound(data: &OutboundData, buffers: Vec<Bytes>) -> Result<Self> {
        Ok(Self {
            data: serde_json::to_value(data)?,
            buffers,
        })
    }

    /// Build an inbound message (used by peers and tests).
    pub fn inbound(data: &InboundData, buffers: Vec<Bytes>) -> Result<Self> {
        Ok(Self {
            data: serde_json::to_value(data)?,
            buffers,
        })
    }

    /// Classify this message as something the front end receives.
    pub fn parse_inbound(&self) -> Result<InboundData> {
        if !self.data.is_object() {
            return Err(CommError::InvalidMessage(format!(
                "expected object, got {}",
                self.data
            )));
        }
        Ok(serde_json::from_value(self.data.clone())?)
    }

    /// Classify this message as something the front end sends.
    pub fn parse_outbound(&self) -> Result<OutboundData> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

/// How much of the model state an outgoing sync carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// The entire model state.
    Full,
    /// Only the listed attributes.
    Patch,
}

/// Messages the front end sends to its peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum OutboundData {
    /// Opaque application message.
    Custom {
        /// Content, passed through untouched.
        content: JsonValue,
    },

    /// State synchronization.
    Sync {
        /// Full or patch.
        mode: SyncMode,
        /// Attribute values with binary entries removed.
        data: Map<String, JsonValue>,
        /// Keys of the entries moved into the buffer list.
        buffer_keys: Vec<String>,
    },
}

/// Messages the peer sends to the front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum InboundData {
    /// New attribute values from the kernel side.
    Update {
        /// Attribute values with binary entries removed.
        #[serde(default)]
        state: Map<String, JsonValue>,
        /// Keys the buffer list should be re-attached under.
        #[serde(default)]
        buffer_keys: Vec<String>,
    },

    /// Opaque application message.
    Custom {
        #[serde(default)]
        content: JsonValue,
    },

    /// Request to display the model. The payload is opaque to the core.
    Display {
        #[serde(flatten)]
        payload: Map<String, JsonValue>,
    },
}

/// Execution state reported by the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    Busy,
    Idle,
    Starting,
}

/// Status notification, `{ "state": "busy" | "idle" | "starting" }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub state: ExecutionState,
}

/// Everything a channel can deliver to the front end.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A comm message.
    Message(CommMessage),
    /// The peer changed execution state.
    Status(ExecutionState),
    /// The peer closed the channel.
    Closed,
}

impl From<StatusMessage> for ChannelEvent {
    fn from(status: StatusMessage) -> Self {
        ChannelEvent::Status(status.state)
    }
}
