//! Attribute values.
//!
//! A model's state is an ordered mapping from attribute name to [`Value`].
//! References to other models are a variant of their own instead of a string
//! convention: a reference token is recognized once, when state arrives from
//! the wire, and from then on it is a [`Value::Reference`] until a codec
//! resolves it into a live [`Value::Model`].

use std::collections::BTreeMap;

use bytes::Bytes;
use serde_json::{Map, Number, Value as JsonValue};
use widget_sync_comm::ModelId;

use crate::error::{Result, WidgetError};
use crate::model::SyncedModel;

/// Ordered attribute mapping.
pub type State = BTreeMap<String, Value>;

/// A single attribute value.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Binary payload. Only allowed at the top level of a synced state.
    Bytes(Bytes),
    /// Unresolved reference to another model.
    Reference(ModelId),
    /// Resolved reference. Compares by identity.
    Model(SyncedModel),
    Sequence(Vec<Value>),
    Mapping(State),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Reference(a), Value::Reference(b)) => a == b,
            (Value::Model(a), Value::Model(b)) => a.ptr_eq(b),
            (Value::Sequence(a), Value::Sequence(b)) => a == b,
            (Value::Mapping(a), Value::Mapping(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    /// Convert a JSON value received from the wire.
    ///
    /// Strings carrying the reference prefix become [`Value::Reference`].
    pub fn from_wire(json: JsonValue) -> Value {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => match ModelId::from_reference(&s) {
                Some(id) => Value::Reference(id),
                None => Value::String(s),
            },
            JsonValue::Array(items) => {
                Value::Sequence(items.into_iter().map(Value::from_wire).collect())
            }
            JsonValue::Object(map) => Value::Mapping(state_from_wire(map)),
        }
    }

    /// Convert to JSON for the wire.
    ///
    /// Model values serialize as their reference token. Fails on binary
    /// values nested inside a sequence or mapping.
    pub fn to_wire(&self) -> Result<JsonValue> {
        self.to_wire_nested(false)
    }

    fn to_wire_nested(&self, nested: bool) -> Result<JsonValue> {
        Ok(match self {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int(i) => JsonValue::Number((*i).into()),
            Value::Float(f) => Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::String(s) => JsonValue::String(s.clone()),
            Value::Bytes(_) if nested => {
                return Err(WidgetError::encode(
                    "<nested>",
                    "binary values are only transported at the top level",
                ))
            }
            Value::Bytes(_) => {
                return Err(WidgetError::encode(
                    "<top-level>",
                    "binary values must be extracted before JSON encoding",
                ))
            }
            Value::Reference(id) => JsonValue::String(id.to_reference()),
            Value::Model(model) => JsonValue::String(model.to_reference()),
            Value::Sequence(items) => JsonValue::Array(
                items
                    .iter()
                    .map(|v| v.to_wire_nested(true))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Value::Mapping(state) => {
                let mut map = Map::new();
                for (key, value) in state {
                    map.insert(key.clone(), value.to_wire_nested(true)?);
                }
                JsonValue::Object(map)
            }
        })
    }

    /// Short name of the variant, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Reference(_) => "reference",
            Value::Model(_) => "model",
            Value::Sequence(_) => "sequence",
            Value::Mapping(_) => "mapping",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_model(&self) -> Option<&SyncedModel> {
        match self {
            Value::Model(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Value::Sequence(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&State> {
        match self {
            Value::Mapping(state) => Some(state),
            _ => None,
        }
    }
}

/// Convert a JSON object into a state mapping.
pub fn state_from_wire(map: Map<String, JsonValue>) -> State {
    map.into_iter()
        .map(|(key, value)| (key, Value::from_wire(value)))
        .collect()
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i.into())
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i.into())
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Bytes(b)
    }
}

impl From<ModelId> for Value {
    fn from(id: ModelId) -> Self {
        Value::Reference(id)
    }
}

impl From<SyncedModel> for Value {
    fn from(model: SyncedModel) -> Self {
        Value::Model(model)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Sequence(items)
    }
}

impl From<State> for Value {
    fn from(state: State) -> Self {
        Value::Mapping(state)
    }
}
