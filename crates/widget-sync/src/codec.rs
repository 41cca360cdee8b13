//! Codec pipeline.
//!
//! Outgoing state runs every attribute through its class codec (if any),
//! waits for all of them, then pulls binary values out into a side list for
//! out-of-band transport. Incoming state goes the other way: buffers are put
//! back under their keys, then each attribute is decoded on its own so one
//! bad attribute does not sink the rest.

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::{join_all, try_join_all, BoxFuture, FutureExt};
use serde_json::{Map, Value as JsonValue};

use crate::class::ModelClass;
use crate::error::{Result, WidgetError};
use crate::manager::WidgetManager;
use crate::model::SyncedModel;
use crate::value::{state_from_wire, State, Value};

/// Per-attribute serializer. Both directions default to pass-through.
#[async_trait]
pub trait AttributeCodec: Send + Sync {
    /// Prepare a value for the wire.
    async fn encode(&self, value: Value, _model: &SyncedModel) -> Result<Value> {
        Ok(value)
    }

    /// Turn a wire value back into an attribute value.
    async fn decode(&self, value: Value, _manager: &dyn WidgetManager) -> Result<Value> {
        Ok(value)
    }
}

/// Decoder that replaces model references with the models they name.
///
/// Recurses into sequences and mappings at any depth.
pub struct UnpackModels;

#[async_trait]
impl AttributeCodec for UnpackModels {
    async fn decode(&self, value: Value, manager: &dyn WidgetManager) -> Result<Value> {
        unpack_models(value, manager).await
    }
}

/// Resolve every [`Value::Reference`] inside `value` through `manager`.
///
/// All lookups at one level run concurrently and must all succeed.
pub fn unpack_models<'a>(
    value: Value,
    manager: &'a dyn WidgetManager,
) -> BoxFuture<'a, Result<Value>> {
    async move {
        match value {
            Value::Reference(id) => Ok(Value::Model(manager.get_model(&id).await?)),
            Value::Sequence(items) => {
                let items =
                    try_join_all(items.into_iter().map(|item| unpack_models(item, manager)))
                        .await?;
                Ok(Value::Sequence(items))
            }
            Value::Mapping(state) => {
                let (keys, values): (Vec<String>, Vec<Value>) = state.into_iter().unzip();
                let values =
                    try_join_all(values.into_iter().map(|item| unpack_models(item, manager)))
                        .await?;
                Ok(Value::Mapping(keys.into_iter().zip(values).collect()))
            }
            other => Ok(other),
        }
    }
    .boxed()
}

/// State ready to put on the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodedState {
    /// JSON attributes, binary entries removed.
    pub data: Map<String, JsonValue>,
    /// Keys of the binary entries, parallel to `buffers`.
    pub buffer_keys: Vec<String>,
    /// Binary entries.
    pub buffers: Vec<Bytes>,
}

/// Encode `attrs` with the codecs of `class`.
///
/// Fails if any single attribute fails to encode.
pub async fn encode_state(
    class: &ModelClass,
    attrs: State,
    model: &SyncedModel,
) -> Result<EncodedState> {
    let encoded = try_join_all(attrs.into_iter().map(|(key, value)| async move {
        let value = match class.codec(&key) {
            Some(codec) => codec
                .encode(value, model)
                .await
                .map_err(|e| match e {
                    e @ WidgetError::Encode { .. } => e,
                    other => WidgetError::encode(&key, other),
                })?,
            None => value,
        };
        Ok::<_, WidgetError>((key, value))
    }))
    .await?;

    split_buffers(encoded)
}

/// Move top-level binary values into a side list and convert the rest to JSON.
pub fn split_buffers(state: impl IntoIterator<Item = (String, Value)>) -> Result<EncodedState> {
    let mut encoded = EncodedState::default();
    for (key, value) in state {
        match value {
            Value::Bytes(buffer) => {
                encoded.buffer_keys.push(key);
                encoded.buffers.push(buffer);
            }
            other => {
                let json = other.to_wire().map_err(|e| match e {
                    WidgetError::Encode { reason, .. } => WidgetError::encode(&key, reason),
                    e => e,
                })?;
                encoded.data.insert(key, json);
            }
        }
    }
    Ok(encoded)
}

/// Put binary buffers back into `state` under their keys.
///
/// A count mismatch is reported and the unmatched side ignored.
pub fn attach_buffers(state: &mut State, buffer_keys: &[String], buffers: Vec<Bytes>) {
    if buffer_keys.len() != buffers.len() {
        tracing::warn!(
            "buffer_keys lists {} keys but {} buffers arrived",
            buffer_keys.len(),
            buffers.len()
        );
    }
    for (key, buffer) in buffer_keys.iter().zip(buffers) {
        state.insert(key.clone(), Value::Bytes(buffer));
    }
}

/// Rebuild a state mapping from the pieces of an incoming message.
pub fn reassemble_state(
    data: Map<String, JsonValue>,
    buffer_keys: &[String],
    buffers: Vec<Bytes>,
) -> State {
    let mut state = state_from_wire(data);
    attach_buffers(&mut state, buffer_keys, buffers);
    state
}

/// Result of decoding incoming state.
#[derive(Debug, Default)]
pub struct DecodedState {
    /// Attributes that decoded cleanly.
    pub state: State,
    /// One entry per attribute that was skipped.
    pub failures: Vec<WidgetError>,
}

/// Decode `state` with the codecs of `class`.
///
/// Attributes are decoded concurrently and independently; a failing
/// attribute is left out of the result and recorded in `failures`.
/// Attributes with a codec cannot be decoded without a manager.
pub async fn decode_state(
    class: &ModelClass,
    state: State,
    manager: Option<&dyn WidgetManager>,
) -> DecodedState {
    let results = join_all(state.into_iter().map(|(key, value)| async move {
        let result = match (class.codec(&key), manager) {
            (None, _) => Ok(value),
            (Some(codec), Some(manager)) => codec
                .decode(value, manager)
                .await
                .map_err(|e| WidgetError::decode(&key, e)),
            (Some(_), None) => Err(WidgetError::decode(&key, "no manager to resolve against")),
        };
        (key, result)
    }))
    .await;

    let mut decoded = DecodedState::default();
    for (key, result) in results {
        match result {
            Ok(value) => {
                decoded.state.insert(key, value);
            }
            Err(e) => decoded.failures.push(e),
        }
    }
    decoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{BOX_MODEL, WIDGET_MODEL};
    use crate::config::SyncConfig;
    use crate::manager::memory::InMemoryManager;
    use serde_json::json;
    use widget_sync_comm::ModelId;

    struct Rejecting;

    #[async_trait]
    impl AttributeCodec for Rejecting {
        async fn encode(&self, _value: Value, _model: &SyncedModel) -> Result<Value> {
            Err(WidgetError::invalid("value", "refused"))
        }
    }

    static REJECTING_MODEL: ModelClass = ModelClass {
        name: "RejectingModel",
        default_state: State::new,
        codecs: &[("value", &Rejecting)],
        validators: &[],
    };

    #[tokio::test]
    async fn test_encode_extracts_top_level_buffers() {
        let manager = InMemoryManager::new(SyncConfig::default());
        let model = manager.create_model(&WIDGET_MODEL, ModelId::new("m"), None, State::new());

        let mut attrs = State::new();
        attrs.insert("a".into(), Value::Int(1));
        attrs.insert("img".into(), Value::Bytes(Bytes::from_static(b"\x89PNG")));
        attrs.insert("z".into(), Value::Bytes(Bytes::from_static(b"zz")));

        let encoded = encode_state(&WIDGET_MODEL, attrs, &model).await.unwrap();
        assert_eq!(encoded.data, json!({"a": 1}).as_object().unwrap().clone());
        assert_eq!(encoded.buffer_keys, vec!["img".to_string(), "z".to_string()]);
        assert_eq!(encoded.buffers[0], Bytes::from_static(b"\x89PNG"));
    }

    #[tokio::test]
    async fn test_encode_failure_names_attribute() {
        let manager = InMemoryManager::new(SyncConfig::default());
        let model = manager.create_model(&REJECTING_MODEL, ModelId::new("m"), None, State::new());

        let mut attrs = State::new();
        attrs.insert("other".into(), Value::Int(1));
        attrs.insert("value".into(), Value::Int(2));

        match encode_state(&REJECTING_MODEL, attrs, &model).await {
            Err(WidgetError::Encode { attribute, .. }) => assert_eq!(attribute, "value"),
            other => panic!("expected encode failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_roundtrip_with_identity_codecs() {
        let manager = InMemoryManager::new(SyncConfig::default());
        let model = manager.create_model(&WIDGET_MODEL, ModelId::new("m"), None, State::new());

        let mut nested = State::new();
        nested.insert("x".into(), Value::Float(1.5));
        let mut original = State::new();
        original.insert("count".into(), Value::Int(-4));
        original.insert("label".into(), "hello".into());
        original.insert("nested".into(), Value::Mapping(nested));
        original.insert("ref".into(), Value::Reference(ModelId::new("other")));
        original.insert("data".into(), Value::Bytes(Bytes::from_static(b"\x00\x01")));

        let encoded = encode_state(&WIDGET_MODEL, original.clone(), &model)
            .await
            .unwrap();
        let state = reassemble_state(encoded.data, &encoded.buffer_keys, encoded.buffers);
        let decoded = decode_state(&WIDGET_MODEL, state, Some(&*manager)).await;

        assert!(decoded.failures.is_empty());
        assert_eq!(decoded.state, original);
    }

    #[tokio::test]
    async fn test_unpack_models_resolves_nested_references() {
        let manager = InMemoryManager::new(SyncConfig::default());
        let x = manager.create_model(&WIDGET_MODEL, ModelId::new("X"), None, State::new());
        let y = manager.create_model(&WIDGET_MODEL, ModelId::new("Y"), None, State::new());

        let wire = json!({
            "children": ["IPY_MODEL_X", {"inner": ["IPY_MODEL_Y"]}],
            "layout": "IPY_MODEL_Y",
        });
        let state = state_from_wire(wire.as_object().unwrap().clone());
        let decoded = decode_state(&BOX_MODEL, state, Some(&*manager)).await;
        assert!(decoded.failures.is_empty());

        assert!(decoded.state["layout"].as_model().unwrap().ptr_eq(&y));
        let children = decoded.state["children"].as_sequence().unwrap();
        assert!(children[0].as_model().unwrap().ptr_eq(&x));
        let inner = children[1].as_mapping().unwrap()["inner"].as_sequence().unwrap();
        assert!(inner[0].as_model().unwrap().ptr_eq(&y));
    }

    #[tokio::test]
    async fn test_decode_failure_skips_only_that_attribute() {
        let manager = InMemoryManager::new(SyncConfig::default());

        let wire = json!({
            "children": ["IPY_MODEL_missing"],
            "visible": false,
        });
        let state = state_from_wire(wire.as_object().unwrap().clone());
        let decoded = decode_state(&BOX_MODEL, state, Some(&*manager)).await;

        assert_eq!(decoded.failures.len(), 1);
        assert!(matches!(
            &decoded.failures[0],
            WidgetError::Decode { attribute, .. } if attribute == "children"
        ));
        assert_eq!(decoded.state.get("visible"), Some(&Value::Bool(false)));
        assert!(!decoded.state.contains_key("children"));
    }

    #[test]
    fn test_attach_buffers_tolerates_mismatch() {
        let mut state = State::new();
        attach_buffers(
            &mut state,
            &["a".to_string(), "b".to_string()],
            vec![Bytes::from_static(b"1")],
        );
        assert_eq!(state.len(), 1);
        assert_eq!(state["a"], Value::Bytes(Bytes::from_static(b"1")));
    }
}
