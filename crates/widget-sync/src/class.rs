//! Model classes.
//!
//! A model class is the static schema shared by every model of one kind:
//! default attribute values, the codec table used when state crosses the
//! wire, and per-attribute validators. Tables are keyed by attribute name and
//! fixed at compile time.

use std::fmt;

use crate::codec::{AttributeCodec, UnpackModels};
use crate::error::{Result, WidgetError};
use crate::value::{State, Value};

/// Checks a single attribute value. The error string is the reason.
pub type Validator = fn(&Value) -> std::result::Result<(), String>;

/// Static schema for one kind of model.
pub struct ModelClass {
    /// Class name, reported in `_model_name`.
    pub name: &'static str,
    /// Builds the default attribute values.
    pub default_state: fn() -> State,
    /// Attribute name → codec.
    pub codecs: &'static [(&'static str, &'static dyn AttributeCodec)],
    /// Attribute name → validator.
    pub validators: &'static [(&'static str, Validator)],
}

impl ModelClass {
    /// Fresh copy of the default attribute values.
    pub fn defaults(&self) -> State {
        (self.default_state)()
    }

    /// The codec registered for `attribute`, if any.
    pub fn codec(&self, attribute: &str) -> Option<&'static dyn AttributeCodec> {
        self.codecs
            .iter()
            .find(|(name, _)| *name == attribute)
            .map(|(_, codec)| *codec)
    }

    /// Run the validator registered for `attribute`, if any.
    pub fn validate(&self, attribute: &str, value: &Value) -> Result<()> {
        for (name, validator) in self.validators {
            if *name == attribute {
                validator(value).map_err(|reason| WidgetError::invalid(attribute, reason))?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ModelClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelClass")
            .field("name", &self.name)
            .field(
                "codecs",
                &self.codecs.iter().map(|(name, _)| *name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Base class for every synced model.
pub static WIDGET_MODEL: ModelClass = ModelClass {
    name: "WidgetModel",
    default_state: widget_defaults,
    codecs: &[],
    validators: &[("msg_throttle", positive_int)],
};

/// Models backing a DOM view.
pub static DOM_WIDGET_MODEL: ModelClass = ModelClass {
    name: "DOMWidgetModel",
    default_state: dom_widget_defaults,
    codecs: &[("layout", &UnpackModels)],
    validators: &[
        ("msg_throttle", positive_int),
        ("visible", bool_or_null),
        ("_dom_classes", string_sequence),
    ],
};

/// Containers holding an ordered list of child models.
pub static BOX_MODEL: ModelClass = ModelClass {
    name: "BoxModel",
    default_state: box_defaults,
    codecs: &[("layout", &UnpackModels), ("children", &UnpackModels)],
    validators: &[
        ("msg_throttle", positive_int),
        ("visible", bool_or_null),
        ("_dom_classes", string_sequence),
        ("children", sequence),
    ],
};

fn widget_defaults() -> State {
    let mut state = State::new();
    state.insert("_model_module".into(), "jupyter-js-widgets".into());
    state.insert("_model_name".into(), "WidgetModel".into());
    state.insert("_view_module".into(), "jupyter-js-widgets".into());
    state.insert("_view_name".into(), Value::Null);
    state.insert("msg_throttle".into(), Value::Int(3));
    state
}

fn dom_widget_defaults() -> State {
    let mut state = widget_defaults();
    state.insert("_model_name".into(), "DOMWidgetModel".into());
    state.insert("layout".into(), Value::Null);
    state.insert("visible".into(), Value::Bool(true));
    state.insert("_dom_classes".into(), Value::Sequence(vec![]));
    state
}

fn box_defaults() -> State {
    let mut state = dom_widget_defaults();
    state.insert("_model_name".into(), "BoxModel".into());
    state.insert("children".into(), Value::Sequence(vec![]));
    state
}

fn positive_int(value: &Value) -> std::result::Result<(), String> {
    match value {
        Value::Int(i) if *i >= 1 => Ok(()),
        other => Err(format!("expected a positive integer, got {:?}", other)),
    }
}

fn bool_or_null(value: &Value) -> std::result::Result<(), String> {
    match value {
        Value::Bool(_) | Value::Null => Ok(()),
        other => Err(format!("expected bool or null, got {}", other.type_name())),
    }
}

fn string_sequence(value: &Value) -> std::result::Result<(), String> {
    match value {
        Value::Sequence(items) if items.iter().all(|v| v.as_str().is_some()) => Ok(()),
        Value::Sequence(_) => Err("expected every class name to be a string".into()),
        other => Err(format!("expected a sequence, got {}", other.type_name())),
    }
}

fn sequence(value: &Value) -> std::result::Result<(), String> {
    match value {
        Value::Sequence(_) => Ok(()),
        other => Err(format!("expected a sequence, got {}", other.type_name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_inherit() {
        let defaults = BOX_MODEL.defaults();
        assert_eq!(defaults["_model_name"], Value::from("BoxModel"));
        assert_eq!(defaults["msg_throttle"], Value::Int(3));
        assert_eq!(defaults["visible"], Value::Bool(true));
        assert_eq!(defaults["children"], Value::Sequence(vec![]));
    }

    #[test]
    fn test_codec_lookup() {
        assert!(WIDGET_MODEL.codec("layout").is_none());
        assert!(DOM_WIDGET_MODEL.codec("layout").is_some());
        assert!(BOX_MODEL.codec("children").is_some());
        assert!(BOX_MODEL.codec("visible").is_none());
    }

    #[test]
    fn test_validators() {
        assert!(WIDGET_MODEL.validate("msg_throttle", &Value::Int(2)).is_ok());
        assert!(WIDGET_MODEL.validate("msg_throttle", &Value::Int(0)).is_err());
        assert!(WIDGET_MODEL
            .validate("msg_throttle", &Value::from("3"))
            .is_err());

        assert!(DOM_WIDGET_MODEL.validate("visible", &Value::Null).is_ok());
        assert!(DOM_WIDGET_MODEL.validate("visible", &Value::Int(1)).is_err());

        let classes = Value::Sequence(vec!["a".into(), Value::Int(1)]);
        assert!(matches!(
            DOM_WIDGET_MODEL.validate("_dom_classes", &classes),
            Err(WidgetError::Invalid { .. })
        ));

        // attributes without a validator accept anything
        assert!(WIDGET_MODEL.validate("value", &Value::Null).is_ok());
    }
}
