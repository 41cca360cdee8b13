//! Proptest generators for property-based testing.

use proptest::prelude::*;

use widget_sync::{State, Value};

/// Generate an attribute name that no shipped class validates.
pub fn attribute_name() -> impl Strategy<Value = String> {
    "v[a-z0-9]{0,5}".prop_map(String::from)
}

/// Generate a plain string that is never mistaken for a model reference.
pub fn plain_string() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 ]{0,12}".prop_map(String::from)
}

/// Generate a scalar value.
pub fn scalar_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        (-1.0e9f64..1.0e9f64).prop_map(Value::Float),
        plain_string().prop_map(Value::String),
    ]
}

/// Generate a value, nesting sequences and mappings a few levels deep.
///
/// Binary values are left out; they only travel at the top level.
pub fn value() -> impl Strategy<Value = Value> {
    scalar_value().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Sequence),
            prop::collection::btree_map(attribute_name(), inner, 0..4).prop_map(Value::Mapping),
        ]
    })
}

/// Generate a state mapping.
pub fn state() -> impl Strategy<Value = State> {
    prop::collection::btree_map(attribute_name(), value(), 0..6)
}

/// One step of a flush sequence.
#[derive(Debug, Clone)]
pub enum FlushOp {
    /// `flush_patch` with these attributes.
    Patch(State),
    /// `flush_full`.
    Full,
    /// The peer reports idle.
    Idle,
}

/// Generate a flush op.
pub fn flush_op() -> impl Strategy<Value = FlushOp> {
    prop_oneof![
        4 => prop::collection::btree_map(attribute_name(), scalar_value(), 1..4)
            .prop_map(FlushOp::Patch),
        1 => Just(FlushOp::Full),
        2 => Just(FlushOp::Idle),
    ]
}

/// Generate a sequence of flush ops.
pub fn flush_ops(max_len: usize) -> impl Strategy<Value = Vec<FlushOp>> {
    prop::collection::vec(flush_op(), 0..=max_len)
}
