//! Uniform treatment of node input values.
//!
//! Workflow inputs arrive from the host as JSON-like data: literals, lists,
//! nested objects, or references to another node's output encoded as a
//! two-element `[source_node_id, output_index]` array. [`InputValue`] makes
//! that polymorphism explicit so the extractor can coerce uniformly.

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::graph::NodeId;

/// A single node input as observed in the workflow graph.
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
    /// A scalar literal (string, number, or bool).
    Scalar(Value),
    /// A list literal that is not a reference.
    List(Vec<Value>),
    /// A reference to `(source_node_id, output_index)`.
    Ref { source: NodeId, output: u32 },
    /// A nested object literal.
    Nested(Value),
}

impl InputValue {
    /// Classifies a raw JSON value using the host wire convention: a
    /// two-element array whose first element parses as a node id and whose
    /// second element is an unsigned integer is a reference.
    pub fn from_json(value: Value) -> InputValue {
        match value {
            Value::Array(items) => {
                if items.len() == 2 {
                    let source = match &items[0] {
                        Value::String(s) => s.parse::<u64>().ok().map(NodeId),
                        Value::Number(n) => n.as_u64().map(NodeId),
                        _ => None,
                    };
                    let output = items[1].as_u64().and_then(|n| u32::try_from(n).ok());
                    if let (Some(source), Some(output)) = (source, output) {
                        return InputValue::Ref { source, output };
                    }
                }
                InputValue::List(items)
            }
            Value::Object(_) => InputValue::Nested(value),
            other => InputValue::Scalar(other),
        }
    }

    /// The reference target, when this input is a reference.
    pub fn as_ref_source(&self) -> Option<NodeId> {
        match self {
            InputValue::Ref { source, .. } => Some(*source),
            _ => None,
        }
    }

    /// Coerces to the first scalar in a list-like value; scalars pass
    /// through, references and objects yield nothing. Applied before any
    /// other processing of a captured value.
    pub fn first_scalar(&self) -> Option<&Value> {
        match self {
            InputValue::Scalar(v) => Some(v),
            InputValue::List(items) => items.first(),
            InputValue::Ref { .. } | InputValue::Nested(_) => None,
        }
    }

    /// String form of the first scalar, if there is one.
    pub fn as_str(&self) -> Option<&str> {
        self.first_scalar().and_then(Value::as_str)
    }

    /// The nested object, when this input is one.
    pub fn as_object(&self) -> Option<&Value> {
        match self {
            InputValue::Nested(v) => Some(v),
            _ => None,
        }
    }

    /// The raw list items, when this input is a (non-reference) list.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            InputValue::List(items) => Some(items),
            _ => None,
        }
    }
}

impl Serialize for InputValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            InputValue::Scalar(v) | InputValue::Nested(v) => v.serialize(serializer),
            InputValue::List(items) => items.serialize(serializer),
            InputValue::Ref { source, output } => {
                (source.0.to_string(), output).serialize(serializer)
            }
        }
    }
}

impl<'de> Deserialize<'de> for InputValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(InputValue::from_json(Value::deserialize(deserializer)?))
    }
}
