//! Workflow graph topology as consumed from the host runtime.
//!
//! The graph is opaque to the pipeline: a mapping from [`NodeId`] to a class
//! name plus an input snapshot. Edges are implied by [`InputValue::Ref`]
//! entries. Nothing here executes; the save pipeline only traverses.

use std::collections::BTreeMap;
use std::fmt;

use indexmap::IndexMap;
use serde::de::{Deserializer, Error as _};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::value::InputValue;

/// Stable workflow node identifier.
///
/// The host serializes node ids as decimal strings; numeric JSON is accepted
/// on input for convenience. Ordering is numeric, which is what every
/// deterministic tie-break in the pipeline relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(raw: u64) -> Self {
        NodeId(raw)
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        match raw {
            serde_json::Value::String(s) => s
                .parse::<u64>()
                .map(NodeId)
                .map_err(|_| D::Error::custom(format!("invalid node id '{s}'"))),
            serde_json::Value::Number(n) => n
                .as_u64()
                .map(NodeId)
                .ok_or_else(|| D::Error::custom("node id must be a non-negative integer")),
            other => Err(D::Error::custom(format!(
                "node id must be a string or integer, got {other}"
            ))),
        }
    }
}

/// One node of the workflow graph: its class name and input snapshot.
///
/// Input order is preserved as serialized by the host; prefix enumeration in
/// the extractor depends on it only through the numeric suffix sort, so the
/// preserved order is informational.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    #[serde(rename = "class_type")]
    pub class_name: String,
    #[serde(default)]
    pub inputs: IndexMap<String, InputValue>,
}

impl WorkflowNode {
    pub fn new(class_name: impl Into<String>) -> Self {
        WorkflowNode {
            class_name: class_name.into(),
            inputs: IndexMap::new(),
        }
    }

    /// Builder-style input insertion, used heavily by tests.
    pub fn with_input(mut self, name: impl Into<String>, value: InputValue) -> Self {
        self.inputs.insert(name.into(), value);
        self
    }

    /// The input value under `name`, if present.
    pub fn input(&self, name: &str) -> Option<&InputValue> {
        self.inputs.get(name)
    }
}

/// The full workflow graph, keyed by node id.
///
/// A `BTreeMap` keeps iteration in ascending node-id order, so every walk
/// over the graph is deterministic without extra sorting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowGraph {
    pub nodes: BTreeMap<NodeId, WorkflowNode>,
}

impl WorkflowGraph {
    pub fn new() -> Self {
        WorkflowGraph::default()
    }

    pub fn insert(&mut self, id: impl Into<NodeId>, node: WorkflowNode) {
        self.nodes.insert(id.into(), node);
    }

    pub fn get(&self, id: NodeId) -> Option<&WorkflowNode> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &WorkflowNode)> {
        self.nodes.iter().map(|(id, node)| (*id, node))
    }

    /// True when any node input references `id` as its source.
    pub fn has_consumers(&self, id: NodeId) -> bool {
        self.nodes.values().any(|node| {
            node.inputs
                .values()
                .any(|value| value.as_ref_source() == Some(id))
        })
    }
}
