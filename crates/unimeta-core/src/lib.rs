//! Core data model for the unimeta metadata pipeline.
//!
//! This crate is the "declarations" layer: the closed [`MetaField`]
//! enumeration, the workflow graph types consumed from the host runtime,
//! the capture-rule vocabulary (sources, selectors, formatters, predicates),
//! and the runtime-facing traits. The large per-class rule tables live in
//! `unimeta-rules` so the crate dependency graph stays a DAG.

pub mod artifact;
pub mod class_table;
pub mod error;
pub mod graph;
pub mod meta;
pub mod rules;
pub mod settings;
pub mod value;
pub mod version;

pub use artifact::{ArtifactFamily, ArtifactIndex, ResolvedArtifact};
pub use class_table::{ClassSpec, ClassTable, InputSpec};
pub use error::CoreError;
pub use graph::{NodeId, WorkflowGraph, WorkflowNode};
pub use meta::MetaField;
pub use rules::{
    CaptureRule, CaptureRuleSet, FormatterKind, NodeClassRules, PredicateKind, SamplerRole,
    SamplerRoleMap, SamplerTable, SelectorKind, ValueSource,
};
pub use settings::{HashLogMode, Settings};
pub use value::InputValue;
pub use version::{generator_version, GENERATOR_VERSION, RULES_DOC_VERSION};
