//! Core error types for unimeta-core.
//!
//! Uses `thiserror` for structured, matchable error variants. These cover
//! the error kinds that cross crate boundaries; each downstream crate
//! defines its own error enum for its local failure modes.

use thiserror::Error;

use crate::graph::NodeId;

/// Errors produced by core graph and rule handling.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Traversal found a malformed reference (dangling source id or wrong
    /// arity). The offending node is skipped by callers.
    #[error("malformed graph reference at node {node}: {reason}")]
    GraphShape { node: NodeId, reason: String },

    /// A rule document entry failed schema validation. The entry is ignored
    /// and the rest of the document continues to load.
    #[error("invalid rule for class '{class_name}': {reason}")]
    RuleShape { class_name: String, reason: String },

    /// An artifact file could not be read while hashing.
    #[error("artifact I/O failure for '{path}': {source}")]
    ArtifactIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// No candidate matched during artifact resolution.
    #[error("could not resolve {family} artifact '{name}'")]
    ArtifactResolution { family: String, name: String },

    /// A selector failed internally; the field is omitted.
    #[error("extraction failed for node {node}: {reason}")]
    Extraction { node: NodeId, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offender() {
        let err = CoreError::RuleShape {
            class_name: "LoraLoader".into(),
            reason: "unknown formatter".into(),
        };
        assert!(err.to_string().contains("LoraLoader"));

        let err = CoreError::GraphShape {
            node: NodeId(7),
            reason: "dangling source".into(),
        };
        assert!(err.to_string().contains('7'));
    }
}
