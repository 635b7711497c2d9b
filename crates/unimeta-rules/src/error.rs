//! Error types for rule loading, scanning, and persistence.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the rules crate.
///
/// Rule-document *content* problems never surface here: a malformed entry is
/// logged and skipped so the rest of the document continues to load. These
/// variants cover whole-operation failures (I/O, unparseable JSON roots,
/// missing backups).
#[derive(Debug, Error)]
pub enum RulesError {
    /// Reading or writing a rule document failed.
    #[error("rule document I/O failure for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A document's top level is not the expected JSON object.
    #[error("rule document '{path}' is not a JSON object: {reason}")]
    MalformedDocument { path: PathBuf, reason: String },

    /// A persistence write could not be completed; previous files remain
    /// intact.
    #[error("failed to persist '{path}': {reason}")]
    Persistence { path: PathBuf, reason: String },

    /// The requested backup set does not exist.
    #[error("backup set '{id}' not found under '{dir}'")]
    BackupNotFound { id: String, dir: PathBuf },
}

impl RulesError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RulesError::Io {
            path: path.into(),
            source,
        }
    }
}
