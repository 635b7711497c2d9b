//! Error types for container encoding.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while embedding metadata or writing output files.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// Writing the output file failed.
    #[error("output I/O failure for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Pixel encoding failed in the imaging library.
    #[error("image encoding failed: {0}")]
    ImageEncode(#[from] image::ImageError),

    /// The assembled metadata segment exceeds the container's hard limit.
    /// The fallback controller escalates to the next stage on this.
    #[error("metadata segment of {size} bytes exceeds container limit {limit}")]
    EncoderRejected { size: usize, limit: usize },

    /// The byte stream is not the container it claims to be.
    #[error("malformed {container} stream: {reason}")]
    InvalidContainer {
        container: &'static str,
        reason: String,
    },
}

impl EncodeError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EncodeError::Io {
            path: path.into(),
            source,
        }
    }
}
