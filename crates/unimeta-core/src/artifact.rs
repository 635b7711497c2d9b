//! Runtime-facing artifact lookup.
//!
//! The host runtime owns the model directories; the pipeline only asks it to
//! map a family plus a (sanitized) name to an absolute path. The resolver in
//! `unimeta-capture` layers candidate generation on top of this trait.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Families of on-disk model artifacts the pipeline can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactFamily {
    Checkpoint,
    Vae,
    Lora,
    Unet,
    Embedding,
    Clip,
    Upscaler,
}

impl ArtifactFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactFamily::Checkpoint => "checkpoint",
            ArtifactFamily::Vae => "vae",
            ArtifactFamily::Lora => "lora",
            ArtifactFamily::Unet => "unet",
            ArtifactFamily::Embedding => "embedding",
            ArtifactFamily::Clip => "clip",
            ArtifactFamily::Upscaler => "upscaler",
        }
    }
}

impl fmt::Display for ArtifactFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host-side lookup from artifact name to on-disk file.
///
/// Implementations must treat `name` literally (no candidate generation);
/// the pipeline's resolver handles sanitization and extension fallbacks.
pub trait ArtifactIndex: Send + Sync {
    /// Absolute path for `name` within `family`'s known locations, if the
    /// file exists. `name` may contain subdirectory separators.
    fn resolve_path(&self, family: ArtifactFamily, name: &str) -> Option<PathBuf>;

    /// Index-stored display name for `name` (preserving subdirectory
    /// separators as the host records them). Defaults to the name itself.
    fn display_name(&self, _family: ArtifactFamily, name: &str) -> String {
        name.to_string()
    }
}

/// A resolved artifact reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArtifact {
    pub family: ArtifactFamily,
    /// Display form preserving subdirectory separators.
    pub display_name: String,
    /// On-disk location when resolution succeeded.
    pub absolute_path: Option<PathBuf>,
}

impl ResolvedArtifact {
    /// Base name (final path component) of the display name.
    pub fn base_name(&self) -> &str {
        self.display_name
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.display_name)
    }

    /// Base name without its final extension.
    pub fn stem(&self) -> &str {
        let base = self.base_name();
        match base.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => base,
        }
    }
}
