//! Textual embedding references in prompts.
//!
//! Prompts reference embeddings as `embedding:NAME` tokens. Names are
//! resolved through the artifact resolver (family `embedding`) and hashed
//! like any other artifact; the Hashes summary keys them by display name.

use unimeta_core::{ArtifactFamily, Settings};

use crate::hash_cache::HashCache;
use crate::resolve::Resolver;

const IDENTIFIER: &str = "embedding:";

/// Extracts embedding base names from a prompt text, in order of first
/// appearance. Weight syntax and punctuation around the token are ignored.
pub fn extract_names(text: &str) -> Vec<String> {
    let mut names = Vec::new();
    for word in text.split([' ', '\n', ',', '(', ')']) {
        let word = word.trim();
        let Some(rest) = word.strip_prefix(IDENTIFIER) else {
            continue;
        };
        // Strip an attached weight like embedding:name:1.2
        let name = rest.split(':').next().unwrap_or(rest).trim();
        if name.is_empty() {
            continue;
        }
        let base = name.rsplit(['/', '\\']).next().unwrap_or(name).to_string();
        if !names.contains(&base) {
            names.push(base);
        }
    }
    names
}

/// Resolves and hashes one embedding name; `None` when the artifact is
/// unresolved or unreadable.
pub fn hash_embedding(
    name: &str,
    resolver: &Resolver,
    hashes: &HashCache,
    settings: &Settings,
) -> Option<String> {
    let resolved = resolver.resolve(ArtifactFamily::Embedding, name);
    let path = resolved.absolute_path?;
    hashes
        .load_or_compute(&path, settings)
        .ok()
        .map(|record| record.truncated)
}
