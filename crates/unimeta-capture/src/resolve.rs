//! Loose artifact reference resolution.
//!
//! Node inputs carry model references in many shapes: bare names, partial
//! paths, names with embedded dots, stray quotes and trailing punctuation.
//! [`Resolver`] normalizes a raw reference into a canonical display name and
//! (when the file exists) an absolute path, probing the host's
//! [`ArtifactIndex`] with a deterministic candidate sequence.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::debug;
use walkdir::WalkDir;

use unimeta_core::{ArtifactFamily, ArtifactIndex, ResolvedArtifact};

/// Recognized artifact extensions, in probe priority order.
pub const EXTENSION_ORDER: [&str; 5] = ["safetensors", "st", "ckpt", "pt", "bin"];

/// Trailing punctuation stripped from raw references.
const TRAILING_PUNCT: [char; 6] = [',', '.', ';', ':', '\'', '"'];

/// Strips whitespace, symmetric quote wrapping, and trailing punctuation.
pub fn sanitize(raw: &str) -> String {
    let mut cleaned = raw.trim();
    if cleaned.len() >= 2 {
        let quoted = (cleaned.starts_with('\'') && cleaned.ends_with('\''))
            || (cleaned.starts_with('"') && cleaned.ends_with('"'));
        if quoted {
            cleaned = &cleaned[1..cleaned.len() - 1];
        }
    }
    cleaned
        .trim()
        .trim_end_matches(|c| TRAILING_PUNCT.contains(&c) || c == ' ')
        .to_string()
}

/// True when the final extension of `name` is one of the recognized set.
fn has_known_extension(name: &str) -> bool {
    name.rsplit_once('.')
        .map(|(_, ext)| {
            EXTENSION_ORDER
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// Candidate names for one sanitized reference, in probe order:
/// the name verbatim, the name without a recognized final extension, then
/// progressive stem reduction for names with internal dots.
pub fn candidates(sanitized: &str) -> Vec<String> {
    let mut list = vec![sanitized.to_string()];
    if has_known_extension(sanitized) {
        if let Some((stem, _)) = sanitized.rsplit_once('.') {
            list.push(stem.to_string());
        }
    }
    // model.v1.2.3 -> model.v1.2, model.v1, model
    let mut stem = list.last().cloned().unwrap_or_default();
    while let Some((shorter, _)) = stem.rsplit_once('.') {
        if shorter.is_empty() {
            break;
        }
        list.push(shorter.to_string());
        stem = shorter.to_string();
    }
    list.dedup();
    list
}

/// Resolves loose references through a host [`ArtifactIndex`].
pub struct Resolver {
    index: Arc<dyn ArtifactIndex>,
}

impl Resolver {
    pub fn new(index: Arc<dyn ArtifactIndex>) -> Self {
        Resolver { index }
    }

    /// Resolves `raw` within `family`.
    ///
    /// The literal value `"None"` is rejected (no path) so callers can drop
    /// the slot. When no candidate matches, the sanitized display name is
    /// still returned so name fields can be emitted without a hash.
    pub fn resolve(&self, family: ArtifactFamily, raw: &str) -> ResolvedArtifact {
        let sanitized = sanitize(raw);
        if sanitized.is_empty() || sanitized.eq_ignore_ascii_case("none") {
            return ResolvedArtifact {
                family,
                display_name: sanitized,
                absolute_path: None,
            };
        }

        for candidate in candidates(&sanitized) {
            // Try the candidate, and the candidate with each known
            // extension appended when it has none.
            let mut probes = vec![candidate.clone()];
            if !has_known_extension(&candidate) {
                for ext in EXTENSION_ORDER {
                    probes.push(format!("{candidate}.{ext}"));
                }
            }
            for probe in probes {
                if let Some(path) = self.index.resolve_path(family, &probe) {
                    return ResolvedArtifact {
                        family,
                        display_name: self.index.display_name(family, &probe),
                        absolute_path: Some(path),
                    };
                }
            }
        }

        debug!(family = %family, name = %sanitized, "artifact did not resolve to a file");
        ResolvedArtifact {
            family,
            display_name: sanitized,
            absolute_path: None,
        }
    }
}

/// Directory-rooted [`ArtifactIndex`] for hosts (and tests) without their
/// own file index.
///
/// Each family maps to an ordered list of root directories. Lookup joins
/// the name onto each root in priority order; a recursive stem index (first
/// occurrence wins) answers bare-stem queries the way the runtime's LoRA
/// index does.
#[derive(Default)]
pub struct DirArtifactIndex {
    roots: HashMap<ArtifactFamily, Vec<PathBuf>>,
    stem_index: Mutex<HashMap<ArtifactFamily, HashMap<String, PathBuf>>>,
}

impl DirArtifactIndex {
    pub fn new() -> Self {
        DirArtifactIndex::default()
    }

    pub fn with_root(mut self, family: ArtifactFamily, root: impl Into<PathBuf>) -> Self {
        self.add_root(family, root);
        self
    }

    pub fn add_root(&mut self, family: ArtifactFamily, root: impl Into<PathBuf>) {
        self.roots.entry(family).or_default().push(root.into());
    }

    fn build_stem_index(&self, family: ArtifactFamily) -> HashMap<String, PathBuf> {
        let mut index = HashMap::new();
        let Some(roots) = self.roots.get(&family) else {
            return index;
        };
        for root in roots {
            for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
                if !entry.file_type().is_file() {
                    continue;
                }
                let path = entry.path();
                let known = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| EXTENSION_ORDER.iter().any(|k| e.eq_ignore_ascii_case(k)))
                    .unwrap_or(false);
                if !known {
                    continue;
                }
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    index
                        .entry(stem.to_string())
                        .or_insert_with(|| path.to_path_buf());
                }
            }
        }
        index
    }
}

impl ArtifactIndex for DirArtifactIndex {
    fn resolve_path(&self, family: ArtifactFamily, name: &str) -> Option<PathBuf> {
        let roots = self.roots.get(&family)?;
        for root in roots {
            let joined = root.join(name);
            if joined.is_file() {
                return Some(joined);
            }
        }
        // Bare stems fall back to the recursive index.
        if !name.contains(['/', '\\']) {
            let stem = Path::new(name)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(name);
            let mut cache = self.stem_index.lock().expect("stem index poisoned");
            let index = cache
                .entry(family)
                .or_insert_with(|| self.build_stem_index(family));
            if let Some(path) = index.get(stem) {
                if path.is_file() {
                    return Some(path.clone());
                }
            }
        }
        None
    }

    fn display_name(&self, family: ArtifactFamily, name: &str) -> String {
        // Preserve the sub-path relative to the matched root when possible.
        if let Some(roots) = self.roots.get(&family) {
            for root in roots {
                let joined = root.join(name);
                if joined.is_file() {
                    return name.replace('\\', "/");
                }
            }
            if let Some(path) = self.resolve_path(family, name) {
                for root in roots {
                    if let Ok(relative) = path.strip_prefix(root) {
                        return relative.to_string_lossy().replace('\\', "/");
                    }
                }
            }
        }
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn index_with_lora(dir: &Path) -> DirArtifactIndex {
        DirArtifactIndex::new().with_root(ArtifactFamily::Lora, dir)
    }

    #[test]
    fn sanitize_strips_quotes_and_trailing_punctuation() {
        assert_eq!(sanitize("  'model.safetensors', "), "model.safetensors");
        assert_eq!(sanitize("\"name\""), "name");
        assert_eq!(sanitize("plain"), "plain");
        assert_eq!(sanitize("ends.with.dots.."), "ends.with.dots");
    }

    #[test]
    fn candidate_sequence_reduces_dotted_stems() {
        assert_eq!(
            candidates("model.v1.2.3"),
            vec!["model.v1.2.3", "model.v1.2", "model.v1", "model"]
        );
        assert_eq!(
            candidates("model.v2.safetensors"),
            vec!["model.v2.safetensors", "model.v2", "model"]
        );
    }

    #[test]
    fn resolves_exact_and_extensionless_names() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.safetensors"), b"x").unwrap();
        let resolver = Resolver::new(Arc::new(index_with_lora(dir.path())));

        let exact = resolver.resolve(ArtifactFamily::Lora, "a.safetensors");
        assert!(exact.absolute_path.is_some());

        let bare = resolver.resolve(ArtifactFamily::Lora, "a");
        assert_eq!(bare.absolute_path, exact.absolute_path);
    }

    #[test]
    fn trailing_punctuation_resolves_to_same_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.safetensors"), b"x").unwrap();
        let resolver = Resolver::new(Arc::new(index_with_lora(dir.path())));

        let clean = resolver.resolve(ArtifactFamily::Lora, "a.safetensors");
        let noisy = resolver.resolve(ArtifactFamily::Lora, " 'a.safetensors', ");
        assert_eq!(clean.absolute_path, noisy.absolute_path);
        assert_eq!(clean.display_name, noisy.display_name);
    }

    #[test]
    fn resolution_is_idempotent_on_display_name() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b.ckpt"), b"x").unwrap();
        let resolver = Resolver::new(Arc::new(index_with_lora(dir.path())));

        let first = resolver.resolve(ArtifactFamily::Lora, "sub/b.ckpt");
        assert!(first.absolute_path.is_some());
        let second = resolver.resolve(ArtifactFamily::Lora, &first.display_name);
        assert_eq!(first, second);
    }

    #[test]
    fn none_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = Resolver::new(Arc::new(index_with_lora(dir.path())));
        let resolved = resolver.resolve(ArtifactFamily::Lora, "None");
        assert!(resolved.absolute_path.is_none());
    }

    #[test]
    fn bare_stem_found_recursively() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("nested/deep")).unwrap();
        fs::write(dir.path().join("nested/deep/hidden.pt"), b"x").unwrap();
        let resolver = Resolver::new(Arc::new(index_with_lora(dir.path())));
        let resolved = resolver.resolve(ArtifactFamily::Lora, "hidden");
        assert!(resolved.absolute_path.is_some());
    }
}
