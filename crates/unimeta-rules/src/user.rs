//! User rule documents on disk.
//!
//! Three files live under the user rules directory:
//!
//! * `user_captures.json`: class name → field name → rule spec object.
//! * `user_samplers.json`: class name → role → input name.
//! * `generated_rules.json`: the regenerated document emitted by the rule
//!   writer, stamped with a rules-document version.
//!
//! Loading is lenient per entry: a field that fails schema validation is
//! logged at warning and ignored while the rest of the document loads.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use unimeta_core::rules::{CaptureRule, CaptureRuleSet, SamplerRole, SamplerTable};
use unimeta_core::MetaField;

use crate::error::RulesError;

/// Locations of the user rule documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRulePaths {
    pub captures: PathBuf,
    pub samplers: PathBuf,
    pub generated: PathBuf,
    /// Backup sets live under this directory.
    pub backups: PathBuf,
}

impl UserRulePaths {
    /// Conventional layout under a user rules directory.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        UserRulePaths {
            captures: dir.join("user_captures.json"),
            samplers: dir.join("user_samplers.json"),
            generated: dir.join("generated_rules.json"),
            backups: dir.join("backups"),
        }
    }

    /// Modification times of the user documents, in a fixed order. This is
    /// the cache key for registry snapshots and the scanner baseline.
    pub fn mtimes(&self) -> Vec<(PathBuf, Option<SystemTime>)> {
        [&self.captures, &self.samplers, &self.generated]
            .into_iter()
            .map(|p| (p.clone(), fs::metadata(p).and_then(|m| m.modified()).ok()))
            .collect()
    }
}

/// The regenerated rules document, stamped with its writer's version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneratedDoc {
    pub version: u32,
    #[serde(default)]
    pub captures: CaptureRuleSet,
    #[serde(default)]
    pub samplers: SamplerTable,
}

/// Parses a capture document value leniently: invalid classes or fields are
/// skipped with a warning, valid siblings survive.
pub fn captures_from_value(root: &Value, origin: &Path) -> CaptureRuleSet {
    let mut out: CaptureRuleSet = IndexMap::new();
    let Some(classes) = root.as_object() else {
        warn!(path = %origin.display(), "capture document root is not an object; ignoring");
        return out;
    };
    for (class_name, fields) in classes {
        let Some(fields) = fields.as_object() else {
            warn!(class = %class_name, "capture entry is not an object; skipping class");
            continue;
        };
        let mut rules = IndexMap::new();
        for (field_name, spec) in fields {
            let field: MetaField = match field_name.parse() {
                Ok(f) => f,
                Err(_) => {
                    warn!(class = %class_name, field = %field_name, "unknown field name; skipping");
                    continue;
                }
            };
            match serde_json::from_value::<CaptureRule>(spec.clone()) {
                Ok(rule) => {
                    rules.insert(field, rule);
                }
                Err(err) => {
                    warn!(class = %class_name, field = %field_name, %err, "invalid rule spec; skipping");
                }
            }
        }
        if !rules.is_empty() {
            out.insert(class_name.clone(), rules);
        }
    }
    out
}

/// Parses a sampler-role document value with the same lenient policy.
pub fn samplers_from_value(root: &Value, origin: &Path) -> SamplerTable {
    let mut out: SamplerTable = IndexMap::new();
    let Some(classes) = root.as_object() else {
        warn!(path = %origin.display(), "sampler document root is not an object; ignoring");
        return out;
    };
    for (class_name, roles) in classes {
        let Some(roles) = roles.as_object() else {
            warn!(class = %class_name, "sampler entry is not an object; skipping class");
            continue;
        };
        let mut map = IndexMap::new();
        for (role_name, input) in roles {
            let role: SamplerRole = match serde_json::from_value(Value::String(role_name.clone()))
            {
                Ok(r) => r,
                Err(_) => {
                    warn!(class = %class_name, role = %role_name, "unknown sampler role; skipping");
                    continue;
                }
            };
            match input.as_str() {
                Some(input_name) => {
                    map.insert(role, input_name.to_string());
                }
                None => {
                    warn!(class = %class_name, role = %role_name, "role input is not a string; skipping");
                }
            }
        }
        if !map.is_empty() {
            out.insert(class_name.clone(), map);
        }
    }
    out
}

fn read_json(path: &Path) -> Result<Option<Value>, RulesError> {
    match fs::read_to_string(path) {
        Ok(text) => match serde_json::from_str(&text) {
            Ok(value) => Ok(Some(value)),
            Err(err) => Err(RulesError::MalformedDocument {
                path: path.to_path_buf(),
                reason: err.to_string(),
            }),
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(RulesError::io(path, err)),
    }
}

/// Loads the user capture document, if present.
pub fn load_user_captures(path: &Path) -> Result<CaptureRuleSet, RulesError> {
    Ok(read_json(path)?
        .map(|root| captures_from_value(&root, path))
        .unwrap_or_default())
}

/// Loads the user sampler-role document, if present.
pub fn load_user_samplers(path: &Path) -> Result<SamplerTable, RulesError> {
    Ok(read_json(path)?
        .map(|root| samplers_from_value(&root, path))
        .unwrap_or_default())
}

/// Loads the generated rules document, if present. The version stamp is
/// surfaced so the registry can log its one-time advisory.
pub fn load_generated(path: &Path) -> Result<Option<GeneratedDoc>, RulesError> {
    let Some(root) = read_json(path)? else {
        return Ok(None);
    };
    // Lenient: pull the stamp out, then parse captures/samplers with the
    // per-entry policy rather than failing the whole document.
    let version = root.get("version").and_then(Value::as_u64).unwrap_or(0) as u32;
    let captures = root
        .get("captures")
        .map(|v| captures_from_value(v, path))
        .unwrap_or_default();
    let samplers = root
        .get("samplers")
        .map(|v| samplers_from_value(v, path))
        .unwrap_or_default();
    Ok(Some(GeneratedDoc {
        version,
        captures,
        samplers,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lenient_capture_parsing_skips_bad_entries() {
        let root = json!({
            "GoodLoader": {
                "MODEL_NAME": {"field_name": "ckpt_name"},
                "NOT_A_FIELD": {"field_name": "x"},
                "MODEL_HASH": {"format": "calc_model_hash"}
            },
            "BadShape": 17
        });
        let set = captures_from_value(&root, Path::new("test.json"));
        assert_eq!(set.len(), 1);
        let rules = set.get("GoodLoader").unwrap();
        // MODEL_HASH had no source and is dropped; MODEL_NAME survives.
        assert_eq!(rules.len(), 1);
        assert!(rules.contains_key(&MetaField::ModelName));
    }

    #[test]
    fn lenient_sampler_parsing() {
        let root = json!({
            "MySampler": {"positive": "positive", "bogus_role": "x", "negative": 3}
        });
        let table = samplers_from_value(&root, Path::new("test.json"));
        let roles = table.get("MySampler").unwrap();
        assert_eq!(roles.len(), 1);
        assert_eq!(
            roles.get(&SamplerRole::Positive).map(String::as_str),
            Some("positive")
        );
    }

    #[test]
    fn missing_documents_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        let paths = UserRulePaths::in_dir(dir.path());
        assert!(load_user_captures(&paths.captures).unwrap().is_empty());
        assert!(load_user_samplers(&paths.samplers).unwrap().is_empty());
        assert!(load_generated(&paths.generated).unwrap().is_none());
    }

    #[test]
    fn malformed_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user_captures.json");
        fs::write(&path, "not json").unwrap();
        assert!(load_user_captures(&path).is_err());
    }
}
