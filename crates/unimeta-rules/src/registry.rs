//! The layered rule registry.
//!
//! Layers, lowest to highest precedence: built-in defaults, bundled
//! extension packs, the regenerated rules document, then the user JSON
//! documents. Each higher layer overlays per-(class, field) pairs without
//! discarding unrelated fields of the lower layer. A registry is built per
//! save invocation from immutable layers plus a snapshot of the user layer;
//! it is never mutated after construction.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::SystemTime;

use tracing::{debug, warn};

use unimeta_core::rules::{CaptureRuleSet, SamplerTable};
use unimeta_core::{Settings, RULES_DOC_VERSION};

use crate::defaults;
use crate::error::RulesError;
use crate::ext;
use crate::user::{self, GeneratedDoc, UserRulePaths};

/// A merged, immutable view of all capture rules and sampler roles.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    pub captures: CaptureRuleSet,
    pub samplers: SamplerTable,
}

impl Registry {
    /// Classes covered by either table.
    pub fn covered_classes(&self) -> HashSet<String> {
        self.captures
            .keys()
            .chain(self.samplers.keys())
            .cloned()
            .collect()
    }
}

/// Per-build options: the reachable-class filter and the force-include set.
#[derive(Debug, Clone, Default)]
pub struct RegistryOptions {
    /// When set, user-layer entries for classes outside this set are
    /// dropped unless force-included. Applies to both capture rules and
    /// sampler roles.
    pub required_classes: Option<HashSet<String>>,
    /// Class names that always pass the `required_classes` filter.
    pub forced_classes: HashSet<String>,
}

impl RegistryOptions {
    fn admits(&self, class_name: &str) -> bool {
        match &self.required_classes {
            None => true,
            Some(required) => {
                required.contains(class_name) || self.forced_classes.contains(class_name)
            }
        }
    }
}

/// Overlays `src` onto `dst` per (class, field) pair.
fn merge_captures(dst: &mut CaptureRuleSet, src: &CaptureRuleSet) {
    for (class_name, rules) in src {
        let entry = dst.entry(class_name.clone()).or_default();
        for (field, rule) in rules {
            entry.insert(*field, rule.clone());
        }
    }
}

/// Overlays `src` onto `dst` per (class, role) pair.
fn merge_samplers(dst: &mut SamplerTable, src: &SamplerTable) {
    for (class_name, roles) in src {
        let entry = dst.entry(class_name.clone()).or_default();
        for (role, input) in roles {
            entry.insert(*role, input.clone());
        }
    }
}

struct UserSnapshot {
    key: Vec<(PathBuf, Option<SystemTime>)>,
    captures: CaptureRuleSet,
    samplers: SamplerTable,
    generated: Option<GeneratedDoc>,
}

/// Builds registries, re-reading user documents only when their mtimes
/// change.
pub struct RegistryLoader {
    snapshot: Mutex<Option<UserSnapshot>>,
    advisory_logged: AtomicBool,
}

impl Default for RegistryLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryLoader {
    pub fn new() -> Self {
        RegistryLoader {
            snapshot: Mutex::new(None),
            advisory_logged: AtomicBool::new(false),
        }
    }

    /// Builds the merged registry for one save invocation.
    pub fn build(
        &self,
        paths: &UserRulePaths,
        settings: &Settings,
        options: &RegistryOptions,
    ) -> Result<Registry, RulesError> {
        let mut registry = Registry {
            captures: defaults::capture_rules(),
            samplers: defaults::sampler_table(),
        };
        for pack in ext::packs(settings) {
            merge_captures(&mut registry.captures, &pack.captures);
            merge_samplers(&mut registry.samplers, &pack.samplers);
        }

        let (generated, user_captures, user_samplers) = self.user_layer(paths)?;

        if let Some(doc) = &generated {
            if doc.version != RULES_DOC_VERSION
                && !self.advisory_logged.swap(true, Ordering::Relaxed)
            {
                warn!(
                    found = doc.version,
                    expected = RULES_DOC_VERSION,
                    "generated rules document was written by a different rules version; \
                     regenerate it from the scanner to silence this notice"
                );
            }
            merge_captures(&mut registry.captures, &doc.captures);
            merge_samplers(&mut registry.samplers, &doc.samplers);
        }

        // The reachable-class filter applies to the user layer only.
        let filtered_captures: CaptureRuleSet = user_captures
            .into_iter()
            .filter(|(class_name, _)| options.admits(class_name))
            .collect();
        let filtered_samplers: SamplerTable = user_samplers
            .into_iter()
            .filter(|(class_name, _)| options.admits(class_name))
            .collect();
        merge_captures(&mut registry.captures, &filtered_captures);
        merge_samplers(&mut registry.samplers, &filtered_samplers);

        Ok(registry)
    }

    /// Returns the user-layer documents, from cache when mtimes are
    /// unchanged.
    fn user_layer(
        &self,
        paths: &UserRulePaths,
    ) -> Result<(Option<GeneratedDoc>, CaptureRuleSet, SamplerTable), RulesError> {
        let key = paths.mtimes();
        let mut guard = self.snapshot.lock().expect("registry snapshot poisoned");
        if let Some(snapshot) = guard.as_ref() {
            if snapshot.key == key {
                return Ok((
                    snapshot.generated.clone(),
                    snapshot.captures.clone(),
                    snapshot.samplers.clone(),
                ));
            }
            debug!("user rule documents changed on disk; reloading");
        }
        let captures = user::load_user_captures(&paths.captures)?;
        let samplers = user::load_user_samplers(&paths.samplers)?;
        let generated = user::load_generated(&paths.generated)?;
        *guard = Some(UserSnapshot {
            key,
            captures: captures.clone(),
            samplers: samplers.clone(),
            generated: generated.clone(),
        });
        Ok((generated, captures, samplers))
    }
}
