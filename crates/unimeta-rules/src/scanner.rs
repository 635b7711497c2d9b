//! Heuristic rule discovery over the host class table.
//!
//! The scanner never executes nodes: it inspects declared input names and
//! types ([`ClassTable`]) and proposes capture rules per a closed, prioritized
//! heuristic table. Proposals are diffed against the baseline registry
//! (defaults + extensions + generated + user) so the missing-only lens can
//! report just what is not yet captured. The baseline is cached keyed by the
//! user-document mtimes; repeated scans avoid rebuilding it.

use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::SystemTime;

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use unimeta_core::rules::{
    CaptureRule, CaptureRuleSet, FormatterKind, PredicateKind, SamplerRole, SamplerRoleMap,
    SamplerTable, ValueSource,
};
use unimeta_core::{ClassSpec, ClassTable, MetaField, Settings};

use crate::error::RulesError;
use crate::registry::{Registry, RegistryLoader, RegistryOptions};
use crate::user::UserRulePaths;

/// Which classes and fields a scan reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// Only fields that would be new for their class.
    NewOnly,
    /// Full suggestions.
    All,
    /// Only classes already covered by the baseline.
    ExistingOnly,
}

impl ScanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanMode::NewOnly => "new_only",
            ScanMode::All => "all",
            ScanMode::ExistingOnly => "existing_only",
        }
    }
}

/// Options for one scan.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Classes whose name contains any of these (case-insensitive) are
    /// skipped, unless force-included.
    pub exclude_keywords: Vec<String>,
    pub mode: ScanMode,
    /// Subtract fields already supplied by any registry layer.
    pub missing_lens: bool,
    /// Fields reported even when the lens or mode would drop them.
    pub forced_metafields: HashSet<MetaField>,
    /// Classes always present in the proposal, even with no matches.
    pub forced_classes: BTreeSet<String>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        ScanOptions {
            exclude_keywords: Vec::new(),
            mode: ScanMode::NewOnly,
            missing_lens: true,
            forced_metafields: HashSet::new(),
            forced_classes: BTreeSet::new(),
        }
    }
}

/// Tallies for one scan.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanSummary {
    pub mode: String,
    pub missing_lens: bool,
    pub new_nodes: usize,
    pub existing_nodes_with_new_fields: usize,
    pub total_new_fields: usize,
    pub total_existing_fields_included: usize,
    pub total_skipped_fields: usize,
    pub forced_metafields: Vec<String>,
    pub forced_node_classes: Vec<String>,
}

/// A scan's output: proposed additions plus the diff report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleProposal {
    #[serde(rename = "nodes")]
    pub additions: IndexMap<String, IndexMap<MetaField, CaptureRule>>,
    #[serde(rename = "samplers")]
    pub sampler_additions: SamplerTable,
    pub summary: ScanSummary,
    /// Human-readable tallies; not part of the persisted document.
    #[serde(skip)]
    pub diff_report: String,
}

impl RuleProposal {
    /// The additions as a plain rule set (for registry-style merging).
    pub fn capture_rule_set(&self) -> CaptureRuleSet {
        self.additions
            .iter()
            .map(|(class_name, rules)| (class_name.clone(), rules.clone()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Heuristic table
// ---------------------------------------------------------------------------

struct Heuristic {
    field: MetaField,
    keywords: &'static [&'static str],
    keyword_patterns: &'static [&'static str],
    exact_only: bool,
    multi: bool,
    type_filter: &'static [&'static str],
    format: Option<FormatterKind>,
    hash_field: Option<MetaField>,
    validate: Option<PredicateKind>,
    required_context: &'static [&'static str],
    required_class_keywords: &'static [&'static str],
    excluded_class_keywords: &'static [&'static str],
    excluded_keywords: &'static [&'static str],
    inline_lora_candidate: bool,
}

impl Heuristic {
    const fn new(field: MetaField) -> Self {
        Heuristic {
            field,
            keywords: &[],
            keyword_patterns: &[],
            exact_only: false,
            multi: false,
            type_filter: &[],
            format: None,
            hash_field: None,
            validate: None,
            required_context: &[],
            required_class_keywords: &[],
            excluded_class_keywords: &[],
            excluded_keywords: &[],
            inline_lora_candidate: false,
        }
    }
}

fn heuristics() -> &'static [Heuristic] {
    use FormatterKind::*;
    use MetaField as F;

    static TABLE: std::sync::OnceLock<Vec<Heuristic>> = std::sync::OnceLock::new();
    TABLE.get_or_init(|| {
        vec![
            Heuristic {
                keywords: &["ckpt_name", "base_ckpt_name", "checkpoint", "ckpt"],
                format: Some(CalcModelHash),
                hash_field: Some(F::ModelHash),
                required_class_keywords: &["loader", "load", "select", "selector"],
                excluded_class_keywords: &["lora"],
                ..Heuristic::new(F::ModelName)
            },
            Heuristic {
                keywords: &["unet_name", "model_name", "model"],
                format: Some(CalcUnetHash),
                hash_field: Some(F::ModelHash),
                required_class_keywords: &["loader", "load", "select", "selector"],
                excluded_class_keywords: &["lora"],
                ..Heuristic::new(F::ModelName)
            },
            Heuristic {
                keywords: &["vae_name", "vae"],
                exact_only: true,
                format: Some(CalcVaeHash),
                hash_field: Some(F::VaeHash),
                required_class_keywords: &["loader", "vae", "load"],
                excluded_class_keywords: &["encode", "decode"],
                ..Heuristic::new(F::VaeName)
            },
            Heuristic {
                keywords: &["clip_name"],
                multi: true,
                required_class_keywords: &["clip loader", "load clip", "cliploader"],
                ..Heuristic::new(F::ClipModelName)
            },
            Heuristic {
                keywords: &[
                    "positive_prompt",
                    "prompt_positive",
                    "text_positive",
                    "positive",
                    "prompt",
                    "text",
                    "t5xxl",
                    "clip_l",
                    "text_g",
                    "text_l",
                ],
                validate: Some(PredicateKind::IsPositivePrompt),
                required_context: &["clip"],
                required_class_keywords: &["encode", "prompt", "positive"],
                inline_lora_candidate: true,
                ..Heuristic::new(F::PositivePrompt)
            },
            Heuristic {
                keywords: &[
                    "negative_prompt",
                    "prompt_negative",
                    "text_negative",
                    "negative",
                    "prompt",
                    "text",
                ],
                validate: Some(PredicateKind::IsNegativePrompt),
                required_context: &["clip"],
                required_class_keywords: &["encode", "prompt", "negative"],
                ..Heuristic::new(F::NegativePrompt)
            },
            Heuristic {
                keywords: &["seed", "noise_seed", "random_seed"],
                type_filter: &["INT"],
                required_class_keywords: &["sampler", "seed", "noise"],
                ..Heuristic::new(F::Seed)
            },
            Heuristic {
                keywords: &["steps"],
                type_filter: &["INT"],
                required_context: &["seed", "cfg", "denoise", "scheduler"],
                required_class_keywords: &["sampler", "scheduler", "steps"],
                ..Heuristic::new(F::Steps)
            },
            Heuristic {
                keywords: &["cfg", "cfg_scale"],
                type_filter: &["FLOAT"],
                required_class_keywords: &["sampler", "cfg"],
                ..Heuristic::new(F::Cfg)
            },
            Heuristic {
                keywords: &["guidance"],
                type_filter: &["FLOAT"],
                excluded_keywords: &["cfg"],
                required_class_keywords: &["sampler", "guidance", "clip", "encode"],
                ..Heuristic::new(F::Guidance)
            },
            Heuristic {
                keywords: &["sampler_name", "sampler", "sampler_mode"],
                required_class_keywords: &["sampler"],
                ..Heuristic::new(F::SamplerName)
            },
            Heuristic {
                keywords: &["scheduler", "scheduler_name"],
                required_class_keywords: &["sampler", "scheduler", "sigmas"],
                ..Heuristic::new(F::Scheduler)
            },
            Heuristic {
                keywords: &["denoise"],
                type_filter: &["FLOAT"],
                required_class_keywords: &["sampler", "scheduler"],
                ..Heuristic::new(F::Denoise)
            },
            Heuristic {
                keywords: &["max_shift"],
                type_filter: &["FLOAT"],
                required_class_keywords: &["modelsampling"],
                ..Heuristic::new(F::MaxShift)
            },
            Heuristic {
                keywords: &["base_shift"],
                type_filter: &["FLOAT"],
                required_class_keywords: &["modelsampling"],
                ..Heuristic::new(F::BaseShift)
            },
            Heuristic {
                keywords: &["shift"],
                exact_only: true,
                type_filter: &["FLOAT"],
                excluded_keywords: &["base_shift", "max_shift"],
                required_class_keywords: &["modelsampling"],
                ..Heuristic::new(F::Shift)
            },
            Heuristic {
                keywords: &["weight_dtype"],
                required_class_keywords: &["loader", "load", "select", "diffusion", "model"],
                ..Heuristic::new(F::WeightDtype)
            },
            Heuristic {
                keywords: &["width", "empty_latent_width"],
                required_context: &["height", "batch_size"],
                required_class_keywords: &["latent", "loader"],
                ..Heuristic::new(F::ImageWidth)
            },
            Heuristic {
                keywords: &["height", "empty_latent_height"],
                required_context: &["width", "batch_size"],
                required_class_keywords: &["latent", "loader"],
                ..Heuristic::new(F::ImageHeight)
            },
            Heuristic {
                keywords: &["lora_name", "lora"],
                keyword_patterns: &[r"^lora_name_?\d{0,2}$", r"^lora_\d{1,2}$"],
                multi: true,
                format: Some(CalcLoraHash),
                hash_field: Some(F::LoraModelHash),
                required_class_keywords: &["lora", "loader", "load"],
                excluded_keywords: &["lora_syntax", "loaded_loras", "text"],
                ..Heuristic::new(F::LoraModelName)
            },
            Heuristic {
                keywords: &["strength_model", "lora_strength", "lora_wt", "model_str"],
                keyword_patterns: &[
                    r"^strength_model_?\d{0,2}$",
                    r"^lora_strength_?\d{0,2}$",
                    r"^lora_wt_?\d{0,2}$",
                    r"^model_str_?\d{0,2}$",
                ],
                multi: true,
                type_filter: &["FLOAT"],
                required_context: &["lora_name"],
                required_class_keywords: &["lora", "loader", "load"],
                ..Heuristic::new(F::LoraStrengthModel)
            },
            Heuristic {
                keywords: &["strength_clip", "clip_strength", "clip_str"],
                keyword_patterns: &[r"^clip_str_?\d{0,2}$", r"^strength_clip_?\d{0,2}$"],
                multi: true,
                type_filter: &["FLOAT"],
                required_context: &["lora_name"],
                required_class_keywords: &["lora", "loader", "load"],
                ..Heuristic::new(F::LoraStrengthClip)
            },
        ]
    })
}

// ---------------------------------------------------------------------------
// Matching helpers
// ---------------------------------------------------------------------------

fn class_matches(heuristic: &Heuristic, lower_class: &str) -> bool {
    if heuristic
        .excluded_class_keywords
        .iter()
        .any(|kw| lower_class.contains(kw))
    {
        return false;
    }
    if heuristic.required_class_keywords.is_empty() {
        return true;
    }
    heuristic
        .required_class_keywords
        .iter()
        .any(|kw| lower_class.contains(kw))
}

fn context_matches(heuristic: &Heuristic, input_names: &[String]) -> bool {
    if heuristic.required_context.is_empty() {
        return true;
    }
    input_names.iter().any(|name| {
        let lower = name.to_ascii_lowercase();
        heuristic.required_context.iter().any(|ctx| lower.contains(ctx))
    })
}

fn type_ok(heuristic: &Heuristic, spec: &ClassSpec, name: &str) -> bool {
    if heuristic.type_filter.is_empty() {
        return true;
    }
    match spec.declared_type(name) {
        Some(t) => heuristic.type_filter.contains(&t),
        None => false,
    }
}

/// Numeric-suffix-aware sort key, so `lora_name_2` precedes `lora_name_10`.
fn numeric_sort_key(name: &str) -> (u64, String) {
    let digits: String = name
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let suffix = digits
        .chars()
        .rev()
        .collect::<String>()
        .parse::<u64>()
        .unwrap_or(u64::MAX);
    (suffix, name.to_ascii_lowercase())
}

fn matching_inputs(heuristic: &Heuristic, spec: &ClassSpec) -> Vec<String> {
    let patterns: Vec<Regex> = heuristic
        .keyword_patterns
        .iter()
        .filter_map(|p| Regex::new(&format!("(?i){p}")).ok())
        .collect();
    let mut matches: Vec<String> = Vec::new();
    for name in spec.input_names() {
        let lower = name.to_ascii_lowercase();
        if heuristic
            .excluded_keywords
            .iter()
            .any(|kw| lower.contains(kw))
        {
            continue;
        }
        if !type_ok(heuristic, spec, name) {
            continue;
        }
        let matched = if heuristic.exact_only {
            heuristic.keywords.iter().any(|kw| lower == *kw)
        } else {
            heuristic.keywords.iter().any(|kw| lower.contains(kw))
        };
        let matched = matched || patterns.iter().any(|p| p.is_match(name));
        if matched {
            matches.push(name.to_string());
        }
    }
    matches.sort_by_key(|n| numeric_sort_key(n));
    matches
}

fn best_input(heuristic: &Heuristic, spec: &ClassSpec) -> Option<String> {
    let candidates = |exact: bool| {
        spec.input_names().find(|name| {
            let lower = name.to_ascii_lowercase();
            if heuristic
                .excluded_keywords
                .iter()
                .any(|kw| lower.contains(kw))
                || !type_ok(heuristic, spec, name)
            {
                return false;
            }
            heuristic.keywords.iter().any(|kw| {
                if exact {
                    lower == *kw
                } else {
                    lower.contains(kw)
                }
            })
        })
    };
    // Exact name match wins over substring containment.
    if let Some(name) = candidates(true) {
        return Some(name.to_string());
    }
    if !heuristic.exact_only {
        if let Some(name) = candidates(false) {
            return Some(name.to_string());
        }
    }
    for pattern in heuristic.keyword_patterns {
        if let Ok(re) = Regex::new(&format!("(?i){pattern}")) {
            if let Some(name) = spec
                .input_names()
                .find(|n| re.is_match(n) && type_ok(heuristic, spec, n))
            {
                return Some(name.to_string());
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

struct BaselineSnapshot {
    key: Vec<(PathBuf, Option<SystemTime>)>,
    registry: Registry,
}

/// Proposes capture rules from the host class table.
pub struct Scanner {
    loader: RegistryLoader,
    baseline: Mutex<Option<BaselineSnapshot>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Scanner {
    pub fn new() -> Self {
        Scanner {
            loader: RegistryLoader::new(),
            baseline: Mutex::new(None),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// The baseline registry (all layers, unfiltered), cached by user-doc
    /// mtimes.
    fn baseline(
        &self,
        paths: &UserRulePaths,
        settings: &Settings,
    ) -> Result<Registry, RulesError> {
        let key = paths.mtimes();
        let mut guard = self.baseline.lock().expect("scanner baseline poisoned");
        if let Some(snapshot) = guard.as_ref() {
            if snapshot.key == key {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(snapshot.registry.clone());
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let registry = self
            .loader
            .build(paths, settings, &RegistryOptions::default())?;
        *guard = Some(BaselineSnapshot {
            key,
            registry: registry.clone(),
        });
        Ok(registry)
    }

    /// Runs one scan over `class_table`.
    pub fn scan(
        &self,
        class_table: &ClassTable,
        paths: &UserRulePaths,
        settings: &Settings,
        options: &ScanOptions,
    ) -> Result<RuleProposal, RulesError> {
        let baseline = self.baseline(paths, settings)?;

        let mut additions: IndexMap<String, IndexMap<MetaField, CaptureRule>> = IndexMap::new();
        let mut sampler_additions: SamplerTable = IndexMap::new();
        let mut summary = ScanSummary {
            mode: options.mode.as_str().to_string(),
            missing_lens: options.missing_lens,
            forced_metafields: {
                let mut names: Vec<String> = options
                    .forced_metafields
                    .iter()
                    .map(|f| f.as_str().to_string())
                    .collect();
                names.sort();
                names
            },
            forced_node_classes: options.forced_classes.iter().cloned().collect(),
            ..ScanSummary::default()
        };

        let excluded = |class_name: &str| {
            let lower = class_name.to_ascii_lowercase();
            options.exclude_keywords.iter().any(|kw| lower.contains(kw))
        };

        for (class_name, spec) in class_table {
            let is_forced = options.forced_classes.contains(class_name);
            if excluded(class_name) && !is_forced {
                continue;
            }

            self.detect_sampler_roles(
                class_name,
                spec,
                &baseline,
                options,
                &mut sampler_additions,
            );

            let baseline_rules = baseline.captures.get(class_name);
            let is_existing = baseline_rules.is_some();
            if !is_existing && options.mode == ScanMode::ExistingOnly && !is_forced {
                continue;
            }

            let suggestions = self.suggest_for_class(class_name, spec);
            if suggestions.is_empty() {
                continue;
            }
            let candidate_total = suggestions.len();

            let mut kept: IndexMap<MetaField, CaptureRule> = IndexMap::new();
            let mut new_here = 0usize;
            let mut existing_here = 0usize;
            for (field, rule) in suggestions {
                let in_baseline = baseline_rules
                    .map(|rules| rules.contains_key(&field))
                    .unwrap_or(false);
                let forced_field = options.forced_metafields.contains(&field);
                let mode_keeps = match options.mode {
                    ScanMode::NewOnly => !in_baseline,
                    ScanMode::All => true,
                    ScanMode::ExistingOnly => in_baseline,
                };
                let lens_keeps = !options.missing_lens || !in_baseline;
                if forced_field || (mode_keeps && lens_keeps) {
                    if in_baseline {
                        existing_here += 1;
                    } else {
                        new_here += 1;
                    }
                    kept.insert(field, rule);
                }
            }
            summary.total_skipped_fields += candidate_total - kept.len();
            if kept.is_empty() {
                continue;
            }
            summary.total_new_fields += new_here;
            summary.total_existing_fields_included += existing_here;
            if is_existing {
                if new_here > 0 {
                    summary.existing_nodes_with_new_fields += 1;
                }
            } else {
                summary.new_nodes += 1;
            }
            additions.insert(class_name.clone(), kept);
        }

        // Forced classes are always present, even with nothing to suggest.
        for class_name in &options.forced_classes {
            additions.entry(class_name.clone()).or_default();
        }

        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let mut diff = vec![
            format!("Mode={}", summary.mode),
            format!(
                "MissingLens={}",
                if summary.missing_lens { "on" } else { "off" }
            ),
            format!("New nodes={}", summary.new_nodes),
            format!(
                "Existing nodes w/ new fields={}",
                summary.existing_nodes_with_new_fields
            ),
            format!("New fields={}", summary.total_new_fields),
            format!(
                "Existing fields included={}",
                summary.total_existing_fields_included
            ),
            format!("Skipped fields={}", summary.total_skipped_fields),
            format!("BaselineCache=hit:{hits}|miss:{misses}"),
            format!(
                "Force metafields={}",
                if summary.forced_metafields.is_empty() {
                    "None".to_string()
                } else {
                    summary.forced_metafields.join(",")
                }
            ),
        ];
        if !summary.forced_node_classes.is_empty() {
            diff.push(format!(
                "Forced node classes={}",
                summary.forced_node_classes.join(",")
            ));
        }
        let diff_report = diff.join("; ");

        Ok(RuleProposal {
            additions,
            sampler_additions,
            summary,
            diff_report,
        })
    }

    /// Applies the heuristic table to a single class.
    fn suggest_for_class(
        &self,
        class_name: &str,
        spec: &ClassSpec,
    ) -> IndexMap<MetaField, CaptureRule> {
        let lower_class = class_name.to_ascii_lowercase();
        let input_names: Vec<String> = spec.input_names().map(str::to_string).collect();
        let mut suggestions: IndexMap<MetaField, CaptureRule> = IndexMap::new();

        for heuristic in heuristics() {
            if suggestions.contains_key(&heuristic.field) {
                continue;
            }
            if !class_matches(heuristic, &lower_class)
                || !context_matches(heuristic, &input_names)
            {
                continue;
            }

            if heuristic.multi {
                let matches = matching_inputs(heuristic, spec);
                if matches.is_empty() {
                    continue;
                }
                let rule = if matches.len() == 1 {
                    CaptureRule::field(matches[0].clone())
                } else {
                    CaptureRule::fields(matches.clone())
                };
                let rule = apply_modifiers(rule, heuristic, false);
                suggestions.insert(heuristic.field, rule);
                if let (Some(format), Some(hash_field)) = (heuristic.format, heuristic.hash_field)
                {
                    let hash_rule = if matches.len() == 1 {
                        CaptureRule::field(matches[0].clone())
                    } else {
                        CaptureRule::fields(matches)
                    };
                    suggestions.insert(hash_field, hash_rule.with_format(format));
                }
                continue;
            }

            let Some(best) = best_input(heuristic, spec) else {
                continue;
            };
            let rule = apply_modifiers(CaptureRule::field(best.clone()), heuristic, true);
            suggestions.insert(heuristic.field, rule);
            if let (Some(format), Some(hash_field)) = (heuristic.format, heuristic.hash_field) {
                suggestions.insert(hash_field, CaptureRule::field(best).with_format(format));
            }
        }
        suggestions
    }

    /// Stage 1 of the original scanner: sampler-role detection by declared
    /// conditioning inputs.
    fn detect_sampler_roles(
        &self,
        class_name: &str,
        spec: &ClassSpec,
        baseline: &Registry,
        options: &ScanOptions,
        out: &mut SamplerTable,
    ) {
        if !class_name.to_ascii_lowercase().contains("sampler") {
            return;
        }
        let has = |name: &str| spec.input_names().any(|n| n == name);
        let candidate: Option<SamplerRoleMap> = if has("positive") && has("negative") {
            let mut map = IndexMap::new();
            map.insert(SamplerRole::Positive, "positive".to_string());
            map.insert(SamplerRole::Negative, "negative".to_string());
            if has("latent_image") {
                map.insert(SamplerRole::LatentImage, "latent_image".to_string());
            }
            Some(map)
        } else if has("base_positive") && has("base_negative") {
            let mut map = IndexMap::new();
            map.insert(SamplerRole::Positive, "base_positive".to_string());
            map.insert(SamplerRole::Negative, "base_negative".to_string());
            Some(map)
        } else if has("guider") {
            let mut map = IndexMap::new();
            map.insert(SamplerRole::Positive, "guider".to_string());
            Some(map)
        } else {
            None
        };
        let Some(candidate) = candidate else { return };

        let baseline_roles = baseline.samplers.get(class_name);
        let is_existing = baseline_roles.is_some();
        if !is_existing && options.mode == ScanMode::ExistingOnly {
            return;
        }
        let mut kept: SamplerRoleMap = IndexMap::new();
        for (role, input) in candidate {
            let in_baseline = baseline_roles
                .map(|roles| roles.contains_key(&role))
                .unwrap_or(false);
            let mode_keeps = match options.mode {
                ScanMode::NewOnly => !in_baseline,
                ScanMode::All => true,
                ScanMode::ExistingOnly => in_baseline,
            };
            let lens_keeps = !options.missing_lens || !in_baseline;
            if mode_keeps && lens_keeps {
                kept.insert(role, input);
            }
        }
        if !kept.is_empty() {
            out.insert(class_name.to_string(), kept);
        }
    }
}

fn apply_modifiers(mut rule: CaptureRule, heuristic: &Heuristic, _single: bool) -> CaptureRule {
    if let Some(validate) = heuristic.validate {
        rule = rule.with_validate(validate);
    }
    if heuristic.inline_lora_candidate {
        if let ValueSource::Field(_) = rule.source {
            rule = rule.inline_lora();
        }
    }
    rule
}

/// Convenience used by tests and hosts that scan without a scanner handle.
pub fn scan_once(
    class_table: &ClassTable,
    paths: &UserRulePaths,
    settings: &Settings,
    options: &ScanOptions,
) -> Result<RuleProposal, RulesError> {
    Scanner::new().scan(class_table, paths, settings, options)
}
