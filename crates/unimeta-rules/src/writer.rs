//! Persistence of scanner proposals with backups and bounded retention.
//!
//! Every file write is atomic (temp sibling + rename), so a failed write
//! leaves the previous documents untouched. Backup sets are timestamped
//! directories staged in a temporary directory and renamed into place, then
//! pruned to the retention limit keeping the newest.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;
use serde::Serialize;
use tracing::{info, warn};

use unimeta_core::rules::{CaptureRuleSet, SamplerTable};
use unimeta_core::RULES_DOC_VERSION;

use crate::error::RulesError;
use crate::scanner::RuleProposal;
use crate::user::{self, GeneratedDoc, UserRulePaths};

/// Serializes writes to the user rule documents. Readers take mtime-keyed
/// snapshots, so no reader lock is needed.
static WRITE_LOCK: Mutex<()> = Mutex::new(());

/// How a proposal is applied to the documents on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    /// Replace the files in their entirety.
    Overwrite,
    /// Add missing classes and fields; conflicts follow `replace_conflicts`.
    AppendNew,
}

impl SaveMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaveMode::Overwrite => "overwrite",
            SaveMode::AppendNew => "append_new",
        }
    }
}

/// Options consumed by [`save`].
#[derive(Debug, Clone)]
pub struct SaveOptions {
    pub mode: SaveMode,
    /// In append mode, replace conflicting fields instead of skipping them.
    pub replace_conflicts: bool,
    /// Snapshot the current documents into a backup set first.
    pub backup_before_save: bool,
    /// Re-emit the generated rules document stamped with the current
    /// rules-document version.
    pub rebuild_rules_doc: bool,
    /// Keep at most this many backup sets, newest first. Zero disables
    /// pruning.
    pub limit_backup_sets: usize,
}

impl Default for SaveOptions {
    fn default() -> Self {
        SaveOptions {
            mode: SaveMode::AppendNew,
            replace_conflicts: false,
            backup_before_save: true,
            rebuild_rules_doc: false,
            limit_backup_sets: 20,
        }
    }
}

/// Outcome tallies of one [`save`] invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub nodes_added: usize,
    pub fields_added: usize,
    pub fields_replaced: usize,
    pub fields_skipped: usize,
    pub sampler_nodes_added: usize,
    pub roles_added: usize,
    pub roles_replaced: usize,
    pub roles_skipped: usize,
    pub backup_id: Option<String>,
    pub files_written: Vec<String>,
}

impl SaveReport {
    /// The single-line metric string emitted per invocation.
    pub fn status_line(&self) -> String {
        format!(
            "rules save: nodes_added={} fields_added={} fields_replaced={} fields_skipped={} \
             roles_added={} roles_replaced={} roles_skipped={} backup={} files=[{}]",
            self.nodes_added,
            self.fields_added,
            self.fields_replaced,
            self.fields_skipped,
            self.roles_added,
            self.roles_replaced,
            self.roles_skipped,
            self.backup_id.as_deref().unwrap_or("none"),
            self.files_written.join(", ")
        )
    }
}

/// Outcome of a [`restore`] invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: Vec<String>,
    pub missing: Vec<String>,
}

// ---------------------------------------------------------------------------
// Atomic file plumbing
// ---------------------------------------------------------------------------

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), RulesError> {
    let parent = path.parent().ok_or_else(|| RulesError::Persistence {
        path: path.to_path_buf(),
        reason: "no parent directory".into(),
    })?;
    fs::create_dir_all(parent).map_err(|e| RulesError::io(parent, e))?;
    let mut tmp =
        tempfile::NamedTempFile::new_in(parent).map_err(|e| RulesError::io(parent, e))?;
    let body = serde_json::to_string_pretty(value).map_err(|e| RulesError::Persistence {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    tmp.write_all(body.as_bytes())
        .and_then(|_| tmp.write_all(b"\n"))
        .and_then(|_| tmp.flush())
        .map_err(|e| RulesError::io(path, e))?;
    tmp.persist(path).map_err(|e| RulesError::io(path, e.error))?;
    Ok(())
}

/// The canonical byte serialization of a rule document, used by both the
/// writer and the byte-equality tests.
pub fn document_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    let mut body = serde_json::to_string_pretty(value).unwrap_or_default();
    body.push('\n');
    body.into_bytes()
}

// ---------------------------------------------------------------------------
// Backups
// ---------------------------------------------------------------------------

const BACKUP_FILES: [&str; 3] = [
    "user_captures.json",
    "user_samplers.json",
    "generated_rules.json",
];

fn backup_source(paths: &UserRulePaths, file: &str) -> PathBuf {
    match file {
        "user_captures.json" => paths.captures.clone(),
        "user_samplers.json" => paths.samplers.clone(),
        _ => paths.generated.clone(),
    }
}

/// Creates a timestamped backup set of the current documents. Returns the
/// backup set id (the directory name).
pub fn create_backup(paths: &UserRulePaths) -> Result<String, RulesError> {
    fs::create_dir_all(&paths.backups).map_err(|e| RulesError::io(&paths.backups, e))?;
    let stage = tempfile::Builder::new()
        .prefix(".staging-")
        .tempdir_in(&paths.backups)
        .map_err(|e| RulesError::io(&paths.backups, e))?;

    for file in BACKUP_FILES {
        let source = backup_source(paths, file);
        if source.exists() {
            fs::copy(&source, stage.path().join(file)).map_err(|e| RulesError::io(&source, e))?;
        }
    }

    let base = Local::now().format("%Y%m%d-%H%M%S").to_string();
    let mut id = base.clone();
    let mut counter = 0u32;
    while paths.backups.join(&id).exists() {
        counter += 1;
        id = format!("{base}-{counter}");
    }
    let final_dir = paths.backups.join(&id);
    // Keep the TempDir from deleting what we are about to rename away.
    let staged = stage.keep();
    fs::rename(&staged, &final_dir).map_err(|e| RulesError::io(&final_dir, e))?;
    Ok(id)
}

/// Backup set ids, newest first.
pub fn list_backups(paths: &UserRulePaths) -> Result<Vec<String>, RulesError> {
    let mut ids = Vec::new();
    let entries = match fs::read_dir(&paths.backups) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
        Err(err) => return Err(RulesError::io(&paths.backups, err)),
    };
    for entry in entries {
        let entry = entry.map_err(|e| RulesError::io(&paths.backups, e))?;
        let name = entry.file_name().to_string_lossy().to_string();
        if entry.path().is_dir() && !name.starts_with('.') {
            ids.push(name);
        }
    }
    // Timestamped names sort chronologically.
    ids.sort_by(|a, b| b.cmp(a));
    Ok(ids)
}

fn prune_backups(paths: &UserRulePaths, limit: usize) -> Result<(), RulesError> {
    if limit == 0 {
        return Ok(());
    }
    let ids = list_backups(paths)?;
    for stale in ids.iter().skip(limit) {
        let dir = paths.backups.join(stale);
        if let Err(err) = fs::remove_dir_all(&dir) {
            warn!(backup = %stale, %err, "failed to prune backup set");
        }
    }
    Ok(())
}

/// Atomically replaces the current documents with the contents of a backup
/// set, tolerating partially-missing files.
pub fn restore(paths: &UserRulePaths, backup_id: &str) -> Result<RestoreReport, RulesError> {
    let _guard = WRITE_LOCK.lock().expect("rule write lock poisoned");
    let dir = paths.backups.join(backup_id);
    if !dir.is_dir() {
        return Err(RulesError::BackupNotFound {
            id: backup_id.to_string(),
            dir: paths.backups.clone(),
        });
    }
    let mut report = RestoreReport::default();
    for file in BACKUP_FILES {
        let source = dir.join(file);
        let target = backup_source(paths, file);
        if source.exists() {
            let bytes = fs::read(&source).map_err(|e| RulesError::io(&source, e))?;
            let parent = target.parent().ok_or_else(|| RulesError::Persistence {
                path: target.clone(),
                reason: "no parent directory".into(),
            })?;
            let mut tmp =
                tempfile::NamedTempFile::new_in(parent).map_err(|e| RulesError::io(parent, e))?;
            tmp.write_all(&bytes).map_err(|e| RulesError::io(&target, e))?;
            tmp.persist(&target)
                .map_err(|e| RulesError::io(&target, e.error))?;
            report.restored.push(file.to_string());
        } else {
            report.missing.push(file.to_string());
        }
    }
    info!(backup = %backup_id, restored = ?report.restored, missing = ?report.missing, "restored rule documents");
    Ok(report)
}

// ---------------------------------------------------------------------------
// Save
// ---------------------------------------------------------------------------

/// Persists a scanner proposal per `options`. Returns the per-invocation
/// tallies; callers log `report.status_line()`.
pub fn save(
    paths: &UserRulePaths,
    proposal: &RuleProposal,
    options: &SaveOptions,
) -> Result<SaveReport, RulesError> {
    let _guard = WRITE_LOCK.lock().expect("rule write lock poisoned");
    let mut report = SaveReport::default();

    if options.backup_before_save {
        let id = create_backup(paths)?;
        prune_backups(paths, options.limit_backup_sets)?;
        report.backup_id = Some(id);
    }

    let (final_captures, final_samplers) = match options.mode {
        SaveMode::Overwrite => {
            let captures = proposal.capture_rule_set();
            report.nodes_added = captures.len();
            report.fields_added = captures.values().map(|r| r.len()).sum();
            report.sampler_nodes_added = proposal.sampler_additions.len();
            report.roles_added = proposal
                .sampler_additions
                .values()
                .map(|r| r.len())
                .sum();
            (captures, proposal.sampler_additions.clone())
        }
        SaveMode::AppendNew => {
            let mut captures = user::load_user_captures(&paths.captures)?;
            for (class_name, rules) in proposal.capture_rule_set() {
                if !captures.contains_key(&class_name) {
                    report.nodes_added += 1;
                }
                let entry = captures.entry(class_name).or_default();
                for (field, rule) in rules {
                    match entry.get(&field) {
                        None => {
                            entry.insert(field, rule);
                            report.fields_added += 1;
                        }
                        Some(existing) if *existing == rule => {
                            report.fields_skipped += 1;
                        }
                        Some(_) if options.replace_conflicts => {
                            entry.insert(field, rule);
                            report.fields_replaced += 1;
                        }
                        Some(_) => {
                            report.fields_skipped += 1;
                        }
                    }
                }
            }

            let mut samplers = user::load_user_samplers(&paths.samplers)?;
            for (class_name, roles) in proposal.sampler_additions.clone() {
                if !samplers.contains_key(&class_name) {
                    report.sampler_nodes_added += 1;
                }
                let entry = samplers.entry(class_name).or_default();
                for (role, input) in roles {
                    match entry.get(&role) {
                        None => {
                            entry.insert(role, input);
                            report.roles_added += 1;
                        }
                        Some(existing) if *existing == input => {
                            report.roles_skipped += 1;
                        }
                        Some(_) if options.replace_conflicts => {
                            entry.insert(role, input);
                            report.roles_replaced += 1;
                        }
                        Some(_) => {
                            report.roles_skipped += 1;
                        }
                    }
                }
            }
            (captures, samplers)
        }
    };

    write_captures(paths, &final_captures, &mut report)?;
    write_samplers(paths, &final_samplers, &mut report)?;

    if options.rebuild_rules_doc {
        let doc = GeneratedDoc {
            version: RULES_DOC_VERSION,
            captures: final_captures,
            samplers: final_samplers,
        };
        write_json_atomic(&paths.generated, &doc)?;
        report.files_written.push("generated_rules.json".into());
    }

    info!("{}", report.status_line());
    Ok(report)
}

fn write_captures(
    paths: &UserRulePaths,
    captures: &CaptureRuleSet,
    report: &mut SaveReport,
) -> Result<(), RulesError> {
    write_json_atomic(&paths.captures, captures)?;
    report.files_written.push("user_captures.json".into());
    Ok(())
}

fn write_samplers(
    paths: &UserRulePaths,
    samplers: &SamplerTable,
    report: &mut SaveReport,
) -> Result<(), RulesError> {
    write_json_atomic(&paths.samplers, samplers)?;
    report.files_written.push("user_samplers.json".into());
    Ok(())
}
