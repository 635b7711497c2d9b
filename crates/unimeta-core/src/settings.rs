//! Runtime-evaluated configuration toggles.
//!
//! Every toggle is re-read at call time (no restart, no snapshot at process
//! start), mirroring how the host exposes them as environment switches. A
//! [`Settings`] value is captured once per save invocation and threaded
//! through the extraction context.

use std::env;
use std::path::PathBuf;

/// Verbosity of hash-computation logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashLogMode {
    #[default]
    None,
    /// Log `filename.ext` only.
    Filename,
    /// Log the full path.
    Path,
    /// Log path plus sidecar/cache disposition.
    Detailed,
    /// Everything, including cache hits.
    Debug,
}

impl HashLogMode {
    pub fn parse(raw: &str) -> HashLogMode {
        match raw.trim().to_ascii_lowercase().as_str() {
            "filename" => HashLogMode::Filename,
            "path" => HashLogMode::Path,
            "detailed" => HashLogMode::Detailed,
            "debug" => HashLogMode::Debug,
            _ => HashLogMode::None,
        }
    }
}

/// Configuration snapshot for one save invocation.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    /// Deterministic multiline parameter output; persistence targets an
    /// isolated test directory.
    pub test_mode: bool,
    /// Suppress the structured hash-detail block (Hashes summary unaffected).
    pub no_hash_detail: bool,
    /// Suppress the aggregated `LoRAs:` line. The UI parameter wins.
    pub no_lora_summary: bool,
    /// Verbose prompt-aliasing diagnostics.
    pub debug_prompts: bool,
    /// Bypass sidecar reuse and overwrite sidecars.
    pub force_rehash: bool,
    pub hash_log_mode: HashLogMode,
    /// Expose the lightweight sampler stub class for integration tests.
    pub enable_test_nodes: bool,
    /// Persistence root override used in test mode.
    pub user_rules_dir: Option<PathBuf>,
}

impl Settings {
    /// Reads the current toggle state from the environment.
    pub fn from_env() -> Settings {
        let flag = |name: &str| {
            env::var(name)
                .map(|v| !v.trim().is_empty())
                .unwrap_or(false)
        };
        Settings {
            test_mode: flag("UNIMETA_TEST_MODE"),
            no_hash_detail: flag("UNIMETA_NO_HASH_DETAIL"),
            no_lora_summary: flag("UNIMETA_NO_LORA_SUMMARY"),
            debug_prompts: flag("UNIMETA_DEBUG_PROMPTS"),
            force_rehash: flag("UNIMETA_FORCE_REHASH"),
            hash_log_mode: env::var("UNIMETA_HASH_LOG_MODE")
                .map(|v| HashLogMode::parse(&v))
                .unwrap_or_default(),
            enable_test_nodes: flag("UNIMETA_ENABLE_TEST_NODES"),
            user_rules_dir: env::var("UNIMETA_USER_RULES_DIR")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        }
    }
}
