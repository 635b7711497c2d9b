//! Content-addressed hashing of model artifacts with sidecar persistence.
//!
//! The full SHA-256 digest of an artifact is stored once in a sidecar file
//! named `<artifact>.sha256`; every later run reads the sidecar instead of
//! streaming the artifact again. The display form used in metadata is always
//! the first 10 characters of the lowercase digest, never a re-hash of a
//! shorter value.

use std::fs::{self, File};
use std::io::{Read, Write as _};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use unimeta_core::{CoreError, HashLogMode, Settings};

/// Number of leading hex characters used as the display form.
pub const TRUNCATED_LEN: usize = 10;

/// One computed (or sidecar-loaded) artifact digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashRecord {
    pub absolute_path: PathBuf,
    /// 64 lowercase hex characters.
    pub full: String,
    /// First [`TRUNCATED_LEN`] characters of `full`.
    pub truncated: String,
    pub computed_at: SystemTime,
}

/// In-memory, process-wide hash cache.
///
/// Entries are keyed by absolute path; a per-path mutex serializes digest
/// computation so only one thread streams a given artifact while reads of
/// distinct paths proceed in parallel.
#[derive(Default)]
pub struct HashCache {
    entries: DashMap<PathBuf, Arc<Mutex<Option<HashRecord>>>>,
    ignore_sidecars: AtomicBool,
}

impl HashCache {
    pub fn new() -> Self {
        HashCache::default()
    }

    /// Makes subsequent calls ignore existing sidecars and overwrite them.
    pub fn invalidate_all(&self) {
        self.ignore_sidecars.store(true, Ordering::Relaxed);
        self.entries.clear();
    }

    /// Returns the hash record for `path`, loading the sidecar when valid
    /// or streaming the artifact otherwise.
    ///
    /// A sidecar write failure is logged and ignored; an unreadable artifact
    /// fails with [`CoreError::ArtifactIo`], which callers convert to an
    /// omitted hash field.
    pub fn load_or_compute(
        &self,
        path: &Path,
        settings: &Settings,
    ) -> Result<HashRecord, CoreError> {
        let force = settings.force_rehash || self.ignore_sidecars.load(Ordering::Relaxed);
        let slot = self
            .entries
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();
        let mut guard = slot.lock().expect("hash cache slot poisoned");
        if let Some(record) = guard.as_ref() {
            if !force {
                log_hash(settings.hash_log_mode, path, "cached");
                return Ok(record.clone());
            }
        }

        let sidecar = sidecar_path(path);
        if !force {
            if let Some(full) = read_sidecar(&sidecar) {
                let record = record_from_full(path, full);
                log_hash(settings.hash_log_mode, path, "reading sidecar hash");
                *guard = Some(record.clone());
                return Ok(record);
            }
        }

        log_hash(settings.hash_log_mode, path, "hashing");
        let full = stream_sha256(path)?;
        if let Err(err) = write_sidecar_atomic(&sidecar, &full) {
            warn!(sidecar = %sidecar.display(), %err, "failed to write hash sidecar");
        }
        let record = record_from_full(path, full);
        *guard = Some(record.clone());
        Ok(record)
    }
}

/// Sidecar path: the artifact path with `.sha256` appended.
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".sha256");
    PathBuf::from(os)
}

fn record_from_full(path: &Path, full: String) -> HashRecord {
    let truncated = full.chars().take(TRUNCATED_LEN).collect();
    HashRecord {
        absolute_path: path.to_path_buf(),
        full,
        truncated,
        computed_at: SystemTime::now(),
    }
}

/// Reads and validates a sidecar: one 64-hex lowercase digest, optional
/// trailing whitespace. Anything else is treated as absent.
fn read_sidecar(sidecar: &Path) -> Option<String> {
    let text = fs::read_to_string(sidecar).ok()?;
    let trimmed = text.trim();
    if trimmed.len() == 64 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(trimmed.to_ascii_lowercase())
    } else {
        if !trimmed.is_empty() {
            debug!(sidecar = %sidecar.display(), "sidecar content is not a sha256 digest; ignoring");
        }
        None
    }
}

fn write_sidecar_atomic(sidecar: &Path, full: &str) -> std::io::Result<()> {
    let parent = sidecar
        .parent()
        .ok_or_else(|| std::io::Error::other("sidecar has no parent directory"))?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(full.as_bytes())?;
    tmp.write_all(b"\n")?;
    tmp.flush()?;
    tmp.persist(sidecar).map_err(|e| e.error)?;
    Ok(())
}

fn stream_sha256(path: &Path) -> Result<String, CoreError> {
    let artifact_io = |source: std::io::Error| CoreError::ArtifactIo {
        path: path.display().to_string(),
        source,
    };
    let mut file = File::open(path).map_err(artifact_io)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf).map_err(artifact_io)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn log_hash(mode: HashLogMode, path: &Path, action: &str) {
    match mode {
        HashLogMode::None => {}
        HashLogMode::Filename => {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            info!("{action} {name}");
        }
        HashLogMode::Path | HashLogMode::Detailed => {
            info!("{action} {}", path.display());
        }
        HashLogMode::Debug => {
            debug!("{action} {}", path.display());
            info!("{action} {}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings::default()
    }

    #[test]
    fn truncation_is_prefix_of_full() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("model.safetensors");
        fs::write(&artifact, b"weights").unwrap();

        let cache = HashCache::new();
        let record = cache.load_or_compute(&artifact, &settings()).unwrap();
        assert_eq!(record.full.len(), 64);
        assert_eq!(record.truncated.len(), TRUNCATED_LEN);
        assert_eq!(&record.full[..TRUNCATED_LEN], record.truncated);
    }

    #[test]
    fn sidecar_is_written_and_reused_without_artifact_reads() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("model.safetensors");
        fs::write(&artifact, b"weights").unwrap();

        let cache = HashCache::new();
        let first = cache.load_or_compute(&artifact, &settings()).unwrap();
        let sidecar = sidecar_path(&artifact);
        assert!(sidecar.exists());

        // Remove the artifact; a fresh cache must still answer from the
        // sidecar, proving zero artifact reads on the second call.
        fs::remove_file(&artifact).unwrap();
        let fresh = HashCache::new();
        let second = fresh.load_or_compute(&artifact, &settings()).unwrap();
        assert_eq!(first.full, second.full);
        assert_eq!(first.truncated, second.truncated);
    }

    #[test]
    fn sidecar_with_whitespace_parses() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("v.pt");
        let digest = "ab".repeat(32);
        fs::write(sidecar_path(&artifact), format!("{digest}  \n")).unwrap();

        let cache = HashCache::new();
        let record = cache.load_or_compute(&artifact, &settings()).unwrap();
        assert_eq!(record.full, digest);
        assert_eq!(record.truncated, &digest[..TRUNCATED_LEN]);
    }

    #[test]
    fn invalid_sidecar_falls_back_to_streaming() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("v.pt");
        fs::write(&artifact, b"data").unwrap();
        fs::write(sidecar_path(&artifact), "not a digest").unwrap();

        let cache = HashCache::new();
        let record = cache.load_or_compute(&artifact, &settings()).unwrap();
        assert_eq!(record.full.len(), 64);
        // The bad sidecar was replaced.
        let reread = fs::read_to_string(sidecar_path(&artifact)).unwrap();
        assert_eq!(reread.trim(), record.full);
    }

    #[test]
    fn force_rehash_overwrites_stale_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("v.pt");
        fs::write(&artifact, b"data").unwrap();
        let stale = "0".repeat(64);
        fs::write(sidecar_path(&artifact), &stale).unwrap();

        let cache = HashCache::new();
        let relaxed = cache.load_or_compute(&artifact, &settings()).unwrap();
        assert_eq!(relaxed.full, stale);

        let forced = Settings {
            force_rehash: true,
            ..Settings::default()
        };
        let record = cache.load_or_compute(&artifact, &forced).unwrap();
        assert_ne!(record.full, stale);
        let reread = fs::read_to_string(sidecar_path(&artifact)).unwrap();
        assert_eq!(reread.trim(), record.full);
    }

    #[test]
    fn invalidate_all_ignores_and_overwrites_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("v.pt");
        fs::write(&artifact, b"data").unwrap();
        let stale = "f".repeat(64);
        fs::write(sidecar_path(&artifact), &stale).unwrap();

        let cache = HashCache::new();
        cache.invalidate_all();
        let record = cache.load_or_compute(&artifact, &settings()).unwrap();
        assert_ne!(record.full, stale);
        let reread = fs::read_to_string(sidecar_path(&artifact)).unwrap();
        assert_eq!(reread.trim(), record.full);
    }

    #[test]
    fn unreadable_artifact_is_an_artifact_io_error() {
        let cache = HashCache::new();
        let missing = Path::new("/nonexistent/never/model.safetensors");
        match cache.load_or_compute(missing, &settings()) {
            Err(CoreError::ArtifactIo { .. }) => {}
            other => panic!("expected ArtifactIo, got {other:?}"),
        }
    }
}
