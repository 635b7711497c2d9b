//! Generator version stamps.
//!
//! The generator version is the final field of every parameter string; the
//! rules-document version guards regenerated rule documents against loader
//! drift. Tests pin the runtime version through an environment override so
//! snapshots stay stable across releases.

use std::env;

/// Version stamped into emitted metadata (`Metadata generator version`).
pub const GENERATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version stamp written into regenerated rule documents. The registry
/// loader logs a one-time advisory when a loaded document carries a
/// different stamp.
pub const RULES_DOC_VERSION: u32 = 3;

/// The effective generator version: the `UNIMETA_VERSION_OVERRIDE`
/// environment variable when set, otherwise [`GENERATOR_VERSION`].
pub fn generator_version() -> String {
    match env::var("UNIMETA_VERSION_OVERRIDE") {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => GENERATOR_VERSION.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_version_is_package_version() {
        // The override is unset in unit tests unless a test sets it.
        if env::var("UNIMETA_VERSION_OVERRIDE").is_err() {
            assert_eq!(generator_version(), GENERATOR_VERSION);
        }
    }
}
