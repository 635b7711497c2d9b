//! Rule registry, discovery, and persistence.
//!
//! This crate owns the large per-class rule tables: the built-in defaults,
//! the bundled extension packs, the user JSON overlay, and the machinery
//! around them: the layered [`registry`], the heuristic [`scanner`] that
//! proposes new rules from the host class table, and the [`writer`] that
//! persists proposals with backups and bounded retention.

pub mod defaults;
pub mod error;
pub mod ext;
pub mod registry;
pub mod scanner;
pub mod user;
pub mod writer;

pub use error::RulesError;
pub use registry::{Registry, RegistryLoader, RegistryOptions};
pub use scanner::{RuleProposal, ScanMode, ScanOptions, ScanSummary, Scanner};
pub use user::{GeneratedDoc, UserRulePaths};
pub use writer::{RestoreReport, SaveMode, SaveOptions, SaveReport};
