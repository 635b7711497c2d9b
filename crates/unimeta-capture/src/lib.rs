//! Graph tracing, semantic field extraction, and parameter formatting.
//!
//! The save path runs through this crate: trace the graph backward from the
//! save node, pick the governing sampler(s), apply capture rules to every
//! contributing node, and render the resulting field map as an
//! Automatic1111-compatible parameter string. Hashing and artifact
//! resolution live here too, shared through [`HashCache`] and [`Resolver`].

pub mod civitai;
pub mod embedding;
pub mod extract;
pub mod fields;
pub mod format;
pub mod hash_cache;
pub mod loras;
pub mod pipeline;
pub mod predicate;
pub mod resolve;
pub mod select;
pub mod trace;

pub use extract::{Captured, CapturedInputs, ExtractionContext};
pub use fields::FieldMap;
pub use format::{append_fallback_annotation, render_parameters, FormatOptions};
pub use hash_cache::{HashCache, HashRecord};
pub use pipeline::{CaptureOptions, CaptureOutput, run_capture};
pub use resolve::{DirArtifactIndex, Resolver};
pub use select::{SamplerEntry, SamplerTier, SelectionMethod};
pub use trace::TraceResult;
