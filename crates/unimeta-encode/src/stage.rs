//! Staged fallback for the EXIF-constrained container.
//!
//! When the full workflow + parameters block exceeds the configured ceiling,
//! metadata degrades through defined stages: parameters-only EXIF, then an
//! allowlisted parameter subset, then a plain-text COM marker with no EXIF
//! at all. The reached stage is annotated in the parameter string exactly
//! once and mirrored per image for diagnostics.

use tracing::info;

use unimeta_capture::format::append_fallback_annotation;

use crate::exif::{self, ExifValue, TAG_MAKE, TAG_MODEL, TAG_USER_COMMENT};

/// Degradation level reached while embedding metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackStage {
    Full,
    ReducedExif,
    Minimal,
    ComMarker,
}

impl FallbackStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackStage::Full => "full",
            FallbackStage::ReducedExif => "reduced-exif",
            FallbackStage::Minimal => "minimal",
            FallbackStage::ComMarker => "com-marker",
        }
    }

    /// Annotation value; the full stage is never annotated.
    fn annotation(&self) -> Option<&'static str> {
        match self {
            FallbackStage::Full => None,
            other => Some(other.as_str()),
        }
    }
}

/// Keys kept by the minimal stage. Closed set; growing it requires a
/// coordinated docs/tests change.
const MINIMAL_ALLOWLIST: [&str; 13] = [
    "Steps",
    "Sampler",
    "CFG scale",
    "Guidance",
    "Seed",
    "Model",
    "Model hash",
    "VAE",
    "VAE hash",
    "Size",
    "Hashes",
    "Metadata Fallback",
    "Metadata generator version",
];

const MINIMAL_PREFIXES: [&str; 1] = ["Lora_"];

/// Trims a parameter string to the minimal allowlist, preserving the prompt
/// header lines.
pub fn minimal_parameters(parameters: &str) -> String {
    let lines: Vec<&str> = parameters.trim_end().lines().collect();
    if lines.is_empty() {
        return parameters.to_string();
    }

    // Header: prompt lines up to the first line that looks like a parameter
    // list (multiline mode yields one field per line; compact yields one
    // comma-joined line).
    let mut header: Vec<&str> = Vec::new();
    let mut tail: Vec<&str> = Vec::new();
    let mut in_tail = false;
    for line in lines {
        let looks_like_fields = !line.starts_with("Negative prompt:")
            && line.contains(": ")
            && (line.contains(", ") || is_single_field(line));
        if in_tail || looks_like_fields {
            in_tail = true;
            tail.push(line);
        } else {
            header.push(line);
        }
    }
    if tail.is_empty() {
        return parameters.to_string();
    }

    let blob = tail.join(", ");
    let kept: Vec<String> = blob
        .split(", ")
        .filter_map(|segment| {
            let key = segment.split(':').next()?.trim();
            let allowed = MINIMAL_ALLOWLIST.contains(&key)
                || MINIMAL_PREFIXES.iter().any(|p| key.starts_with(p));
            allowed.then(|| segment.trim().to_string())
        })
        .collect();

    let mut out = header.join("\n");
    if !kept.is_empty() {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&kept.join(", "));
    }
    out
}

fn is_single_field(line: &str) -> bool {
    // "Steps: 20" style lines from multiline mode.
    line.split_once(": ")
        .map(|(key, _)| {
            key.len() <= 40
                && key
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == ' ' || c == '_')
        })
        .unwrap_or(false)
}

/// A staged EXIF outcome: the block to embed (when any), the annotated
/// parameter string, and the stage reached.
#[derive(Debug, Clone)]
pub struct StagedExif {
    pub stage: FallbackStage,
    /// `None` means the com-marker stage: no EXIF segment at all.
    pub exif: Option<Vec<u8>>,
    pub parameters: String,
}

fn full_block(
    parameters: &str,
    workflow_json: Option<&str>,
    extra_entries: &[(String, String)],
) -> Vec<u8> {
    let mut zeroth: Vec<(u16, ExifValue)> = Vec::new();
    if let Some(workflow) = workflow_json {
        zeroth.push((TAG_MODEL, ExifValue::Ascii(format!("prompt:{workflow}"))));
    }
    for (index, (key, value)) in extra_entries.iter().enumerate() {
        zeroth.push((
            TAG_MAKE - index as u16,
            ExifValue::Ascii(format!("{key}:{value}")),
        ));
    }
    exif::dump(
        &zeroth,
        &[(TAG_USER_COMMENT, exif::user_comment(parameters))],
    )
}

fn comment_block(parameters: &str) -> Vec<u8> {
    exif::dump(
        &[],
        &[(TAG_USER_COMMENT, exif::user_comment(parameters))],
    )
}

/// Runs the stage ladder for one image.
///
/// `limit` is the effective EXIF ceiling in bytes (user-configured, already
/// clamped). Each stage's block is measured against it; the first fit wins.
pub fn stage_exif(
    parameters: &str,
    workflow_json: Option<&str>,
    extra_entries: &[(String, String)],
    limit: usize,
) -> StagedExif {
    let full = full_block(parameters, workflow_json, extra_entries);
    if full.len() <= limit {
        return StagedExif {
            stage: FallbackStage::Full,
            exif: Some(full),
            parameters: parameters.to_string(),
        };
    }
    info!(
        size = full.len(),
        limit, "EXIF exceeds limit; applying fallback"
    );

    let reduced_params =
        append_fallback_annotation(parameters, FallbackStage::ReducedExif.as_str());
    let reduced = comment_block(&reduced_params);
    if reduced.len() <= limit {
        return StagedExif {
            stage: FallbackStage::ReducedExif,
            exif: Some(reduced),
            parameters: reduced_params,
        };
    }

    let minimal_params = append_fallback_annotation(
        &minimal_parameters(parameters),
        FallbackStage::Minimal.as_str(),
    );
    let minimal = comment_block(&minimal_params);
    if minimal.len() <= limit && minimal.len() <= crate::jpeg::SEGMENT_LIMIT {
        return StagedExif {
            stage: FallbackStage::Minimal,
            exif: Some(minimal),
            parameters: minimal_params,
        };
    }

    let marker_params = append_fallback_annotation(
        &minimal_parameters(parameters),
        FallbackStage::ComMarker.as_str(),
    );
    StagedExif {
        stage: FallbackStage::ComMarker,
        exif: None,
        parameters: marker_params,
    }
}

/// Mirrors the annotation rule for callers embedding without the ladder.
pub fn annotate(parameters: &str, stage: FallbackStage) -> String {
    match stage.annotation() {
        Some(value) => append_fallback_annotation(parameters, value),
        None => parameters.to_string(),
    }
}
