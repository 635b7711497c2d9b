//! Parameter string rendering.
//!
//! Renders the semantic field map in the Automatic1111 convention: prompt
//! header first, negative prompt line when present, then `Key: Value` fields
//! in a fixed primary order with grouped LoRA/embedding entries, the Hashes
//! summary near the end, and the generator version always last.

use serde_json::Value;

use unimeta_core::Settings;

use crate::civitai;
use crate::fields::{keys, looks_like_object_repr, FieldMap};
use crate::select::SamplerEntry;

/// Field order for the leading block; everything else follows alphabetically.
const PRIMARY_ORDER: [&str; 18] = [
    keys::STEPS,
    keys::SAMPLER,
    keys::CFG_SCALE,
    keys::GUIDANCE,
    keys::DENOISE,
    keys::SEED,
    keys::SIZE,
    keys::BATCH_INDEX,
    keys::BATCH_SIZE,
    keys::MODEL,
    keys::MODEL_HASH,
    keys::WEIGHT_DTYPE,
    keys::MAX_SHIFT,
    keys::BASE_SHIFT,
    keys::CLIP_SKIP,
    keys::VAE,
    keys::VAE_HASH,
    keys::SHIFT,
];

/// Rendering options resolved per call.
#[derive(Debug, Clone, Default)]
pub struct FormatOptions {
    /// One field per line (test mode) instead of the compact comma join.
    pub multiline: bool,
    /// UI override for the aggregated `LoRAs:` line; `None` defers to the
    /// environment toggle.
    pub include_lora_summary: Option<bool>,
    /// Record the captured guidance under `CFG scale` and drop `Guidance`.
    pub guidance_as_cfg: bool,
}

fn display_value(value: &Value) -> Option<String> {
    let rendered = match value {
        Value::String(s) => s.clone(),
        Value::Null => return None,
        other => other.to_string(),
    };
    let cleaned = rendered.replace('\n', " ").trim().to_string();
    if cleaned.is_empty() || looks_like_object_repr(&cleaned) {
        return None;
    }
    Some(cleaned)
}

fn prompt_of(map: &FieldMap, key: &str) -> String {
    map.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Index of a grouped key like `Lora_3 Model hash`, with its sub-order rank.
fn group_key(key: &str, prefix: &str, sub_order: &[&str]) -> Option<(usize, usize)> {
    let rest = key.strip_prefix(prefix)?;
    let (index, suffix) = rest.split_once(' ')?;
    let index: usize = index.parse().ok()?;
    let rank = sub_order
        .iter()
        .position(|s| suffix == *s)
        .unwrap_or(sub_order.len());
    Some((index, rank))
}

fn grouped_keys(map: &FieldMap, prefix: &str, sub_order: &[&str]) -> Vec<String> {
    let mut keys: Vec<(usize, usize, String)> = map
        .keys()
        .filter_map(|k| {
            group_key(k, prefix, sub_order).map(|(index, rank)| (index, rank, k.clone()))
        })
        .collect();
    keys.sort();
    keys.into_iter().map(|(_, _, k)| k).collect()
}

fn lora_summary(map: &FieldMap) -> Option<String> {
    let mut parts = Vec::new();
    let mut index = 1;
    loop {
        let name_key = format!("Lora_{index} Model name");
        let Some(name) = map.get(&name_key).and_then(Value::as_str) else {
            break;
        };
        let strength = map
            .get(&format!("Lora_{index} Strength model"))
            .or_else(|| map.get(&format!("Lora_{index} Strength clip")))
            .and_then(Value::as_f64);
        match strength {
            Some(s) => parts.push(format!("{name}: str_{s}")),
            None => parts.push(name.to_string()),
        }
        index += 1;
    }
    (!parts.is_empty()).then(|| parts.join(", "))
}

fn samplers_tail(entries: &[SamplerEntry]) -> String {
    let any_segments = entries.iter().any(SamplerEntry::is_segment);
    let mut parts = Vec::new();
    for entry in entries {
        let name = entry
            .sampler_name
            .clone()
            .unwrap_or_else(|| entry.class_name.clone());
        if let (Some(start), Some(end)) = (entry.start_step, entry.end_step) {
            parts.push(format!("{name} ({start}-{end})"));
        } else if let Some(steps) = entry.steps.filter(|_| any_segments) {
            let end = if steps > 0 { steps - 1 } else { 0 };
            parts.push(format!("{name} (0-{end})"));
        } else {
            parts.push(name);
        }
    }
    parts.join(" | ")
}

/// Renders the parameter string.
///
/// `multi_entries` longer than one sampler appends the `Samplers:` tail; the
/// primary entry must come first (see [`crate::select::ordered_entries`]).
pub fn render_parameters(
    map: &FieldMap,
    options: &FormatOptions,
    settings: &Settings,
    multi_entries: &[SamplerEntry],
) -> String {
    // --- header ------------------------------------------------------------
    let t5 = map.get(keys::T5_PROMPT).and_then(Value::as_str);
    let clip = map.get(keys::CLIP_PROMPT).and_then(Value::as_str);
    let mut header = Vec::new();
    match (t5, clip) {
        (Some(t5), Some(clip)) => {
            // Dual-encoder: the unified positive header is suppressed.
            header.push(format!("T5 Prompt: {t5}"));
            header.push(format!("CLIP Prompt: {clip}"));
        }
        _ => {
            let positive = prompt_of(map, keys::POSITIVE_PROMPT);
            if !positive.is_empty() {
                header.push(positive);
            }
        }
    }
    let negative = prompt_of(map, keys::NEGATIVE_PROMPT);
    if !negative.is_empty() {
        header.push(format!("Negative prompt: {negative}"));
    }

    // --- field selection ---------------------------------------------------
    let prompt_keys = [
        keys::POSITIVE_PROMPT,
        keys::NEGATIVE_PROMPT,
        keys::T5_PROMPT,
        keys::CLIP_PROMPT,
    ];
    let mut data: FieldMap = map
        .iter()
        .filter(|(k, _)| {
            !prompt_keys.contains(&k.as_str())
                && k.as_str() != keys::HASH_DETAIL
                && k.to_ascii_lowercase() != "t5 prompt"
                && k.to_ascii_lowercase() != "clip prompt"
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    if options.guidance_as_cfg {
        if let Some(guidance) = data.shift_remove(keys::GUIDANCE) {
            data.insert(keys::CFG_SCALE.to_string(), guidance);
        }
    }

    let include_summary = options
        .include_lora_summary
        .unwrap_or(!settings.no_lora_summary);

    // --- ordering ----------------------------------------------------------
    let mut ordered: Vec<(String, Value)> = Vec::new();
    let mut seen: Vec<String> = vec![
        keys::HASHES.to_string(),
        keys::LORAS_SUMMARY.to_string(),
        keys::VERSION.to_string(),
    ];
    for key in PRIMARY_ORDER {
        if let Some(value) = data.get(key) {
            ordered.push((key.to_string(), value.clone()));
            seen.push(key.to_string());
        }
    }
    for key in grouped_keys(
        &data,
        "Lora_",
        &["Model name", "Model hash", "Strength model", "Strength clip"],
    ) {
        ordered.push((key.clone(), data[&key].clone()));
        seen.push(key);
    }
    for key in grouped_keys(&data, "Embedding_", &["name", "hash"]) {
        ordered.push((key.clone(), data[&key].clone()));
        seen.push(key);
    }
    let mut remaining: Vec<String> = data
        .keys()
        .filter(|k| !seen.contains(*k))
        .cloned()
        .collect();
    remaining.sort();
    for key in remaining {
        ordered.push((key.clone(), data[&key].clone()));
    }

    if multi_entries.len() > 1 {
        ordered.push((
            keys::SAMPLERS_TAIL.to_string(),
            Value::String(samplers_tail(multi_entries)),
        ));
    }
    if include_summary {
        if let Some(summary) = lora_summary(map) {
            ordered.push((keys::LORAS_SUMMARY.to_string(), Value::String(summary)));
        }
    }
    if let Some(hashes) = data.get(keys::HASHES) {
        ordered.push((keys::HASHES.to_string(), hashes.clone()));
    }
    if let Some(version) = data.get(keys::VERSION) {
        ordered.push((keys::VERSION.to_string(), version.clone()));
    }

    // --- rendering ---------------------------------------------------------
    let mut parts: Vec<String> = Vec::new();
    for (key, value) in ordered {
        let Some(mut rendered) = display_value(&value) else {
            continue;
        };
        if key == keys::SAMPLER {
            rendered = civitai::format_sampler_display(&rendered);
        }
        parts.push(format!("{key}: {rendered}"));
    }

    let header_block = header.join("\n");
    if options.multiline {
        let mut out = header_block;
        if !parts.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&parts.join("\n"));
        }
        out
    } else {
        let mut out = header_block;
        if !parts.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&parts.join(", "));
        }
        out
    }
}

/// Appends `Metadata Fallback: <stage>` exactly once, positioned as the
/// final non-version token.
pub fn append_fallback_annotation(parameters: &str, stage: &str) -> String {
    if parameters.contains("Metadata Fallback:") {
        return parameters.to_string();
    }
    let annotation_key = keys::FALLBACK;
    let version_token_compact = format!(", {}: ", keys::VERSION);
    if let Some(position) = parameters.rfind(&version_token_compact) {
        let (head, tail) = parameters.split_at(position);
        return format!("{head}, {annotation_key}: {stage}{tail}");
    }
    let version_token_line = format!("\n{}: ", keys::VERSION);
    if let Some(position) = parameters.rfind(&version_token_line) {
        let (head, tail) = parameters.split_at(position);
        return format!("{head}\n{annotation_key}: {stage}{tail}");
    }
    let trimmed = parameters.trim_end_matches('\n');
    format!("{trimmed}, {annotation_key}: {stage}")
}
