//! Semantic field map assembly.
//!
//! Turns the filtered captures into the ordered key/value map that feeds the
//! parameter formatter and the container encoders. Two capture snapshots are
//! consulted: values upstream of the primary sampler are authoritative, with
//! the save-node snapshot as fallback.

use std::sync::OnceLock;

use indexmap::IndexMap;
use regex::Regex;
use serde_json::{json, Value};

use unimeta_core::{generator_version, ArtifactFamily, MetaField};

use crate::extract::{clean_model_name, Captured, CapturedInputs, ExtractionContext};
use crate::civitai;
use crate::loras;

/// The ordered semantic field map keyed by display names.
pub type FieldMap = IndexMap<String, Value>;

/// Display keys used across the map, the formatter, and the encoders.
pub mod keys {
    pub const POSITIVE_PROMPT: &str = "Positive prompt";
    pub const NEGATIVE_PROMPT: &str = "Negative prompt";
    pub const T5_PROMPT: &str = "T5 Prompt";
    pub const CLIP_PROMPT: &str = "CLIP Prompt";
    pub const STEPS: &str = "Steps";
    pub const SAMPLER: &str = "Sampler";
    pub const CFG_SCALE: &str = "CFG scale";
    pub const GUIDANCE: &str = "Guidance";
    pub const DENOISE: &str = "Denoise";
    pub const SEED: &str = "Seed";
    pub const CLIP_SKIP: &str = "Clip skip";
    pub const SIZE: &str = "Size";
    pub const MODEL: &str = "Model";
    pub const MODEL_HASH: &str = "Model hash";
    pub const WEIGHT_DTYPE: &str = "Weight dtype";
    pub const MAX_SHIFT: &str = "Max shift";
    pub const BASE_SHIFT: &str = "Base shift";
    pub const SHIFT: &str = "Shift";
    pub const VAE: &str = "VAE";
    pub const VAE_HASH: &str = "VAE hash";
    pub const SCHEDULER: &str = "Scheduler";
    pub const BATCH_INDEX: &str = "Batch index";
    pub const BATCH_SIZE: &str = "Batch size";
    pub const HASHES: &str = "Hashes";
    pub const HASH_DETAIL: &str = "Hash detail";
    pub const LORAS_SUMMARY: &str = "LoRAs";
    pub const SAMPLERS_TAIL: &str = "Samplers";
    pub const VERSION: &str = "Metadata generator version";
    pub const FALLBACK: &str = "Metadata Fallback";
}

/// Python-style object reprs (`<Class object at 0x…>`) are never valid
/// display values.
pub fn looks_like_object_repr(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.starts_with('<') && trimmed.contains('>')
}

fn usable_str(value: &Value) -> Option<&str> {
    let s = value.as_str()?;
    let trimmed = s.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("n/a") || looks_like_object_repr(s) {
        return None;
    }
    Some(s)
}

fn first_usable<'v>(entries: Option<&'v [Captured]>) -> Option<&'v Value> {
    entries?
        .iter()
        .map(|c| &c.value)
        .find(|v| match v {
            Value::Null => false,
            Value::String(_) => usable_str(v).is_some(),
            _ => true,
        })
}

fn entries<'a>(inputs: &'a CapturedInputs, field: MetaField) -> Option<&'a [Captured]> {
    inputs.get(&field).map(Vec::as_slice)
}

/// First usable value for `field`, preferring the sampler-upstream snapshot.
fn pick<'a>(
    before_sampler: &'a CapturedInputs,
    before_this: &'a CapturedInputs,
    field: MetaField,
) -> Option<&'a Value> {
    first_usable(entries(before_sampler, field))
        .or_else(|| first_usable(entries(before_this, field)))
}

fn dims_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\d+").expect("static regex"))
}

/// Pulls `(width, height)` out of strings like `"832 x 1216  (portrait)"`.
fn parse_dims_from_string(raw: &str) -> Option<(i64, i64)> {
    let mut numbers = dims_pattern().find_iter(raw).filter_map(|m| m.as_str().parse::<i64>().ok());
    Some((numbers.next()?, numbers.next()?))
}

fn dimension(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

const DTYPE_TOKENS: [&str; 22] = [
    "default", "half", "full", "autocast", "fp16", "bf16", "bfloat16", "float16", "float32",
    "f32", "f16", "int8", "qint8", "int4", "qint4", "q4", "q8", "nf4", "fp8", "fp8_e4m3fn",
    "fp8_e5m2", "fp8_e4m3fn_fast",
];

/// Normalizes a weight-dtype value to a readable token; `None` rejects it.
fn sanitize_dtype(value: &Value) -> Option<String> {
    let raw = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let mut s = raw.trim().to_string();
    for prefix in ["torch.", "np.", "numpy."] {
        if s.to_ascii_lowercase().starts_with(prefix) {
            s = s.rsplit('.').next().unwrap_or(&s).to_string();
            break;
        }
    }
    s = s.replace('-', "_");
    let lower = s.to_ascii_lowercase();
    if s.contains(['/', '\\'])
        || [".safetensors", ".st", ".pt", ".bin"]
            .iter()
            .any(|ext| lower.ends_with(ext))
    {
        return None;
    }
    if s.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }
    if DTYPE_TOKENS.contains(&lower.as_str()) {
        return Some(s);
    }
    if s.len() <= 24 && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.') {
        return Some(s);
    }
    None
}

/// Filename-based dtype inference used when no node declared one.
fn infer_dtype_from_model(model: &str) -> Option<&'static str> {
    let m = model.to_ascii_lowercase();
    if m.contains("fp8") && (m.contains("e4m3fn") || m.contains("e5m2")) {
        if m.contains("e4m3fn") {
            return Some(if m.contains("fast") || m.contains("turbo") {
                "fp8_e4m3fn_fast"
            } else {
                "fp8_e4m3fn"
            });
        }
        return Some("fp8_e5m2");
    }
    if m.contains("bf16") || m.contains("bfloat16") {
        return Some("bf16");
    }
    if m.contains("fp16") || m.contains("float16") {
        return Some("fp16");
    }
    if m.contains("float32") || m.contains("f32") {
        return Some("float32");
    }
    if m.contains("int8") || m.contains("q8") {
        return Some("int8");
    }
    if m.contains("int4") || m.contains("q4") || m.contains("nf4") {
        return Some("int4");
    }
    None
}

const MODEL_EXTENSIONS: [&str; 5] = [".safetensors", ".st", ".ckpt", ".pt", ".bin"];

fn has_model_extension(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    MODEL_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Base name preserving the extension.
fn base_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

/// Best display string for the model: prefer values carrying a recognized
/// extension, then any usable string.
fn best_model_display(values: Option<&[Captured]>) -> Option<String> {
    let values = values?;
    let strings: Vec<&str> = values.iter().filter_map(|c| usable_str(&c.value)).collect();
    strings
        .iter()
        .find(|s| has_model_extension(s))
        .or_else(|| strings.first())
        .map(|s| base_name(s).to_string())
}

// ---------------------------------------------------------------------------
// Prompt handling
// ---------------------------------------------------------------------------

fn prompt_text(
    before_sampler: &CapturedInputs,
    before_this: &CapturedInputs,
    field: MetaField,
) -> Option<String> {
    pick(before_sampler, before_this, field)
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Merges `*_g`/`*_l` variant pairs captured from the same node into one
/// newline-joined prompt.
fn merge_prompt_variants(
    before_sampler: &CapturedInputs,
    before_this: &CapturedInputs,
    field: MetaField,
    pairs: &[(&str, &str)],
) -> Option<String> {
    let source = entries(before_sampler, field)
        .filter(|e| !e.is_empty())
        .or_else(|| entries(before_this, field))?;
    for (g_name, l_name) in pairs {
        let find = |wanted: &str| {
            source.iter().find_map(|c| {
                (c.input_name.as_deref() == Some(wanted))
                    .then(|| c.as_str().map(|s| (c.node_id, s.to_string())))
                    .flatten()
            })
        };
        if let (Some((g_node, g_text)), Some((l_node, l_text))) = (find(g_name), find(l_name)) {
            if g_node == l_node {
                return Some(format!("{g_text}\n{l_text}").trim().to_string());
            }
        }
    }
    None
}

fn is_placeholder_negative(neg: &str) -> bool {
    matches!(
        neg.trim().to_ascii_lowercase().as_str(),
        "" | "none" | "(none)" | "no negative"
    )
}

/// Promotes lowercase `t5 prompt` / `clip prompt` keys to their title-cased
/// forms and removes the duplicates. Runs after extra-metadata merging.
pub fn normalize_dual_prompt_keys(map: &mut FieldMap) {
    for (canonical, lower) in [(keys::T5_PROMPT, "t5 prompt"), (keys::CLIP_PROMPT, "clip prompt")] {
        let duplicates: Vec<String> = map
            .keys()
            .filter(|k| k.to_ascii_lowercase() == lower && k.as_str() != canonical)
            .cloned()
            .collect();
        for key in duplicates {
            if let Some(value) = map.shift_remove(&key) {
                map.entry(canonical.to_string()).or_insert(value);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Assembles the field map from the two capture snapshots.
pub fn build_field_map(
    ctx: &ExtractionContext<'_>,
    before_sampler: &CapturedInputs,
    before_this: &CapturedInputs,
    civitai_sampler: bool,
) -> FieldMap {
    let mut map: FieldMap = IndexMap::new();

    // --- prompts -----------------------------------------------------------
    let mut positive = prompt_text(before_sampler, before_this, MetaField::PositivePrompt);
    if let Some(merged) = merge_prompt_variants(
        before_sampler,
        before_this,
        MetaField::PositivePrompt,
        &[("positive_g", "positive_l"), ("text_g", "text_l")],
    ) {
        positive = Some(merged);
    }
    let t5 = prompt_text(before_sampler, before_this, MetaField::T5Prompt);
    let clip_prompt = prompt_text(before_sampler, before_this, MetaField::ClipPrompt);
    let mut negative = prompt_text(before_sampler, before_this, MetaField::NegativePrompt);
    if let Some(merged) = merge_prompt_variants(
        before_sampler,
        before_this,
        MetaField::NegativePrompt,
        &[("negative_g", "negative_l")],
    ) {
        negative = Some(merged);
    }
    let negative = match negative {
        Some(neg)
            if !is_placeholder_negative(&neg)
                && Some(neg.as_str()) != positive.as_deref() =>
        {
            neg
        }
        _ => String::new(),
    };

    // CLIP model names feed both the CLIP_N entries and dual-prompt aliasing.
    let clip_models: Vec<String> = {
        let mut seen: Vec<String> = Vec::new();
        let sources = entries(before_sampler, MetaField::ClipModelName)
            .filter(|e| !e.is_empty())
            .or_else(|| entries(before_this, MetaField::ClipModelName))
            .unwrap_or(&[]);
        for captured in sources {
            if let Some(raw) = usable_str(&captured.value) {
                let display = clean_model_name(raw);
                if !seen.contains(&display) {
                    seen.push(display);
                }
            }
        }
        seen
    };

    let mut t5 = t5;
    let mut clip_prompt = clip_prompt;
    if t5.is_none() && clip_prompt.is_none() {
        let has_t5_encoder =
            clip_models.len() >= 2 && clip_models.iter().any(|n| n.to_ascii_lowercase().contains("t5"));
        if has_t5_encoder {
            if let Some(pos) = &positive {
                t5 = Some(pos.clone());
                clip_prompt = Some(pos.clone());
            }
        }
    }

    if ctx.settings.debug_prompts {
        tracing::debug!(
            positive = positive.is_some(),
            t5 = t5.is_some(),
            clip = clip_prompt.is_some(),
            clip_models = clip_models.len(),
            "prompt aliasing decision"
        );
    }
    if let Some(pos) = positive {
        map.insert(keys::POSITIVE_PROMPT.to_string(), Value::String(pos));
    }
    // Both present or neither: a lone half is dropped.
    if let (Some(t5), Some(clip_text)) = (t5, clip_prompt) {
        map.insert(keys::T5_PROMPT.to_string(), Value::String(t5));
        map.insert(keys::CLIP_PROMPT.to_string(), Value::String(clip_text));
    }
    map.insert(keys::NEGATIVE_PROMPT.to_string(), Value::String(negative));

    // --- sampler block -----------------------------------------------------
    if let Some(steps) = entries(before_sampler, MetaField::Steps)
        .and_then(|e| e.first())
        .and_then(|c| c.value.as_i64())
        .filter(|s| *s >= 0)
    {
        map.insert(keys::STEPS.to_string(), Value::from(steps));
    }

    let sampler_entries = entries(before_sampler, MetaField::SamplerName)
        .filter(|e| !e.is_empty())
        .or_else(|| entries(before_this, MetaField::SamplerName))
        .unwrap_or(&[]);
    let sampler_name = sampler_entries
        .iter()
        .find(|c| c.input_name.as_deref() == Some("sampler_name") && c.as_str().map(|s| !looks_like_object_repr(s)).unwrap_or(false))
        .or_else(|| {
            sampler_entries
                .iter()
                .find(|c| c.as_str().map(|s| !looks_like_object_repr(s)).unwrap_or(false))
        })
        .and_then(Captured::as_str)
        .map(str::to_string);
    let scheduler = pick(before_sampler, before_this, MetaField::Scheduler)
        .and_then(Value::as_str)
        .map(str::to_string);

    let sampler_display = if civitai_sampler {
        civitai::sampler_for_civitai(sampler_name.as_deref(), scheduler.as_deref())
    } else {
        sampler_name.clone().unwrap_or_default()
    };
    if !sampler_display.is_empty() {
        map.insert(keys::SAMPLER.to_string(), Value::String(sampler_display));
    }
    if let Some(scheduler) = &scheduler {
        map.insert(
            keys::SCHEDULER.to_string(),
            Value::String(scheduler.clone()),
        );
    }

    if let Some(cfg) = pick(before_sampler, before_this, MetaField::Cfg) {
        map.insert(keys::CFG_SCALE.to_string(), cfg.clone());
    }
    if let Some(guidance) = pick(before_sampler, before_this, MetaField::Guidance) {
        map.insert(keys::GUIDANCE.to_string(), guidance.clone());
    }
    if let Some(denoise) = pick(before_sampler, before_this, MetaField::Denoise) {
        map.insert(keys::DENOISE.to_string(), denoise.clone());
    }
    if let Some(seed) = pick(before_sampler, before_this, MetaField::Seed) {
        map.insert(keys::SEED.to_string(), seed.clone());
    }
    if let Some(skip) = pick(before_sampler, before_this, MetaField::ClipSkip) {
        map.insert(keys::CLIP_SKIP.to_string(), skip.clone());
    }

    // --- size --------------------------------------------------------------
    if let Some(size) = resolve_size(before_sampler) {
        map.insert(keys::SIZE.to_string(), Value::String(size));
    }

    // --- model / dtype / shifts -------------------------------------------
    let model_display = best_model_display(entries(before_sampler, MetaField::ModelName))
        .or_else(|| best_model_display(entries(before_this, MetaField::ModelName)));
    if let Some(display) = &model_display {
        map.insert(
            keys::MODEL.to_string(),
            Value::String(clean_model_name(display)),
        );
    }
    let mut model_hash = pick(before_sampler, before_this, MetaField::ModelHash)
        .and_then(Value::as_str)
        .map(str::to_string);
    if model_hash.is_none() {
        if let Some(display) = &model_display {
            model_hash = hash_by_display(ctx, display);
        }
    }
    if let Some(hash) = &model_hash {
        map.insert(keys::MODEL_HASH.to_string(), Value::String(hash.clone()));
    }

    let dtype = pick(before_sampler, before_this, MetaField::WeightDtype)
        .and_then(sanitize_dtype)
        .or_else(|| {
            model_display
                .as_deref()
                .and_then(infer_dtype_from_model)
                .map(str::to_string)
        });
    if let Some(dtype) = dtype {
        map.insert(keys::WEIGHT_DTYPE.to_string(), Value::String(dtype));
    }

    for (key, field) in [
        (keys::MAX_SHIFT, MetaField::MaxShift),
        (keys::BASE_SHIFT, MetaField::BaseShift),
        (keys::SHIFT, MetaField::Shift),
    ] {
        if let Some(value) = pick(before_sampler, before_this, field) {
            map.insert(key.to_string(), value.clone());
        }
    }

    for (index, name) in clip_models.iter().enumerate() {
        map.insert(
            format!("CLIP_{} Model name", index + 1),
            Value::String(name.clone()),
        );
    }

    // --- vae ---------------------------------------------------------------
    let vae_display = pick(before_sampler, before_this, MetaField::VaeName)
        .and_then(Value::as_str)
        .map(|s| base_name(s).to_string());
    if let Some(display) = &vae_display {
        map.insert(keys::VAE.to_string(), Value::String(display.clone()));
    }
    let mut vae_hash = first_usable(entries(before_this, MetaField::VaeHash))
        .or_else(|| first_usable(entries(before_sampler, MetaField::VaeHash)))
        .and_then(Value::as_str)
        .map(str::to_string);
    if vae_hash.is_none() {
        if let Some(display) = &vae_display {
            let resolved = ctx.resolver.resolve(ArtifactFamily::Vae, display);
            if let Some(path) = resolved.absolute_path {
                vae_hash = ctx
                    .hashes
                    .load_or_compute(&path, ctx.settings)
                    .ok()
                    .map(|r| r.truncated);
            }
        }
    }
    if let Some(hash) = &vae_hash {
        map.insert(keys::VAE_HASH.to_string(), Value::String(hash.clone()));
    }

    // --- loras & embeddings ------------------------------------------------
    let lora_slots = aligned_lora_slots(before_sampler);
    for (index, slot) in lora_slots.iter().enumerate() {
        let prefix = format!("Lora_{}", index + 1);
        map.insert(
            format!("{prefix} Model name"),
            Value::String(slot.name.clone()),
        );
        if let Some(hash) = &slot.hash {
            map.insert(format!("{prefix} Model hash"), Value::String(hash.clone()));
        }
        if let Some(sm) = slot.strength_model {
            map.insert(format!("{prefix} Strength model"), json!(sm));
        }
        if let Some(sc) = slot.strength_clip {
            map.insert(format!("{prefix} Strength clip"), json!(sc));
        }
    }

    let embeddings = aligned_embeddings(before_sampler, before_this);
    for (index, (name, hash)) in embeddings.iter().enumerate() {
        let prefix = format!("Embedding_{}", index + 1);
        map.insert(format!("{prefix} name"), Value::String(name.clone()));
        if let Some(hash) = hash {
            map.insert(format!("{prefix} hash"), Value::String(hash.clone()));
        }
    }

    // --- hashes summary ----------------------------------------------------
    let mut summary: IndexMap<String, String> = IndexMap::new();
    if let Some(hash) = &model_hash {
        summary.insert("model".to_string(), hash.clone());
    }
    if let Some(hash) = &vae_hash {
        summary.insert("vae".to_string(), hash.clone());
    }
    for slot in &lora_slots {
        if let Some(hash) = &slot.hash {
            summary.insert(
                format!("lora:{}", clean_model_name(&slot.name)),
                hash.clone(),
            );
        }
    }
    for (name, hash) in &embeddings {
        if let Some(hash) = hash {
            summary.insert(format!("embed:{}", clean_model_name(name)), hash.clone());
        }
    }
    if !summary.is_empty() {
        let rendered = serde_json::to_string(&summary).unwrap_or_default();
        map.insert(keys::HASHES.to_string(), Value::String(rendered));
    }

    // --- hash detail -------------------------------------------------------
    if !ctx.settings.no_hash_detail {
        let detail = json!({
            "model": {
                "name": map.get(keys::MODEL),
                "hash": map.get(keys::MODEL_HASH),
            },
            "vae": {
                "name": map.get(keys::VAE),
                "hash": map.get(keys::VAE_HASH),
            },
            "loras": lora_slots
                .iter()
                .enumerate()
                .map(|(index, slot)| {
                    json!({
                        "index": index + 1,
                        "name": slot.name,
                        "hash": slot.hash,
                        "strength_model": slot.strength_model,
                        "strength_clip": slot.strength_clip,
                    })
                })
                .collect::<Vec<_>>(),
            "embeddings": embeddings
                .iter()
                .enumerate()
                .map(|(index, (name, hash))| {
                    json!({"index": index + 1, "name": name, "hash": hash})
                })
                .collect::<Vec<_>>(),
            "version": generator_version(),
        });
        map.insert(
            keys::HASH_DETAIL.to_string(),
            Value::String(detail.to_string()),
        );
    }

    map.insert(
        keys::VERSION.to_string(),
        Value::String(generator_version()),
    );
    map
}

fn hash_by_display(ctx: &ExtractionContext<'_>, display: &str) -> Option<String> {
    for family in [ArtifactFamily::Unet, ArtifactFamily::Checkpoint] {
        let resolved = ctx.resolver.resolve(family, display);
        if let Some(path) = resolved.absolute_path {
            if let Ok(record) = ctx.hashes.load_or_compute(&path, ctx.settings) {
                return Some(record.truncated);
            }
        }
    }
    None
}

fn resolve_size(before_sampler: &CapturedInputs) -> Option<String> {
    let widths = entries(before_sampler, MetaField::ImageWidth).unwrap_or(&[]);
    let heights = entries(before_sampler, MetaField::ImageHeight).unwrap_or(&[]);

    if let (Some(w_raw), Some(h_raw)) = (widths.first(), heights.first()) {
        if let (Some(w), Some(h)) = (dimension(&w_raw.value), dimension(&h_raw.value)) {
            return Some(format!("{w}x{h}"));
        }
        // Identical strings carrying both dimensions ("832 x 1216").
        if let (Some(ws), Some(hs)) = (w_raw.as_str(), h_raw.as_str()) {
            if ws == hs {
                if let Some((w, h)) = parse_dims_from_string(ws) {
                    return Some(format!("{w}x{h}"));
                }
            }
        }
    }
    // A single dimensions value, as a pair or a string.
    for captured in widths.iter().chain(heights.iter()) {
        match &captured.value {
            Value::Array(items) if items.len() >= 2 => {
                if let (Some(w), Some(h)) = (dimension(&items[0]), dimension(&items[1])) {
                    return Some(format!("{w}x{h}"));
                }
            }
            Value::String(s) => {
                if let Some((w, h)) = parse_dims_from_string(s) {
                    return Some(format!("{w}x{h}"));
                }
            }
            _ => {}
        }
    }
    None
}

/// Zips the four LoRA capture lists back into aligned slots, filters
/// aggregate blobs, and dedups by name preferring hashed entries.
fn aligned_lora_slots(inputs: &CapturedInputs) -> Vec<loras::LoraSlot> {
    let names = entries(inputs, MetaField::LoraModelName).unwrap_or(&[]);
    let hashes = entries(inputs, MetaField::LoraModelHash).unwrap_or(&[]);
    let model_strengths = entries(inputs, MetaField::LoraStrengthModel).unwrap_or(&[]);
    let clip_strengths = entries(inputs, MetaField::LoraStrengthClip).unwrap_or(&[]);

    let mut slots: Vec<loras::LoraSlot> = Vec::new();
    for (index, name_entry) in names.iter().enumerate() {
        let Some(raw_name) = name_entry.as_str() else {
            continue;
        };
        if loras::is_aggregate_blob(raw_name) {
            continue;
        }
        let slot = loras::LoraSlot {
            name: base_name(raw_name).to_string(),
            hash: hashes
                .get(index)
                .and_then(|c| usable_str(&c.value))
                .map(str::to_string),
            strength_model: model_strengths.get(index).and_then(|c| c.value.as_f64()),
            strength_clip: clip_strengths.get(index).and_then(|c| c.value.as_f64()),
        };
        if slot.is_none_slot() {
            continue;
        }
        slots.push(slot);
    }

    // Dedup by case-insensitive name; an entry with a real hash wins.
    let mut deduped: Vec<loras::LoraSlot> = Vec::new();
    for slot in slots {
        let key = slot.name.to_ascii_lowercase();
        match deduped
            .iter_mut()
            .find(|s| s.name.to_ascii_lowercase() == key)
        {
            None => deduped.push(slot),
            Some(existing) => {
                if existing.hash.is_none() && slot.hash.is_some() {
                    *existing = slot;
                }
            }
        }
    }
    deduped
}

fn aligned_embeddings(
    before_sampler: &CapturedInputs,
    before_this: &CapturedInputs,
) -> Vec<(String, Option<String>)> {
    let (names, hashes) = if entries(before_sampler, MetaField::EmbeddingName)
        .map(|e| !e.is_empty())
        .unwrap_or(false)
    {
        (
            entries(before_sampler, MetaField::EmbeddingName).unwrap_or(&[]),
            entries(before_sampler, MetaField::EmbeddingHash).unwrap_or(&[]),
        )
    } else {
        (
            entries(before_this, MetaField::EmbeddingName).unwrap_or(&[]),
            entries(before_this, MetaField::EmbeddingHash).unwrap_or(&[]),
        )
    };
    let mut out = Vec::new();
    for (index, name_entry) in names.iter().enumerate() {
        let Some(name) = name_entry.as_str() else {
            continue;
        };
        let hash = hashes
            .get(index)
            .and_then(|c| usable_str(&c.value))
            .map(str::to_string);
        if !out.iter().any(|(n, _): &(String, Option<String>)| n == name) {
            out.push((name.to_string(), hash));
        }
    }
    out
}
