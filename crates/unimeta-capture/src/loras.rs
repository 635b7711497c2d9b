//! LoRA reference collection.
//!
//! A LoRA slot is the aligned quadruple (name, hash, model strength, clip
//! strength). Everything here preserves that alignment: slots are built as
//! units and filtered as units, never as four independent lists.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use unimeta_core::{ArtifactFamily, Settings, WorkflowNode};

use crate::hash_cache::HashCache;
use crate::resolve::Resolver;

/// One aligned LoRA slot before display formatting.
#[derive(Debug, Clone, PartialEq)]
pub struct LoraSlot {
    pub name: String,
    pub hash: Option<String>,
    pub strength_model: Option<f64>,
    pub strength_clip: Option<f64>,
}

impl LoraSlot {
    /// True when the slot is disabled and must be dropped entirely.
    pub fn is_none_slot(&self) -> bool {
        self.name.trim().eq_ignore_ascii_case("none") || self.name.trim().is_empty()
    }
}

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)<lora:([^:>]+):([0-9]*\.?[0-9]+)(?::([0-9]*\.?[0-9]+))?>")
            .expect("static regex")
    })
}

/// Parses `<lora:name:sm[:sc]>` occurrences from a prompt text. A missing
/// clip strength repeats the model strength.
pub fn parse_inline_tags(text: &str) -> Vec<LoraSlot> {
    let mut slots = Vec::new();
    for captures in tag_pattern().captures_iter(text) {
        let name = captures[1].to_string();
        let strength_model = captures[2].parse::<f64>().ok();
        let strength_clip = captures
            .get(3)
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .or(strength_model);
        if slots.iter().any(|s: &LoraSlot| s.name == name) {
            continue;
        }
        slots.push(LoraSlot {
            name,
            hash: None,
            strength_model,
            strength_clip,
        });
    }
    slots
}

/// True for values that are aggregated tag blobs rather than a single
/// reference, e.g. `"<lora:a:0.5> <lora:b:0.7>"`.
pub fn is_aggregate_blob(value: &str) -> bool {
    value.to_ascii_lowercase().matches("<lora:").count() > 1
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn slot_from_list(items: &[Value]) -> Option<LoraSlot> {
    let name = items.first()?.as_str()?.to_string();
    Some(LoraSlot {
        name,
        hash: None,
        strength_model: items.get(1).and_then(as_f64),
        strength_clip: items.get(2).and_then(as_f64),
    })
}

fn slot_from_object(object: &Value) -> Option<LoraSlot> {
    let map = object.as_object()?;
    if let Some(on) = map.get("on").and_then(Value::as_bool) {
        if !on {
            return None;
        }
    }
    let name = ["lora", "lora_name", "name"]
        .iter()
        .find_map(|key| map.get(*key).and_then(Value::as_str))?
        .to_string();
    let strength_model = ["strength", "strength_model", "model_strength"]
        .iter()
        .find_map(|key| map.get(*key).and_then(as_f64));
    let strength_clip = ["strength_clip", "clip_strength", "strength_two"]
        .iter()
        .find_map(|key| map.get(*key).and_then(as_f64));
    Some(LoraSlot {
        name,
        hash: None,
        strength_model,
        strength_clip: strength_clip.or(strength_model),
    })
}

/// Structured input names that carry a whole LoRA list.
const STACK_INPUTS: [&str; 3] = ["lora_stack", "loras", "loaded_loras"];

/// Placeholder emitted when a structured stack exists but cannot be parsed.
/// Only valid for fields whose downstream consumers tolerate plain text.
pub const PARSE_ERROR_PLACEHOLDER: &str = "error: see log";

/// Collects slots from a loader node: structured list inputs first, then
/// nested `lora_*` objects, then inline tags in a `text` input.
pub fn collect_from_loader(node: &WorkflowNode) -> Vec<LoraSlot> {
    for input_name in STACK_INPUTS {
        if let Some(items) = node.input(input_name).and_then(|v| v.as_list()) {
            let mut slots = Vec::new();
            for item in items {
                let slot = match item {
                    Value::Array(parts) => slot_from_list(parts),
                    Value::Object(_) => slot_from_object(item),
                    _ => None,
                };
                if let Some(slot) = slot {
                    slots.push(slot);
                }
            }
            if !slots.is_empty() {
                return slots;
            }
            if !items.is_empty() {
                tracing::warn!(
                    class = %node.class_name,
                    input = %input_name,
                    "structured LoRA stack did not parse; emitting placeholder"
                );
                return vec![LoraSlot {
                    name: PARSE_ERROR_PLACEHOLDER.to_string(),
                    hash: None,
                    strength_model: None,
                    strength_clip: None,
                }];
            }
        }
    }

    let mut nested: Vec<(&String, LoraSlot)> = Vec::new();
    for (input_name, value) in &node.inputs {
        if !input_name.starts_with("lora_") {
            continue;
        }
        if let Some(object) = value.as_object() {
            if let Some(slot) = slot_from_object(object) {
                nested.push((input_name, slot));
            }
        }
    }
    if !nested.is_empty() {
        nested.sort_by(|a, b| a.0.cmp(b.0));
        return nested.into_iter().map(|(_, slot)| slot).collect();
    }

    if let Some(text) = node.input("text").and_then(|v| v.as_str()) {
        return parse_inline_tags(text);
    }
    Vec::new()
}

/// Resolves and hashes a slot in place. Slots whose artifact cannot be
/// resolved keep `hash: None`; the name field is still emitted.
pub fn hash_slot(
    slot: &mut LoraSlot,
    resolver: &Resolver,
    hashes: &HashCache,
    settings: &Settings,
) {
    if slot.is_none_slot() || slot.hash.is_some() {
        return;
    }
    let resolved = resolver.resolve(ArtifactFamily::Lora, &slot.name);
    if let Some(path) = &resolved.absolute_path {
        if let Ok(record) = hashes.load_or_compute(path, settings) {
            slot.hash = Some(record.truncated);
        }
    }
}
