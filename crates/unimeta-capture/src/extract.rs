//! Rule-driven input collection.
//!
//! Walks every node of the graph in ascending id order, applies the class's
//! capture rules, and accumulates raw values per [`MetaField`]. Field
//! failures never abort the walk: a rule that cannot produce a value is
//! logged and omitted.

use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use unimeta_core::rules::{FormatterKind, NodeClassRules, SelectorKind, ValueSource};
use unimeta_core::{
    ArtifactFamily, MetaField, NodeId, Settings, WorkflowGraph, WorkflowNode,
};
use unimeta_rules::Registry;

use crate::hash_cache::HashCache;
use crate::loras::{self, LoraSlot};
use crate::predicate;
use crate::resolve::Resolver;
use crate::trace::TraceResult;
use crate::embedding;

/// One captured raw value with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct Captured {
    pub node_id: NodeId,
    pub value: Value,
    pub input_name: Option<String>,
}

impl Captured {
    fn new(node_id: NodeId, value: Value, input_name: Option<&str>) -> Self {
        Captured {
            node_id,
            value,
            input_name: input_name.map(str::to_string),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.value.as_str()
    }
}

/// Raw captures per field, in graph walk order.
pub type CapturedInputs = IndexMap<MetaField, Vec<Captured>>;

/// Everything the extractor consults, built once per save call.
pub struct ExtractionContext<'a> {
    pub graph: &'a WorkflowGraph,
    pub registry: &'a Registry,
    pub resolver: &'a Resolver,
    pub hashes: &'a HashCache,
    pub settings: &'a Settings,
}

impl<'a> ExtractionContext<'a> {
    /// Resolves an artifact reference and returns its truncated hash.
    fn hash_artifact(&self, family: ArtifactFamily, raw: &str) -> Option<String> {
        let resolved = self.resolver.resolve(family, raw);
        let path = resolved.absolute_path?;
        self.hashes
            .load_or_compute(&path, self.settings)
            .ok()
            .map(|record| record.truncated)
    }

    /// Model hashes try the checkpoint roots first and fall back to the
    /// diffusion-model roots, so Flux-style UNet checkpoints still hash.
    fn hash_model(&self, primary: ArtifactFamily, raw: &str) -> Option<String> {
        let secondary = match primary {
            ArtifactFamily::Checkpoint => ArtifactFamily::Unet,
            ArtifactFamily::Unet => ArtifactFamily::Checkpoint,
            other => {
                return self.hash_artifact(other, raw);
            }
        };
        self.hash_artifact(primary, raw)
            .or_else(|| self.hash_artifact(secondary, raw))
    }
}

/// Strips path components and the final extension from a display value.
pub fn clean_model_name(raw: &str) -> String {
    let base = raw
        .replace("\\\\", "\\")
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(raw)
        .trim()
        .trim_matches(['\'', '"'])
        .to_string();
    match base.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => base,
    }
}

/// Splits a combined sampler/scheduler value. Accepts object, pair, and
/// string forms (`"Euler (Karras)"`, `"euler_karras"` stays whole).
pub fn parse_scheduler_combo(value: &Value) -> Option<(String, Option<String>)> {
    match value {
        Value::Object(map) => {
            let sampler = ["sampler_name", "sampler"]
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_str))?;
            let scheduler = map.get("scheduler").and_then(Value::as_str);
            Some((sampler.to_string(), scheduler.map(str::to_string)))
        }
        Value::Array(items) => {
            let sampler = items.first().and_then(Value::as_str)?;
            let scheduler = items.get(1).and_then(Value::as_str);
            Some((sampler.to_string(), scheduler.map(str::to_string)))
        }
        Value::String(s) => {
            let trimmed = s.trim();
            if let Some((sampler, rest)) = trimmed.split_once('(') {
                let scheduler = rest.trim_end_matches(')').trim();
                let sampler = sampler.trim();
                if !sampler.is_empty() && !scheduler.is_empty() {
                    return Some((sampler.to_string(), Some(scheduler.to_lowercase())));
                }
            }
            Some((trimmed.to_string(), None))
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Source evaluation
// ---------------------------------------------------------------------------

/// Inputs matching `<prefix><integer suffix>` (empty suffix allowed), in
/// suffix order.
fn prefix_inputs<'n>(node: &'n WorkflowNode, prefix: &str) -> Vec<(&'n String, &'n Value)> {
    let mut matches: Vec<(u64, &String, &Value)> = Vec::new();
    for (name, value) in &node.inputs {
        let Some(suffix) = name.strip_prefix(prefix) else {
            continue;
        };
        let suffix = suffix.trim_start_matches('_');
        let index = if suffix.is_empty() {
            0
        } else {
            match suffix.parse::<u64>() {
                Ok(n) => n,
                Err(_) => continue,
            }
        };
        if let Some(scalar) = value.first_scalar() {
            matches.push((index, name, scalar));
        }
    }
    matches.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));
    matches.into_iter().map(|(_, name, value)| (name, value)).collect()
}

/// Evaluates a `select_stack_by_prefix` selector on a node.
fn stack_by_prefix(
    node: &WorkflowNode,
    prefix: &str,
    counter_key: Option<&str>,
    filter_none: bool,
) -> Vec<Value> {
    let mut values: Vec<Value> = prefix_inputs(node, prefix)
        .into_iter()
        .map(|(_, value)| value.clone())
        .collect();
    if let Some(counter) = counter_key {
        if let Some(max) = node
            .input(counter)
            .and_then(|v| v.first_scalar())
            .and_then(Value::as_u64)
        {
            values.truncate(max as usize);
        }
    }
    if filter_none {
        values.retain(|v| v.as_str().map(|s| s != "None").unwrap_or(true));
    }
    values
}

// ---------------------------------------------------------------------------
// LoRA group evaluation
// ---------------------------------------------------------------------------

/// True when the class's LoRA rules must be evaluated as one aligned group.
/// Any class naming LoRAs goes through the group pass so slots can never
/// shift against their strengths or hashes.
fn has_lora_group(rules: &NodeClassRules) -> bool {
    rules.contains_key(&MetaField::LoraModelName)
}

fn strengths_for(node: &WorkflowNode, rules: &NodeClassRules, field: MetaField) -> Vec<Value> {
    match rules.get(&field).map(|r| &r.source) {
        Some(ValueSource::Selector(SelectorKind::SelectStackByPrefix {
            prefix,
            counter_key,
            ..
        })) => stack_by_prefix(node, prefix, counter_key.as_deref(), false),
        Some(ValueSource::Fields(names)) => names
            .iter()
            .filter_map(|n| node.input(n).and_then(|v| v.first_scalar()).cloned())
            .collect(),
        Some(ValueSource::Field(name)) => node
            .input(name)
            .and_then(|v| v.first_scalar())
            .cloned()
            .into_iter()
            .collect(),
        Some(ValueSource::Literal(value)) => vec![value.clone()],
        _ => Vec::new(),
    }
}

/// Evaluates a LoRA-stack class as aligned slots. `filter_none` slots drop
/// as whole units so strengths never shift against names.
fn extract_lora_group(ctx: &ExtractionContext<'_>, node: &WorkflowNode) -> Vec<LoraSlot> {
    let rules = ctx
        .registry
        .captures
        .get(&node.class_name)
        .expect("caller checked class rules");
    let name_rule = &rules[&MetaField::LoraModelName];

    let mut slots: Vec<LoraSlot> = match &name_rule.source {
        ValueSource::Selector(SelectorKind::CollectLorasFromLoader)
        | ValueSource::Selector(SelectorKind::ParseInlineLoraTags) => {
            loras::collect_from_loader(node)
        }
        ValueSource::Selector(SelectorKind::SelectStackByPrefix {
            prefix,
            counter_key,
            ..
        }) => {
            // Names unfiltered here: slot filtering must drop strengths at
            // the same indices.
            let names = stack_by_prefix(node, prefix, counter_key.as_deref(), false);
            let model = strengths_for(node, rules, MetaField::LoraStrengthModel);
            let clip = strengths_for(node, rules, MetaField::LoraStrengthClip);
            names
                .iter()
                .enumerate()
                .filter_map(|(i, name)| {
                    Some(LoraSlot {
                        name: name.as_str()?.to_string(),
                        hash: None,
                        strength_model: model.get(i).and_then(Value::as_f64),
                        strength_clip: clip.get(i).and_then(Value::as_f64),
                    })
                })
                .collect()
        }
        ValueSource::Fields(names) => {
            let model = strengths_for(node, rules, MetaField::LoraStrengthModel);
            let clip = strengths_for(node, rules, MetaField::LoraStrengthClip);
            names
                .iter()
                .enumerate()
                .filter_map(|(i, input_name)| {
                    let raw = node.input(input_name)?.first_scalar()?.as_str()?;
                    Some(LoraSlot {
                        name: raw.to_string(),
                        hash: None,
                        strength_model: model.get(i).and_then(Value::as_f64),
                        strength_clip: clip.get(i).and_then(Value::as_f64),
                    })
                })
                .collect()
        }
        ValueSource::Field(input_name) => {
            let name = node
                .input(input_name)
                .and_then(|v| v.first_scalar())
                .and_then(Value::as_str)
                .map(str::to_string);
            match name {
                None => Vec::new(),
                Some(name) => {
                    // A pre-hashed passthrough input wins over recomputing.
                    let hash = match rules.get(&MetaField::LoraModelHash) {
                        Some(rule) if rule.format == Some(FormatterKind::Passthrough) => {
                            match &rule.source {
                                ValueSource::Field(hash_input) => node
                                    .input(hash_input)
                                    .and_then(|v| v.first_scalar())
                                    .and_then(Value::as_str)
                                    .map(str::to_string),
                                _ => None,
                            }
                        }
                        _ => None,
                    };
                    vec![LoraSlot {
                        name,
                        hash,
                        strength_model: strengths_for(node, rules, MetaField::LoraStrengthModel)
                            .first()
                            .and_then(Value::as_f64),
                        strength_clip: strengths_for(node, rules, MetaField::LoraStrengthClip)
                            .first()
                            .and_then(Value::as_f64),
                    }]
                }
            }
        }
        _ => Vec::new(),
    };

    slots.retain(|slot| !slot.is_none_slot());
    for slot in &mut slots {
        loras::hash_slot(slot, ctx.resolver, ctx.hashes, ctx.settings);
    }
    slots
}

fn push_lora_slots(inputs: &mut CapturedInputs, node_id: NodeId, slots: Vec<LoraSlot>) {
    for slot in slots {
        inputs
            .entry(MetaField::LoraModelName)
            .or_default()
            .push(Captured::new(node_id, Value::String(slot.name), None));
        inputs.entry(MetaField::LoraModelHash).or_default().push(Captured::new(
            node_id,
            slot.hash.map(Value::String).unwrap_or(Value::Null),
            None,
        ));
        inputs
            .entry(MetaField::LoraStrengthModel)
            .or_default()
            .push(Captured::new(
                node_id,
                slot.strength_model
                    .and_then(|v| serde_json::Number::from_f64(v).map(Value::Number))
                    .unwrap_or(Value::Null),
                None,
            ));
        inputs
            .entry(MetaField::LoraStrengthClip)
            .or_default()
            .push(Captured::new(
                node_id,
                slot.strength_clip
                    .and_then(|v| serde_json::Number::from_f64(v).map(Value::Number))
                    .unwrap_or(Value::Null),
                None,
            ));
    }
}

// ---------------------------------------------------------------------------
// Formatter application
// ---------------------------------------------------------------------------

enum Formatted {
    /// The (possibly transformed) values for the rule's own field.
    Values(Vec<Value>),
    /// A sampler/scheduler pair to be routed to two fields.
    SamplerScheduler(String, Option<String>),
    /// Formatter could not produce a value; the field entry is omitted.
    Omit,
}

fn apply_format(
    ctx: &ExtractionContext<'_>,
    format: FormatterKind,
    value: &Value,
) -> Formatted {
    use FormatterKind::*;
    match format {
        Passthrough => Formatted::Values(vec![value.clone()]),
        CleanModelName => match value.as_str() {
            Some(s) => Formatted::Values(vec![Value::String(clean_model_name(s))]),
            None => Formatted::Omit,
        },
        ConvertSkipClip => match value.as_i64() {
            Some(v) => Formatted::Values(vec![Value::from(-v)]),
            None => Formatted::Omit,
        },
        ParseSchedulerCombo => match parse_scheduler_combo(value) {
            Some((sampler, scheduler)) => Formatted::SamplerScheduler(sampler, scheduler),
            None => Formatted::Omit,
        },
        CalcModelHash => hash_or_omit(ctx, ArtifactFamily::Checkpoint, value, true),
        CalcUnetHash => hash_or_omit(ctx, ArtifactFamily::Unet, value, true),
        CalcVaeHash => hash_or_omit(ctx, ArtifactFamily::Vae, value, false),
        CalcLoraHash => hash_or_omit(ctx, ArtifactFamily::Lora, value, false),
        ExtractEmbeddingNames => match value.as_str() {
            Some(text) => Formatted::Values(
                embedding::extract_names(text)
                    .into_iter()
                    .map(Value::String)
                    .collect(),
            ),
            None => Formatted::Omit,
        },
        ExtractEmbeddingHashes => match value.as_str() {
            Some(text) => Formatted::Values(
                embedding::extract_names(text)
                    .into_iter()
                    .map(|name| {
                        embedding::hash_embedding(&name, ctx.resolver, ctx.hashes, ctx.settings)
                            .map(Value::String)
                            .unwrap_or(Value::Null)
                    })
                    .collect(),
            ),
            None => Formatted::Omit,
        },
    }
}

fn hash_or_omit(
    ctx: &ExtractionContext<'_>,
    family: ArtifactFamily,
    value: &Value,
    model_fallback: bool,
) -> Formatted {
    let Some(raw) = value.as_str() else {
        return Formatted::Omit;
    };
    let hash = if model_fallback {
        ctx.hash_model(family, raw)
    } else {
        ctx.hash_artifact(family, raw)
    };
    match hash {
        Some(truncated) => Formatted::Values(vec![Value::String(truncated)]),
        None => Formatted::Omit,
    }
}

// ---------------------------------------------------------------------------
// Collection
// ---------------------------------------------------------------------------

/// Walks the whole graph and aggregates raw captures per field.
pub fn collect_inputs(ctx: &ExtractionContext<'_>) -> CapturedInputs {
    let mut inputs: CapturedInputs = IndexMap::new();

    for (node_id, node) in ctx.graph.iter() {
        let Some(rules) = ctx.registry.captures.get(&node.class_name) else {
            continue;
        };

        let lora_group = has_lora_group(rules);
        if lora_group {
            let slots = extract_lora_group(ctx, node);
            push_lora_slots(&mut inputs, node_id, slots);
        }

        for (field, rule) in rules {
            if lora_group
                && matches!(
                    field,
                    MetaField::LoraModelName
                        | MetaField::LoraModelHash
                        | MetaField::LoraStrengthModel
                        | MetaField::LoraStrengthClip
                )
            {
                continue;
            }
            if let Some(pred) = rule.validate {
                if !predicate::evaluate(pred, node_id, ctx.graph, &ctx.registry.samplers) {
                    continue;
                }
            }

            let raw: Vec<(Value, Option<&str>)> = match &rule.source {
                ValueSource::Field(name) => match node.input(name).and_then(|v| v.first_scalar())
                {
                    Some(value) => vec![(value.clone(), Some(name.as_str()))],
                    None => continue,
                },
                ValueSource::Prefix(prefix) => prefix_inputs(node, prefix)
                    .into_iter()
                    .filter(|(_, v)| v.as_str() != Some("None"))
                    .map(|(name, v)| (v.clone(), Some(name.as_str())))
                    .collect(),
                ValueSource::Fields(names) => names
                    .iter()
                    .filter_map(|name| {
                        node.input(name)
                            .and_then(|v| v.first_scalar())
                            .map(|v| (v.clone(), Some(name.as_str())))
                    })
                    .collect(),
                ValueSource::Literal(value) => vec![(value.clone(), None)],
                ValueSource::Selector(kind) => evaluate_selector(node, kind)
                    .into_iter()
                    .map(|v| (v, None))
                    .collect(),
            };

            for (value, input_name) in raw {
                match rule.format {
                    None => inputs
                        .entry(*field)
                        .or_default()
                        .push(Captured::new(node_id, value, input_name)),
                    Some(format) => match apply_format(ctx, format, &value) {
                        Formatted::Values(values) => {
                            for formatted in values {
                                inputs
                                    .entry(*field)
                                    .or_default()
                                    .push(Captured::new(node_id, formatted, input_name));
                            }
                        }
                        Formatted::SamplerScheduler(sampler, scheduler) => {
                            inputs.entry(MetaField::SamplerName).or_default().push(
                                Captured::new(node_id, Value::String(sampler), input_name),
                            );
                            if let Some(scheduler) = scheduler {
                                inputs.entry(MetaField::Scheduler).or_default().push(
                                    Captured::new(node_id, Value::String(scheduler), input_name),
                                );
                            }
                        }
                        Formatted::Omit => {
                            debug!(
                                node = %node_id,
                                field = %field,
                                "formatter produced no value; field omitted"
                            );
                        }
                    },
                }
            }
        }
    }

    inline_lora_pass(ctx, &mut inputs);
    inputs
}

/// Selector evaluation in a generic (non-LoRA-group) position.
fn evaluate_selector(node: &WorkflowNode, kind: &SelectorKind) -> Vec<Value> {
    match kind {
        SelectorKind::SelectStackByPrefix {
            prefix,
            counter_key,
            filter_none,
        } => stack_by_prefix(node, prefix, counter_key.as_deref(), *filter_none),
        SelectorKind::CollectLorasFromLoader | SelectorKind::ParseInlineLoraTags => {
            loras::collect_from_loader(node)
                .into_iter()
                .map(|slot| Value::String(slot.name))
                .collect()
        }
        SelectorKind::SplitSchedulerCombo => {
            for key in ["sampler_scheduler", "sampler_name", "sampler", "scheduler"] {
                if let Some(value) = node.input(key).and_then(|v| v.first_scalar()) {
                    if let Some((sampler, _)) = parse_scheduler_combo(value) {
                        return vec![Value::String(sampler)];
                    }
                }
            }
            Vec::new()
        }
    }
}

/// Scans opt-in prompt texts for inline LoRA tags and appends slots that the
/// structured captures did not already provide.
fn inline_lora_pass(ctx: &ExtractionContext<'_>, inputs: &mut CapturedInputs) {
    let mut inline: Vec<(NodeId, LoraSlot)> = Vec::new();
    for field in [MetaField::PositivePrompt, MetaField::NegativePrompt] {
        let Some(entries) = inputs.get(&field) else {
            continue;
        };
        for captured in entries {
            let Some(node) = ctx.graph.get(captured.node_id) else {
                continue;
            };
            let opted_in = ctx
                .registry
                .captures
                .get(&node.class_name)
                .and_then(|rules| rules.get(&field))
                .map(|rule| rule.inline_lora_candidate)
                .unwrap_or(false);
            if !opted_in {
                continue;
            }
            let Some(text) = captured.as_str() else {
                continue;
            };
            for slot in loras::parse_inline_tags(text) {
                if !inline.iter().any(|(_, s)| s.name == slot.name) {
                    inline.push((captured.node_id, slot));
                }
            }
        }
    }
    if inline.is_empty() {
        return;
    }

    let structured: Vec<String> = inputs
        .get(&MetaField::LoraModelName)
        .map(|entries| {
            entries
                .iter()
                .filter_map(Captured::as_str)
                .map(|name| clean_model_name(name).to_ascii_lowercase())
                .collect()
        })
        .unwrap_or_default();

    for (node_id, mut slot) in inline {
        let key = clean_model_name(&slot.name).to_ascii_lowercase();
        if structured.contains(&key) {
            // A loader-sourced entry wins over the inline tag.
            continue;
        }
        loras::hash_slot(&mut slot, ctx.resolver, ctx.hashes, ctx.settings);
        push_lora_slots(inputs, node_id, vec![slot]);
    }
}

/// Keeps only entries whose node is in the trace, sorted by ascending
/// distance (stable within equal distance).
pub fn filter_by_trace(inputs: &CapturedInputs, trace: &TraceResult) -> CapturedInputs {
    let mut filtered: CapturedInputs = IndexMap::new();
    for (field, entries) in inputs {
        let mut kept: Vec<Captured> = entries
            .iter()
            .filter(|c| trace.contains(c.node_id))
            .cloned()
            .collect();
        kept.sort_by_key(|c| trace.distance(c.node_id).unwrap_or(u32::MAX));
        if !kept.is_empty() {
            filtered.insert(*field, kept);
        }
    }
    filtered
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use unimeta_core::InputValue;
    use unimeta_rules::{RegistryLoader, RegistryOptions, UserRulePaths};

    use crate::resolve::DirArtifactIndex;

    struct Fixture {
        _dir: tempfile::TempDir,
        graph: WorkflowGraph,
        registry: Registry,
        resolver: Resolver,
        hashes: HashCache,
        settings: Settings,
    }

    impl Fixture {
        fn ctx(&self) -> ExtractionContext<'_> {
            ExtractionContext {
                graph: &self.graph,
                registry: &self.registry,
                resolver: &self.resolver,
                hashes: &self.hashes,
                settings: &self.settings,
            }
        }
    }

    fn fixture(graph: WorkflowGraph) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("loras")).unwrap();
        std::fs::create_dir_all(dir.path().join("checkpoints")).unwrap();
        std::fs::write(dir.path().join("loras/a.safetensors"), b"lora-a").unwrap();
        std::fs::write(dir.path().join("loras/b.safetensors"), b"lora-b").unwrap();
        std::fs::write(dir.path().join("loras/c.safetensors"), b"lora-c").unwrap();
        std::fs::write(dir.path().join("checkpoints/cyber_v33.safetensors"), b"sd15").unwrap();

        let index = DirArtifactIndex::new()
            .with_root(ArtifactFamily::Lora, dir.path().join("loras"))
            .with_root(ArtifactFamily::Checkpoint, dir.path().join("checkpoints"));
        let rules_paths = UserRulePaths::in_dir(dir.path().join("user_rules"));
        let registry = RegistryLoader::new()
            .build(&rules_paths, &Settings::default(), &RegistryOptions::default())
            .unwrap();
        Fixture {
            _dir: dir,
            graph,
            registry,
            resolver: Resolver::new(Arc::new(index)),
            hashes: HashCache::new(),
            settings: Settings::default(),
        }
    }

    fn scalar(v: serde_json::Value) -> InputValue {
        InputValue::from_json(v)
    }

    #[test]
    fn field_rule_captures_scalar_with_input_name() {
        let mut graph = WorkflowGraph::new();
        graph.insert(
            4u64,
            unimeta_core::WorkflowNode::new("CheckpointLoaderSimple")
                .with_input("ckpt_name", scalar(json!("cyber_v33.safetensors"))),
        );
        let fixture = fixture(graph);
        let inputs = collect_inputs(&fixture.ctx());
        let names = &inputs[&MetaField::ModelName];
        assert_eq!(names.len(), 1);
        assert_eq!(names[0].as_str(), Some("cyber_v33.safetensors"));
        assert_eq!(names[0].input_name.as_deref(), Some("ckpt_name"));
        // The hash rule resolved the artifact and produced a truncation.
        let hashes = &inputs[&MetaField::ModelHash];
        assert_eq!(hashes[0].value.as_str().unwrap().len(), 10);
    }

    #[test]
    fn stack_group_drops_none_slot_and_keeps_alignment() {
        let mut graph = WorkflowGraph::new();
        graph.insert(
            7u64,
            unimeta_core::WorkflowNode::new("LoRA Stacker")
                .with_input("lora_count", scalar(json!(4)))
                .with_input("lora_name_1", scalar(json!("a.safetensors")))
                .with_input("lora_name_2", scalar(json!("b.safetensors")))
                .with_input("lora_name_3", scalar(json!("None")))
                .with_input("lora_name_4", scalar(json!("c.safetensors")))
                .with_input("lora_wt_1", scalar(json!(0.97)))
                .with_input("lora_wt_2", scalar(json!(0.6)))
                .with_input("lora_wt_3", scalar(json!(1.0)))
                .with_input("lora_wt_4", scalar(json!(0.5))),
        );
        let fixture = fixture(graph);
        let inputs = collect_inputs(&fixture.ctx());
        let names: Vec<&str> = inputs[&MetaField::LoraModelName]
            .iter()
            .filter_map(Captured::as_str)
            .collect();
        assert_eq!(names, vec!["a.safetensors", "b.safetensors", "c.safetensors"]);
        let strengths: Vec<f64> = inputs[&MetaField::LoraStrengthModel]
            .iter()
            .filter_map(|c| c.value.as_f64())
            .collect();
        // The dropped slot's strength dropped with it.
        assert_eq!(strengths, vec![0.97, 0.6, 0.5]);
        assert_eq!(inputs[&MetaField::LoraModelHash].len(), 3);
    }

    #[test]
    fn inline_tags_only_from_opted_in_nodes() {
        let mut graph = WorkflowGraph::new();
        graph.insert(
            2u64,
            unimeta_core::WorkflowNode::new("MetadataTestSampler")
                .with_input("positive_prompt", scalar(json!("cat <lora:a:0.5>")))
                .with_input("negative_prompt", scalar(json!("")))
                .with_input("seed", scalar(json!(1))),
        );
        // Same tag in a non-opt-in encoder feeding nothing.
        graph.insert(
            3u64,
            unimeta_core::WorkflowNode::new("CLIPTextEncode")
                .with_input("text", scalar(json!("dog <lora:b:0.7>"))),
        );
        let mut fixture = fixture(graph);
        fixture.settings.enable_test_nodes = true;
        let rules_paths = UserRulePaths::in_dir(fixture._dir.path().join("user_rules"));
        fixture.registry = RegistryLoader::new()
            .build(&rules_paths, &fixture.settings, &RegistryOptions::default())
            .unwrap();
        let inputs = collect_inputs(&fixture.ctx());
        let names: Vec<&str> = inputs[&MetaField::LoraModelName]
            .iter()
            .filter_map(Captured::as_str)
            .collect();
        assert_eq!(names, vec!["a"]);
    }

    #[test]
    fn structured_entry_suppresses_matching_inline_tag() {
        let mut graph = WorkflowGraph::new();
        graph.insert(
            1u64,
            unimeta_core::WorkflowNode::new("LoraLoader")
                .with_input("lora_name", scalar(json!("a.safetensors")))
                .with_input("strength_model", scalar(json!(0.9)))
                .with_input("strength_clip", scalar(json!(0.9))),
        );
        graph.insert(
            2u64,
            unimeta_core::WorkflowNode::new("MetadataTestSampler")
                .with_input("positive_prompt", scalar(json!("cat <lora:a:0.5>")))
                .with_input("seed", scalar(json!(1))),
        );
        let mut fixture = fixture(graph);
        fixture.settings.enable_test_nodes = true;
        let rules_paths = UserRulePaths::in_dir(fixture._dir.path().join("user_rules"));
        fixture.registry = RegistryLoader::new()
            .build(&rules_paths, &fixture.settings, &RegistryOptions::default())
            .unwrap();
        let inputs = collect_inputs(&fixture.ctx());
        let names: Vec<&str> = inputs[&MetaField::LoraModelName]
            .iter()
            .filter_map(Captured::as_str)
            .collect();
        assert_eq!(names, vec!["a.safetensors"]);
        let strengths: Vec<f64> = inputs[&MetaField::LoraStrengthModel]
            .iter()
            .filter_map(|c| c.value.as_f64())
            .collect();
        assert_eq!(strengths, vec![0.9]);
    }

    #[test]
    fn prefix_rule_enumerates_in_suffix_order() {
        let mut graph = WorkflowGraph::new();
        graph.insert(
            5u64,
            unimeta_core::WorkflowNode::new("DualCLIPLoader")
                .with_input("clip_name2", scalar(json!("t5xxl.safetensors")))
                .with_input("clip_name1", scalar(json!("clip_l.safetensors"))),
        );
        let fixture = fixture(graph);
        let inputs = collect_inputs(&fixture.ctx());
        let names: Vec<&str> = inputs[&MetaField::ClipModelName]
            .iter()
            .filter_map(Captured::as_str)
            .collect();
        assert_eq!(names, vec!["clip_l.safetensors", "t5xxl.safetensors"]);
    }

    #[test]
    fn scheduler_combo_forms() {
        assert_eq!(
            parse_scheduler_combo(&json!("Euler (Karras)")),
            Some(("Euler".into(), Some("karras".into())))
        );
        assert_eq!(
            parse_scheduler_combo(&json!(["dpmpp_2m", "karras"])),
            Some(("dpmpp_2m".into(), Some("karras".into())))
        );
        assert_eq!(
            parse_scheduler_combo(&json!({"sampler_name": "euler", "scheduler": "normal"})),
            Some(("euler".into(), Some("normal".into())))
        );
        assert_eq!(
            parse_scheduler_combo(&json!("euler_karras")),
            Some(("euler_karras".into(), None))
        );
    }

    #[test]
    fn filter_by_trace_sorts_by_distance() {
        let mut graph = WorkflowGraph::new();
        graph.insert(
            4u64,
            unimeta_core::WorkflowNode::new("EmptyLatentImage")
                .with_input("width", scalar(json!(512)))
                .with_input("height", scalar(json!(512))),
        );
        graph.insert(
            2u64,
            unimeta_core::WorkflowNode::new("LatentUpscale")
                .with_input("width", scalar(json!(1024)))
                .with_input("height", scalar(json!(1024)))
                .with_input(
                    "samples",
                    InputValue::Ref {
                        source: NodeId(4),
                        output: 0,
                    },
                ),
        );
        graph.insert(
            1u64,
            unimeta_core::WorkflowNode::new("Save").with_input(
                "images",
                InputValue::Ref {
                    source: NodeId(2),
                    output: 0,
                },
            ),
        );
        let fixture = fixture(graph);
        let inputs = collect_inputs(&fixture.ctx());
        let result = crate::trace::trace(&fixture.graph, NodeId(1));
        let filtered = filter_by_trace(&inputs, &result);
        let widths: Vec<i64> = filtered[&MetaField::ImageWidth]
            .iter()
            .filter_map(|c| c.value.as_i64())
            .collect();
        // Nearer node (the upscaler) first.
        assert_eq!(widths, vec![1024, 512]);
    }
}
