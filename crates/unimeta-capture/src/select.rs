//! Sampler candidate discovery and primary selection.
//!
//! Candidates come in two tiers: Tier A classes are explicit members of the
//! sampler-role table; Tier B classes merely carry capture rules for a
//! sampler name plus step information. The primary sampler governs the
//! "before sampler" capture boundary; the full ordered list feeds the
//! multi-sampler tail.

use serde_json::Value;
use tracing::warn;

use unimeta_core::rules::ValueSource;
use unimeta_core::{MetaField, NodeId, WorkflowGraph, WorkflowNode};
use unimeta_rules::Registry;

use crate::trace::TraceResult;

/// How a candidate qualified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerTier {
    /// Explicit sampler-table membership.
    A,
    /// Rule-backed: SAMPLER_NAME plus STEPS or START_STEP/END_STEP.
    B,
}

/// Which sampler the caller wants as primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMethod {
    /// The candidate farthest from the save node (default).
    Farthest,
    /// The candidate nearest to the save node.
    Nearest,
    /// A specific node, which must itself be sampler-like.
    ById(NodeId),
}

/// One sampler-like node found in the reachable subgraph.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerEntry {
    pub node_id: NodeId,
    pub tier: SamplerTier,
    pub class_name: String,
    pub sampler_name: Option<String>,
    pub steps: Option<i64>,
    pub start_step: Option<i64>,
    pub end_step: Option<i64>,
}

impl SamplerEntry {
    /// Covered step count: `end - start + 1` when both ends are present,
    /// else `steps`, else 0.
    pub fn range_len(&self) -> i64 {
        match (self.start_step, self.end_step) {
            (Some(start), Some(end)) => end - start + 1,
            _ => self.steps.unwrap_or(0),
        }
    }

    /// True when the candidate samples a sub-range of the schedule.
    pub fn is_segment(&self) -> bool {
        self.start_step.is_some() && self.end_step.is_some()
    }
}

/// Reads the raw value behind a plain `field_name` rule, when the rule has
/// that shape. Candidate detail extraction never runs selectors.
fn rule_field_value<'a>(
    node: &'a WorkflowNode,
    registry: &Registry,
    class_name: &str,
    field: MetaField,
) -> Option<&'a Value> {
    let rule = registry.captures.get(class_name)?.get(&field)?;
    match &rule.source {
        ValueSource::Field(name) => node.input(name)?.first_scalar(),
        _ => None,
    }
}

fn as_int(value: Option<&Value>) -> Option<i64> {
    value.and_then(Value::as_i64)
}

fn as_text(value: Option<&Value>) -> Option<String> {
    value.and_then(Value::as_str).map(str::to_string)
}

/// Enumerates sampler candidates along `trace.order`.
pub fn enumerate_samplers(
    graph: &WorkflowGraph,
    trace: &TraceResult,
    registry: &Registry,
) -> Vec<SamplerEntry> {
    let mut entries = Vec::new();
    for &node_id in &trace.order {
        let Some(node) = graph.get(node_id) else {
            continue;
        };
        let class_name = node.class_name.as_str();

        let tier = if registry.samplers.contains_key(class_name) {
            Some(SamplerTier::A)
        } else if let Some(rules) = registry.captures.get(class_name) {
            let has_name = rules.contains_key(&MetaField::SamplerName);
            let has_steps = rules.contains_key(&MetaField::Steps)
                || (rules.contains_key(&MetaField::StartStep)
                    && rules.contains_key(&MetaField::EndStep));
            (has_name && has_steps).then_some(SamplerTier::B)
        } else {
            None
        };
        let Some(tier) = tier else { continue };

        let entry = SamplerEntry {
            node_id,
            tier,
            class_name: class_name.to_string(),
            sampler_name: as_text(rule_field_value(
                node,
                registry,
                class_name,
                MetaField::SamplerName,
            )),
            steps: as_int(rule_field_value(node, registry, class_name, MetaField::Steps)),
            start_step: as_int(rule_field_value(
                node,
                registry,
                class_name,
                MetaField::StartStep,
            )),
            end_step: as_int(rule_field_value(
                node,
                registry,
                class_name,
                MetaField::EndStep,
            )),
        };
        if entry.start_step.is_some() != entry.end_step.is_some() {
            warn!(
                node = %node_id,
                class = %entry.class_name,
                "sampler segment endpoint missing its counterpart"
            );
        }
        entries.push(entry);
    }
    warn_on_overlaps(&entries);
    entries
}

fn warn_on_overlaps(entries: &[SamplerEntry]) {
    let segments: Vec<_> = entries.iter().filter(|e| e.is_segment()).collect();
    for (i, a) in segments.iter().enumerate() {
        for b in &segments[i + 1..] {
            let (a0, a1) = (a.start_step.unwrap(), a.end_step.unwrap());
            let (b0, b1) = (b.start_step.unwrap(), b.end_step.unwrap());
            if a0 <= b1 && b0 <= a1 {
                warn!(
                    first = %a.node_id,
                    second = %b.node_id,
                    "sampler segment ranges overlap"
                );
            }
        }
    }
}

fn position_in_order(trace: &TraceResult, id: NodeId) -> usize {
    trace.order.iter().position(|&n| n == id).unwrap_or(usize::MAX)
}

/// Picks the primary sampler per the selection method. Returns `None` when
/// there is no admissible candidate.
pub fn choose_primary(
    entries: &[SamplerEntry],
    method: SelectionMethod,
    trace: &TraceResult,
) -> Option<SamplerEntry> {
    if entries.is_empty() {
        return None;
    }
    match method {
        SelectionMethod::ById(target) => entries.iter().find(|e| e.node_id == target).cloned(),
        SelectionMethod::Nearest => {
            let best_of = |tier: SamplerTier| {
                entries
                    .iter()
                    .filter(|e| e.tier == tier)
                    .min_by_key(|e| (trace.distance(e.node_id).unwrap_or(u32::MAX), e.node_id))
            };
            best_of(SamplerTier::A).or_else(|| best_of(SamplerTier::B)).cloned()
        }
        SelectionMethod::Farthest => {
            let best_of = |tier: SamplerTier| {
                entries.iter().filter(|e| e.tier == tier).min_by(|a, b| {
                    b.range_len()
                        .cmp(&a.range_len())
                        .then_with(|| {
                            // Farther from the save node wins the tie.
                            trace
                                .distance(b.node_id)
                                .unwrap_or(0)
                                .cmp(&trace.distance(a.node_id).unwrap_or(0))
                        })
                        .then_with(|| a.node_id.cmp(&b.node_id))
                })
            };
            best_of(SamplerTier::A).or_else(|| best_of(SamplerTier::B)).cloned()
        }
    }
}

/// Orders the emitted list: primary first, remainder by descending
/// `range_len`, then position in `order`, then node id.
pub fn ordered_entries(
    entries: &[SamplerEntry],
    primary: &SamplerEntry,
    trace: &TraceResult,
) -> Vec<SamplerEntry> {
    let mut rest: Vec<SamplerEntry> = entries
        .iter()
        .filter(|e| e.node_id != primary.node_id)
        .cloned()
        .collect();
    rest.sort_by(|a, b| {
        b.range_len()
            .cmp(&a.range_len())
            .then_with(|| {
                position_in_order(trace, a.node_id).cmp(&position_in_order(trace, b.node_id))
            })
            .then_with(|| a.node_id.cmp(&b.node_id))
    });
    let mut out = vec![primary.clone()];
    out.extend(rest);
    out
}
