//! The save-path capture orchestration.
//!
//! One call: trace backward from the save node, choose the governing
//! sampler, filter the captures to each boundary, and assemble the field
//! map. A missing sampler degrades to partial metadata from the save-node
//! boundary; it never aborts the save.

use tracing::warn;

use unimeta_core::NodeId;

use crate::extract::{self, CapturedInputs, ExtractionContext};
use crate::fields::{self, FieldMap};
use crate::select::{self, SamplerEntry, SelectionMethod};
use crate::trace;

/// Per-call capture options.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    pub sampler_selection: SelectionMethod,
    /// Emit the Civitai-style sampler display name.
    pub civitai_sampler: bool,
    /// Maximum number of samplers recorded. One keeps the traditional
    /// single-sampler output; raising it enables the multi-sampler tail.
    pub multi_sampler_cap: usize,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        CaptureOptions {
            sampler_selection: SelectionMethod::Farthest,
            civitai_sampler: false,
            multi_sampler_cap: 1,
        }
    }
}

/// Result of one capture run.
#[derive(Debug, Clone)]
pub struct CaptureOutput {
    pub field_map: FieldMap,
    /// Ordered sampler list for the tail; primary first. Empty or a single
    /// entry renders no tail.
    pub multi_entries: Vec<SamplerEntry>,
    pub primary_sampler: Option<NodeId>,
}

/// Runs the capture pipeline for one save invocation.
pub fn run_capture(
    ctx: &ExtractionContext<'_>,
    save_node: NodeId,
    options: &CaptureOptions,
) -> CaptureOutput {
    let inputs = extract::collect_inputs(ctx);

    let trace_from_save = trace::trace(ctx.graph, save_node);
    let before_this = extract::filter_by_trace(&inputs, &trace_from_save);

    let candidates = select::enumerate_samplers(ctx.graph, &trace_from_save, ctx.registry);
    let primary = select::choose_primary(&candidates, options.sampler_selection, &trace_from_save);

    let (before_sampler, multi_entries, primary_id) = match primary {
        None => {
            warn!(
                save_node = %save_node,
                "no sampler node found along the trace; emitting partial metadata"
            );
            (before_this.clone(), Vec::new(), None)
        }
        Some(primary) => {
            let trace_from_sampler = trace::trace(ctx.graph, primary.node_id);
            let before_sampler = extract::filter_by_trace(&inputs, &trace_from_sampler);
            let ordered = select::ordered_entries(&candidates, &primary, &trace_from_save);
            let cap = options.multi_sampler_cap.max(1);
            if ordered.len() > cap {
                warn!(
                    candidates = ordered.len(),
                    cap, "sampler list truncated to the configured cap"
                );
            }
            let emitted: Vec<SamplerEntry> = ordered.into_iter().take(cap).collect();
            (before_sampler, emitted, Some(primary.node_id))
        }
    };

    let field_map = fields::build_field_map(
        ctx,
        &before_sampler,
        &before_this,
        options.civitai_sampler,
    );

    CaptureOutput {
        field_map,
        multi_entries,
        primary_sampler: primary_id,
    }
}

/// Merges user extra-metadata pairs into the field map. Empty keys or
/// values are dropped; commas in values are replaced by `/`.
pub fn merge_extra_metadata<'p>(
    map: &mut FieldMap,
    pairs: impl IntoIterator<Item = (&'p str, &'p str)>,
) {
    for (key, value) in pairs {
        if key.trim().is_empty() || value.trim().is_empty() {
            continue;
        }
        map.insert(
            key.to_string(),
            serde_json::Value::String(value.replace(',', "/")),
        );
    }
    fields::normalize_dual_prompt_keys(map);
    // Keep the version stamp last after any insertion.
    if let Some(version) = map.shift_remove(fields::keys::VERSION) {
        map.insert(fields::keys::VERSION.to_string(), version);
    }
}

/// Convenience wrapper used by the filter-boundary tests.
pub fn capture_boundaries(
    ctx: &ExtractionContext<'_>,
    save_node: NodeId,
    sampler_node: NodeId,
) -> (CapturedInputs, CapturedInputs) {
    let inputs = extract::collect_inputs(ctx);
    let before_this = extract::filter_by_trace(&inputs, &trace::trace(ctx.graph, save_node));
    let before_sampler =
        extract::filter_by_trace(&inputs, &trace::trace(ctx.graph, sampler_node));
    (before_sampler, before_this)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extra_metadata_sanitizes_commas_and_keeps_version_last() {
        let mut map: FieldMap = indexmap::IndexMap::new();
        map.insert(fields::keys::VERSION.to_string(), json!("1.4.2"));
        merge_extra_metadata(&mut map, [("Note", "red, green"), ("", "dropped"), ("X", "")]);
        assert_eq!(map.get("Note"), Some(&json!("red/ green")));
        assert!(!map.contains_key(""));
        assert_eq!(map.keys().last().map(String::as_str), Some(fields::keys::VERSION));
    }
}
