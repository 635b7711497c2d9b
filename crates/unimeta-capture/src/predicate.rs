//! Rule validation predicates.
//!
//! Positive/negative prompt detection walks from each sampler's conditioning
//! input toward its text-encoder source: the first text-encoding node found
//! on that path marks the prompt node for that role.

use std::collections::VecDeque;
use std::sync::OnceLock;

use regex::Regex;

use unimeta_core::rules::{PredicateKind, SamplerRole, SamplerTable};
use unimeta_core::{NodeId, WorkflowGraph};

/// Known text-encoder class names, matched exactly before falling back to
/// pattern heuristics.
const KNOWN_TEXT_ENCODERS: [&str; 3] = [
    "CLIPTextEncode",
    "CLIPTextEncodeFlux",
    "TextEncodeQwenImageEdit",
];

fn encoder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)(text\s*encode|encode\s*text|prompt\s*encode|encode\s*prompt|text[-_ ]?encoder|cliptextencode|t5\s*encode)",
        )
        .expect("static regex")
    })
}

/// Heuristic: does this class encode text for conditioning?
pub fn is_text_encoder(class_name: &str) -> bool {
    if class_name.is_empty() {
        return false;
    }
    KNOWN_TEXT_ENCODERS.contains(&class_name) || encoder_pattern().is_match(class_name)
}

/// Nodes that act as the `role` prompt source for some sampler: for every
/// sampler class in the table, follow its role input upstream until a
/// text-encoding node is found.
fn prompt_nodes(graph: &WorkflowGraph, samplers: &SamplerTable, role: SamplerRole) -> Vec<NodeId> {
    let mut found = Vec::new();
    for (_, node) in graph.iter() {
        let Some(role_map) = samplers.get(&node.class_name) else {
            continue;
        };
        let Some(input_name) = role_map.get(&role) else {
            continue;
        };
        let Some(start) = node.input(input_name).and_then(|v| v.as_ref_source()) else {
            continue;
        };
        let mut queue = VecDeque::from([start]);
        let mut visited = vec![start];
        while let Some(current) = queue.pop_front() {
            let Some(current_node) = graph.get(current) else {
                continue;
            };
            if is_text_encoder(&current_node.class_name) {
                if !found.contains(&current) {
                    found.push(current);
                }
                break;
            }
            for value in current_node.inputs.values() {
                if let Some(source) = value.as_ref_source() {
                    if !visited.contains(&source) {
                        visited.push(source);
                        queue.push_back(source);
                    }
                }
            }
        }
    }
    found
}

/// Evaluates a [`PredicateKind`] for one node.
pub fn evaluate(
    predicate: PredicateKind,
    node_id: NodeId,
    graph: &WorkflowGraph,
    samplers: &SamplerTable,
) -> bool {
    match predicate {
        PredicateKind::IsPositivePrompt => {
            prompt_nodes(graph, samplers, SamplerRole::Positive).contains(&node_id)
        }
        PredicateKind::IsNegativePrompt => {
            prompt_nodes(graph, samplers, SamplerRole::Negative).contains(&node_id)
        }
        PredicateKind::IsNodeConnected => graph.has_consumers(node_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use unimeta_core::{InputValue, WorkflowNode};

    fn reference(source: u64) -> InputValue {
        InputValue::Ref {
            source: NodeId(source),
            output: 0,
        }
    }

    fn sampler_table() -> SamplerTable {
        let mut roles = IndexMap::new();
        roles.insert(SamplerRole::Positive, "positive".to_string());
        roles.insert(SamplerRole::Negative, "negative".to_string());
        let mut table = IndexMap::new();
        table.insert("KSampler".to_string(), roles);
        table
    }

    fn graph_with_two_prompts() -> WorkflowGraph {
        let mut graph = WorkflowGraph::new();
        graph.insert(
            10u64,
            WorkflowNode::new("CLIPTextEncode").with_input("text", InputValue::from_json("cat".into())),
        );
        graph.insert(
            11u64,
            WorkflowNode::new("CLIPTextEncode").with_input("text", InputValue::from_json("ugly".into())),
        );
        graph.insert(
            3u64,
            WorkflowNode::new("KSampler")
                .with_input("positive", reference(10))
                .with_input("negative", reference(11)),
        );
        graph
    }

    #[test]
    fn positive_and_negative_are_distinguished() {
        let graph = graph_with_two_prompts();
        let samplers = sampler_table();
        assert!(evaluate(
            PredicateKind::IsPositivePrompt,
            NodeId(10),
            &graph,
            &samplers
        ));
        assert!(!evaluate(
            PredicateKind::IsPositivePrompt,
            NodeId(11),
            &graph,
            &samplers
        ));
        assert!(evaluate(
            PredicateKind::IsNegativePrompt,
            NodeId(11),
            &graph,
            &samplers
        ));
    }

    #[test]
    fn traversal_passes_through_conditioning_nodes() {
        let mut graph = graph_with_two_prompts();
        // Insert an intermediate conditioning node between encoder and sampler.
        graph.insert(
            20u64,
            WorkflowNode::new("ConditioningCombine").with_input("a", reference(10)),
        );
        graph.insert(
            3u64,
            WorkflowNode::new("KSampler")
                .with_input("positive", reference(20))
                .with_input("negative", reference(11)),
        );
        let samplers = sampler_table();
        assert!(evaluate(
            PredicateKind::IsPositivePrompt,
            NodeId(10),
            &graph,
            &samplers
        ));
    }

    #[test]
    fn encoder_heuristic_matches_variants() {
        assert!(is_text_encoder("CLIPTextEncode"));
        assert!(is_text_encoder("My Prompt Encode Deluxe"));
        assert!(is_text_encoder("T5 Encode"));
        assert!(!is_text_encoder("VAEDecode"));
        assert!(!is_text_encoder(""));
    }

    #[test]
    fn connectivity_predicate() {
        let graph = graph_with_two_prompts();
        let samplers = sampler_table();
        assert!(evaluate(
            PredicateKind::IsNodeConnected,
            NodeId(10),
            &graph,
            &samplers
        ));
        assert!(!evaluate(
            PredicateKind::IsNodeConnected,
            NodeId(3),
            &graph,
            &samplers
        ));
    }
}
