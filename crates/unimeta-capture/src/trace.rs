//! Backward reachability from the save node.
//!
//! A reverse BFS over input references yields, for every contributing node,
//! its hop distance from the save node. `order` is that set sorted by
//! ascending distance with ties broken by ascending node id, which makes
//! every downstream walk deterministic.

use std::collections::{HashMap, VecDeque};

use petgraph::graphmap::DiGraphMap;
use tracing::warn;

use unimeta_core::{NodeId, WorkflowGraph};

/// Result of one backward trace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceResult {
    /// BFS hop distance from the start node, via reverse edges.
    pub distance_map: HashMap<NodeId, u32>,
    /// Reachable nodes by ascending (distance, node id).
    pub order: Vec<NodeId>,
}

impl TraceResult {
    pub fn contains(&self, id: NodeId) -> bool {
        self.distance_map.contains_key(&id)
    }

    pub fn distance(&self, id: NodeId) -> Option<u32> {
        self.distance_map.get(&id).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Builds the dependency graph (edges point consumer → source) and walks it
/// breadth-first from `start`.
///
/// A reference to a node id absent from the graph is a malformed edge: it is
/// logged at warning and skipped, never followed.
pub fn trace(graph: &WorkflowGraph, start: NodeId) -> TraceResult {
    if !graph.contains(start) {
        warn!(node = %start, "trace start node not found in graph; returning empty trace");
        return TraceResult::default();
    }

    // consumer -> source edges let the BFS walk "upstream" with ordinary
    // forward neighbor iteration.
    let mut dependencies: DiGraphMap<NodeId, ()> = DiGraphMap::new();
    for (id, node) in graph.iter() {
        dependencies.add_node(id);
        for value in node.inputs.values() {
            if let Some(source) = value.as_ref_source() {
                if graph.contains(source) {
                    dependencies.add_edge(id, source, ());
                } else {
                    warn!(node = %id, source = %source, "input references unknown node; skipping edge");
                }
            }
        }
    }

    let mut distance_map = HashMap::new();
    let mut queue = VecDeque::new();
    distance_map.insert(start, 0u32);
    queue.push_back(start);
    while let Some(current) = queue.pop_front() {
        let next_distance = distance_map[&current] + 1;
        for source in dependencies.neighbors(current) {
            distance_map.entry(source).or_insert_with(|| {
                queue.push_back(source);
                next_distance
            });
        }
    }

    let mut order: Vec<NodeId> = distance_map.keys().copied().collect();
    order.sort_by_key(|id| (distance_map[id], *id));
    TraceResult {
        distance_map,
        order,
    }
}
