//! Graph cleanup utilities
//!
//! Functions for removing elements that no graph output depends on.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::proto::GraphProto;

/// Tensor names a graph output transitively depends on
///
/// Outer tensors captured by a node's subgraphs count as inputs of that node.
pub fn collect_live_tensors(graph: &GraphProto) -> FxHashSet<String> {
    let producers: FxHashMap<&str, usize> = graph
        .node
        .iter()
        .enumerate()
        .flat_map(|(pos, n)| n.output.iter().map(move |o| (o.as_str(), pos)))
        .filter(|(o, _)| !o.is_empty())
        .collect();

    let mut live: FxHashSet<String> = FxHashSet::default();
    let mut stack: Vec<String> = graph.output.iter().map(|vi| vi.name().to_string()).collect();

    while let Some(name) = stack.pop() {
        if let Some(&pos) = producers.get(name.as_str()) {
            if !live.contains(&name) {
                stack.extend(graph.node[pos].read_tensors());
            }
        }
        live.insert(name);
    }

    live
}

/// Every tensor some node reads, subgraph captures included
fn read_tensors(graph: &GraphProto) -> FxHashSet<String> {
    graph.node.iter().flat_map(|n| n.read_tensors()).collect()
}

/// Remove nodes none of whose outputs is live
///
/// Returns the number of removed nodes.
pub fn remove_dead_nodes(graph: &mut GraphProto) -> usize {
    let live = collect_live_tensors(graph);
    let before = graph.node.len();
    graph
        .node
        .retain(|n| n.output.iter().any(|o| live.contains(o)));
    before - graph.node.len()
}

/// Remove initializers no node reads, unless declared as graph input or output
pub fn remove_unused_initializers(graph: &mut GraphProto) -> usize {
    let mut used = read_tensors(graph);
    used.extend(graph.input.iter().map(|vi| vi.name().to_string()));
    used.extend(graph.output.iter().map(|vi| vi.name().to_string()));

    let before = graph.initializer.len();
    graph.initializer.retain(|t| used.contains(t.name()));
    before - graph.initializer.len()
}

/// Remove value_info for tensors no node touches and for graph inputs/outputs
pub fn remove_unused_value_info(graph: &mut GraphProto) -> usize {
    let mut used = read_tensors(graph);
    used.extend(graph.node.iter().flat_map(|n| n.output.iter().cloned()));
    let io: FxHashSet<&str> = graph
        .input
        .iter()
        .chain(graph.output.iter())
        .map(|vi| vi.name())
        .collect();

    let before = graph.value_info.len();
    graph
        .value_info
        .retain(|vi| used.contains(vi.name()) && !io.contains(vi.name()));
    before - graph.value_info.len()
}

/// Statistics from a cleanup run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupStats {
    pub nodes_removed: usize,
    pub initializers_removed: usize,
    pub value_info_removed: usize,
}

impl CleanupStats {
    pub fn changed(&self) -> bool {
        self.nodes_removed + self.initializers_removed + self.value_info_removed > 0
    }
}

/// Remove dead nodes, then the initializers and value_info they left behind
pub fn cleanup_graph(graph: &mut GraphProto) -> CleanupStats {
    let nodes_removed = remove_dead_nodes(graph);
    CleanupStats {
        nodes_removed,
        initializers_removed: remove_unused_initializers(graph),
        value_info_removed: remove_unused_value_info(graph),
    }
}
