//! Graph index types and builders
//!
//! Positions refer to `GraphProto::node` / `GraphProto::initializer`. Nodes
//! with an empty name are not indexed by name. A node consumes its explicit
//! inputs and every outer tensor its subgraphs capture.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::proto::{GraphProto, NodeProto};

/// node name → position in `node`
pub type NodeIndex = FxHashMap<String, usize>;

/// tensor name → position of the producing node
pub type ProducerMap = FxHashMap<String, usize>;

/// tensor name → positions of consuming nodes, ascending
/// SmallVec optimized for the common case of 1-4 consumers
pub type ConsumerMap = FxHashMap<String, SmallVec<[usize; 4]>>;

/// initializer name → position in `initializer`
pub type InitializerIndex = FxHashMap<String, usize>;

/// All lookup tables of a [`Graph`](super::Graph)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphIndex {
    /// node name → position
    pub nodes: NodeIndex,
    /// tensor → producer position
    pub producers: ProducerMap,
    /// tensor → consumer positions
    pub consumers: ConsumerMap,
    /// initializer name → position
    pub initializers: InitializerIndex,
}

impl GraphIndex {
    /// Build every table from a graph
    pub fn build(graph: &GraphProto) -> Self {
        Self {
            nodes: build_node_index(graph),
            producers: build_producer_map(graph),
            consumers: build_consumer_map(graph),
            initializers: build_initializer_index(graph),
        }
    }

    /// Record `node` as living at `pos`
    pub fn link_node(&mut self, pos: usize, node: &NodeProto) {
        if !node.name().is_empty() {
            self.nodes.insert(node.name().to_string(), pos);
        }
        for output in node.output.iter().filter(|o| !o.is_empty()) {
            self.producers.insert(output.clone(), pos);
        }
        for tensor in node.read_tensors() {
            let consumers = self.consumers.entry(tensor).or_default();
            if let Err(at) = consumers.binary_search(&pos) {
                consumers.insert(at, pos);
            }
        }
    }

    /// Forget every entry `node` at `pos` contributed
    pub fn unlink_node(&mut self, pos: usize, node: &NodeProto) {
        if self.nodes.get(node.name()) == Some(&pos) {
            self.nodes.remove(node.name());
        }
        for output in &node.output {
            if self.producers.get(output.as_str()) == Some(&pos) {
                self.producers.remove(output.as_str());
            }
        }
        for tensor in node.read_tensors() {
            if let Some(consumers) = self.consumers.get_mut(&tensor) {
                consumers.retain(|p| *p != pos);
                if consumers.is_empty() {
                    self.consumers.remove(&tensor);
                }
            }
        }
    }

    /// Move every node position `>= from` by `delta`
    pub fn shift_nodes(&mut self, from: usize, delta: isize) {
        let shift = |p: &mut usize| {
            if *p >= from {
                *p = p.wrapping_add_signed(delta);
            }
        };
        self.nodes.values_mut().for_each(shift);
        self.producers.values_mut().for_each(shift);
        for consumers in self.consumers.values_mut() {
            consumers.iter_mut().for_each(shift);
        }
    }

    /// Move every initializer position `>= from` by `delta`
    pub fn shift_initializers(&mut self, from: usize, delta: isize) {
        for p in self.initializers.values_mut() {
            if *p >= from {
                *p = p.wrapping_add_signed(delta);
            }
        }
    }
}

/// Build node name index
pub fn build_node_index(graph: &GraphProto) -> NodeIndex {
    graph
        .node
        .iter()
        .enumerate()
        .filter(|(_, node)| !node.name().is_empty())
        .map(|(pos, node)| (node.name().to_string(), pos))
        .collect()
}

/// Build producer map from graph nodes
pub fn build_producer_map(graph: &GraphProto) -> ProducerMap {
    let mut map = FxHashMap::default();

    for (pos, node) in graph.node.iter().enumerate() {
        for output in &node.output {
            if !output.is_empty() {
                map.insert(output.clone(), pos);
            }
        }
    }

    map
}

/// Build consumer map from graph nodes, subgraph captures included
pub fn build_consumer_map(graph: &GraphProto) -> ConsumerMap {
    let mut map: ConsumerMap = FxHashMap::default();

    for (pos, node) in graph.node.iter().enumerate() {
        for tensor in node.read_tensors() {
            map.entry(tensor).or_default().push(pos);
        }
    }

    map
}

/// Build initializer index
pub fn build_initializer_index(graph: &GraphProto) -> InitializerIndex {
    graph
        .initializer
        .iter()
        .enumerate()
        .map(|(pos, t)| (t.name().to_string(), pos))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::extensions::{make_node, make_tensor_value_info};
    use crate::proto::{AttributeProto, TensorProto};

    fn make_test_graph() -> GraphProto {
        GraphProto {
            node: vec![
                make_node("Conv", &["X", "W"], &["conv_out"], "conv_0"),
                make_node("Add", &["conv_out", "conv_out"], &["sum"], "add_0"),
                make_node("Relu", &["sum"], &["Y"], ""),
            ],
            initializer: vec![TensorProto {
                name: Some("W".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_node_index_skips_unnamed() {
        let index = build_node_index(&make_test_graph());
        assert_eq!(index.get("add_0"), Some(&1));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_producer_and_consumer_maps() {
        let graph = make_test_graph();
        let producers = build_producer_map(&graph);
        let consumers = build_consumer_map(&graph);

        assert_eq!(producers.get("Y"), Some(&2));
        assert!(producers.get("X").is_none());
        // a node reading the same tensor twice is listed once
        assert_eq!(consumers.get("conv_out").map(|c| c.as_slice()), Some(&[1][..]));
    }

    #[test]
    fn test_subgraph_capture_is_a_consumer() {
        let mut graph = make_test_graph();
        let body = GraphProto {
            node: vec![make_node("Identity", &["sum"], &["body_out"], "")],
            output: vec![make_tensor_value_info("body_out", 1, &[1])],
            ..Default::default()
        };
        let mut node = make_node("If", &["X"], &["branch"], "if_0");
        node.attribute.push(AttributeProto::new_graph("then_branch", body));
        graph.node.push(node);

        let consumers = build_consumer_map(&graph);
        assert_eq!(consumers.get("sum").map(|c| c.as_slice()), Some(&[2, 3][..]));
        assert!(consumers.get("body_out").is_none());
    }

    #[test]
    fn test_link_and_unlink_match_build() {
        let mut graph = make_test_graph();
        let mut index = GraphIndex::build(&graph);

        // insert a node in the middle
        let node = make_node("Sigmoid", &["conv_out"], &["gate"], "gate_0");
        index.shift_nodes(1, 1);
        index.link_node(1, &node);
        graph.node.insert(1, node);
        assert_eq!(index, GraphIndex::build(&graph));

        // remove the first node
        let node = graph.node.remove(0);
        index.unlink_node(0, &node);
        index.shift_nodes(1, -1);
        assert_eq!(index, GraphIndex::build(&graph));
    }

    #[test]
    fn test_initializer_index() {
        let index = build_initializer_index(&make_test_graph());
        assert_eq!(index.get("W"), Some(&0));
    }
}
