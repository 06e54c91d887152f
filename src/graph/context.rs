//! Graph model for ONNX rewriting
//!
//! [`Graph`] owns a model together with lookup tables for nodes, tensors and
//! their relationships. Passes work on a clone and hand back a new `Graph`;
//! the input graph is never touched.

use rustc_hash::FxHashSet;

use crate::error::{OnnxResult, TransformError};
use crate::proto::{GraphProto, ModelProto, NodeProto, TensorProto, ValueInfoProto};

use super::maps::GraphIndex;

/// An ONNX model with O(1) lookups over its main graph
///
/// Node order is always a topological order of the data flow. Every tensor
/// has at most one writer: a graph input, an initializer, or one node output.
#[derive(Debug, Clone)]
pub struct Graph {
    /// Model metadata; `graph` is kept `None` while the graph lives below
    pub(super) header: ModelProto,

    /// The main graph
    pub(super) proto: GraphProto,

    /// Lookup tables over `proto`
    pub(super) index: GraphIndex,
}

impl Graph {
    /// Take ownership of a model and index its graph
    ///
    /// Fails with `NotFound` when the model has no graph and with
    /// `ValidationFailed` when the graph breaks a structural invariant.
    pub fn from_model(mut model: ModelProto) -> OnnxResult<Self> {
        let proto = model
            .graph
            .take()
            .ok_or_else(|| TransformError::NotFound("model.graph".to_string()))?;

        let mut graph = Self {
            header: model,
            proto,
            index: GraphIndex::default(),
        };
        graph.rebuild()?;
        Ok(graph)
    }

    /// Wrap a bare graph in a model importing `opset` of the default domain
    pub fn from_graph_proto(proto: GraphProto, opset: i64) -> OnnxResult<Self> {
        let model = ModelProto {
            ir_version: Some(8),
            opset_import: vec![crate::proto::OperatorSetIdProto {
                domain: Some(String::new()),
                version: Some(opset),
            }],
            graph: Some(proto),
            ..Default::default()
        };
        Self::from_model(model)
    }

    /// Clone out a complete model
    pub fn to_model(&self) -> ModelProto {
        let mut model = self.header.clone();
        model.graph = Some(self.proto.clone());
        model
    }

    /// Consume into a complete model
    pub fn into_model(self) -> ModelProto {
        let mut model = self.header;
        model.graph = Some(self.proto);
        model
    }

    /// Underlying graph message
    pub fn proto(&self) -> &GraphProto {
        &self.proto
    }

    /// Model metadata (the `graph` field is empty)
    pub fn header(&self) -> &ModelProto {
        &self.header
    }

    /// Opset version of the default domain
    pub fn opset_version(&self) -> Option<i64> {
        self.header.default_opset_version()
    }

    // ========================================================================
    // Node accessors
    // ========================================================================

    /// Nodes in topological order
    pub fn nodes(&self) -> &[NodeProto] {
        &self.proto.node
    }

    /// Nodes of the given op type, in graph order
    pub fn nodes_by_op<'a>(&'a self, op_type: &'a str) -> impl Iterator<Item = &'a NodeProto> {
        self.proto.node.iter().filter(move |n| n.op_type() == op_type)
    }

    /// Get a node by name
    pub fn find_node_by_name(&self, name: &str) -> OnnxResult<&NodeProto> {
        self.index
            .nodes
            .get(name)
            .map(|&pos| &self.proto.node[pos])
            .ok_or_else(|| TransformError::NotFound(format!("node '{}'", name)))
    }

    /// Check if a node with this name exists
    pub fn has_node(&self, name: &str) -> bool {
        self.index.nodes.contains_key(name)
    }

    /// Position of a node in graph order
    pub fn node_position(&self, name: &str) -> Option<usize> {
        self.index.nodes.get(name).copied()
    }

    // ========================================================================
    // Tensor accessors
    // ========================================================================

    /// Graph inputs
    pub fn inputs(&self) -> &[ValueInfoProto] {
        &self.proto.input
    }

    /// Graph outputs
    pub fn outputs(&self) -> &[ValueInfoProto] {
        &self.proto.output
    }

    /// Initializers
    pub fn initializers(&self) -> &[TensorProto] {
        &self.proto.initializer
    }

    /// Get an initializer by name
    pub fn find_initializer_by_name(&self, name: &str) -> OnnxResult<&TensorProto> {
        self.get_initializer(name)
            .ok_or_else(|| TransformError::NotFound(format!("initializer '{}'", name)))
    }

    /// Get an initializer by name, if present
    pub fn get_initializer(&self, name: &str) -> Option<&TensorProto> {
        self.index
            .initializers
            .get(name)
            .map(|&pos| &self.proto.initializer[pos])
    }

    /// Check if tensor is an initializer
    pub fn is_initializer(&self, name: &str) -> bool {
        self.index.initializers.contains_key(name)
    }

    /// Check if tensor is a graph input
    pub fn is_graph_input(&self, name: &str) -> bool {
        self.proto.input.iter().any(|vi| vi.name() == name)
    }

    /// Check if tensor is a graph output
    pub fn is_graph_output(&self, name: &str) -> bool {
        self.proto.output.iter().any(|vi| vi.name() == name)
    }

    /// Get a graph output by name
    pub fn graph_output(&self, name: &str) -> Option<&ValueInfoProto> {
        self.proto.output.iter().find(|vi| vi.name() == name)
    }

    /// Declared shape of a graph output; symbolic dims are reported as -1
    pub fn output_shape(&self, name: &str) -> Option<Vec<i64>> {
        self.graph_output(name).and_then(|vi| vi.get_shape())
    }

    /// Node that writes `tensor`, if any
    pub fn producer_of(&self, tensor: &str) -> Option<&NodeProto> {
        self.index
            .producers
            .get(tensor)
            .map(|&pos| &self.proto.node[pos])
    }

    /// Nodes that read `tensor`, in graph order
    pub fn consumers_of(&self, tensor: &str) -> Vec<&NodeProto> {
        self.index
            .consumers
            .get(tensor)
            .map(|positions| positions.iter().map(|&pos| &self.proto.node[pos]).collect())
            .unwrap_or_default()
    }

    /// Number of distinct nodes reading `tensor`
    pub fn consumer_count(&self, tensor: &str) -> usize {
        self.index.consumers.get(tensor).map_or(0, |c| c.len())
    }

    /// Whether any writer, reader or declaration mentions `name`
    pub fn tensor_exists(&self, name: &str) -> bool {
        self.index.producers.contains_key(name)
            || self.index.consumers.contains_key(name)
            || self.index.initializers.contains_key(name)
            || self.is_graph_input(name)
            || self.is_graph_output(name)
            || self.proto.value_info.iter().any(|vi| vi.name() == name)
    }

    /// `base` if unused, otherwise `base_1`, `base_2`, ...
    pub fn unique_tensor_name(&self, base: &str) -> String {
        if !self.tensor_exists(base) {
            return base.to_string();
        }
        (1..)
            .map(|i| format!("{}_{}", base, i))
            .find(|candidate| !self.tensor_exists(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    /// Node name `base` if free, otherwise `base_1`, `base_2`, ...
    pub fn unique_node_name(&self, base: &str) -> String {
        if !self.has_node(base) {
            return base.to_string();
        }
        (1..)
            .map(|i| format!("{}_{}", base, i))
            .find(|candidate| !self.has_node(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    // ========================================================================
    // Structure
    // ========================================================================

    /// Re-validate the graph, restore topological order and rebuild indices
    ///
    /// Fails with `ValidationFailed` on duplicate node names, a tensor with
    /// more than one writer, or a cycle, and with `NotFound` when a node input
    /// or graph output has no writer. An initializer may also be listed as a
    /// graph input.
    pub fn rebuild(&mut self) -> OnnxResult<()> {
        let order = self.check_and_sort()?;

        if order.iter().enumerate().any(|(i, &pos)| i != pos) {
            let mut nodes = std::mem::take(&mut self.proto.node);
            self.proto.node = order
                .iter()
                .map(|&pos| std::mem::take(&mut nodes[pos]))
                .collect();
        }

        self.reindex();
        Ok(())
    }

    /// Rebuild indices without validation
    pub(super) fn reindex(&mut self) {
        self.index = GraphIndex::build(&self.proto);
    }

    fn check_and_sort(&self) -> OnnxResult<Vec<usize>> {
        use rustc_hash::FxHashMap;
        use std::cmp::Reverse;
        use std::collections::BinaryHeap;

        let graph = &self.proto;

        let mut names: FxHashSet<&str> = FxHashSet::default();
        for node in &graph.node {
            if !node.name().is_empty() && !names.insert(node.name()) {
                return Err(TransformError::ValidationFailed(format!(
                    "duplicate node name '{}'",
                    node.name()
                )));
            }
        }

        // Tensors defined outside any node
        let mut defined: FxHashSet<&str> = FxHashSet::default();
        for init in &graph.initializer {
            if !defined.insert(init.name()) {
                return Err(TransformError::ValidationFailed(format!(
                    "duplicate initializer '{}'",
                    init.name()
                )));
            }
        }
        let mut input_names: FxHashSet<&str> = FxHashSet::default();
        for input in &graph.input {
            if !input_names.insert(input.name()) {
                return Err(TransformError::ValidationFailed(format!(
                    "duplicate graph input '{}'",
                    input.name()
                )));
            }
            defined.insert(input.name());
        }

        let mut producer: FxHashMap<&str, usize> = FxHashMap::default();
        for (pos, node) in graph.node.iter().enumerate() {
            for output in node.output.iter().filter(|o| !o.is_empty()) {
                if defined.contains(output.as_str())
                    || producer.insert(output.as_str(), pos).is_some()
                {
                    return Err(TransformError::ValidationFailed(format!(
                        "tensor '{}' has more than one writer",
                        output
                    )));
                }
            }
        }

        let n = graph.node.len();
        let mut indegree = vec![0usize; n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];

        // subgraph captures order a node after their writers like inputs do
        for (pos, node) in graph.node.iter().enumerate() {
            for input in node.read_tensors() {
                match producer.get(input.as_str()) {
                    Some(&p) if p == pos => {
                        return Err(TransformError::ValidationFailed(format!(
                            "node '{}' reads its own output '{}'",
                            node.name(), input
                        )));
                    }
                    Some(&p) => {
                        dependents[p].push(pos);
                        indegree[pos] += 1;
                    }
                    None if defined.contains(input.as_str()) => {}
                    None => {
                        return Err(TransformError::NotFound(format!(
                            "input '{}' of node '{}' has no producer",
                            input, node.name()
                        )));
                    }
                }
            }
        }

        for output in &graph.output {
            let name = output.name();
            if !producer.contains_key(name) && !defined.contains(name) {
                return Err(TransformError::NotFound(format!(
                    "graph output '{}' has no producer",
                    name
                )));
            }
        }

        // Kahn's algorithm, lowest original position first so that an
        // already sorted graph keeps its order
        let mut ready: BinaryHeap<Reverse<usize>> = indegree
            .iter()
            .enumerate()
            .filter(|&(_, &d)| d == 0)
            .map(|(pos, _)| Reverse(pos))
            .collect();
        let mut order = Vec::with_capacity(n);

        while let Some(Reverse(pos)) = ready.pop() {
            order.push(pos);
            for &next in &dependents[pos] {
                indegree[next] -= 1;
                if indegree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() != n {
            return Err(TransformError::ValidationFailed(
                "graph contains a cycle".to_string(),
            ));
        }

        Ok(order)
    }
}
