//! Graph mutation operations
//!
//! Methods for adding, removing, and replacing nodes, initializers and
//! tensor names. Single-node and single-initializer mutators patch the
//! indices in place; whole-graph renames rebuild them once. Nothing here
//! validates; a pass finishes with [`Graph::rebuild`] to restore order and
//! check the structural invariants.

use rustc_hash::FxHashSet;

use crate::error::{OnnxResult, TransformError};
use crate::proto::tensor_shape_proto::Dimension;
use crate::proto::{NodeProto, TensorProto, ValueInfoProto};

use super::context::Graph;
use super::maps::{build_initializer_index, build_node_index};

impl Graph {
    // ========================================================================
    // Node mutation
    // ========================================================================

    /// Append a node at the end of the graph
    pub fn append_node(&mut self, node: NodeProto) {
        self.index.link_node(self.proto.node.len(), &node);
        self.proto.node.push(node);
    }

    /// Insert a node directly after `anchor`
    pub fn insert_node_after(&mut self, anchor: &str, node: NodeProto) -> OnnxResult<()> {
        let pos = self.position_or_not_found(anchor)?;
        self.insert_node_at(pos + 1, node);
        Ok(())
    }

    /// Insert a node directly before `anchor`
    pub fn insert_node_before(&mut self, anchor: &str, node: NodeProto) -> OnnxResult<()> {
        let pos = self.position_or_not_found(anchor)?;
        self.insert_node_at(pos, node);
        Ok(())
    }

    fn insert_node_at(&mut self, pos: usize, node: NodeProto) {
        self.index.shift_nodes(pos, 1);
        self.index.link_node(pos, &node);
        self.proto.node.insert(pos, node);
    }

    /// Remove a node
    ///
    /// Readers of its outputs are left dangling until rewired.
    pub fn remove_node(&mut self, name: &str) -> OnnxResult<NodeProto> {
        let pos = self.position_or_not_found(name)?;
        let node = self.proto.node.remove(pos);
        self.index.unlink_node(pos, &node);
        self.index.shift_nodes(pos + 1, -1);
        Ok(node)
    }

    /// Replace the node carrying the same name, keeping its position
    pub fn replace_node(&mut self, node: NodeProto) -> OnnxResult<NodeProto> {
        let pos = self.position_or_not_found(node.name())?;
        self.index.unlink_node(pos, &self.proto.node[pos]);
        self.index.link_node(pos, &node);
        Ok(std::mem::replace(&mut self.proto.node[pos], node))
    }

    /// Edit a node in place
    pub fn update_node<F>(&mut self, name: &str, f: F) -> OnnxResult<()>
    where
        F: FnOnce(&mut NodeProto),
    {
        let pos = self.position_or_not_found(name)?;
        self.edit_at(pos, f);
        Ok(())
    }

    /// Edit the node that writes `tensor`, named or not
    pub fn update_producer<F>(&mut self, tensor: &str, f: F) -> OnnxResult<()>
    where
        F: FnOnce(&mut NodeProto),
    {
        let pos = *self
            .index
            .producers
            .get(tensor)
            .ok_or_else(|| TransformError::NotFound(format!("producer of '{}'", tensor)))?;
        self.edit_at(pos, f);
        Ok(())
    }

    fn edit_at<F>(&mut self, pos: usize, f: F)
    where
        F: FnOnce(&mut NodeProto),
    {
        self.index.unlink_node(pos, &self.proto.node[pos]);
        f(&mut self.proto.node[pos]);
        self.index.link_node(pos, &self.proto.node[pos]);
    }

    /// Point every reader of `old` at `new` instead
    ///
    /// Subgraph captures of `old` are rewritten as well. `except` names a node
    /// to leave untouched. Returns the number of rewired references.
    pub fn redirect_consumers(&mut self, old: &str, new: &str, except: Option<&str>) -> usize {
        let readers: Vec<usize> = self
            .index
            .consumers
            .get(old)
            .map(|c| c.to_vec())
            .unwrap_or_default();
        let rename = |name: &str| (name == old).then(|| new.to_string());

        let mut count = 0;
        for pos in readers {
            if except.is_some_and(|e| e == self.proto.node[pos].name()) {
                continue;
            }
            self.edit_at(pos, |node| {
                for input in node.input.iter_mut().filter(|i| i.as_str() == old) {
                    *input = new.to_string();
                    count += 1;
                }
                for sub in node.subgraphs_mut() {
                    count += sub.rename_free_variables(&rename);
                }
            });
        }
        count
    }

    fn position_or_not_found(&self, name: &str) -> OnnxResult<usize> {
        self.node_position(name)
            .ok_or_else(|| TransformError::NotFound(format!("node '{}'", name)))
    }

    // ========================================================================
    // Initializer mutation
    // ========================================================================

    /// Add a new initializer
    pub fn add_initializer(&mut self, tensor: TensorProto) -> OnnxResult<()> {
        if self.is_initializer(tensor.name()) {
            return Err(TransformError::ValidationFailed(format!(
                "initializer '{}' already exists",
                tensor.name()
            )));
        }
        self.index
            .initializers
            .insert(tensor.name().to_string(), self.proto.initializer.len());
        self.proto.initializer.push(tensor);
        Ok(())
    }

    /// Replace initializer `old` with `tensor` at the same position
    pub fn replace_initializer(&mut self, old: &str, tensor: TensorProto) -> OnnxResult<TensorProto> {
        let pos = *self
            .index
            .initializers
            .get(old)
            .ok_or_else(|| TransformError::NotFound(format!("initializer '{}'", old)))?;

        if tensor.name() != old && self.is_initializer(tensor.name()) {
            return Err(TransformError::ValidationFailed(format!(
                "initializer '{}' already exists",
                tensor.name()
            )));
        }

        self.index.initializers.remove(old);
        self.index.initializers.insert(tensor.name().to_string(), pos);
        Ok(std::mem::replace(&mut self.proto.initializer[pos], tensor))
    }

    /// Remove an initializer
    pub fn remove_initializer(&mut self, name: &str) -> OnnxResult<TensorProto> {
        let pos = self
            .index
            .initializers
            .remove(name)
            .ok_or_else(|| TransformError::NotFound(format!("initializer '{}'", name)))?;
        self.index.shift_initializers(pos + 1, -1);
        Ok(self.proto.initializer.remove(pos))
    }

    /// Remove candidates that are initializers nobody reads any more
    ///
    /// Initializers that are graph outputs or also listed as graph inputs are
    /// kept. Returns the number of removed initializers.
    pub fn prune_initializers<I, S>(&mut self, candidates: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let orphaned: FxHashSet<String> = candidates
            .into_iter()
            .map(|c| c.as_ref().to_string())
            .filter(|name| {
                self.is_initializer(name)
                    && self.consumer_count(name) == 0
                    && !self.is_graph_output(name)
                    && !self.is_graph_input(name)
            })
            .collect();

        if orphaned.is_empty() {
            return 0;
        }

        let before = self.proto.initializer.len();
        self.proto.initializer.retain(|t| !orphaned.contains(t.name()));
        self.proto.value_info.retain(|vi| !orphaned.contains(vi.name()));
        self.index.initializers = build_initializer_index(&self.proto);
        before - self.proto.initializer.len()
    }

    // ========================================================================
    // Names and declared shapes
    // ========================================================================

    /// Rename tensors everywhere they appear
    ///
    /// `rename` maps an old tensor name to its new name, or `None` to keep it.
    /// Node inputs and outputs, subgraph captures, initializers, graph inputs
    /// and outputs and value_info entries are all rewritten.
    pub fn rename_tensors<F>(&mut self, rename: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let apply = |name: &mut String| {
            if name.is_empty() {
                return;
            }
            if let Some(new) = rename(name) {
                *name = new;
            }
        };

        for node in self.proto.node.iter_mut() {
            node.input.iter_mut().for_each(apply);
            node.output.iter_mut().for_each(apply);
            for sub in node.subgraphs_mut() {
                sub.rename_free_variables(&rename);
            }
        }
        for init in self.proto.initializer.iter_mut() {
            if let Some(name) = init.name.as_mut() {
                apply(name);
            }
        }
        for vi in self
            .proto
            .input
            .iter_mut()
            .chain(self.proto.output.iter_mut())
            .chain(self.proto.value_info.iter_mut())
        {
            if let Some(name) = vi.name.as_mut() {
                apply(name);
            }
        }
        self.reindex();
    }

    /// Rename a single tensor everywhere it appears
    pub fn rename_tensor(&mut self, old: &str, new: &str) {
        self.rename_tensors(|name| (name == old).then(|| new.to_string()));
    }

    /// Rename nodes; `rename` returns `None` to keep a name
    pub fn rename_nodes<F>(&mut self, rename: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for node in self.proto.node.iter_mut() {
            if node.name().is_empty() {
                continue;
            }
            if let Some(new) = rename(node.name()) {
                node.name = Some(new);
            }
        }
        self.index.nodes = build_node_index(&self.proto);
    }

    /// Replace the declared dims of a graph output
    pub fn set_output_shape(&mut self, name: &str, dims: Vec<Dimension>) -> OnnxResult<()> {
        let output = self
            .proto
            .output
            .iter_mut()
            .find(|vi| vi.name() == name)
            .ok_or_else(|| TransformError::NotFound(format!("graph output '{}'", name)))?;
        output.set_dims(dims);
        Ok(())
    }

    /// Drop the value_info entry for a tensor, if any
    pub fn remove_value_info(&mut self, name: &str) -> Option<ValueInfoProto> {
        let pos = self.proto.value_info.iter().position(|vi| vi.name() == name)?;
        Some(self.proto.value_info.remove(pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::extensions::{dim_param, dim_value, make_node, make_tensor_value_info};
    use crate::graph::GraphIndex;
    use crate::proto::{AttributeProto, GraphProto};
    use crate::tensor::vec_to_tensor_f32;

    fn make_test_graph() -> Graph {
        let proto = GraphProto {
            node: vec![
                make_node("Conv", &["X", "W"], &["conv_out"], "conv_0"),
                make_node("Relu", &["conv_out"], &["Y"], "relu_0"),
            ],
            input: vec![make_tensor_value_info("X", 1, &[1, 3, 8, 8])],
            output: vec![make_tensor_value_info("Y", 1, &[1, 4, 8, 8])],
            initializer: vec![vec_to_tensor_f32(&[1.0; 4], "W")],
            ..Default::default()
        };
        Graph::from_graph_proto(proto, 13).unwrap()
    }

    #[test]
    fn test_insert_node_after() {
        let mut graph = make_test_graph();
        graph.update_node("relu_0", |n| n.input[0] = "bias_out".to_string()).unwrap();
        graph
            .insert_node_after("conv_0", make_node("Identity", &["conv_out"], &["bias_out"], "id_0"))
            .unwrap();
        graph.rebuild().unwrap();

        let order: Vec<&str> = graph.nodes().iter().map(|n| n.name()).collect();
        assert_eq!(order, vec!["conv_0", "id_0", "relu_0"]);
        assert_eq!(graph.producer_of("bias_out").unwrap().name(), "id_0");
    }

    #[test]
    fn test_remove_node_leaves_dangling_reader() {
        let mut graph = make_test_graph();
        let removed = graph.remove_node("conv_0").unwrap();

        assert_eq!(removed.op_type(), "Conv");
        assert!(graph.producer_of("conv_out").is_none());
        assert!(matches!(graph.rebuild(), Err(TransformError::NotFound(_))));
    }

    #[test]
    fn test_replace_node() {
        let mut graph = make_test_graph();
        let old = graph
            .replace_node(make_node("LeakyRelu", &["conv_out"], &["Y"], "relu_0"))
            .unwrap();

        assert_eq!(old.op_type(), "Relu");
        assert_eq!(graph.find_node_by_name("relu_0").unwrap().op_type(), "LeakyRelu");
        assert!(graph.replace_node(make_node("Relu", &[], &[], "nope")).is_err());
    }

    #[test]
    fn test_replace_initializer_keeps_position() {
        let mut graph = make_test_graph();
        graph.add_initializer(vec_to_tensor_f32(&[0.0], "B")).unwrap();
        graph
            .replace_initializer("W", vec_to_tensor_f32(&[2.0; 4], "W_new"))
            .unwrap();

        assert_eq!(graph.initializers()[0].name(), "W_new");
        assert!(!graph.is_initializer("W"));
        assert!(graph.add_initializer(vec_to_tensor_f32(&[0.0], "B")).is_err());
    }

    #[test]
    fn test_prune_initializers() {
        let mut graph = make_test_graph();
        graph.add_initializer(vec_to_tensor_f32(&[0.0], "unused")).unwrap();

        assert_eq!(graph.prune_initializers(["W", "unused", "missing"]), 1);
        assert!(graph.is_initializer("W"));
        assert!(!graph.is_initializer("unused"));
    }

    #[test]
    fn test_rename_tensor() {
        let mut graph = make_test_graph();
        graph.rename_tensor("X", "input");

        assert!(graph.is_graph_input("input"));
        assert_eq!(graph.consumers_of("input")[0].name(), "conv_0");
        assert!(graph.rebuild().is_ok());
    }

    #[test]
    fn test_redirect_consumers() {
        let mut graph = make_test_graph();
        graph.update_node("conv_0", |n| n.output[0] = "conv_raw".to_string()).unwrap();
        assert_eq!(graph.redirect_consumers("conv_out", "conv_raw", None), 1);
        assert!(graph.rebuild().is_ok());
    }

    #[test]
    fn test_update_producer() {
        let mut graph = make_test_graph();
        graph
            .update_producer("conv_out", |n| n.name = Some("renamed".to_string()))
            .unwrap();

        assert!(graph.has_node("renamed"));
        assert_eq!(graph.unique_node_name("renamed"), "renamed_1");
        assert!(graph.update_producer("X", |_| {}).is_err());
    }

    #[test]
    fn test_set_output_shape() {
        let mut graph = make_test_graph();
        graph
            .set_output_shape("Y", vec![dim_param("N"), dim_value(4)])
            .unwrap();

        assert_eq!(graph.output_shape("Y"), Some(vec![-1, 4]));
        assert!(graph.set_output_shape("conv_out", vec![]).is_err());
    }

    fn if_reading(captured: &str) -> NodeProto {
        let body = GraphProto {
            node: vec![make_node("Identity", &[captured], &["body_out"], "")],
            output: vec![make_tensor_value_info("body_out", 1, &[1])],
            ..Default::default()
        };
        let mut node = make_node("If", &["X"], &["branch"], "if_0");
        node.attribute.push(AttributeProto::new_graph("then_branch", body));
        node
    }

    fn captured_name(graph: &Graph) -> String {
        graph.find_node_by_name("if_0").unwrap().attribute[0]
            .g
            .as_ref()
            .unwrap()
            .node[0]
            .input[0]
            .clone()
    }

    #[test]
    fn test_mutations_keep_index_in_sync() {
        let mut graph = make_test_graph();

        graph
            .insert_node_before("relu_0", make_node("Sigmoid", &["conv_out"], &["gate"], "gate_0"))
            .unwrap();
        assert_eq!(graph.index, GraphIndex::build(&graph.proto));

        graph.append_node(if_reading("gate"));
        graph.update_node("gate_0", |n| n.input[0] = "X".to_string()).unwrap();
        assert_eq!(graph.index, GraphIndex::build(&graph.proto));

        graph.remove_node("conv_0").unwrap();
        graph
            .replace_node(make_node("Relu", &["gate"], &["Y"], "relu_0"))
            .unwrap();
        assert_eq!(graph.index, GraphIndex::build(&graph.proto));

        graph.add_initializer(vec_to_tensor_f32(&[0.0], "B")).unwrap();
        graph.remove_initializer("W").unwrap();
        graph.replace_initializer("B", vec_to_tensor_f32(&[1.0], "B2")).unwrap();
        assert_eq!(graph.index, GraphIndex::build(&graph.proto));
        assert_eq!(graph.index.initializers.get("B2"), Some(&0));

        assert!(graph.rebuild().is_ok());
    }

    #[test]
    fn test_redirect_consumers_rewrites_captures() {
        let mut graph = make_test_graph();
        graph.append_node(if_reading("conv_out"));
        graph.rebuild().unwrap();

        graph.update_node("conv_0", |n| n.output[0] = "conv_raw".to_string()).unwrap();
        assert_eq!(graph.redirect_consumers("conv_out", "conv_raw", None), 2);
        assert_eq!(captured_name(&graph), "conv_raw");
        assert_eq!(graph.consumer_count("conv_raw"), 2);
        assert_eq!(graph.index, GraphIndex::build(&graph.proto));
        assert!(graph.rebuild().is_ok());
    }

    #[test]
    fn test_rename_tensor_reaches_subgraphs() {
        let mut graph = make_test_graph();
        graph.append_node(if_reading("conv_out"));
        graph.rebuild().unwrap();

        graph.rename_tensor("conv_out", "features");
        assert_eq!(captured_name(&graph), "features");
        // a name defined inside the branch is not an outer reference
        graph.rename_tensor("body_out", "other");
        assert_eq!(
            graph.find_node_by_name("if_0").unwrap().attribute[0]
                .g
                .as_ref()
                .unwrap()
                .output[0]
                .name(),
            "body_out"
        );
        assert!(graph.rebuild().is_ok());
    }
}
