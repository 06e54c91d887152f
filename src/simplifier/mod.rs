//! Default topology simplifier
//!
//! [`DeadCodeSimplifier`] drops everything no graph output depends on. It
//! stands in for a full simplifier when the host does not provide one.

pub mod cleanup;

use log::{debug, warn};

use crate::error::{OnnxResult, TransformError};
use crate::io::validation::validate_model;
use crate::proto::ModelProto;
use crate::traits::Simplifier;

pub use cleanup::{cleanup_graph, CleanupStats};

/// Removes dead nodes, unused initializers and stale value_info
///
/// Reports failure when the result does not pass structural validation.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeadCodeSimplifier;

impl Simplifier for DeadCodeSimplifier {
    fn simplify(&self, model: &ModelProto) -> OnnxResult<(ModelProto, bool)> {
        let mut simplified = model.clone();
        let graph = simplified
            .graph
            .as_mut()
            .ok_or_else(|| TransformError::NotFound("model.graph".to_string()))?;

        let stats = cleanup_graph(graph);
        debug!(
            "dead code removal: {} nodes, {} initializers, {} value_info",
            stats.nodes_removed, stats.initializers_removed, stats.value_info_removed
        );

        let report = validate_model(&simplified);
        if !report.is_valid() {
            warn!("simplified model is invalid: {}", report.summary());
        }
        Ok((simplified, report.is_valid()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::extensions::{make_node, make_tensor_value_info};
    use crate::proto::{AttributeProto, GraphProto, OperatorSetIdProto};

    fn make_model(nodes: Vec<crate::proto::NodeProto>) -> ModelProto {
        ModelProto {
            ir_version: Some(8),
            opset_import: vec![OperatorSetIdProto {
                domain: Some(String::new()),
                version: Some(13),
            }],
            graph: Some(GraphProto {
                node: nodes,
                input: vec![make_tensor_value_info("X", 1, &[1, 4])],
                output: vec![make_tensor_value_info("Y", 1, &[1, 4])],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_removes_dead_branch() {
        let model = make_model(vec![
            make_node("Relu", &["X"], &["Y"], "relu_0"),
            make_node("Sigmoid", &["X"], &["unused"], "sigmoid_0"),
        ]);

        let (simplified, ok) = DeadCodeSimplifier.simplify(&model).unwrap();
        assert!(ok);
        assert_eq!(simplified.graph.map(|g| g.node.len()), Some(1));
        // input model untouched
        assert_eq!(model.graph.map(|g| g.node.len()), Some(2));
    }

    #[test]
    fn test_reports_invalid_result() {
        let model = make_model(vec![make_node("Relu", &["missing"], &["Y"], "relu_0")]);
        let (_, ok) = DeadCodeSimplifier.simplify(&model).unwrap();
        assert!(!ok);
    }

    #[test]
    fn test_keeps_producer_of_branch_capture() {
        let identity_of_r = |name: &str| GraphProto {
            node: vec![make_node("Identity", &["r"], &[&format!("{name}_out")], "")],
            output: vec![make_tensor_value_info(&format!("{name}_out"), 1, &[1, 4])],
            ..Default::default()
        };
        let mut if_node = make_node("If", &["C"], &["Y"], "if_0");
        if_node.attribute = vec![
            AttributeProto::new_graph("then_branch", identity_of_r("then")),
            AttributeProto::new_graph("else_branch", identity_of_r("else")),
        ];
        let mut model = make_model(vec![make_node("Relu", &["X"], &["r"], "relu_0"), if_node]);
        if let Some(graph) = model.graph.as_mut() {
            graph.input.push(make_tensor_value_info("C", 9, &[]));
        }

        let (simplified, ok) = DeadCodeSimplifier.simplify(&model).unwrap();
        assert!(ok);
        assert_eq!(simplified, model);
    }
}
