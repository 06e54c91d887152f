//! Structural model checks
//!
//! Run on the final model of a pipeline and by the dead-code simplifier.
//! Unlike [`Graph::rebuild`](crate::graph::Graph::rebuild) this never fails
//! fast: every problem is collected into a [`StructuralReport`].

use log::debug;
use rustc_hash::FxHashSet;
use thiserror::Error;

use crate::error::{OnnxResult, TransformError};
use crate::proto::{GraphProto, ModelProto};
use crate::traits::ModelChecker;

/// Lowest default-domain opset accepted by the checker
pub const MIN_OPSET_VERSION: i64 = 7;
/// Highest default-domain opset accepted by the checker
pub const MAX_OPSET_VERSION: i64 = 21;

/// Whether `version` lies in the accepted opset range
pub fn is_opset_supported(version: i64) -> bool {
    (MIN_OPSET_VERSION..=MAX_OPSET_VERSION).contains(&version)
}

/// One structural defect
#[allow(missing_docs)]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Problem {
    #[error("model has no graph")]
    MissingGraph,

    #[error("opset {0} outside {min}..={max}", min = MIN_OPSET_VERSION, max = MAX_OPSET_VERSION)]
    OpsetOutOfRange(i64),

    #[error("unnamed {0}")]
    Unnamed(&'static str),

    #[error("node #{0} has an empty op_type")]
    EmptyOpType(usize),

    #[error("node name '{0}' is used twice")]
    DuplicateNodeName(String),

    #[error("initializer '{0}' is declared twice")]
    DuplicateInitializer(String),

    #[error("'{node}' reads '{tensor}' before it is defined")]
    UseBeforeDefinition { node: String, tensor: String },

    #[error("'{tensor}' already has a writer when '{node}' writes it")]
    MultipleWriters { node: String, tensor: String },

    #[error("graph output '{0}' is never produced")]
    UnproducedOutput(String),
}

/// Every problem found in one model
#[derive(Debug, Clone, Default)]
pub struct StructuralReport {
    /// Problems in discovery order
    pub problems: Vec<Problem>,
}

impl StructuralReport {
    /// No problems found
    pub fn is_valid(&self) -> bool {
        self.problems.is_empty()
    }

    /// All problems joined into one line
    pub fn summary(&self) -> String {
        self.problems
            .iter()
            .map(Problem::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// `ValidationFailed` listing every problem, if any
    pub fn into_result(self) -> OnnxResult<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(TransformError::ValidationFailed(self.summary()))
        }
    }
}

/// Check a whole model: opset range plus the graph structure
pub fn validate_model(model: &ModelProto) -> StructuralReport {
    let mut report = StructuralReport::default();

    match model.default_opset_version() {
        Some(version) if !is_opset_supported(version) => {
            report.problems.push(Problem::OpsetOutOfRange(version))
        }
        Some(_) => {}
        None => debug!("model declares no default-domain opset"),
    }

    match &model.graph {
        Some(graph) => report.problems.extend(validate_graph(graph).problems),
        None => report.problems.push(Problem::MissingGraph),
    }
    report
}

/// Check one graph in node order, descending into node subgraphs
pub fn validate_graph(graph: &GraphProto) -> StructuralReport {
    let mut problems = Vec::new();
    check_scope(graph, &FxHashSet::default(), &mut problems);
    StructuralReport { problems }
}

/// Check one scope. `outer` holds every tensor visible from enclosing scopes.
fn check_scope(graph: &GraphProto, outer: &FxHashSet<String>, problems: &mut Vec<Problem>) {
    // tensors defined so far in this scope; inputs and initializers come first
    let mut defined: FxHashSet<&str> = FxHashSet::default();
    for input in &graph.input {
        if input.name().is_empty() {
            problems.push(Problem::Unnamed("graph input"));
        }
        defined.insert(input.name());
    }

    let mut initializers: FxHashSet<&str> = FxHashSet::default();
    for init in &graph.initializer {
        if init.name().is_empty() {
            problems.push(Problem::Unnamed("initializer"));
        } else if !initializers.insert(init.name()) {
            problems.push(Problem::DuplicateInitializer(init.name().to_string()));
        }
        defined.insert(init.name());
    }

    let mut node_names: FxHashSet<&str> = FxHashSet::default();
    for (idx, node) in graph.node.iter().enumerate() {
        if node.op_type().is_empty() {
            problems.push(Problem::EmptyOpType(idx));
        }
        if !node.name().is_empty() && !node_names.insert(node.name()) {
            problems.push(Problem::DuplicateNodeName(node.name().to_string()));
        }

        for tensor in node.input.iter().filter(|t| !t.is_empty()) {
            if !defined.contains(tensor.as_str()) && !outer.contains(tensor) {
                problems.push(Problem::UseBeforeDefinition {
                    node: node.name().to_string(),
                    tensor: tensor.clone(),
                });
            }
        }

        if node.subgraphs().next().is_some() {
            let visible: FxHashSet<String> = outer
                .iter()
                .cloned()
                .chain(defined.iter().map(|t| t.to_string()))
                .collect();
            for sub in node.subgraphs() {
                check_scope(sub, &visible, problems);
            }
        }

        for tensor in node.output.iter().filter(|t| !t.is_empty()) {
            if !defined.insert(tensor) {
                problems.push(Problem::MultipleWriters {
                    node: node.name().to_string(),
                    tensor: tensor.clone(),
                });
            }
        }
    }

    for output in &graph.output {
        if output.name().is_empty() {
            problems.push(Problem::Unnamed("graph output"));
        } else if !defined.contains(output.name()) && !outer.contains(output.name()) {
            problems.push(Problem::UnproducedOutput(output.name().to_string()));
        }
    }
}

/// `Ok` when [`validate_model`] finds nothing
pub fn check_model(model: &ModelProto) -> OnnxResult<()> {
    validate_model(model).into_result()
}

/// Default [`ModelChecker`]
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuralChecker;

impl ModelChecker for StructuralChecker {
    fn check(&self, model: &ModelProto) -> OnnxResult<()> {
        check_model(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::extensions::{make_node, make_tensor_value_info};
    use crate::proto::AttributeProto;
    use crate::proto::{NodeProto, OperatorSetIdProto};
    use crate::tensor::vec_to_tensor_f32;

    fn make_test_model(nodes: Vec<NodeProto>, opset: i64) -> ModelProto {
        ModelProto {
            ir_version: Some(8),
            opset_import: vec![OperatorSetIdProto {
                domain: Some(String::new()),
                version: Some(opset),
            }],
            graph: Some(GraphProto {
                node: nodes,
                input: vec![make_tensor_value_info("X", 1, &[1, 3, 8, 8])],
                output: vec![make_tensor_value_info("Y", 1, &[1, 4, 8, 8])],
                initializer: vec![vec_to_tensor_f32(&[1.0; 4], "W")],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn conv_relu() -> Vec<NodeProto> {
        vec![
            make_node("Conv", &["X", "W"], &["conv_out"], "conv_0"),
            make_node("Relu", &["conv_out"], &["Y"], "relu_0"),
        ]
    }

    #[test]
    fn test_valid_model() {
        let model = make_test_model(conv_relu(), 13);
        assert!(validate_model(&model).is_valid());
        assert!(StructuralChecker.check(&model).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let model = make_test_model(
            vec![
                make_node("Relu", &["conv_out"], &["Y"], "relu_0"),
                make_node("Conv", &["X", "W"], &["conv_out"], "relu_0"),
                make_node("", &["X"], &["W"], "bad"),
            ],
            13,
        );
        let report = validate_model(&model);

        assert_eq!(
            report.problems,
            vec![
                Problem::UseBeforeDefinition {
                    node: "relu_0".to_string(),
                    tensor: "conv_out".to_string(),
                },
                Problem::DuplicateNodeName("relu_0".to_string()),
                Problem::EmptyOpType(2),
                Problem::MultipleWriters {
                    node: "bad".to_string(),
                    tensor: "W".to_string(),
                },
            ]
        );
        match StructuralChecker.check(&model) {
            Err(TransformError::ValidationFailed(msg)) => {
                assert!(msg.contains("'relu_0' reads 'conv_out' before it is defined"));
            }
            other => panic!("expected ValidationFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_opset_range() {
        let report = validate_model(&make_test_model(conv_relu(), 99));
        assert_eq!(report.problems, vec![Problem::OpsetOutOfRange(99)]);
        assert!(is_opset_supported(13));
        assert!(!is_opset_supported(6));
    }

    #[test]
    fn test_missing_graph() {
        let report = validate_model(&ModelProto::default());
        assert_eq!(report.problems, vec![Problem::MissingGraph]);
    }

    #[test]
    fn test_unproduced_output() {
        let mut model = make_test_model(conv_relu(), 13);
        if let Some(graph) = model.graph.as_mut() {
            graph.output.push(make_tensor_value_info("Z", 1, &[1]));
        }
        let report = validate_model(&model);
        assert_eq!(report.problems, vec![Problem::UnproducedOutput("Z".to_string())]);
    }

    fn if_node(cond: &str, captured: &str, out: &str) -> NodeProto {
        let branch = |name: &str| GraphProto {
            name: Some(name.to_string()),
            node: vec![make_node("Identity", &[captured], &[&format!("{name}_out")], "")],
            output: vec![make_tensor_value_info(&format!("{name}_out"), 1, &[1])],
            ..Default::default()
        };
        let mut node = make_node("If", &[cond], &[out], "if_0");
        node.attribute = vec![
            AttributeProto::new_graph("then_branch", branch("then")),
            AttributeProto::new_graph("else_branch", branch("else")),
        ];
        node
    }

    #[test]
    fn test_subgraph_capture_defined_outside() {
        let mut nodes = conv_relu();
        nodes.push(if_node("X", "conv_out", "branch_out"));
        let model = make_test_model(nodes, 13);
        assert!(validate_model(&model).is_valid(), "{}", validate_model(&model).summary());
    }

    #[test]
    fn test_subgraph_dangling_capture() {
        let mut nodes = conv_relu();
        nodes.push(if_node("X", "ghost", "branch_out"));
        let report = validate_model(&make_test_model(nodes, 13));
        assert_eq!(
            report.problems,
            vec![
                Problem::UseBeforeDefinition {
                    node: String::new(),
                    tensor: "ghost".to_string(),
                },
                Problem::UseBeforeDefinition {
                    node: String::new(),
                    tensor: "ghost".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_subgraph_capture_before_definition() {
        // the If runs before the Relu that writes its capture
        let mut nodes = conv_relu();
        nodes.insert(0, if_node("X", "Y", "branch_out"));
        let report = validate_model(&make_test_model(nodes, 13));
        assert_eq!(report.problems.len(), 2);
        assert!(report
            .problems
            .iter()
            .all(|p| matches!(p, Problem::UseBeforeDefinition { tensor, .. } if tensor == "Y")));
    }
}
