//! Core traits for onnx-modifier
//!
//! Defines the rewrite pass interface and the seams to the external
//! collaborators a pass or the pipeline may call: shape inference, the
//! topology simplifier and the final model checker.

use crate::error::OnnxResult;
use crate::graph::Graph;
use crate::oracle::{ShapeMap, ShapeQuery};
use crate::proto::ModelProto;

/// A single-purpose graph → graph rewrite
///
/// Implementations never mutate their input: they clone, rewrite, call
/// [`Graph::rebuild`] and return the new graph.
///
/// # Example
///
/// ```ignore
/// struct Identity;
///
/// impl GraphPass for Identity {
///     fn name(&self) -> &'static str {
///         "identity"
///     }
///
///     fn apply(&self, graph: &Graph, _ctx: &PassContext) -> OnnxResult<Graph> {
///         Ok(graph.clone())
///     }
/// }
/// ```
pub trait GraphPass {
    /// Registry name of the pass
    fn name(&self) -> &'static str;

    /// Rewrite `graph` into a new graph
    fn apply(&self, graph: &Graph, ctx: &PassContext<'_>) -> OnnxResult<Graph>;
}

/// Answers tensor shape queries against a graph
pub trait ShapeInference {
    /// Shapes of every tensor selected by `query`
    fn infer(&self, graph: &Graph, query: &ShapeQuery) -> OnnxResult<ShapeMap>;
}

/// Generic topology simplifier
pub trait Simplifier {
    /// Simplified model plus a success flag
    fn simplify(&self, model: &ModelProto) -> OnnxResult<(ModelProto, bool)>;
}

/// Final structural validation of a model
pub trait ModelChecker {
    /// Fails with `ValidationFailed` listing every problem found
    fn check(&self, model: &ModelProto) -> OnnxResult<()>;
}

/// Collaborators handed to every pass
#[derive(Clone, Copy)]
pub struct PassContext<'a> {
    /// Shape oracle; passes call it at most once per invocation
    pub shapes: &'a dyn ShapeInference,
    /// Used by the `simplify` pass
    pub simplifier: &'a dyn Simplifier,
}

impl<'a> PassContext<'a> {
    /// Bundle the collaborators for one pipeline run
    pub fn new(shapes: &'a dyn ShapeInference, simplifier: &'a dyn Simplifier) -> Self {
        Self { shapes, simplifier }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransformError;
    use crate::proto::extensions::{make_node, make_tensor_value_info};
    use crate::proto::GraphProto;

    struct NoShapes;

    impl ShapeInference for NoShapes {
        fn infer(&self, _graph: &Graph, query: &ShapeQuery) -> OnnxResult<ShapeMap> {
            if query.is_empty() {
                Ok(ShapeMap::new())
            } else {
                Err(TransformError::ShapeInferenceFailed("none".to_string()))
            }
        }
    }

    struct KeepModel;

    impl Simplifier for KeepModel {
        fn simplify(&self, model: &ModelProto) -> OnnxResult<(ModelProto, bool)> {
            Ok((model.clone(), true))
        }
    }

    struct Identity;

    impl GraphPass for Identity {
        fn name(&self) -> &'static str {
            "identity"
        }

        fn apply(&self, graph: &Graph, ctx: &PassContext<'_>) -> OnnxResult<Graph> {
            ctx.shapes.infer(graph, &ShapeQuery::new())?;
            Ok(graph.clone())
        }
    }

    #[test]
    fn test_identity_pass() {
        let proto = GraphProto {
            node: vec![make_node("Relu", &["X"], &["Y"], "relu_0")],
            input: vec![make_tensor_value_info("X", 1, &[1])],
            output: vec![make_tensor_value_info("Y", 1, &[1])],
            ..Default::default()
        };
        let graph = Graph::from_graph_proto(proto, 13).unwrap();
        let ctx = PassContext::new(&NoShapes, &KeepModel);

        let result = Identity.apply(&graph, &ctx).unwrap();
        assert_eq!(result.to_model(), graph.to_model());
        assert_eq!(Identity.name(), "identity");
    }
}
