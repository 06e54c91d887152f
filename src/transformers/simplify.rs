//! Topology simplification through the simplifier collaborator

use crate::error::{OnnxResult, TransformError};
use crate::graph::Graph;
use crate::traits::{GraphPass, PassContext};

/// Hand the model to the configured [`Simplifier`](crate::traits::Simplifier)
#[derive(Debug, Default, Clone, Copy)]
pub struct Simplify;

impl GraphPass for Simplify {
    fn name(&self) -> &'static str {
        "simplify"
    }

    fn apply(&self, graph: &Graph, ctx: &PassContext<'_>) -> OnnxResult<Graph> {
        let (model, success) = ctx.simplifier.simplify(&graph.to_model())?;
        if !success {
            return Err(TransformError::SimplificationFailed(
                "simplifier reported failure".to_string(),
            ));
        }
        Graph::from_model(model)
    }
}
