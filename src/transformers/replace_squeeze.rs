//! Squeeze / Unsqueeze to Reshape
//!
//! Each node becomes a `Reshape` with the same name and output, so consumers
//! are untouched.

use log::{debug, warn};

use crate::error::OnnxResult;
use crate::graph::Graph;
use crate::oracle::ShapeQuery;
use crate::proto::extensions::make_node;
use crate::tensor::vec_to_tensor_i64;
use crate::traits::{GraphPass, PassContext};

use super::common::batch_free_shape;

const SQUEEZE_OPS: &[&str] = &["Squeeze", "Unsqueeze"];

/// Replace Squeeze and Unsqueeze with an equivalent Reshape
#[derive(Debug, Default, Clone, Copy)]
pub struct ReplaceSqueezeAndUnsqueeze;

impl GraphPass for ReplaceSqueezeAndUnsqueeze {
    fn name(&self) -> &'static str {
        "replace_squeeze_and_unsqueeze"
    }

    fn apply(&self, graph: &Graph, ctx: &PassContext<'_>) -> OnnxResult<Graph> {
        let targets: Vec<_> = graph
            .nodes()
            .iter()
            .filter(|n| n.is_op_type_in(SQUEEZE_OPS))
            .filter(|n| {
                if n.name().is_empty() {
                    warn!("skipping unnamed {} producing {:?}", n.op_type(), n.output);
                }
                !n.name().is_empty() && n.input_at(0).is_some() && n.output.len() == 1
            })
            .cloned()
            .collect();

        let mut result = graph.clone();
        if targets.is_empty() {
            return Ok(result);
        }

        let query = targets
            .iter()
            .fold(ShapeQuery::new(), |q, n| q.tensor(&n.output[0]));
        let shapes = ctx.shapes.infer(graph, &query)?;

        let mut stale = Vec::new();
        for node in &targets {
            let shape = batch_free_shape(shapes.get(&node.output[0])?);
            let param = result.unique_tensor_name(&format!("{}_reshape_param", node.name()));
            result.add_initializer(vec_to_tensor_i64(&shape, &param))?;

            let reshape = make_node(
                "Reshape",
                &[node.input[0].as_str(), param.as_str()],
                &[node.output[0].as_str()],
                node.name(),
            );
            result.replace_node(reshape)?;
            debug!("{} '{}' -> Reshape {:?}", node.op_type(), node.name(), shape);

            stale.extend(node.input.iter().skip(1).cloned());
        }

        result.prune_initializers(&stale);
        result.rebuild()?;
        Ok(result)
    }
}
