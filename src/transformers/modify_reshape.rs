//! Concrete Reshape targets
//!
//! Rewrites the constant shape of every Reshape to the shape the node really
//! produces, with the batch dimension left as `-1`. Targets containing `0` or
//! `-1` placeholders in other positions become explicit.

use log::{debug, warn};

use crate::error::OnnxResult;
use crate::graph::Graph;
use crate::oracle::ShapeQuery;
use crate::tensor::int_tensor_like;
use crate::traits::{GraphPass, PassContext};

use super::common::batch_free_shape;

/// Pin Reshape targets to the inferred output shape
#[derive(Debug, Default, Clone, Copy)]
pub struct ModifyReshape;

struct Candidate {
    node: String,
    output: String,
    shape_input: String,
}

impl GraphPass for ModifyReshape {
    fn name(&self) -> &'static str {
        "modify_reshape"
    }

    fn apply(&self, graph: &Graph, ctx: &PassContext<'_>) -> OnnxResult<Graph> {
        let candidates: Vec<Candidate> = graph
            .nodes_by_op("Reshape")
            .filter_map(|node| {
                let shape_input = node.input_at(1).filter(|s| graph.is_initializer(s))?;
                let output = node.output.first().filter(|o| !o.is_empty())?;
                if node.name().is_empty() {
                    warn!("skipping unnamed Reshape producing '{}'", output);
                    return None;
                }
                Some(Candidate {
                    node: node.name().to_string(),
                    output: output.clone(),
                    shape_input: shape_input.to_string(),
                })
            })
            .collect();

        let mut result = graph.clone();
        if candidates.is_empty() {
            return Ok(result);
        }

        let query = candidates
            .iter()
            .fold(ShapeQuery::new(), |q, c| q.tensor(&c.output));
        let shapes = ctx.shapes.infer(graph, &query)?;

        for c in &candidates {
            let target = batch_free_shape(shapes.get(&c.output)?);
            let template = graph.find_initializer_by_name(&c.shape_input)?;
            let wanted = format!("{}_shape", c.node);

            // `<node>_shape` is rewritten in place only while this node is its sole reader
            let sole_reader = result.consumer_count(&c.shape_input) == 1
                && !result.is_graph_input(&c.shape_input)
                && !result.is_graph_output(&c.shape_input);
            if wanted == c.shape_input && sole_reader {
                result.replace_initializer(&c.shape_input, int_tensor_like(&target, &wanted, template))?;
                continue;
            }

            let name = result.unique_tensor_name(&wanted);
            result.add_initializer(int_tensor_like(&target, &name, template))?;
            result.update_node(&c.node, |n| n.input[1] = name.clone())?;
            debug!("'{}' now reshapes to {:?} via '{}'", c.node, target, name);
        }

        result.prune_initializers(candidates.iter().map(|c| c.shape_input.as_str()));
        result.rebuild()?;
        Ok(result)
    }
}
