//! Rank-4 graph outputs
//!
//! Pads every graph output below rank 4 with singleton dims right after the
//! batch dim, e.g. `[N, C]` becomes `[N, 1, 1, C]`. The producer writes a
//! fresh internal tensor and a trailing Reshape restores the output name.

use log::{debug, warn};

use crate::error::{OnnxResult, TransformError};
use crate::graph::Graph;
use crate::oracle::ShapeQuery;
use crate::proto::extensions::{dim_value, make_node};
use crate::tensor::vec_to_tensor_i64;
use crate::traits::{GraphPass, PassContext};

use super::common::batch_free_shape;

/// Rank every graph output is padded to
pub const TARGET_RANK: usize = 4;

/// Pad graph outputs below rank 4
#[derive(Debug, Default, Clone, Copy)]
pub struct ReshapeOutput;

/// `dims` padded to [`TARGET_RANK`] with 1s after the batch dim
pub fn pad_to_rank4(dims: &[i64]) -> Vec<i64> {
    let Some((&batch, rest)) = dims.split_first() else {
        return Vec::new();
    };
    let fill = TARGET_RANK.saturating_sub(dims.len());
    std::iter::once(batch)
        .chain(std::iter::repeat(1).take(fill))
        .chain(rest.iter().copied())
        .collect()
}

impl GraphPass for ReshapeOutput {
    fn name(&self) -> &'static str {
        "reshape_output"
    }

    fn apply(&self, graph: &Graph, ctx: &PassContext<'_>) -> OnnxResult<Graph> {
        let mut result = graph.clone();
        if graph.outputs().is_empty() {
            return Ok(result);
        }

        let query = graph
            .outputs()
            .iter()
            .fold(ShapeQuery::new(), |q, vi| q.tensor(vi.name()));
        let shapes = ctx.shapes.infer(graph, &query)?;

        for output in graph.outputs() {
            let name = output.name();
            let dims = shapes.get(name)?;
            if dims.len() >= TARGET_RANK {
                continue;
            }
            if dims.is_empty() {
                warn!("reshape_output: '{}' is a scalar, left as is", name);
                continue;
            }

            let producer = graph.producer_of(name).ok_or_else(|| {
                TransformError::UnsupportedPattern(format!(
                    "graph output '{}' has no producing node",
                    name
                ))
            })?;
            let base = if producer.name().is_empty() { name } else { producer.name() };
            let internal = result.unique_tensor_name(&format!("{}_output", base));

            result.update_producer(name, |n| {
                for out in n.output.iter_mut().filter(|o| o.as_str() == name) {
                    *out = internal.clone();
                }
            })?;
            result.redirect_consumers(name, &internal, None);

            let padded = pad_to_rank4(dims);
            let target = batch_free_shape(&padded);
            let param = result.unique_tensor_name(&format!("{}_reshape_param", name));
            result.add_initializer(vec_to_tensor_i64(&target, &param))?;
            let node_name = result.unique_node_name(&format!("{}_reshape", name));
            result.append_node(make_node(
                "Reshape",
                &[internal.as_str(), param.as_str()],
                &[name],
                &node_name,
            ));

            // a symbolic batch dim stays symbolic
            let batch = output
                .get_dims()
                .and_then(|d| d.first())
                .filter(|d| d.value.is_some())
                .cloned()
                .unwrap_or_else(|| dim_value(padded[0]));
            let declared = std::iter::once(batch)
                .chain(padded[1..].iter().map(|&d| dim_value(d)))
                .collect();
            result.set_output_shape(name, declared)?;
            result.remove_value_info(name);

            debug!("reshape_output: '{}' {:?} -> {:?}", name, dims, padded);
        }

        result.rebuild()?;
        Ok(result)
    }
}
