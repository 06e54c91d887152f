//! Explicit Reshape behind rank-4 MatMuls
//!
//! Appends `Reshape(<out>_reshape, [-1, d1, d2, d3])` behind each MatMul whose
//! output is rank 4. The reshape is shape-preserving; it pins a dynamic batch
//! dim for runtimes that expect it.

use log::debug;

use crate::error::OnnxResult;
use crate::graph::Graph;
use crate::oracle::ShapeQuery;
use crate::proto::extensions::make_node;
use crate::tensor::vec_to_tensor_i64;
use crate::traits::{GraphPass, PassContext};

use super::common::batch_free_shape;

const MATMUL_RANK: usize = 4;

/// Append a batch-free Reshape behind rank-4 MatMuls
#[derive(Debug, Default, Clone, Copy)]
pub struct AddReshapeAfterMatmul;

impl GraphPass for AddReshapeAfterMatmul {
    fn name(&self) -> &'static str {
        "add_reshape_after_matmul"
    }

    fn apply(&self, graph: &Graph, ctx: &PassContext<'_>) -> OnnxResult<Graph> {
        let mut result = graph.clone();
        if graph.nodes_by_op("MatMul").next().is_none() {
            return Ok(result);
        }

        let shapes = ctx.shapes.infer(graph, &ShapeQuery::new().op_type("MatMul"))?;

        let outputs: Vec<&str> = graph
            .nodes_by_op("MatMul")
            .filter_map(|n| n.output.first())
            .map(String::as_str)
            .filter(|o| !o.is_empty())
            .collect();

        for output in outputs {
            let dims = shapes.get(output)?;
            if dims.len() != MATMUL_RANK {
                continue;
            }

            let temp = result.unique_tensor_name(&format!("{}_reshape", output));
            result.update_producer(output, |n| n.output[0] = temp.clone())?;

            let target = batch_free_shape(dims);
            let param = result.unique_tensor_name(&format!("{}_reshape_param", output));
            result.add_initializer(vec_to_tensor_i64(&target, &param))?;
            let node_name = result.unique_node_name(&temp);
            result.append_node(make_node(
                "Reshape",
                &[temp.as_str(), param.as_str()],
                &[output],
                &node_name,
            ));
            debug!("add_reshape_after_matmul: '{}' -> {:?}", output, target);
        }

        result.rebuild()?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{ShapeOracle, StaticShapes};
    use crate::proto::extensions::make_tensor_value_info;
    use crate::proto::GraphProto;
    use crate::simplifier::DeadCodeSimplifier;
    use crate::tensor::{tensor_to_vec_i64, vec_to_tensor_f32};

    fn make_test_graph(x_shape: &[i64], w_len: usize) -> Graph {
        let proto = GraphProto {
            node: vec![
                make_node("MatMul", &["X", "W"], &["mm"], "matmul_0"),
                make_node("Relu", &["mm"], &["Y"], "relu_0"),
            ],
            input: vec![make_tensor_value_info("X", 1, x_shape)],
            output: vec![make_tensor_value_info("Y", 1, &[])],
            initializer: vec![vec_to_tensor_f32(&vec![0.5; w_len], "W")],
            ..Default::default()
        };
        Graph::from_graph_proto(proto, 13).unwrap()
    }

    fn run(graph: &Graph, backend: StaticShapes) -> Graph {
        let oracle = ShapeOracle::new(backend);
        AddReshapeAfterMatmul
            .apply(graph, &PassContext::new(&oracle, &DeadCodeSimplifier))
            .unwrap()
    }

    #[test]
    fn test_reshape_after_rank4_matmul() {
        let graph = make_test_graph(&[1, 12, 64, 64], 64 * 64);
        let result = run(&graph, StaticShapes::new().with_shape("mm", &[1, 12, 64, 64]));

        let matmul = result.find_node_by_name("matmul_0").unwrap();
        assert_eq!(matmul.output, vec!["mm_reshape"]);

        let reshape = result.find_node_by_name("mm_reshape").unwrap();
        assert_eq!(reshape.input, vec!["mm_reshape", "mm_reshape_param"]);
        assert_eq!(reshape.output, vec!["mm"]);
        let param = result.find_initializer_by_name("mm_reshape_param").unwrap();
        assert_eq!(tensor_to_vec_i64(param).unwrap(), vec![-1, 12, 64, 64]);

        // the Reshape is sorted between MatMul and its reader
        let order: Vec<&str> = result.nodes().iter().map(|n| n.name()).collect();
        assert_eq!(order, vec!["matmul_0", "mm_reshape", "relu_0"]);
    }

    #[test]
    fn test_other_ranks_untouched() {
        let graph = make_test_graph(&[8, 16], 16 * 4);
        let result = run(&graph, StaticShapes::new().with_shape("mm", &[8, 4]));
        assert_eq!(result.to_model(), graph.to_model());
    }
}
