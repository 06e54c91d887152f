//! Non-negative ReduceMean axes
//!
//! Rewrites every negative reduction axis `a` to `rank + a`, where `rank` is
//! the rank of the reduced input. Axes are read from the `axes` attribute, or
//! from a constant `axes` input from opset 18 on.

use log::{debug, warn};

use crate::error::OnnxResult;
use crate::graph::Graph;
use crate::oracle::ShapeQuery;
use crate::tensor::{int_tensor_like, normalize_axis};
use crate::traits::{GraphPass, PassContext};

use super::common::{get_attr_ints, get_constant_ints, get_constant_tensor, set_attr_ints};

/// Opset from which ReduceMean takes `axes` as an input
const AXES_AS_INPUT_OPSET: i64 = 18;

/// Rewrite negative ReduceMean axes
#[derive(Debug, Default, Clone, Copy)]
pub struct ResolveReduceMeanAxis;

enum AxesSource {
    Attribute,
    Input(String),
}

struct Candidate {
    node: String,
    data: String,
    axes: Vec<i64>,
    source: AxesSource,
}

fn find_candidates(graph: &Graph) -> OnnxResult<Vec<Candidate>> {
    let axes_as_input = graph
        .opset_version()
        .is_some_and(|v| v >= AXES_AS_INPUT_OPSET);
    let mut candidates = Vec::new();

    for node in graph.nodes_by_op("ReduceMean") {
        let Some(data) = node.input_at(0) else {
            continue;
        };

        let (axes, source) = match get_attr_ints(node, "axes") {
            Some(axes) => (axes.to_vec(), AxesSource::Attribute),
            None => match node.input_at(1) {
                Some(name) if axes_as_input => match get_constant_ints(graph, name)? {
                    Some(axes) => (axes, AxesSource::Input(name.to_string())),
                    None => continue,
                },
                _ => continue,
            },
        };

        if axes.iter().all(|&a| a >= 0) {
            continue;
        }
        if node.name().is_empty() {
            warn!("skipping unnamed ReduceMean over '{}'", data);
            continue;
        }

        candidates.push(Candidate {
            node: node.name().to_string(),
            data: data.to_string(),
            axes,
            source,
        });
    }

    Ok(candidates)
}

impl GraphPass for ResolveReduceMeanAxis {
    fn name(&self) -> &'static str {
        "resolve_reduce_mean_axis"
    }

    fn apply(&self, graph: &Graph, ctx: &PassContext<'_>) -> OnnxResult<Graph> {
        let candidates = find_candidates(graph)?;
        let mut result = graph.clone();
        if candidates.is_empty() {
            return Ok(result);
        }

        let query = candidates
            .iter()
            .fold(ShapeQuery::new(), |q, c| q.tensor(&c.data));
        let shapes = ctx.shapes.infer(graph, &query)?;

        let mut replaced_inputs = Vec::new();
        for c in &candidates {
            let rank = shapes.rank(&c.data)?;
            let axes = c
                .axes
                .iter()
                .map(|&a| {
                    if a < 0 {
                        normalize_axis(a, rank).map(|n| n as i64)
                    } else {
                        Ok(a)
                    }
                })
                .collect::<OnnxResult<Vec<i64>>>()?;
            debug!("'{}': axes {:?} -> {:?}", c.node, c.axes, axes);

            match &c.source {
                AxesSource::Attribute => {
                    result.update_node(&c.node, |n| set_attr_ints(n, "axes", axes))?;
                }
                AxesSource::Input(old) => {
                    // the lookup succeeded while collecting candidates
                    let Some(template) = get_constant_tensor(graph, old) else {
                        continue;
                    };
                    let name = result.unique_tensor_name(&format!("{}_axes", c.node));
                    result.add_initializer(int_tensor_like(&axes, &name, template))?;
                    result.update_node(&c.node, |n| n.input[1] = name.clone())?;
                    replaced_inputs.push(old.clone());
                }
            }
        }

        result.prune_initializers(&replaced_inputs);
        result.rebuild()?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransformError;
    use crate::oracle::{ShapeOracle, StaticShapes, Unavailable};
    use crate::proto::extensions::{make_node, make_tensor_value_info};
    use crate::proto::{AttributeProto, GraphProto, NodeProto};
    use crate::simplifier::DeadCodeSimplifier;
    use crate::tensor::{tensor_to_vec_i64, vec_to_tensor_i64};

    fn reduce_mean(axes: &[i64]) -> NodeProto {
        let mut node = make_node("ReduceMean", &["X"], &["Y"], "reduce_0");
        node.attribute.push(AttributeProto::new_ints("axes", axes.to_vec()));
        node
    }

    fn make_test_graph(node: NodeProto) -> Graph {
        let proto = GraphProto {
            node: vec![node],
            input: vec![make_tensor_value_info("X", 1, &[1, 8, 16])],
            output: vec![make_tensor_value_info("Y", 1, &[1, 8, 1])],
            ..Default::default()
        };
        Graph::from_graph_proto(proto, 13).unwrap()
    }

    fn run(graph: &Graph) -> OnnxResult<Graph> {
        // X is a graph input, so its rank comes from the declared shape
        let oracle = ShapeOracle::new(Unavailable);
        ResolveReduceMeanAxis.apply(graph, &PassContext::new(&oracle, &DeadCodeSimplifier))
    }

    fn axes_of(graph: &Graph) -> Vec<i64> {
        let node = graph.find_node_by_name("reduce_0").unwrap();
        get_attr_ints(node, "axes").unwrap().to_vec()
    }

    #[test]
    fn test_negative_axis() {
        let result = run(&make_test_graph(reduce_mean(&[-1]))).unwrap();
        assert_eq!(axes_of(&result), vec![2]);
    }

    #[test]
    fn test_mixed_axes() {
        let result = run(&make_test_graph(reduce_mean(&[0, -2]))).unwrap();
        assert_eq!(axes_of(&result), vec![0, 1]);
    }

    #[test]
    fn test_idempotent() {
        let once = run(&make_test_graph(reduce_mean(&[-1]))).unwrap();
        let twice = run(&once).unwrap();
        assert_eq!(axes_of(&twice), vec![2]);
        assert_eq!(once.to_model(), twice.to_model());
    }

    #[test]
    fn test_out_of_range() {
        assert!(matches!(
            run(&make_test_graph(reduce_mean(&[-4]))),
            Err(TransformError::UnsupportedPattern(_))
        ));
    }

    #[test]
    fn test_axes_input() {
        let proto = GraphProto {
            node: vec![
                make_node("Relu", &["X"], &["act"], "relu_0"),
                make_node("ReduceMean", &["act", "axes"], &["Y"], "reduce_0"),
            ],
            input: vec![make_tensor_value_info("X", 1, &[1, 8, 16])],
            output: vec![make_tensor_value_info("Y", 1, &[1, 8, 1])],
            initializer: vec![vec_to_tensor_i64(&[-1], "axes")],
            ..Default::default()
        };
        let graph = Graph::from_graph_proto(proto, 18).unwrap();

        let oracle = ShapeOracle::new(StaticShapes::new().with_shape("act", &[1, 8, 16]));
        let result = ResolveReduceMeanAxis
            .apply(&graph, &PassContext::new(&oracle, &DeadCodeSimplifier))
            .unwrap();

        let node = result.find_node_by_name("reduce_0").unwrap();
        assert_eq!(node.input[1], "reduce_0_axes");
        let axes = result.find_initializer_by_name("reduce_0_axes").unwrap();
        assert_eq!(tensor_to_vec_i64(axes).unwrap(), vec![2]);
        assert!(!result.is_initializer("axes"));
    }
}
