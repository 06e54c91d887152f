//! Synthetic input feeds for the execution backend

use ndarray::{ArrayD, IxDyn};
use rand::prelude::*;
use rustc_hash::FxHashMap;

use crate::error::{OnnxResult, TransformError};
use crate::graph::Graph;
use crate::proto::ValueInfoProto;
use crate::tensor::{i32_to_dtype, is_float_type};

/// Values bound to one graph input
#[derive(Debug, Clone, PartialEq)]
pub enum FeedData {
    /// Uniform samples in `[0, 1)` for floating inputs
    Float(ArrayD<f32>),
    /// Zeros for integer and boolean inputs
    Int64(ArrayD<i64>),
}

/// One synthetic graph input
#[derive(Debug, Clone, PartialEq)]
pub struct Feed {
    /// Graph input name
    pub name: String,
    /// Declared ONNX element type
    pub elem_type: i32,
    /// Concrete shape the data was generated with
    pub dims: Vec<i64>,
    /// Generated values
    pub data: FeedData,
}

impl Feed {
    /// Flat values widened to f64, row-major
    pub fn flat_values(&self) -> Vec<f64> {
        match &self.data {
            FeedData::Float(a) => a.iter().map(|&v| v as f64).collect(),
            FeedData::Int64(a) => a.iter().map(|&v| v as f64).collect(),
        }
    }
}

/// Concrete shape for a graph input
///
/// An override wins over the declared shape. A declared dimension that is
/// symbolic or not positive cannot be fed.
pub fn resolve_input_dims(
    input: &ValueInfoProto,
    overrides: &FxHashMap<String, Vec<i64>>,
) -> OnnxResult<Vec<i64>> {
    if let Some(dims) = overrides.get(input.name()) {
        return Ok(dims.clone());
    }

    let dims = input.get_shape().ok_or_else(|| {
        TransformError::ShapeInferenceFailed(format!(
            "graph input '{}' has no declared tensor shape",
            input.name()
        ))
    })?;

    if let Some(pos) = dims.iter().position(|&d| d <= 0) {
        return Err(TransformError::ShapeInferenceFailed(format!(
            "graph input '{}' has a dynamic dimension at axis {}; set a concrete input shape",
            input.name(), pos
        )));
    }

    Ok(dims)
}

/// Generate one feed per graph input that is not an initializer
pub fn synthesize_feeds(
    graph: &Graph,
    overrides: &FxHashMap<String, Vec<i64>>,
    seed: u64,
) -> OnnxResult<Vec<Feed>> {
    let mut rng = StdRng::seed_from_u64(seed);

    graph
        .inputs()
        .iter()
        .filter(|input| !graph.is_initializer(input.name()))
        .map(|input| {
            let dims = resolve_input_dims(input, overrides)?;
            let elem_type = input.get_elem_type().unwrap_or(0);
            let shape: Vec<usize> = dims.iter().map(|&d| d.max(0) as usize).collect();

            let floating = i32_to_dtype(elem_type)
                .map(is_float_type)
                .unwrap_or(false);
            let data = if floating {
                FeedData::Float(ArrayD::from_shape_simple_fn(IxDyn(&shape), || {
                    rng.gen::<f32>()
                }))
            } else {
                FeedData::Int64(ArrayD::zeros(IxDyn(&shape)))
            };

            Ok(Feed {
                name: input.name().to_string(),
                elem_type,
                dims,
                data,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::extensions::{make_node, make_tensor_value_info};
    use crate::proto::GraphProto;

    fn make_test_graph(x_shape: &[i64]) -> Graph {
        let proto = GraphProto {
            node: vec![make_node("Gather", &["X", "idx"], &["Y"], "gather_0")],
            input: vec![
                make_tensor_value_info("X", 1, x_shape),
                make_tensor_value_info("idx", 7, &[2]),
            ],
            output: vec![make_tensor_value_info("Y", 1, &[])],
            ..Default::default()
        };
        Graph::from_graph_proto(proto, 13).unwrap()
    }

    #[test]
    fn test_feeds_follow_dtype() {
        let graph = make_test_graph(&[2, 3]);
        let feeds = synthesize_feeds(&graph, &FxHashMap::default(), 0).unwrap();

        assert_eq!(feeds.len(), 2);
        match &feeds[0].data {
            FeedData::Float(a) => {
                assert_eq!(a.shape(), &[2, 3]);
                assert!(a.iter().all(|&v| (0.0..1.0).contains(&v)));
            }
            other => panic!("unexpected feed {:?}", other),
        }
        assert_eq!(feeds[1].data, FeedData::Int64(ArrayD::zeros(IxDyn(&[2]))));
    }

    #[test]
    fn test_feeds_are_seeded() {
        let graph = make_test_graph(&[4]);
        let a = synthesize_feeds(&graph, &FxHashMap::default(), 7).unwrap();
        let b = synthesize_feeds(&graph, &FxHashMap::default(), 7).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_dynamic_input_needs_override() {
        let graph = make_test_graph(&[-1, 3]);
        assert!(matches!(
            synthesize_feeds(&graph, &FxHashMap::default(), 0),
            Err(TransformError::ShapeInferenceFailed(_))
        ));

        let mut overrides = FxHashMap::default();
        overrides.insert("X".to_string(), vec![1, 3]);
        let feeds = synthesize_feeds(&graph, &overrides, 0).unwrap();
        assert_eq!(feeds[0].dims, vec![1, 3]);
    }
}
