//! Shape oracle
//!
//! Passes that need concrete tensor shapes ask a [`ShapeInference`]
//! implementation once per invocation. [`ShapeOracle`] answers such a query
//! by running the model on synthetic inputs through an
//! [`ExecutionBackend`], after exposing every wanted tensor as a graph output.
//!
//! # Example
//!
//! ```ignore
//! use onnx_modifier::oracle::{ShapeOracle, ShapeQuery, StaticShapes};
//!
//! let oracle = ShapeOracle::new(StaticShapes::from_json(&table)?)
//!     .with_input_shape("input", vec![1, 3, 224, 224]);
//!
//! let shapes = oracle.infer(&graph, &ShapeQuery::new().op_type("Reshape"))?;
//! let dims = shapes.get("reshape_0_out")?;
//! ```

pub mod backend;
pub mod feeds;

use indexmap::{IndexMap, IndexSet};
use log::debug;
use rustc_hash::FxHashMap;

use crate::error::{OnnxResult, TransformError};
use crate::graph::Graph;
use crate::proto::ValueInfoProto;
use crate::traits::ShapeInference;

pub use backend::{ExecutionBackend, StaticShapes, Unavailable};
pub use feeds::{Feed, FeedData};

// ============================================================================
// Query and answer
// ============================================================================

/// Which tensors a pass needs shapes for
///
/// A node is selected when its op type is in `op_types` or its name is in
/// `node_names`; its first output is queried. `tensors` are queried as is.
#[derive(Debug, Clone, Default)]
pub struct ShapeQuery {
    pub op_types: Vec<String>,
    pub node_names: Vec<String>,
    pub tensors: Vec<String>,
}

impl ShapeQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select nodes by op type
    pub fn op_type(mut self, op_type: &str) -> Self {
        self.op_types.push(op_type.to_string());
        self
    }

    /// Select a node by name
    pub fn node(mut self, name: &str) -> Self {
        self.node_names.push(name.to_string());
        self
    }

    /// Select a tensor by name
    pub fn tensor(mut self, name: &str) -> Self {
        self.tensors.push(name.to_string());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.op_types.is_empty() && self.node_names.is_empty() && self.tensors.is_empty()
    }

    /// Tensor names this query asks for, in graph order then explicit order
    pub fn resolve(&self, graph: &Graph) -> IndexSet<String> {
        let mut wanted: IndexSet<String> = graph
            .nodes()
            .iter()
            .filter(|n| {
                self.op_types.iter().any(|op| op == n.op_type())
                    || self.node_names.iter().any(|name| name == n.name())
            })
            .filter_map(|n| n.output.first())
            .filter(|out| !out.is_empty())
            .cloned()
            .collect();

        wanted.extend(self.tensors.iter().cloned());
        wanted
    }
}

/// Tensor name → dimensions, produced fresh by each oracle call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShapeMap {
    shapes: IndexMap<String, Vec<i64>>,
}

impl ShapeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shape of `tensor`; a tensor the oracle did not report is an error
    pub fn get(&self, tensor: &str) -> OnnxResult<&[i64]> {
        self.shapes
            .get(tensor)
            .map(Vec::as_slice)
            .ok_or_else(|| {
                TransformError::ShapeInferenceFailed(format!("no shape inferred for '{}'", tensor))
            })
    }

    /// Rank of `tensor`
    pub fn rank(&self, tensor: &str) -> OnnxResult<usize> {
        self.get(tensor).map(<[i64]>::len)
    }

    pub fn insert(&mut self, tensor: impl Into<String>, dims: Vec<i64>) {
        self.shapes.insert(tensor.into(), dims);
    }

    pub fn contains(&self, tensor: &str) -> bool {
        self.shapes.contains_key(tensor)
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[i64])> {
        self.shapes.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

impl FromIterator<(String, Vec<i64>)> for ShapeMap {
    fn from_iter<I: IntoIterator<Item = (String, Vec<i64>)>>(iter: I) -> Self {
        Self {
            shapes: iter.into_iter().collect(),
        }
    }
}

// ============================================================================
// ShapeOracle
// ============================================================================

/// [`ShapeInference`] backed by one execution of the model
#[derive(Debug, Clone)]
pub struct ShapeOracle<B> {
    backend: B,
    input_shapes: FxHashMap<String, Vec<i64>>,
    seed: u64,
}

impl<B: ExecutionBackend> ShapeOracle<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            input_shapes: FxHashMap::default(),
            seed: 0,
        }
    }

    /// Feed `name` with this shape instead of its declared one
    pub fn with_input_shape(mut self, name: &str, dims: Vec<i64>) -> Self {
        self.input_shapes.insert(name.to_string(), dims);
        self
    }

    /// Seed for the synthetic float inputs
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: ExecutionBackend> ShapeInference for ShapeOracle<B> {
    fn infer(&self, graph: &Graph, query: &ShapeQuery) -> OnnxResult<ShapeMap> {
        let mut shapes = ShapeMap::new();
        let mut fetches = Vec::new();

        for name in query.resolve(graph) {
            if let Some(init) = graph.get_initializer(&name) {
                shapes.insert(name, init.dims.clone());
            } else if let Some(input) = graph.inputs().iter().find(|vi| vi.name() == name) {
                let dims = feeds::resolve_input_dims(input, &self.input_shapes)?;
                shapes.insert(name, dims);
            } else {
                fetches.push(name);
            }
        }

        if fetches.is_empty() {
            return Ok(shapes);
        }

        let mut model = graph.to_model();
        if let Some(proto) = model.graph.as_mut() {
            for name in &fetches {
                if !proto.output.iter().any(|vi| vi.name() == name) {
                    proto.output.push(ValueInfoProto {
                        name: Some(name.clone()),
                        ..Default::default()
                    });
                }
            }
        }

        let feeds = feeds::synthesize_feeds(graph, &self.input_shapes, self.seed)?;
        debug!(
            "shape oracle: executing with {} feeds for {} tensors",
            feeds.len(),
            fetches.len()
        );

        let results = self
            .backend
            .execute(&model, &feeds, &fetches)
            .map_err(|e| match e {
                TransformError::ShapeInferenceFailed(_) => e,
                other => TransformError::ShapeInferenceFailed(other.to_string()),
            })?;

        if results.len() != fetches.len() {
            return Err(TransformError::ShapeInferenceFailed(format!(
                "backend returned {} shapes for {} requested tensors",
                results.len(),
                fetches.len()
            )));
        }

        for (name, dims) in fetches.into_iter().zip(results) {
            shapes.insert(name, dims);
        }

        Ok(shapes)
    }
}
