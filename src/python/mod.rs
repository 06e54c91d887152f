//! Python bindings for onnx-modifier using PyO3
//!
//! Exposes the pass pipeline to a Python host. Shape queries are answered by
//! a Python callable, typically a thin wrapper around onnxruntime.
//!
//! # Usage from Python
//!
//! ```python
//! import numpy as np
//! import onnxruntime as ort
//! import onnx_modifier
//!
//! def infer(model_bytes, fetches, feeds):
//!     sess = ort.InferenceSession(model_bytes)
//!     inputs = {
//!         name: np.array(values, dtype=np.float32).reshape(dims)
//!         for name, (dims, values) in feeds.items()
//!     }
//!     return [list(o.shape) for o in sess.run(fetches, inputs)]
//!
//! model = open("model.onnx", "rb").read()
//! result, steps = onnx_modifier.modify(
//!     model, onnx_modifier.default_sequence(), infer=infer, save_intermediate=True
//! )
//! ```

use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyBytes, PyDict, PyList};
use std::collections::HashMap;

use crate::error::{OnnxResult, TransformError};
use crate::io::{import, model_to_bytes, StructuralChecker};
use crate::oracle::{ExecutionBackend, Feed, ShapeOracle, Unavailable};
use crate::pipeline::{PassId, Pipeline, PipelineConfig};
use crate::proto::ModelProto;
use crate::simplifier::DeadCodeSimplifier;

// ============================================================================
// Shape backend
// ============================================================================

/// Execution backend that defers to a Python callable
///
/// The callable receives `(model_bytes, fetch_names, feeds)`, where `feeds`
/// maps every input name to `(dims, flat_values)`, and returns one shape per
/// fetch name.
pub struct PyCallableBackend {
    callable: PyObject,
}

impl PyCallableBackend {
    /// Wrap a Python callable
    pub fn new(callable: PyObject) -> Self {
        Self { callable }
    }
}

impl ExecutionBackend for PyCallableBackend {
    fn execute(
        &self,
        model: &ModelProto,
        feeds: &[Feed],
        fetches: &[String],
    ) -> OnnxResult<Vec<Vec<i64>>> {
        Python::with_gil(|py| {
            let call = || -> PyResult<Vec<Vec<i64>>> {
                let model_bytes = PyBytes::new_bound(py, &model_to_bytes(model));
                let names = PyList::new_bound(py, fetches);
                let inputs = PyDict::new_bound(py);
                for feed in feeds {
                    inputs.set_item(&feed.name, (feed.dims.clone(), feed.flat_values()))?;
                }
                self.callable
                    .call1(py, (model_bytes, names, inputs))?
                    .extract::<Vec<Vec<i64>>>(py)
            };
            call().map_err(|e| {
                TransformError::ShapeInferenceFailed(format!("python shape callback: {}", e))
            })
        })
    }
}

// ============================================================================
// Error mapping
// ============================================================================

/// Whether an error is about the model itself rather than the run
fn is_value_error(err: &TransformError) -> bool {
    matches!(
        err.root(),
        TransformError::Serialization(_)
            | TransformError::ValidationFailed(_)
            | TransformError::InvalidDataType(_)
    )
}

fn to_py_err(err: TransformError) -> PyErr {
    let message = match err.failing_pass() {
        Some(pass) => format!("pass `{}` failed: {}", pass, err.root()),
        None => err.to_string(),
    };
    if is_value_error(&err) {
        PyValueError::new_err(message)
    } else {
        PyRuntimeError::new_err(message)
    }
}

fn resolve_passes(names: &[String]) -> OnnxResult<Vec<PassId>> {
    names.iter().map(|n| n.parse::<PassId>()).collect()
}

// ============================================================================
// Python-exposed functions
// ============================================================================

/// Apply passes to a serialized model.
///
/// Args:
///     model: Serialized ModelProto
///     passes: Pass names, applied in order
///     infer: Shape callback `(model_bytes, fetches, feeds) -> list[list[int]]`
///     save_intermediate: Also return the model after every pass
///     input_shapes: Concrete dims for graph inputs with dynamic dims
///     seed: Seed for the synthetic feeds
///
/// Returns:
///     (result_bytes, [(artifact_name, bytes), ...])
///
/// Raises:
///     ValueError: If the model cannot be parsed or fails validation
///     RuntimeError: If a pass fails
#[pyfunction]
#[pyo3(signature = (model, passes, infer = None, save_intermediate = false, input_shapes = None, seed = 0))]
fn modify(
    py: Python<'_>,
    model: &[u8],
    passes: Vec<String>,
    infer: Option<PyObject>,
    save_intermediate: bool,
    input_shapes: Option<HashMap<String, Vec<i64>>>,
    seed: u64,
) -> PyResult<(PyObject, Vec<(String, PyObject)>)> {
    let config = PipelineConfig::new(resolve_passes(&passes).map_err(to_py_err)?)
        .with_intermediate(save_intermediate);
    let graph = import(model).map_err(to_py_err)?;

    let backend: Box<dyn ExecutionBackend> = match infer {
        Some(callable) => Box::new(PyCallableBackend::new(callable)),
        None => Box::new(Unavailable),
    };
    let oracle = input_shapes
        .unwrap_or_default()
        .into_iter()
        .fold(ShapeOracle::new(backend), |oracle, (name, dims)| {
            oracle.with_input_shape(&name, dims)
        })
        .with_seed(seed);

    let pipeline = Pipeline::new(&oracle, &DeadCodeSimplifier, &StructuralChecker);
    let outcome = pipeline
        .run(&graph, &config, &mut |_| {})
        .map_err(to_py_err)?;

    let result = PyBytes::new_bound(py, &outcome.result.bytes).into_py(py);
    let intermediates = outcome
        .intermediates
        .into_iter()
        .map(|a| (a.name, PyBytes::new_bound(py, &a.bytes).into_py(py)))
        .collect();
    Ok((result, intermediates))
}

/// Names of every registered pass.
#[pyfunction]
fn passes() -> Vec<&'static str> {
    PassId::all().iter().map(|id| id.as_str()).collect()
}

/// Pass names of the full preset, in order.
#[pyfunction]
fn default_sequence() -> Vec<&'static str> {
    PassId::default_sequence()
        .into_iter()
        .map(PassId::as_str)
        .collect()
}

/// Get the version of this library.
#[pyfunction]
fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

// ============================================================================
// Module registration
// ============================================================================

/// Shape-aware ONNX graph rewriting.
#[pymodule]
#[pyo3(name = "onnx_modifier")]
fn onnx_modifier_py(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(modify, m)?)?;
    m.add_function(wrap_pyfunction!(passes, m)?)?;
    m.add_function(wrap_pyfunction!(default_sequence, m)?)?;
    m.add_function(wrap_pyfunction!(version, m)?)?;

    m.add("__version__", env!("CARGO_PKG_VERSION"))?;

    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_passes() {
        let names = vec!["simplify_name".to_string(), "merge_slice".to_string()];
        assert_eq!(
            resolve_passes(&names).unwrap(),
            vec![PassId::SimplifyName, PassId::MergeSlice]
        );
        assert!(resolve_passes(&["fuse_gelu".to_string()]).is_err());
    }

    #[test]
    fn test_error_kinds() {
        assert!(is_value_error(&TransformError::Serialization("x".into())));
        assert!(is_value_error(
            &TransformError::ValidationFailed("x".into()).in_pass("simplify_name")
        ));
        assert!(!is_value_error(
            &TransformError::ShapeInferenceFailed("x".into()).in_pass("merge_slice")
        ));
    }

    #[test]
    fn test_pass_lists() {
        assert_eq!(passes().len(), PassId::all().len());
        assert_eq!(default_sequence().first(), Some(&"replace_input_name"));
    }
}
