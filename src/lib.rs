//! # ONNX Modifier
//!
//! Graph-rewrite passes that normalize exported ONNX models for deployment
//! toolchains with strict input expectations.
//!
//! This crate provides a fixed catalogue of passes over an in-memory ONNX
//! graph, a shape oracle that answers tensor-shape queries by executing the
//! model on synthetic inputs, and a sequential pipeline that runs a
//! configured list of passes and validates the result.
//!
//! ## Features
//!
//! - **Naming**: canonical `input`/`output` names, scoped-name cleanup
//! - **Fusion**: fold BatchNormalization into the preceding Conv
//! - **Shape normalization**: concrete Reshape targets, Squeeze/Unsqueeze to
//!   Reshape, non-negative ReduceMean axes, Slice groups to Split, rank-4
//!   outputs
//! - **Pipeline**: fail-fast sequencing, intermediate artifacts, final check
//!
//! ## Example
//!
//! ```ignore
//! use onnx_modifier::prelude::*;
//!
//! let graph = load_graph("model.onnx")?;
//! let oracle = ShapeOracle::new(StaticShapes::from_json(&shapes)?);
//! let pipeline = Pipeline::new(&oracle, &DeadCodeSimplifier, &StructuralChecker);
//! let outcome = pipeline.run(&graph, &PipelineConfig::default(), &mut |_| {})?;
//! save_graph(&outcome.graph, "model_result.onnx")?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

// ============================================================================
// Module declarations
// ============================================================================

pub mod error;
pub mod graph;
pub mod io;
pub mod oracle;
pub mod pipeline;
pub mod proto;
pub mod simplifier;
pub mod tensor;
pub mod traits;
pub mod transformers;

// Python bindings (only with python feature)
#[cfg(feature = "python")]
pub mod python;

// ============================================================================
// Prelude module for convenient imports
// ============================================================================

/// Prelude module - import commonly used types with `use onnx_modifier::prelude::*`
pub mod prelude {
    pub use crate::error::{OnnxResult, TransformError};
    pub use crate::graph::Graph;
    pub use crate::io::{export, import, load_graph, save_graph, StructuralChecker};
    pub use crate::oracle::{ExecutionBackend, ShapeOracle, ShapeQuery, StaticShapes, Unavailable};
    pub use crate::pipeline::{Pipeline, PipelineConfig, PipelineEvent, PipelineOutcome};
    pub use crate::proto::onnx::*;
    pub use crate::simplifier::DeadCodeSimplifier;
    pub use crate::traits::{GraphPass, ModelChecker, PassContext, ShapeInference, Simplifier};
    pub use crate::transformers::{lookup, PassId};
}

// ============================================================================
// Crate-level re-exports
// ============================================================================

pub use error::{OnnxResult, TransformError};
pub use graph::Graph;
pub use traits::GraphPass;

// ============================================================================
// Version information
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Minimum supported ONNX opset version
pub const SUPPORTED_OPSET_MIN: i64 = io::validation::MIN_OPSET_VERSION;
/// Maximum supported ONNX opset version
pub const SUPPORTED_OPSET_MAX: i64 = io::validation::MAX_OPSET_VERSION;
