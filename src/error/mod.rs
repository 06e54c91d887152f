//! Error types for onnx-modifier
//!
//! Every pass, the oracle adapter and the pipeline report failures through
//! [`TransformError`]. Passes fail fast; the pipeline wraps a pass failure in
//! [`TransformError::PassFailed`] so the caller knows which pass aborted.

use thiserror::Error;

/// Main error type for graph rewriting
#[derive(Error, Debug)]
pub enum TransformError {
    /// A referenced node, tensor or initializer is absent from the graph
    #[error("Not found: {0}")]
    NotFound(String),

    /// The shape oracle failed or did not report a needed tensor
    #[error("Shape inference failed: {0}")]
    ShapeInferenceFailed(String),

    /// A pass precondition is violated in a way the pass cannot skip
    #[error("Unsupported pattern: {0}")]
    UnsupportedPattern(String),

    /// The simplifier reported failure
    #[error("Simplification failed: {0}")]
    SimplificationFailed(String),

    /// Structural validation failed
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// Malformed model bytes
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Tensor data type a conversion cannot handle
    #[error("Invalid data type: {0}")]
    InvalidDataType(i32),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A pipeline pass aborted the run
    #[error("Pass `{pass}` failed: {source}")]
    PassFailed {
        /// Registry name of the failing pass
        pass: &'static str,
        /// The error raised by the pass
        #[source]
        source: Box<TransformError>,
    },
}

impl TransformError {
    /// Wrap this error with the identity of the pass that raised it
    pub fn in_pass(self, pass: &'static str) -> Self {
        TransformError::PassFailed {
            pass,
            source: Box::new(self),
        }
    }

    /// Innermost error, skipping `PassFailed` wrappers
    pub fn root(&self) -> &TransformError {
        match self {
            TransformError::PassFailed { source, .. } => source.root(),
            other => other,
        }
    }

    /// Name of the failing pass, if this error came out of the pipeline
    pub fn failing_pass(&self) -> Option<&'static str> {
        match self {
            TransformError::PassFailed { pass, .. } => Some(*pass),
            _ => None,
        }
    }
}

impl From<prost::DecodeError> for TransformError {
    fn from(err: prost::DecodeError) -> Self {
        TransformError::Serialization(format!("failed to decode ONNX model: {}", err))
    }
}

impl From<prost::EncodeError> for TransformError {
    fn from(err: prost::EncodeError) -> Self {
        TransformError::Serialization(format!("failed to encode ONNX model: {}", err))
    }
}

/// Result type alias for ONNX operations
pub type OnnxResult<T> = Result<T, TransformError>;
