//! Execution backends behind the shape oracle
//!
//! A backend runs a model on synthetic feeds and reports the shape of each
//! requested tensor. The crate ships two: a fixed table and a stub that
//! always fails. Hosts plug in a real engine through [`ExecutionBackend`].

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use crate::error::{OnnxResult, TransformError};
use crate::proto::ModelProto;

use super::feeds::Feed;

/// Seam to an inference engine
pub trait ExecutionBackend {
    /// Run `model` on `feeds` and return the shape of every name in
    /// `fetches`, in the same order
    fn execute(&self, model: &ModelProto, feeds: &[Feed], fetches: &[String])
        -> OnnxResult<Vec<Vec<i64>>>;
}

impl<B: ExecutionBackend + ?Sized> ExecutionBackend for &B {
    fn execute(
        &self,
        model: &ModelProto,
        feeds: &[Feed],
        fetches: &[String],
    ) -> OnnxResult<Vec<Vec<i64>>> {
        (**self).execute(model, feeds, fetches)
    }
}

impl<B: ExecutionBackend + ?Sized> ExecutionBackend for Box<B> {
    fn execute(
        &self,
        model: &ModelProto,
        feeds: &[Feed],
        fetches: &[String],
    ) -> OnnxResult<Vec<Vec<i64>>> {
        (**self).execute(model, feeds, fetches)
    }
}

// ============================================================================
// StaticShapes
// ============================================================================

/// Answers from a fixed tensor → shape table
#[derive(Debug, Clone, Default)]
pub struct StaticShapes {
    shapes: FxHashMap<String, Vec<i64>>,
}

impl StaticShapes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace one entry
    pub fn with_shape(mut self, name: &str, dims: &[i64]) -> Self {
        self.shapes.insert(name.to_string(), dims.to_vec());
        self
    }

    /// Parse a JSON object mapping tensor names to dimension lists
    ///
    /// ```json
    /// { "conv_out": [1, 64, 56, 56], "logits": [1, 1000] }
    /// ```
    pub fn from_json(text: &str) -> OnnxResult<Self> {
        let table: BTreeMap<String, Vec<i64>> = serde_json::from_str(text)
            .map_err(|e| TransformError::Serialization(format!("invalid shape table: {}", e)))?;
        Ok(Self {
            shapes: table.into_iter().collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}

impl ExecutionBackend for StaticShapes {
    fn execute(
        &self,
        _model: &ModelProto,
        _feeds: &[Feed],
        fetches: &[String],
    ) -> OnnxResult<Vec<Vec<i64>>> {
        fetches
            .iter()
            .map(|name| {
                self.shapes.get(name).cloned().ok_or_else(|| {
                    TransformError::ShapeInferenceFailed(format!(
                        "no shape recorded for '{}'",
                        name
                    ))
                })
            })
            .collect()
    }
}

// ============================================================================
// Unavailable
// ============================================================================

/// Backend used when no engine is configured; every call fails
#[derive(Debug, Clone, Copy, Default)]
pub struct Unavailable;

impl ExecutionBackend for Unavailable {
    fn execute(
        &self,
        _model: &ModelProto,
        _feeds: &[Feed],
        fetches: &[String],
    ) -> OnnxResult<Vec<Vec<i64>>> {
        Err(TransformError::ShapeInferenceFailed(format!(
            "no execution backend configured (needed shapes of {} tensors)",
            fetches.len()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_shapes_from_json() {
        let backend = StaticShapes::from_json(r#"{"a": [1, 3], "b": []}"#).unwrap();
        let shapes = backend
            .execute(
                &ModelProto::default(),
                &[],
                &["b".to_string(), "a".to_string()],
            )
            .unwrap();

        assert_eq!(shapes, vec![vec![], vec![1, 3]]);
    }

    #[test]
    fn test_static_shapes_missing_entry() {
        let backend = StaticShapes::new().with_shape("a", &[2]);
        assert!(matches!(
            backend.execute(&ModelProto::default(), &[], &["z".to_string()]),
            Err(TransformError::ShapeInferenceFailed(_))
        ));
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            StaticShapes::from_json("[1, 2]"),
            Err(TransformError::Serialization(_))
        ));
    }

    #[test]
    fn test_unavailable() {
        assert!(Unavailable
            .execute(&ModelProto::default(), &[], &["x".to_string()])
            .is_err());
    }
}
