//! Pass pipeline
//!
//! Runs an ordered list of passes over a graph, one after the other. The
//! output of each pass is the input of the next; the first failure aborts the
//! run. After the last pass the model goes through the [`ModelChecker`] and
//! only a model that passes is returned.
//!
//! Progress is reported to an observer callback as [`PipelineEvent`]s, which
//! also carry the serialized intermediate models when they are requested.
//!
//! # Example
//!
//! ```ignore
//! use onnx_modifier::prelude::*;
//!
//! let oracle = ShapeOracle::new(StaticShapes::from_json(&shapes_json)?);
//! let pipeline = Pipeline::new(&oracle, &DeadCodeSimplifier, &StructuralChecker);
//! let outcome = pipeline.run(&graph, &PipelineConfig::default(), &mut |_| {})?;
//! std::fs::write(&outcome.result.name, &outcome.result.bytes)?;
//! ```

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{OnnxResult, TransformError};
use crate::graph::Graph;
use crate::io::{export, model_to_bytes};
use crate::traits::{GraphPass, ModelChecker, PassContext, ShapeInference, Simplifier};
use crate::transformers::lookup;

pub use crate::transformers::PassId;

/// Stem used for artifact names when none is configured
pub const DEFAULT_ARTIFACT_STEM: &str = "model";

// ============================================================================
// Configuration
// ============================================================================

/// Ordered pass list plus run options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Passes to run, in order; repeats are allowed
    pub passes: Vec<PassId>,
    /// Serialize the model after every pass
    pub save_intermediate: bool,
    /// Prefix of every artifact name
    pub artifact_stem: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            passes: PassId::default_sequence(),
            save_intermediate: false,
            artifact_stem: DEFAULT_ARTIFACT_STEM.to_string(),
        }
    }
}

impl PipelineConfig {
    /// Run exactly `passes`
    pub fn new(passes: Vec<PassId>) -> Self {
        Self {
            passes,
            ..Self::default()
        }
    }

    /// Enable or disable intermediate artifacts
    pub fn with_intermediate(mut self, save: bool) -> Self {
        self.save_intermediate = save;
        self
    }

    /// Set the artifact name prefix
    pub fn with_stem(mut self, stem: &str) -> Self {
        self.artifact_stem = stem.to_string();
        self
    }

    /// Parse a JSON config; missing fields take their defaults
    pub fn from_json(text: &str) -> OnnxResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| TransformError::Serialization(format!("invalid pipeline config: {}", e)))
    }

    /// `<stem>_<pass>.onnx`
    pub fn artifact_name(&self, pass: &str) -> String {
        format!("{}_{}.onnx", self.artifact_stem, pass)
    }

    /// `<stem>_result.onnx`
    pub fn result_name(&self) -> String {
        format!("{}_result.onnx", self.artifact_stem)
    }
}

// ============================================================================
// Events and results
// ============================================================================

/// A serialized model handed to the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// File name the host should use
    pub name: String,
    /// Encoded ModelProto
    pub bytes: Vec<u8>,
}

/// Progress notification
#[derive(Debug)]
pub enum PipelineEvent<'a> {
    /// A pass is about to run
    PassStarted {
        /// Zero-based position in the pass list
        index: usize,
        /// Length of the pass list
        total: usize,
        /// Registry name
        pass: &'static str,
    },
    /// A pass returned a new graph
    PassFinished {
        /// Registry name
        pass: &'static str,
        /// Node count of the pass input
        nodes_before: usize,
        /// Node count of the pass output
        nodes_after: usize,
    },
    /// Model after a pass, when intermediates are requested
    Artifact(&'a Artifact),
    /// All passes ran; the checker is next
    Checking,
    /// The checker accepted the model
    Finished {
        /// Final node count
        nodes: usize,
    },
}

/// Result of a successful run
#[derive(Debug)]
pub struct PipelineOutcome {
    /// Final graph
    pub graph: Graph,
    /// Final model, named `<stem>_result.onnx`
    pub result: Artifact,
    /// One artifact per pass when intermediates were requested
    pub intermediates: Vec<Artifact>,
}

// ============================================================================
// Pipeline
// ============================================================================

/// Sequential pass runner bound to its collaborators
#[derive(Clone, Copy)]
pub struct Pipeline<'a> {
    shapes: &'a dyn ShapeInference,
    simplifier: &'a dyn Simplifier,
    checker: &'a dyn ModelChecker,
}

impl<'a> Pipeline<'a> {
    /// Create a pipeline from its collaborators
    pub fn new(
        shapes: &'a dyn ShapeInference,
        simplifier: &'a dyn Simplifier,
        checker: &'a dyn ModelChecker,
    ) -> Self {
        Self {
            shapes,
            simplifier,
            checker,
        }
    }

    /// Run the passes named in `config`
    pub fn run(
        &self,
        graph: &Graph,
        config: &PipelineConfig,
        observer: &mut dyn FnMut(&PipelineEvent<'_>),
    ) -> OnnxResult<PipelineOutcome> {
        let passes: Vec<&dyn GraphPass> = config.passes.iter().map(|&id| lookup(id)).collect();
        self.run_passes(graph, &passes, config, observer)
    }

    /// Run arbitrary passes with the options of `config`
    ///
    /// `config.passes` is ignored. A failing pass is reported as
    /// [`TransformError::PassFailed`]; a rejected model as `ValidationFailed`.
    pub fn run_passes(
        &self,
        graph: &Graph,
        passes: &[&dyn GraphPass],
        config: &PipelineConfig,
        observer: &mut dyn FnMut(&PipelineEvent<'_>),
    ) -> OnnxResult<PipelineOutcome> {
        let ctx = PassContext::new(self.shapes, self.simplifier);
        let total = passes.len();
        let mut current = graph.clone();
        let mut intermediates = Vec::new();

        for (index, pass) in passes.iter().enumerate() {
            let name = pass.name();
            info!("[{}/{}] applying {}", index + 1, total, name);
            observer(&PipelineEvent::PassStarted { index, total, pass: name });

            let nodes_before = current.nodes().len();
            current = pass.apply(&current, &ctx).map_err(|e| e.in_pass(name))?;
            let nodes_after = current.nodes().len();
            debug!("{}: {} -> {} nodes", name, nodes_before, nodes_after);
            observer(&PipelineEvent::PassFinished {
                pass: name,
                nodes_before,
                nodes_after,
            });

            if config.save_intermediate {
                let artifact = Artifact {
                    name: config.artifact_name(name),
                    bytes: export(&current),
                };
                observer(&PipelineEvent::Artifact(&artifact));
                intermediates.push(artifact);
            }
        }

        info!("checking model");
        observer(&PipelineEvent::Checking);
        let model = current.to_model();
        self.checker.check(&model).map_err(|e| match e {
            TransformError::ValidationFailed(_) => e,
            other => TransformError::ValidationFailed(other.to_string()),
        })?;

        let nodes = current.nodes().len();
        info!("finished with {} nodes", nodes);
        observer(&PipelineEvent::Finished { nodes });

        Ok(PipelineOutcome {
            graph: current,
            result: Artifact {
                name: config.result_name(),
                bytes: model_to_bytes(&model),
            },
            intermediates,
        })
    }
}
