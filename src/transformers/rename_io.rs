//! Canonical graph input / output names
//!
//! Renames the first graph input to `input` and the first graph output to
//! `output`, rewriting every reference to the old name.

use log::debug;

use crate::error::{OnnxResult, TransformError};
use crate::graph::Graph;
use crate::traits::{GraphPass, PassContext};

/// Canonical name of the first graph input
pub const INPUT_NAME: &str = "input";

/// Canonical name of the first graph output
pub const OUTPUT_NAME: &str = "output";

/// Rename the first graph input to `input`
#[derive(Debug, Default, Clone, Copy)]
pub struct ReplaceInputName;

impl GraphPass for ReplaceInputName {
    fn name(&self) -> &'static str {
        "replace_input_name"
    }

    fn apply(&self, graph: &Graph, _ctx: &PassContext<'_>) -> OnnxResult<Graph> {
        let old = graph
            .inputs()
            .first()
            .map(|vi| vi.name().to_string())
            .ok_or_else(|| TransformError::UnsupportedPattern("graph has no inputs".to_string()))?;

        rename_everywhere(graph, &old, INPUT_NAME)
    }
}

/// Rename the first graph output to `output`
#[derive(Debug, Default, Clone, Copy)]
pub struct ReplaceOutputName;

impl GraphPass for ReplaceOutputName {
    fn name(&self) -> &'static str {
        "replace_output_name"
    }

    fn apply(&self, graph: &Graph, _ctx: &PassContext<'_>) -> OnnxResult<Graph> {
        let old = graph
            .outputs()
            .first()
            .map(|vi| vi.name().to_string())
            .ok_or_else(|| TransformError::UnsupportedPattern("graph has no outputs".to_string()))?;

        rename_everywhere(graph, &old, OUTPUT_NAME)
    }
}

fn rename_everywhere(graph: &Graph, old: &str, new: &str) -> OnnxResult<Graph> {
    let mut result = graph.clone();
    if old == new {
        return Ok(result);
    }

    debug!("renaming tensor '{}' to '{}'", old, new);
    result.rename_tensor(old, new);
    // a tensor already called `new` now has two writers
    result.rebuild()?;
    Ok(result)
}
