//! Name simplification
//!
//! Exporters such as torch.onnx produce scoped names like `/backbone/conv1/Conv`
//! or `onnx::Conv_123`. This pass rewrites every node and tensor name with
//! [`rename`] so names stay usable as file and symbol names downstream.

use indexmap::IndexMap;
use log::debug;

use crate::error::{OnnxResult, TransformError};
use crate::graph::Graph;
use crate::traits::{GraphPass, PassContext};

/// Strip one leading `/`, then replace `/` and `:` with `_`
pub fn rename(name: &str) -> String {
    let name = name.strip_prefix('/').unwrap_or(name);
    name.replace(['/', ':'], "_")
}

/// Rewrite node and tensor names with [`rename`]
#[derive(Debug, Default, Clone, Copy)]
pub struct SimplifyName;

impl GraphPass for SimplifyName {
    fn name(&self) -> &'static str {
        "simplify_name"
    }

    fn apply(&self, graph: &Graph, _ctx: &PassContext<'_>) -> OnnxResult<Graph> {
        let proto = graph.proto();

        let tensor_names = proto
            .node
            .iter()
            .flat_map(|n| n.input.iter().chain(n.output.iter()).map(String::as_str))
            .chain(proto.input.iter().map(|vi| vi.name()))
            .chain(proto.output.iter().map(|vi| vi.name()))
            .chain(proto.value_info.iter().map(|vi| vi.name()))
            .chain(proto.initializer.iter().map(|t| t.name()))
            .filter(|name| !name.is_empty());
        let tensor_map = build_name_map(tensor_names, "tensor")?;

        let node_names = proto
            .node
            .iter()
            .map(|n| n.name())
            .filter(|name| !name.is_empty());
        let node_map = build_name_map(node_names, "node")?;

        let mut result = graph.clone();
        if tensor_map.is_empty() && node_map.is_empty() {
            return Ok(result);
        }

        debug!(
            "simplify_name: renaming {} tensors and {} nodes",
            tensor_map.len(),
            node_map.len()
        );
        result.rename_tensors(|name| tensor_map.get(name).cloned());
        result.rename_nodes(|name| node_map.get(name).cloned());
        result.rebuild()?;
        Ok(result)
    }
}

/// Map of names that change
///
/// Fails when two distinct names end up with the same new name.
fn build_name_map<'a, I>(names: I, kind: &str) -> OnnxResult<IndexMap<String, String>>
where
    I: Iterator<Item = &'a str>,
{
    let mut changed: IndexMap<String, String> = IndexMap::new();
    let mut owners: IndexMap<String, &'a str> = IndexMap::new();

    for name in names {
        let new = rename(name);
        match owners.get(&new) {
            Some(&owner) if owner != name => {
                return Err(TransformError::ValidationFailed(format!(
                    "{} names '{}' and '{}' both simplify to '{}'",
                    kind, owner, name, new
                )));
            }
            Some(_) => continue,
            None => {}
        }

        if new != name {
            changed.insert(name.to_string(), new.clone());
        }
        owners.insert(new, name);
    }

    Ok(changed)
}
