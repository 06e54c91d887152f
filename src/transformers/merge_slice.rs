//! Merge sibling Slices into one Split
//!
//! Slices reading the same tensor along one axis are merged when, sorted by
//! start, they tile the whole dimension without gaps or overlap.
//!
//! ```text
//!            ┌─ Slice [0,10)  ─ a              ┌─ a
//!   X[.,30] ─┼─ Slice [10,20) ─ b   =>  Split ─┼─ b
//!            └─ Slice [20,30) ─ c              └─ c
//! ```

use indexmap::IndexMap;
use log::debug;

use crate::error::OnnxResult;
use crate::graph::Graph;
use crate::oracle::ShapeQuery;
use crate::proto::extensions::make_node;
use crate::proto::{AttributeProto, NodeProto};
use crate::tensor::{normalize_axis, vec_to_tensor_i64};
use crate::traits::{GraphPass, PassContext};

use super::common::{get_attr_ints, get_constant_ints};

/// Opset from which Slice takes starts/ends/axes/steps as inputs
const SLICE_INPUTS_OPSET: i64 = 10;
/// Opset from which Split takes its widths as an input
const SPLIT_INPUT_OPSET: i64 = 13;

/// Replace tiling Slice groups with one Split
#[derive(Debug, Default, Clone, Copy)]
pub struct MergeSlice;

/// Single-axis, unit-step Slice with constant bounds
#[derive(Debug, Clone)]
struct SliceInfo {
    name: String,
    output: String,
    axis: i64,
    start: i64,
    end: i64,
    params: Vec<String>,
}

/// Bounds of `node`, or `None` when it is not a mergeable Slice
fn read_slice(
    graph: &Graph,
    node: &NodeProto,
    params_as_inputs: bool,
) -> OnnxResult<Option<SliceInfo>> {
    if node.name().is_empty() || node.output.len() != 1 {
        return Ok(None);
    }

    let (starts, ends, axes, steps) = if params_as_inputs {
        let read = |i: usize| -> OnnxResult<Option<Vec<i64>>> {
            match node.input_at(i) {
                Some(name) => get_constant_ints(graph, name),
                None => Ok(None),
            }
        };
        let (Some(starts), Some(ends)) = (read(1)?, read(2)?) else {
            return Ok(None);
        };
        // absent optional inputs take their defaults, dynamic ones disqualify
        let axes = match (node.input_at(3), read(3)?) {
            (Some(_), None) => return Ok(None),
            (_, axes) => axes,
        };
        let steps = match (node.input_at(4), read(4)?) {
            (Some(_), None) => return Ok(None),
            (_, steps) => steps,
        };
        (starts, ends, axes, steps)
    } else {
        let (Some(starts), Some(ends)) = (get_attr_ints(node, "starts"), get_attr_ints(node, "ends"))
        else {
            return Ok(None);
        };
        let axes = get_attr_ints(node, "axes").map(<[i64]>::to_vec);
        (starts.to_vec(), ends.to_vec(), axes, None)
    };

    if starts.len() != 1 || ends.len() != 1 {
        return Ok(None);
    }
    let axis = match axes.as_deref() {
        None => 0,
        Some(&[axis]) => axis,
        Some(_) => return Ok(None),
    };
    if steps.is_some_and(|s| s != [1]) {
        return Ok(None);
    }

    Ok(Some(SliceInfo {
        name: node.name().to_string(),
        output: node.output[0].clone(),
        axis,
        start: starts[0],
        end: ends[0],
        params: node.input.iter().skip(1).filter(|s| !s.is_empty()).cloned().collect(),
    }))
}

/// Clamp a Slice bound into `0..=dim`, counting negatives from the end
fn clamp_bound(bound: i64, dim: i64) -> i64 {
    let bound = if bound < 0 { bound.saturating_add(dim) } else { bound };
    bound.clamp(0, dim)
}

/// Mergeable group: slices in start order, their axis and widths
struct Merge {
    slices: Vec<SliceInfo>,
    axis: i64,
    widths: Vec<i64>,
}

/// Accept a group only when it tiles the whole axis of `shape`
fn plan_merge(data: &str, mut slices: Vec<SliceInfo>, shape: &[i64]) -> Option<Merge> {
    let rank = shape.len();
    let axis = normalize_axis(slices[0].axis, rank).ok()?;
    let dim = shape[axis];
    if dim <= 0 {
        debug!("merge_slice: '{}' has no static size on axis {}", data, axis);
        return None;
    }

    for s in &mut slices {
        if normalize_axis(s.axis, rank).ok()? != axis {
            debug!("merge_slice: slices of '{}' use different axes", data);
            return None;
        }
        s.axis = axis as i64;
        s.start = clamp_bound(s.start, dim);
        s.end = clamp_bound(s.end, dim);
    }

    slices.sort_by_key(|s| s.start);
    if slices[0].start != 0 {
        return None;
    }
    let contiguous = slices.windows(2).all(|w| w[1].start == w[0].end);
    let widths: Vec<i64> = slices.iter().map(|s| s.end - s.start).collect();
    if !contiguous || widths.iter().any(|&w| w <= 0) || widths.iter().sum::<i64>() != dim {
        debug!("merge_slice: slices of '{}' do not tile its axis {}", data, axis);
        return None;
    }

    Some(Merge {
        slices,
        axis: axis as i64,
        widths,
    })
}

impl GraphPass for MergeSlice {
    fn name(&self) -> &'static str {
        "merge_slice"
    }

    fn apply(&self, graph: &Graph, ctx: &PassContext<'_>) -> OnnxResult<Graph> {
        let opset = graph.opset_version().unwrap_or(SPLIT_INPUT_OPSET);

        let mut groups: IndexMap<String, Vec<SliceInfo>> = IndexMap::new();
        for node in graph.nodes_by_op("Slice") {
            let Some(data) = node.input_at(0) else {
                continue;
            };
            match read_slice(graph, node, opset >= SLICE_INPUTS_OPSET)? {
                Some(info) => groups.entry(data.to_string()).or_default().push(info),
                None => debug!("merge_slice: '{}' is not a plain slice", node.name()),
            }
        }
        groups.retain(|_, slices| slices.len() >= 2);

        let mut result = graph.clone();
        if groups.is_empty() {
            return Ok(result);
        }

        let query = groups.keys().fold(ShapeQuery::new(), |q, data| q.tensor(data));
        let shapes = ctx.shapes.infer(graph, &query)?;

        let mut stale = Vec::new();
        for (data, slices) in groups {
            let Some(merge) = plan_merge(&data, slices, shapes.get(&data)?) else {
                continue;
            };

            let split_name = result.unique_node_name(&format!("{}_split", merge.slices[0].name));

            let outputs: Vec<&str> = merge.slices.iter().map(|s| s.output.as_str()).collect();
            let mut split = if opset >= SPLIT_INPUT_OPSET {
                let param = result.unique_tensor_name(&format!("{}_param", split_name));
                result.add_initializer(vec_to_tensor_i64(&merge.widths, &param))?;
                make_node("Split", &[data.as_str(), param.as_str()], &outputs, &split_name)
            } else {
                let mut node = make_node("Split", &[data.as_str()], &outputs, &split_name);
                node.attribute
                    .push(AttributeProto::new_ints("split", merge.widths.clone()));
                node
            };
            split.attribute.push(AttributeProto::new_int("axis", merge.axis));

            // the Split takes the place of the earliest slice
            let anchor = merge
                .slices
                .iter()
                .min_by_key(|s| result.node_position(&s.name))
                .map(|s| s.name.clone())
                .unwrap_or_else(|| split_name.clone());
            result.insert_node_before(&anchor, split)?;

            for slice in &merge.slices {
                result.remove_node(&slice.name)?;
                stale.extend(slice.params.iter().cloned());
            }
            debug!(
                "merge_slice: {} slices of '{}' -> '{}' {:?}",
                merge.slices.len(),
                data,
                split_name,
                merge.widths
            );
        }

        result.prune_initializers(&stale);
        result.rebuild()?;
        Ok(result)
    }
}
