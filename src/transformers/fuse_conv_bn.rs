//! Conv + BatchNormalization fusion
//!
//! Folds an inference-mode BatchNormalization into the weights and bias of
//! the Conv that feeds it.

use log::{debug, warn};
use ndarray::{Array1, Axis};

use crate::error::{OnnxResult, TransformError};
use crate::graph::Graph;
use crate::proto::attribute_proto::AttributeType;
use crate::proto::tensor_proto::DataType;
use crate::proto::{NodeProto, TensorProto};
use crate::tensor::{array_to_tensor_as, i32_to_dtype, tensor_to_array_f64};
use crate::traits::{GraphPass, PassContext};

/// Epsilon used when the BatchNormalization node does not set one
pub const DEFAULT_EPSILON: f32 = 1e-5;

/// Fuse Conv + BatchNormalization
///
/// BatchNorm can be folded into Conv by modifying weights and biases:
///
/// Conv: y = W * x + b
/// BN:   z = scale * (y - mean) / sqrt(var + eps) + bias
///
/// Fused: z = W' * x + b'
/// where:
///   W' = W * scale / sqrt(var + eps)           (per output channel)
///   b' = scale * (b - mean) / sqrt(var + eps) + bias
///
/// Folding runs in f64. Weight, bias and BN parameters must share one
/// element type, FLOAT or DOUBLE, and the fused tensors keep it.
///
/// The pair is fused only when the Conv output feeds nothing but the BN and
/// is not a graph output.
#[derive(Debug, Default, Clone, Copy)]
pub struct FuseConvBn;

impl GraphPass for FuseConvBn {
    fn name(&self) -> &'static str {
        "fuse_conv_and_bn"
    }

    fn apply(&self, graph: &Graph, _ctx: &PassContext<'_>) -> OnnxResult<Graph> {
        let pairs: Vec<(String, String)> = graph
            .nodes_by_op("BatchNormalization")
            .filter_map(|bn| {
                let conv_out = bn.input_at(0)?;
                let conv = graph.producer_of(conv_out)?;
                let fusible = conv.op_type() == "Conv"
                    && graph.consumer_count(conv_out) == 1
                    && !graph.is_graph_output(conv_out);
                if !fusible {
                    return None;
                }
                if conv.name().is_empty() || bn.name().is_empty() {
                    warn!("skipping unnamed Conv/BatchNormalization pair at '{}'", conv_out);
                    return None;
                }
                Some((conv.name().to_string(), bn.name().to_string()))
            })
            .collect();

        let mut result = graph.clone();
        for (conv_name, bn_name) in &pairs {
            fuse_pair(&mut result, conv_name, bn_name)?;
        }
        result.rebuild()?;
        Ok(result)
    }
}

/// `epsilon` attribute of a BatchNormalization node
fn read_epsilon(bn: &NodeProto) -> OnnxResult<f32> {
    match bn.get_attribute("epsilon") {
        None => Ok(DEFAULT_EPSILON),
        Some(attr) if attr.r#type() == AttributeType::Float => Ok(attr.f()),
        Some(attr) => Err(TransformError::UnsupportedPattern(format!(
            "epsilon of '{}' has attribute type {:?}, expected FLOAT",
            bn.name(),
            attr.r#type()
        ))),
    }
}

/// Element type of a fusable parameter: FLOAT or DOUBLE
fn param_dtype(tensor: &TensorProto) -> OnnxResult<DataType> {
    match i32_to_dtype(tensor.data_type())? {
        dtype @ (DataType::Float | DataType::Double) => Ok(dtype),
        other => Err(TransformError::UnsupportedPattern(format!(
            "'{}' has element type {:?}, expected FLOAT or DOUBLE",
            tensor.name(),
            other
        ))),
    }
}

/// Load a per-channel parameter and check its length and element type
fn load_channel_param(
    graph: &Graph,
    name: &str,
    channels: usize,
    dtype: DataType,
) -> OnnxResult<Array1<f64>> {
    let tensor = graph.find_initializer_by_name(name)?;
    let actual = param_dtype(tensor)?;
    if actual != dtype {
        return Err(TransformError::UnsupportedPattern(format!(
            "'{}' is {:?} but the Conv weight is {:?}",
            name, actual, dtype
        )));
    }

    let values: Array1<f64> = tensor_to_array_f64(tensor)?.iter().copied().collect();
    if values.len() != channels {
        return Err(TransformError::UnsupportedPattern(format!(
            "'{}' has {} values for {} output channels",
            name,
            values.len(),
            channels
        )));
    }
    Ok(values)
}

fn fuse_pair(graph: &mut Graph, conv_name: &str, bn_name: &str) -> OnnxResult<()> {
    let conv = graph.find_node_by_name(conv_name)?.clone();
    let bn = graph.find_node_by_name(bn_name)?.clone();

    if bn.input.len() < 5 {
        return Err(TransformError::UnsupportedPattern(format!(
            "'{}' has {} inputs, expected 5",
            bn_name,
            bn.input.len()
        )));
    }
    if bn.output.iter().filter(|o| !o.is_empty()).count() > 1 {
        return Err(TransformError::UnsupportedPattern(format!(
            "'{}' is a training-mode BatchNormalization",
            bn_name
        )));
    }
    let bn_out = bn
        .output
        .first()
        .filter(|o| !o.is_empty())
        .cloned()
        .ok_or_else(|| TransformError::UnsupportedPattern(format!("'{}' has no output", bn_name)))?;

    let epsilon = read_epsilon(&bn)? as f64;

    let weight_name = conv.input_at(1).ok_or_else(|| {
        TransformError::UnsupportedPattern(format!("'{}' has no weight input", conv_name))
    })?;
    let weight_tensor = graph.find_initializer_by_name(weight_name)?;
    // the fused parameters are written back in the weight's element type
    let dtype = param_dtype(weight_tensor)?;
    let weight = tensor_to_array_f64(weight_tensor)?;
    let channels = match weight.shape().first() {
        Some(&c) if weight.ndim() >= 2 => c,
        _ => {
            return Err(TransformError::UnsupportedPattern(format!(
                "weight '{}' has shape {:?}",
                weight_name,
                weight.shape()
            )))
        }
    };

    let conv_bias = match conv.input_at(2) {
        Some(name) => load_channel_param(graph, name, channels, dtype)?,
        None => Array1::zeros(channels),
    };

    let scale = load_channel_param(graph, &bn.input[1], channels, dtype)?;
    let bn_bias = load_channel_param(graph, &bn.input[2], channels, dtype)?;
    let mean = load_channel_param(graph, &bn.input[3], channels, dtype)?;
    let var = load_channel_param(graph, &bn.input[4], channels, dtype)?;

    let std = var.mapv(|v| (v + epsilon).sqrt());
    let factor = &scale / &std;

    let mut new_weight = weight;
    for (mut kernel, &f) in new_weight.axis_iter_mut(Axis(0)).zip(factor.iter()) {
        kernel.mapv_inplace(|w| w * f);
    }
    let new_bias = &scale * &(&conv_bias - &mean) / &std + &bn_bias;

    let weight_out = format!("{}_new_weight", bn_name);
    let bias_out = format!("{}_new_bias", bn_name);
    graph.add_initializer(array_to_tensor_as(&new_weight, &weight_out, dtype)?)?;
    graph.add_initializer(array_to_tensor_as(&new_bias.into_dyn(), &bias_out, dtype)?)?;

    graph.remove_node(bn_name)?;
    graph.update_node(conv_name, |node| {
        node.input[1] = weight_out.clone();
        if node.input.len() < 3 {
            node.input.resize(3, String::new());
        }
        node.input[2] = bias_out.clone();
        node.output[0] = bn_out.clone();
    })?;

    let mut stale: Vec<String> = vec![weight_name.to_string()];
    stale.extend(conv.input_at(2).map(str::to_string));
    stale.extend(bn.input[1..5].iter().cloned());
    graph.prune_initializers(&stale);

    debug!("fused '{}' into '{}' as {:?}", bn_name, conv_name, dtype);
    Ok(())
}
