//! Common utilities for rewrite passes
//!
//! Attribute helpers, constant lookup and the shape-vector conventions shared
//! by the Reshape-emitting passes.

use crate::error::OnnxResult;
use crate::graph::Graph;
use crate::proto::attribute_proto::AttributeType;
use crate::proto::extensions::DYNAMIC_DIM;
use crate::proto::{AttributeProto, NodeProto, TensorProto};
use crate::tensor::tensor_to_vec_i64;

/// Get attribute value as i64
pub fn get_attr_i(node: &NodeProto, name: &str) -> Option<i64> {
    node.get_attribute(name).map(|a| a.i())
}

/// Get attribute value as i64 list
pub fn get_attr_ints<'a>(node: &'a NodeProto, name: &str) -> Option<&'a [i64]> {
    node.get_attribute_ints(name)
}

/// Set or update an int attribute
pub fn set_attr_i(node: &mut NodeProto, name: &str, value: i64) {
    match node.get_attribute_mut(name) {
        Some(attr) => {
            attr.i = Some(value);
            attr.set_type(AttributeType::Int);
        }
        None => node.attribute.push(AttributeProto::new_int(name, value)),
    }
}

/// Set or update an ints attribute
pub fn set_attr_ints(node: &mut NodeProto, name: &str, values: Vec<i64>) {
    match node.get_attribute_mut(name) {
        Some(attr) => {
            attr.ints = values;
            attr.set_type(AttributeType::Ints);
        }
        None => node.attribute.push(AttributeProto::new_ints(name, values)),
    }
}

/// Constant tensor behind `name`: an initializer or the `value` of a
/// `Constant` node
pub fn get_constant_tensor<'a>(graph: &'a Graph, name: &str) -> Option<&'a TensorProto> {
    if let Some(init) = graph.get_initializer(name) {
        return Some(init);
    }

    let producer = graph.producer_of(name)?;
    if producer.op_type() != "Constant" {
        return None;
    }
    producer.get_attribute("value").and_then(|a| a.t.as_ref())
}

/// Integer values of a constant tensor, if `name` is constant
pub fn get_constant_ints(graph: &Graph, name: &str) -> OnnxResult<Option<Vec<i64>>> {
    get_constant_tensor(graph, name)
        .map(tensor_to_vec_i64)
        .transpose()
}

/// Target shape with the batch dimension left to the runtime
///
/// `dims[0]` becomes `-1`; a rank-0 shape stays empty.
pub fn batch_free_shape(dims: &[i64]) -> Vec<i64> {
    let mut shape = dims.to_vec();
    if let Some(first) = shape.first_mut() {
        *first = DYNAMIC_DIM;
    }
    shape
}
