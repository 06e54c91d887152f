//! Tensor utilities for ONNX initializers
//!
//! - Data type table (`dtype`)
//! - Shape helpers (`shape`)
//! - Conversion between `TensorProto` and ndarray (`convert`)
//!
//! # Example
//!
//! ```ignore
//! use onnx_modifier::proto::tensor_proto::DataType;
//! use onnx_modifier::tensor::{array_to_tensor_as, tensor_to_array_f64};
//!
//! let weight = tensor_to_array_f64(&tensor)?;
//! let scaled = &weight * 2.0;
//! let folded = array_to_tensor_as(&scaled, "conv_new_weight", DataType::Double)?;
//! ```

pub mod convert;
pub mod dtype;
pub mod shape;

pub use convert::{
    array_to_tensor_as, int_tensor_like, tensor_to_array_f32, tensor_to_array_f64,
    tensor_to_vec_i64, vec_to_tensor_f32, vec_to_tensor_i64,
};
pub use dtype::{dtype_size, i32_to_dtype, is_float_type, is_int_type};
pub use shape::{is_dynamic, normalize_axis, numel};
