//! Tensor conversion utilities
//!
//! Convert between ONNX TensorProto and ndarray / plain vectors. Both the
//! typed `*_data` fields and little-endian `raw_data` are understood.

use ndarray::{Array, ArrayD, IxDyn};

use crate::error::{OnnxResult, TransformError};
use crate::proto::tensor_proto::DataType;
use crate::proto::TensorProto;

use super::dtype::{dtype_size, i32_to_dtype};
use super::shape::numel;

/// Read a FLOAT or DOUBLE tensor as f64 values in storage order
fn read_floats(tensor: &TensorProto) -> OnnxResult<Vec<f64>> {
    let dtype = i32_to_dtype(tensor.data_type())?;
    let expected_len = numel(&tensor.dims);
    let raw = tensor.raw_data();

    let data: Vec<f64> = if !raw.is_empty() {
        check_raw_len(tensor, dtype, expected_len)?;
        match dtype {
            DataType::Float => raw
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64)
                .collect(),
            DataType::Double => raw
                .chunks_exact(8)
                .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
                .collect(),
            _ => return Err(TransformError::InvalidDataType(tensor.data_type())),
        }
    } else {
        match dtype {
            DataType::Float => tensor.float_data.iter().map(|&v| v as f64).collect(),
            DataType::Double => tensor.double_data.clone(),
            _ => return Err(TransformError::InvalidDataType(tensor.data_type())),
        }
    };

    check_len(tensor, data.len(), expected_len)?;
    Ok(data)
}

fn to_shape(tensor: &TensorProto) -> Vec<usize> {
    tensor.dims.iter().map(|&d| d as usize).collect()
}

/// Convert a float TensorProto to an f32 ndarray
pub fn tensor_to_array_f32(tensor: &TensorProto) -> OnnxResult<ArrayD<f32>> {
    let data = read_floats(tensor)?.into_iter().map(|v| v as f32).collect();
    Array::from_shape_vec(IxDyn(&to_shape(tensor)), data)
        .map_err(|e| TransformError::UnsupportedPattern(e.to_string()))
}

/// Convert a FLOAT or DOUBLE TensorProto to an f64 ndarray
pub fn tensor_to_array_f64(tensor: &TensorProto) -> OnnxResult<ArrayD<f64>> {
    Array::from_shape_vec(IxDyn(&to_shape(tensor)), read_floats(tensor)?)
        .map_err(|e| TransformError::UnsupportedPattern(e.to_string()))
}

/// Read an integer TensorProto (int32/int64/uint8/int8) as flat i64 values
pub fn tensor_to_vec_i64(tensor: &TensorProto) -> OnnxResult<Vec<i64>> {
    let dtype = i32_to_dtype(tensor.data_type())?;
    let expected_len = numel(&tensor.dims);
    let raw = tensor.raw_data();

    let data: Vec<i64> = if !raw.is_empty() {
        check_raw_len(tensor, dtype, expected_len)?;
        match dtype {
            DataType::Int64 => raw
                .chunks_exact(8)
                .map(|b| i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
                .collect(),
            DataType::Int32 => raw
                .chunks_exact(4)
                .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as i64)
                .collect(),
            DataType::Uint8 => raw.iter().map(|&b| b as i64).collect(),
            DataType::Int8 => raw.iter().map(|&b| b as i8 as i64).collect(),
            _ => return Err(TransformError::InvalidDataType(tensor.data_type())),
        }
    } else {
        match dtype {
            DataType::Int64 => tensor.int64_data.clone(),
            DataType::Int32 | DataType::Int8 | DataType::Uint8 => {
                tensor.int32_data.iter().map(|&v| v as i64).collect()
            }
            _ => return Err(TransformError::InvalidDataType(tensor.data_type())),
        }
    };

    check_len(tensor, data.len(), expected_len)?;
    Ok(data)
}

/// Create a FLOAT or DOUBLE TensorProto from f64 values
///
/// FLOAT narrows every value to f32. Any other dtype is `InvalidDataType`.
pub fn array_to_tensor_as(array: &ArrayD<f64>, name: &str, dtype: DataType) -> OnnxResult<TensorProto> {
    let mut tensor = TensorProto {
        dims: array.shape().iter().map(|&d| d as i64).collect(),
        data_type: Some(dtype as i32),
        name: Some(name.to_string()),
        ..Default::default()
    };
    match dtype {
        DataType::Float => tensor.float_data = array.iter().map(|&v| v as f32).collect(),
        DataType::Double => tensor.double_data = array.iter().copied().collect(),
        other => return Err(TransformError::InvalidDataType(other as i32)),
    }
    Ok(tensor)
}

/// Create a 1D float TensorProto
pub fn vec_to_tensor_f32(data: &[f32], name: &str) -> TensorProto {
    TensorProto {
        dims: vec![data.len() as i64],
        data_type: Some(DataType::Float as i32),
        float_data: data.to_vec(),
        name: Some(name.to_string()),
        ..Default::default()
    }
}

/// Create a 1D int64 TensorProto
pub fn vec_to_tensor_i64(data: &[i64], name: &str) -> TensorProto {
    TensorProto {
        dims: vec![data.len() as i64],
        data_type: Some(DataType::Int64 as i32),
        int64_data: data.to_vec(),
        name: Some(name.to_string()),
        ..Default::default()
    }
}

/// Create a 1D integer tensor with the same integer dtype as `template`.
///
/// Shape and axes tensors are int64 in practice, but int32 ones are kept
/// int32 so a rewritten initializer never changes dtype.
pub fn int_tensor_like(values: &[i64], name: &str, template: &TensorProto) -> TensorProto {
    if template.data_type() == DataType::Int32 as i32 {
        TensorProto {
            dims: vec![values.len() as i64],
            data_type: Some(DataType::Int32 as i32),
            int32_data: values.iter().map(|&v| v as i32).collect(),
            name: Some(name.to_string()),
            ..Default::default()
        }
    } else {
        vec_to_tensor_i64(values, name)
    }
}

fn check_len(tensor: &TensorProto, actual: usize, expected: usize) -> OnnxResult<()> {
    if actual != expected {
        return Err(TransformError::UnsupportedPattern(format!(
            "tensor '{}' holds {} values but its dims {:?} need {}",
            tensor.name(),
            actual,
            tensor.dims,
            expected
        )));
    }
    Ok(())
}

fn check_raw_len(tensor: &TensorProto, dtype: DataType, expected: usize) -> OnnxResult<()> {
    let elem_size = dtype_size(dtype)?;
    let actual = tensor.raw_data().len();
    if actual != expected * elem_size {
        return Err(TransformError::UnsupportedPattern(format!(
            "raw data of '{}' is {} bytes, expected {} x {}",
            tensor.name(),
            actual,
            expected,
            elem_size
        )));
    }
    Ok(())
}
