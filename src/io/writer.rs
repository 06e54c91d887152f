//! ONNX model writer
//!
//! Encode a [`Graph`] to bytes or files.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::debug;
use prost::Message;

use crate::error::OnnxResult;
use crate::graph::Graph;
use crate::proto::ModelProto;

/// Encode a graph as model bytes
pub fn export(graph: &Graph) -> Vec<u8> {
    model_to_bytes(&graph.to_model())
}

/// Encode an ONNX model to bytes
pub fn model_to_bytes(model: &ModelProto) -> Vec<u8> {
    model.encode_to_vec()
}

/// Write raw bytes to a file
pub fn write_bytes<P: AsRef<Path>>(bytes: &[u8], path: P) -> OnnxResult<()> {
    let path = path.as_ref();
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(bytes)?;
    writer.flush()?;
    debug!("wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

/// Save an ONNX model to a file
pub fn save_model<P: AsRef<Path>>(model: &ModelProto, path: P) -> OnnxResult<()> {
    write_bytes(&model_to_bytes(model), path)
}

/// Save a graph to a file
pub fn save_graph<P: AsRef<Path>>(graph: &Graph, path: P) -> OnnxResult<()> {
    write_bytes(&export(graph), path)
}

/// Calculate the size of an encoded model in bytes
pub fn model_size(model: &ModelProto) -> usize {
    model.encoded_len()
}
