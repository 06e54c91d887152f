//! ONNX model reader
//!
//! Load models from files or bytes into a [`Graph`].

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use log::debug;
use prost::Message;

use crate::error::OnnxResult;
use crate::graph::Graph;
use crate::proto::ModelProto;

/// Decode model bytes
pub fn load_model_from_bytes(bytes: &[u8]) -> OnnxResult<ModelProto> {
    Ok(ModelProto::decode(bytes)?)
}

/// Load an ONNX model from a file path
pub fn load_model<P: AsRef<Path>>(path: P) -> OnnxResult<ModelProto> {
    let path = path.as_ref();

    let mut reader = BufReader::new(File::open(path)?);
    let mut buffer = Vec::new();
    reader.read_to_end(&mut buffer)?;

    debug!("read {} bytes from {}", buffer.len(), path.display());
    load_model_from_bytes(&buffer)
}

/// Decode model bytes into a validated graph
///
/// # Example
///
/// ```ignore
/// use onnx_modifier::io::import;
///
/// let graph = import(&std::fs::read("model.onnx")?)?;
/// println!("{} nodes", graph.nodes().len());
/// ```
pub fn import(bytes: &[u8]) -> OnnxResult<Graph> {
    Graph::from_model(load_model_from_bytes(bytes)?)
}

/// Load a file into a validated graph
pub fn load_graph<P: AsRef<Path>>(path: P) -> OnnxResult<Graph> {
    Graph::from_model(load_model(path)?)
}

/// Model metadata extracted from an ONNX file
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub ir_version: i64,
    pub producer_name: String,
    pub opset_version: Option<i64>,
    pub node_count: usize,
    pub initializer_count: usize,
    pub input_names: Vec<String>,
    pub output_names: Vec<String>,
}

/// Summarise a model
pub fn get_model_info(model: &ModelProto) -> ModelInfo {
    let graph = model.graph.as_ref();
    ModelInfo {
        ir_version: model.ir_version(),
        producer_name: model.producer_name().to_string(),
        opset_version: model.default_opset_version(),
        node_count: graph.map_or(0, |g| g.node.len()),
        initializer_count: graph.map_or(0, |g| g.initializer.len()),
        input_names: graph
            .map(|g| g.input.iter().map(|vi| vi.name().to_string()).collect())
            .unwrap_or_default(),
        output_names: graph
            .map(|g| g.output.iter().map(|vi| vi.name().to_string()).collect())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransformError;

    #[test]
    fn test_import_garbage() {
        assert!(matches!(
            import(&[0xff, 0xff, 0xff]),
            Err(TransformError::Serialization(_))
        ));
    }

    #[test]
    fn test_import_model_without_graph() {
        let bytes = ModelProto::default().encode_to_vec();
        assert!(matches!(import(&bytes), Err(TransformError::NotFound(_))));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            load_model("/nonexistent/model.onnx"),
            Err(TransformError::Io(_))
        ));
    }
}
