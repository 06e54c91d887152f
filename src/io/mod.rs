//! ONNX I/O module
//!
//! Import and export of graphs, plus the structural checker used as the
//! final pipeline stage.
//!
//! # Example
//!
//! ```ignore
//! use onnx_modifier::io::{load_graph, save_graph};
//!
//! let graph = load_graph("model.onnx")?;
//! save_graph(&graph, "copy.onnx")?;
//! ```

pub mod reader;
pub mod validation;
pub mod writer;

pub use reader::{get_model_info, import, load_graph, load_model, load_model_from_bytes, ModelInfo};
pub use validation::{
    check_model, is_opset_supported, validate_graph, validate_model, Problem, StructuralChecker,
    StructuralReport, MAX_OPSET_VERSION, MIN_OPSET_VERSION,
};
pub use writer::{export, model_size, model_to_bytes, save_graph, save_model, write_bytes};
