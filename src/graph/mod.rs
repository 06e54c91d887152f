//! Graph model for ONNX rewriting
//!
//! - [`Graph`]: a model plus O(1) lookups for nodes, producers, consumers
//!   and initializers
//! - [`maps`]: index types and builders
//!
//! # Example
//!
//! ```ignore
//! use onnx_modifier::graph::Graph;
//!
//! let mut graph = Graph::from_model(model)?;
//!
//! let producer = graph.producer_of("conv_out");
//! let readers = graph.consumers_of("conv_out");
//!
//! graph.rename_tensor("conv_out", "features");
//! graph.rebuild()?;
//! ```
//!
//! # Maps
//!
//! | Map | Description |
//! |-----|-------------|
//! | `nodes` | node name → position |
//! | `producers` | tensor name → producer position |
//! | `consumers` | tensor name → consumer positions |
//! | `initializers` | initializer name → position |

pub mod context;
pub mod maps;
pub mod mutators;

pub use context::Graph;
pub use maps::{ConsumerMap, GraphIndex, InitializerIndex, NodeIndex, ProducerMap};
