//! Graph rewrite passes
//!
//! Every pass implements [`GraphPass`]: it reads a [`Graph`](crate::graph::Graph)
//! and returns a rewritten copy, leaving its argument untouched.
//!
//! - **Naming**: [`ReplaceInputName`], [`ReplaceOutputName`], [`SimplifyName`]
//! - **Topology**: [`Simplify`], [`FuseConvBn`], [`MergeSlice`]
//! - **Shape normalization**: [`ModifyReshape`], [`ReplaceSqueezeAndUnsqueeze`],
//!   [`ResolveReduceMeanAxis`], [`ReshapeOutput`], [`AddReshapeAfterMatmul`]
//!
//! # Registry
//!
//! Passes are selected through the closed [`PassId`] enumeration and
//! resolved with [`lookup`]:
//!
//! ```ignore
//! use onnx_modifier::transformers::{lookup, PassId};
//!
//! let pass = lookup("merge_slice".parse::<PassId>()?);
//! let merged = pass.apply(&graph, &ctx)?;
//! ```

/// Common utilities
pub mod common;
/// Fuse Conv + BatchNormalization
pub mod fuse_conv_bn;
/// Merge sibling Slices into a Split
pub mod merge_slice;
/// Concrete Reshape targets
pub mod modify_reshape;
/// Canonical graph input/output names
pub mod rename_io;
/// Replace Squeeze / Unsqueeze with Reshape
pub mod replace_squeeze;
/// Reshape behind rank-4 MatMuls
pub mod reshape_after_matmul;
/// Pad graph outputs to rank 4
pub mod reshape_output;
/// Non-negative ReduceMean axes
pub mod resolve_reduce_mean_axis;
/// Simplifier delegation
pub mod simplify;
/// Scoped-name cleanup
pub mod simplify_name;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TransformError;
use crate::traits::GraphPass;

pub use common::{get_attr_i, get_attr_ints, set_attr_i, set_attr_ints};
pub use fuse_conv_bn::FuseConvBn;
pub use merge_slice::MergeSlice;
pub use modify_reshape::ModifyReshape;
pub use rename_io::{ReplaceInputName, ReplaceOutputName};
pub use replace_squeeze::ReplaceSqueezeAndUnsqueeze;
pub use reshape_after_matmul::AddReshapeAfterMatmul;
pub use reshape_output::ReshapeOutput;
pub use resolve_reduce_mean_axis::ResolveReduceMeanAxis;
pub use simplify::Simplify;
pub use simplify_name::SimplifyName;

// ============================================================================
// Registry
// ============================================================================

/// Identifier of a registered pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassId {
    /// [`ReplaceInputName`]
    ReplaceInputName,
    /// [`ReplaceOutputName`]
    ReplaceOutputName,
    /// [`Simplify`]
    Simplify,
    /// [`SimplifyName`]
    SimplifyName,
    /// [`FuseConvBn`]
    FuseConvAndBn,
    /// [`ModifyReshape`]
    ModifyReshape,
    /// [`ReplaceSqueezeAndUnsqueeze`]
    ReplaceSqueezeAndUnsqueeze,
    /// [`ResolveReduceMeanAxis`]
    ResolveReduceMeanAxis,
    /// [`MergeSlice`]
    MergeSlice,
    /// [`ReshapeOutput`]
    ReshapeOutput,
    /// [`AddReshapeAfterMatmul`]
    AddReshapeAfterMatmul,
}

const ALL_PASSES: [PassId; 11] = [
    PassId::ReplaceInputName,
    PassId::ReplaceOutputName,
    PassId::Simplify,
    PassId::SimplifyName,
    PassId::FuseConvAndBn,
    PassId::ModifyReshape,
    PassId::ReplaceSqueezeAndUnsqueeze,
    PassId::ResolveReduceMeanAxis,
    PassId::MergeSlice,
    PassId::ReshapeOutput,
    PassId::AddReshapeAfterMatmul,
];

impl PassId {
    /// Every registered pass, in registry order
    pub fn all() -> &'static [PassId] {
        &ALL_PASSES
    }

    /// The full preset: every pass once, in an order where each pass sees
    /// the normalizations of the ones before it
    pub fn default_sequence() -> Vec<PassId> {
        ALL_PASSES.to_vec()
    }

    /// Registry name, as used in configs and on the command line
    pub fn as_str(self) -> &'static str {
        lookup(self).name()
    }
}

impl fmt::Display for PassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PassId {
    type Err = TransformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_PASSES
            .iter()
            .copied()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| TransformError::NotFound(format!("pass '{}'", s)))
    }
}

/// Pass implementation registered under `id`
pub fn lookup(id: PassId) -> &'static dyn GraphPass {
    match id {
        PassId::ReplaceInputName => &ReplaceInputName,
        PassId::ReplaceOutputName => &ReplaceOutputName,
        PassId::Simplify => &Simplify,
        PassId::SimplifyName => &SimplifyName,
        PassId::FuseConvAndBn => &FuseConvBn,
        PassId::ModifyReshape => &ModifyReshape,
        PassId::ReplaceSqueezeAndUnsqueeze => &ReplaceSqueezeAndUnsqueeze,
        PassId::ResolveReduceMeanAxis => &ResolveReduceMeanAxis,
        PassId::MergeSlice => &MergeSlice,
        PassId::ReshapeOutput => &ReshapeOutput,
        PassId::AddReshapeAfterMatmul => &AddReshapeAfterMatmul,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for &id in PassId::all() {
            assert_eq!(id.to_string().parse::<PassId>().unwrap(), id);
        }
        assert!("fuse_gelu".parse::<PassId>().is_err());
    }

    #[test]
    fn test_serde_names_match_registry() {
        for &id in PassId::all() {
            let json = serde_json::to_string(&id).unwrap();
            assert_eq!(json, format!("\"{}\"", id.as_str()));
        }
        let id: PassId = serde_json::from_str("\"fuse_conv_and_bn\"").unwrap();
        assert_eq!(id, PassId::FuseConvAndBn);
    }

    #[test]
    fn test_default_sequence() {
        let sequence = PassId::default_sequence();
        assert_eq!(sequence.len(), PassId::all().len());
        assert_eq!(sequence[0], PassId::ReplaceInputName);
        assert_eq!(sequence.last(), Some(&PassId::AddReshapeAfterMatmul));

        let position = |id| sequence.iter().position(|&p| p == id).unwrap();
        assert!(position(PassId::SimplifyName) < position(PassId::FuseConvAndBn));
        assert!(position(PassId::FuseConvAndBn) < position(PassId::ModifyReshape));
    }
}
