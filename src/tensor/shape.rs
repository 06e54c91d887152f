//! Shape helpers

use crate::error::{OnnxResult, TransformError};

/// Number of elements for a concrete shape (1 for scalars)
pub fn numel(shape: &[i64]) -> usize {
    shape.iter().map(|&d| d.max(0) as usize).product()
}

/// Whether any dimension is dynamic (negative)
pub fn is_dynamic(shape: &[i64]) -> bool {
    shape.iter().any(|&d| d < 0)
}

/// Map a possibly negative axis into `0..rank`
pub fn normalize_axis(axis: i64, rank: usize) -> OnnxResult<usize> {
    let rank_i64 = rank as i64;
    let normalized = if axis < 0 { axis + rank_i64 } else { axis };

    if normalized < 0 || normalized >= rank_i64 {
        return Err(TransformError::UnsupportedPattern(format!(
            "axis {} out of range for rank {}",
            axis, rank
        )));
    }

    Ok(normalized as usize)
}
