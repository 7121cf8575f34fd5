//! Error types shared by the data model.

use thiserror::Error;

/// Result type alias using WxError.
pub type WxResult<T> = Result<T, WxError>;

/// Errors raised while building or reshaping grids and run identifiers.
#[derive(Debug, Error)]
pub enum WxError {
    #[error("Grid shape mismatch: axes describe {expected} values but data has {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("Axis not found: {0}")]
    AxisNotFound(String),

    #[error("Index {index} out of range for axis '{axis}' of length {len}")]
    IndexOutOfRange {
        axis: String,
        index: usize,
        len: usize,
    },

    #[error("Grid must keep two spatial axes, got {0}")]
    NotSpatial(String),

    #[error("Invalid cycle specification: {0}")]
    InvalidCycle(String),
}
