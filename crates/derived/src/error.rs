//! Error types for derived field computation.

use thiserror::Error;

/// Errors raised while computing a derived field.
#[derive(Error, Debug)]
pub enum DerivedError {
    /// An input could not be produced. The field is skipped.
    #[error("Derived field '{field}' unavailable: {reason}")]
    NotFound { field: String, reason: String },

    /// The recipe itself is broken. The field is dropped.
    #[error("Invalid derived field '{field}': {reason}")]
    Configuration { field: String, reason: String },
}

impl DerivedError {
    pub(crate) fn not_found(field: &str, reason: impl Into<String>) -> Self {
        DerivedError::NotFound {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn configuration(field: &str, reason: impl Into<String>) -> Self {
        DerivedError::Configuration {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DerivedError::NotFound { .. })
    }
}

/// Errors raised inside a library function.
#[derive(Error, Debug)]
pub enum FunctionError {
    #[error("{function} expects {expected} inputs, got {got}")]
    Arity {
        function: String,
        expected: usize,
        got: usize,
    },

    #[error("input shapes differ: {left:?} vs {right:?}")]
    ShapeMismatch { left: Vec<usize>, right: Vec<usize> },

    #[error(transparent)]
    Grid(#[from] wx_common::WxError),
}

/// Result type for derived operations.
pub type Result<T> = std::result::Result<T, DerivedError>;
