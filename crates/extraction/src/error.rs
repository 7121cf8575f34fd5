//! Error types for the extraction crate.

use thiserror::Error;

/// Errors raised while loading a raw field from a container.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Variable '{var}' for field '{field}' not found in container")]
    NotFound { field: String, var: String },

    #[error("Field '{0}' is derived and has no raw recipe")]
    NotRaw(String),

    #[error("{strategy} timed out after {seconds}s")]
    Timeout {
        strategy: &'static str,
        seconds: u64,
    },

    #[error("Failed to read container: {0}")]
    Container(String),

    #[error("Failed to parse GRIB2 data: {0}")]
    Grib2(#[from] grib2_parser::Grib2Error),

    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decompression failed: {0}")]
    Decompression(String),

    #[error("External utility failed: {0}")]
    Utility(String),

    #[error("Grid shaping failed: {0}")]
    Shape(#[from] wx_common::WxError),

    #[error("Extraction cancelled")]
    Cancelled,
}

impl ExtractionError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ExtractionError::NotFound { .. })
    }
}

/// Result type for extraction operations.
pub type Result<T> = std::result::Result<T, ExtractionError>;
