use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Field '{field}' references unknown template '{template}'")]
    UnknownTemplate { field: String, template: String },

    #[error("Template cycle: {chain}")]
    TemplateCycle { chain: String },

    #[error("Field '{field}' uses unknown access pattern '{pattern}'")]
    UnknownAccessPattern { field: String, pattern: String },

    #[error("Field '{field}' is missing required attribute '{attribute}'")]
    MissingAttribute { field: String, attribute: String },

    #[error("Field '{field}' has an invalid '{attribute}': {reason}")]
    InvalidValue {
        field: String,
        attribute: String,
        reason: String,
    },

    #[error("Field '{field}' uses unknown function '{function}'")]
    UnknownFunction { field: String, function: String },

    #[error("Field not found: {0}")]
    FieldNotFound(String),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

impl ConfigError {
    pub(crate) fn missing(field: &str, attribute: &str) -> Self {
        ConfigError::MissingAttribute {
            field: field.to_string(),
            attribute: attribute.to_string(),
        }
    }

    pub(crate) fn invalid(field: &str, attribute: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            attribute: attribute.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
