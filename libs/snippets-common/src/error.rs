use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating the service configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Language '{language}' is missing required field '{field}'")]
    MissingField {
        language: String,
        field: &'static str,
    },

    #[error("Language '{language}' has an invalid value for '{field}': {reason}")]
    InvalidField {
        language: String,
        field: &'static str,
        reason: String,
    },

    #[error("Service default '{field}' is invalid: {reason}")]
    InvalidDefault {
        field: &'static str,
        reason: String,
    },
}

/// The declared language has no entry in the language table
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{language} is not supported")]
pub struct NotSupported {
    pub language: String,
}
