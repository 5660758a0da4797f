//! Error types shared by every pipeline stage

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the churn pipeline.
///
/// Every variant is fatal to the stage that produced it; no stage retries or
/// falls back to another input.
#[derive(Debug, Error)]
pub enum ChurnError {
    /// An input artifact does not exist on disk.
    #[error("not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// A table is missing a column the stage requires.
    #[error("schema error: {0}")]
    Schema(String),

    /// A table's columns disagree with the schema a model was trained on.
    #[error("schema mismatch: missing columns {missing:?}")]
    SchemaMismatch { missing: Vec<String> },

    /// A categorical value outside the fixed vocabulary of its field.
    #[error("unknown category {value:?} for field {field}")]
    UnknownCategory { field: String, value: String },

    /// Data that cannot be scored or measured (empty, single class, out of range).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A configuration value outside its valid range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Chart rendering failed.
    #[error("plot error: {0}")]
    Plot(String),

    #[error(transparent)]
    Polars(#[from] polars::error::PolarsError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ChurnError {
    /// Creates a schema error.
    pub fn schema(reason: impl Into<String>) -> Self {
        Self::Schema(reason.into())
    }

    /// Creates an invalid input error.
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput(reason.into())
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig(reason.into())
    }

    /// Creates an unknown category error.
    pub fn unknown_category(field: &str, value: &str) -> Self {
        Self::UnknownCategory {
            field: field.to_string(),
            value: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_mentions_path() {
        let err = ChurnError::NotFound {
            path: PathBuf::from("data/raw/missing.csv"),
        };
        assert!(err.to_string().contains("data/raw/missing.csv"));
    }

    #[test]
    fn test_unknown_category_message() {
        let err = ChurnError::unknown_category("Contract", "Three year");
        let msg = err.to_string();
        assert!(msg.contains("Contract"));
        assert!(msg.contains("Three year"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: ChurnError = io_err.into();
        assert!(matches!(err, ChurnError::Io(_)));
    }
}
