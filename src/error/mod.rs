//! Error handling for cohort and label generation.

use std::path::PathBuf;

use chrono::NaiveDateTime;

/// Specialized error type for cohort and label operations
#[derive(Debug, thiserror::Error)]
pub enum LabelerError {
    /// Invalid or incomplete configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A labeler id that is not part of the registry
    #[error("Provided labeler_id {0} not defined")]
    UnknownLabeler(String),

    /// A destination table was required but not supplied
    #[error("destination must not be None")]
    MissingDestination,

    /// A raw interval that violates the start < end contract
    #[error("Malformed interval for patient {patient_id}: start {start} is not before end {end}")]
    MalformedInterval {
        patient_id: i64,
        start: NaiveDateTime,
        end: NaiveDateTime,
    },

    /// A template placeholder without a value
    #[error("Template error: no value for placeholder '{0}'")]
    Template(String),

    /// The warehouse rejected or failed a query
    #[error("Warehouse error ({status}): {message}")]
    Warehouse { status: u16, message: String },

    /// Credential loading or token exchange failed
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Transport-level HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Output directory exists and overwriting was not requested
    #[error("Trying to overwrite directory {}, but `overwrite` is False", .0.display())]
    OutputExists(PathBuf),

    /// Error opening or writing a file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error building Arrow data
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Error writing Parquet data
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Error (de)serializing configuration or API payloads
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl LabelerError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a warehouse error from an HTTP status and response body
    pub fn warehouse(status: u16, message: impl Into<String>) -> Self {
        Self::Warehouse {
            status,
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for LabelerError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<serde_yaml::Error> for LabelerError {
    fn from(error: serde_yaml::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<serde_arrow::Error> for LabelerError {
    fn from(error: serde_arrow::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

/// Result type for cohort and label operations
pub type Result<T> = std::result::Result<T, LabelerError>;
