use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProcessingError>;

#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Source header is missing required column '{column}'")]
    MissingColumn { column: String },

    #[error("Read failed at data row {row} (byte offset {byte}): {source}")]
    ReadFailed {
        row: u64,
        byte: u64,
        #[source]
        source: csv::Error,
    },

    #[error("Schema mismatch in partition year={partition}: column '{column}' expected {expected}, found {found}")]
    SchemaMismatch {
        partition: i32,
        column: String,
        expected: String,
        found: String,
    },

    #[error("Destination {0} already holds a finalized store; pass --overwrite to replace it")]
    DestinationExists(PathBuf),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Processing cancelled by user")]
    Cancelled,

    #[error("Integrity validation failed: {}", failed.join(", "))]
    ValidationFailed { failed: Vec<String> },

    #[error("Async task error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}
