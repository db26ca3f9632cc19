//! Error types for the SDP core

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Main error type for the SDP core
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Common(#[from] sdp_common::SdpError),

    #[error("container payload error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("container {0} not found")]
    ContainerNotFound(i64),

    #[error("dataset {0} not found")]
    DatasetNotFound(i64),

    #[error("job {0} not found")]
    JobNotFound(i64),

    #[error("container {0} has no primary dataset")]
    NoPrimaryDataset(i64),

    #[error("invalid {field} value: {value}")]
    InvalidField { field: &'static str, value: String },
}

impl CoreError {
    pub fn invalid_field(field: &'static str, value: impl Into<String>) -> Self {
        CoreError::InvalidField {
            field,
            value: value.into(),
        }
    }
}
