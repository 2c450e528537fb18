//! Error types for healthsense

use thiserror::Error;

/// Result type alias for healthsense operations
pub type Result<T> = std::result::Result<T, InsightError>;

/// Main error type for detection runs.
///
/// Insufficient data and per-item statistical failures are not errors: detectors
/// return empty lists and skip the item. What remains here is malformed input,
/// configuration problems, store failures and run-level control flow.
#[derive(Error, Debug)]
pub enum InsightError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Insufficient data: need at least {needed}, got {got}")]
    InsufficientData { needed: usize, got: usize },

    #[error("Computation error: {0}")]
    ComputationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("Population store error: {0}")]
    PopulationStore(String),

    #[error("Detection task failed: {0}")]
    TaskFailed(String),

    #[error("Detection run cancelled")]
    Cancelled,
}

impl From<serde_json::Error> for InsightError {
    fn from(err: serde_json::Error) -> Self {
        InsightError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for InsightError {
    fn from(err: ndarray::ShapeError) -> Self {
        InsightError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for InsightError {
    fn from(err: tokio::task::JoinError) -> Self {
        InsightError::TaskFailed(err.to_string())
    }
}
