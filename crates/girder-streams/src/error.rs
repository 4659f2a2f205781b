use thiserror::Error;

/// Result type for history store operations.
pub type Result<T> = std::result::Result<T, HistoryError>;

/// Errors for history store operations.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
