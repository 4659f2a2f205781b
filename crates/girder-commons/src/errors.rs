//! Shared error types for Girder.
//!
//! This module provides a small common error type usable from every crate
//! without introducing external dependencies. Crates with richer failure
//! modes (storage, transport) define their own enums and keep them distinct.

use std::fmt;

/// Result alias over [`CommonError`].
pub type Result<T> = std::result::Result<T, CommonError>;

/// Common error type for Girder operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    /// Invalid input provided to a function
    InvalidInput(String),

    /// Resource not found (broadcasting, stream, connection)
    NotFound(String),

    /// Internal error (unexpected state)
    Internal(String),
}

impl CommonError {
    /// Creates an InvalidInput error with a message.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Creates a NotFound error with a message.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Creates an Internal error with a message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl fmt::Display for CommonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommonError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            CommonError::NotFound(msg) => write!(f, "Not found: {}", msg),
            CommonError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for CommonError {}
