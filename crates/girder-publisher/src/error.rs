use girder_streams::HistoryError;
use thiserror::Error;

/// Transport-level send failure, reported by a [`crate::Transport`]
/// implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The connection is gone; the subscriber should be dropped.
    #[error("connection closed")]
    Closed,
    /// The send did not complete in time. The message is abandoned for this
    /// connection, but the connection itself may still be healthy.
    #[error("send timed out")]
    Timeout,
    /// Unrecoverable I/O failure; the subscriber should be dropped.
    #[error("transport I/O error: {0}")]
    Io(String),
}

impl TransportError {
    /// Whether the connection should be treated as unsubscribed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Closed | TransportError::Io(_))
    }
}

/// Broadcast failure. Per-subscriber transport errors never surface here;
/// they are isolated and reflected in the delivery counts. Only a history
/// persistence failure fails the publish, and it is reported as its own
/// kind so operators can alert on the persistence layer independently of
/// live-delivery health.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("history store error: {0}")]
    History(#[from] HistoryError),
}

/// Error applying a message transform.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("pipeline error: {0}")]
pub struct PipelineError(pub String);
