//! Error types for worker operations

use thiserror::Error;

/// Result type for worker operations
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Errors a backend can report while executing an action
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The backend has no implementation for this action
    #[error("Operation not supported by this backend")]
    Unsupported,

    /// The action was abandoned before completion
    #[error("Operation was cancelled")]
    Cancelled,

    /// The other end of the worker channel is gone
    #[error("Worker is disconnected")]
    Disconnected,

    /// Transport or backend failure
    #[error("Backend error: {0}")]
    Backend(String),

    /// The action carried parameters the backend cannot use
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
