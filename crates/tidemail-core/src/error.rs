//! Error types for the core module

use thiserror::Error;

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core operations
#[derive(Debug, Error)]
pub enum CoreError {
    /// No thread forest has been built for this store yet
    #[error("No threads available")]
    ThreadsUnavailable,

    /// The uid is not part of the current thread forest
    #[error("Thread not found for uid {0}")]
    ThreadNotFound(u32),

    /// A sort criterion could not be parsed
    #[error("Invalid sort criterion: {0}")]
    InvalidSortCriterion(String),

    /// Message data could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error from the worker protocol
    #[error("Worker error: {0}")]
    Worker(#[from] tidemail_worker::WorkerError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidemail_worker::WorkerError;

    #[test]
    fn test_worker_error_keeps_its_kind() {
        let err: CoreError = WorkerError::Disconnected.into();
        assert!(matches!(err, CoreError::Worker(WorkerError::Disconnected)));
        assert_eq!(err.to_string(), format!("Worker error: {}", WorkerError::Disconnected));
    }
}
