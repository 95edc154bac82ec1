//! Error types for IMAP operations

use thiserror::Error;
use tidemail_worker::WorkerError;

/// Result type for IMAP operations
pub type ImapResult<T> = Result<T, ImapError>;

/// Errors that can occur during IMAP operations
#[derive(Debug, Error)]
pub enum ImapError {
    /// Idle mode did not exit within the timeout
    #[error("idle timeout")]
    IdleTimeout,

    /// A previous idle is still stuck; the connection is being recycled
    #[error("idle mode hangs; waiting to reconnect")]
    IdleModeHangs,

    /// Session is not connected
    #[error("IMAP session is not connected")]
    NotConnected,

    /// Server returned an error
    #[error("IMAP server error: {0}")]
    ServerError(String),

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<ImapError> for WorkerError {
    fn from(e: ImapError) -> Self {
        match e {
            ImapError::NotConnected => WorkerError::Disconnected,
            ImapError::IoError(e) => WorkerError::IoError(e),
            other => WorkerError::Backend(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_worker_error() {
        assert!(matches!(WorkerError::from(ImapError::NotConnected), WorkerError::Disconnected));
        let err = WorkerError::from(ImapError::IdleTimeout);
        assert_eq!(err.to_string(), "Backend error: idle timeout");
    }
}
