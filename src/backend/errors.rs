//! Backend error types
//!
//! Every backend failure is fatal to the operation that hit it: the
//! enclosing write or compaction batch is abandoned without partial effects.

use thiserror::Error;

/// Errors raised by a backend engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The backend could not be opened or initialized.
    #[error("failed to open backend at {path}: {message}")]
    Open {
        /// Location of the backend.
        path: String,
        /// Engine error message.
        message: String,
    },

    /// A transaction could not be started.
    #[error("failed to begin transaction: {0}")]
    Transaction(String),

    /// A bucket could not be opened.
    #[error("failed to open bucket: {0}")]
    Bucket(String),

    /// A read or write inside a transaction failed.
    #[error("backend storage failure: {0}")]
    Storage(String),

    /// The transaction could not be committed.
    #[error("failed to commit transaction: {0}")]
    Commit(String),

    /// A failure injected by [`MemoryBackend`](super::MemoryBackend).
    #[error("injected backend failure: {0}")]
    Injected(String),
}

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_context() {
        let err = BackendError::Open {
            path: "/tmp/db".to_string(),
            message: "permission denied".to_string(),
        };
        let display = err.to_string();
        assert!(display.contains("/tmp/db"));
        assert!(display.contains("permission denied"));
    }
}
