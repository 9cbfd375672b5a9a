//! Store error types
//!
//! Error codes:
//! - REV_COMPACTED (ERROR)
//! - REV_FUTURE_REVISION (ERROR)
//! - REV_ALREADY_COMPACTED (ERROR)
//! - REV_LEASE_NOT_FOUND (ERROR)
//! - REV_CANCELLED (ERROR)
//! - REV_CLOSED (ERROR)
//! - REV_INVALID_CONFIG (ERROR)
//! - REV_WORKER_FAILED (FATAL)
//! - REV_DATA_CORRUPTION (FATAL)
//! - REV_BACKEND_FAILURE (FATAL)
//!
//! "Not found" is never an error: a read of an absent key returns an empty
//! result.

use std::fmt;

use thiserror::Error;

use crate::backend::BackendError;
use crate::lease::LeaseId;

/// Severity levels for store errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Operation fails, caller may retry or adjust
    Error,
    /// Enclosing operation aborted; the store will not repair itself
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Store errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The requested revision has been compacted away.
    #[error("revision {requested} has been compacted (compacted up to {compacted})")]
    Compacted {
        /// Revision asked for.
        requested: i64,
        /// Current compaction watermark.
        compacted: i64,
    },

    /// The requested revision is newer than the current revision.
    #[error("revision {requested} is a future revision (current {current})")]
    FutureRevision {
        /// Revision asked for.
        requested: i64,
        /// Current revision.
        current: i64,
    },

    /// Compaction already scheduled at or above the requested revision.
    #[error("revision {requested} already compacted (compacted up to {compacted})")]
    AlreadyCompacted {
        /// Revision asked for.
        requested: i64,
        /// Current compaction watermark.
        compacted: i64,
    },

    /// A put named a lease the registry does not know.
    #[error("lease {0} not found")]
    LeaseNotFound(LeaseId),

    /// The caller's context was cancelled, or a newer compaction superseded
    /// this one.
    #[error("operation cancelled")]
    Cancelled,

    /// The store has been closed.
    #[error("store is closed")]
    Closed,

    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The background compaction worker could not be started.
    #[error("failed to start compaction worker: {0}")]
    Worker(String),

    /// Persisted state is inconsistent.
    #[error("data corruption: {0}")]
    Corruption(String),

    /// The backend failed; the operation applied no partial effects.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl StoreError {
    /// Creates a corruption error.
    pub fn corruption(message: impl Into<String>) -> Self {
        StoreError::Corruption(message.into())
    }

    /// Returns the stable error code
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Compacted { .. } => "REV_COMPACTED",
            StoreError::FutureRevision { .. } => "REV_FUTURE_REVISION",
            StoreError::AlreadyCompacted { .. } => "REV_ALREADY_COMPACTED",
            StoreError::LeaseNotFound(_) => "REV_LEASE_NOT_FOUND",
            StoreError::Cancelled => "REV_CANCELLED",
            StoreError::Closed => "REV_CLOSED",
            StoreError::InvalidConfig(_) => "REV_INVALID_CONFIG",
            StoreError::Worker(_) => "REV_WORKER_FAILED",
            StoreError::Corruption(_) => "REV_DATA_CORRUPTION",
            StoreError::Backend(_) => "REV_BACKEND_FAILURE",
        }
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        match self {
            StoreError::Worker(_) | StoreError::Corruption(_) | StoreError::Backend(_) => {
                Severity::Fatal
            }
            _ => Severity::Error,
        }
    }

    /// Returns whether this error is fatal to the enclosing operation
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}
