//! Observable events of the MVCC store
//!
//! Events are explicit and typed. Each has a stable name used as the
//! `event` field of the emitted `tracing` record.

use std::fmt;

/// Observable lifecycle points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Lifecycle
    /// Store opened and ready to serve
    StoreOpen,
    /// Store closed; compactor joined
    StoreClose,

    // Restore
    /// Index rebuild from the backend begins
    RestoreBegin,
    /// Index rebuild complete
    RestoreComplete,
    /// An interrupted compaction was re-queued during restore
    CompactionResumed,

    // Compaction
    /// Compaction marker persisted and job queued
    CompactionScheduled,
    /// One deletion batch committed
    CompactionBatch,
    /// Finished-compaction marker persisted
    CompactionFinished,
    /// Job superseded or store shut down
    CompactionCancelled,
    /// Job aborted on a backend failure
    CompactionFailed,

    // Writes
    /// Write transaction committed
    WriteCommit,
    /// Index changes reverted after a failed commit
    WriteRollback,
    /// Backend commit failed (FATAL for the operation)
    BackendCommitFailed,

    // Integrity
    /// Persisted state is inconsistent (FATAL)
    Corruption,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::StoreOpen => "STORE_OPEN",
            Event::StoreClose => "STORE_CLOSE",

            Event::RestoreBegin => "RESTORE_BEGIN",
            Event::RestoreComplete => "RESTORE_COMPLETE",
            Event::CompactionResumed => "COMPACTION_RESUMED",

            Event::CompactionScheduled => "COMPACTION_SCHEDULED",
            Event::CompactionBatch => "COMPACTION_BATCH",
            Event::CompactionFinished => "COMPACTION_FINISHED",
            Event::CompactionCancelled => "COMPACTION_CANCELLED",
            Event::CompactionFailed => "COMPACTION_FAILED",

            Event::WriteCommit => "WRITE_COMMIT",
            Event::WriteRollback => "WRITE_ROLLBACK",
            Event::BackendCommitFailed => "BACKEND_COMMIT_FAILED",

            Event::Corruption => "DATA_CORRUPTION",
        }
    }

    /// Returns true if this event indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        matches!(self, Event::BackendCommitFailed | Event::Corruption)
    }

    /// Returns true for high-frequency events logged at debug level
    pub fn is_verbose(&self) -> bool {
        matches!(self, Event::CompactionBatch | Event::WriteCommit)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
