//! Operational counters for the MVCC store
//!
//! - Counters only, monotonic
//! - Reset only on process start
//! - Thread-safe but lock-free

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters describing store activity.
///
/// All counters use Relaxed ordering; values are exact once the
/// incrementing operations have returned.
#[derive(Debug, Default)]
pub struct MvccMetrics {
    /// Keys written by put operations
    puts: AtomicU64,
    /// Keys removed by delete-range operations
    deletes: AtomicU64,
    /// Write transactions that advanced the revision
    write_txns: AtomicU64,
    /// Transactions evaluated through txn apply
    txns: AtomicU64,
    /// Range requests served
    ranges: AtomicU64,
    /// Index changes reverted after a failed commit
    rollbacks: AtomicU64,
    /// Compactions that reached their finished marker
    compactions: AtomicU64,
    /// Compactions cancelled before finishing
    compactions_cancelled: AtomicU64,
    /// Backend records removed by compaction
    compacted_records: AtomicU64,
    /// Restore runs
    restores: AtomicU64,
    /// Records replayed by restore
    restored_records: AtomicU64,
}

impl MvccMetrics {
    /// Create a registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Add keys written
    pub fn add_puts(&self, n: u64) {
        self.puts.fetch_add(n, Ordering::Relaxed);
    }

    /// Add keys deleted
    pub fn add_deletes(&self, n: u64) {
        self.deletes.fetch_add(n, Ordering::Relaxed);
    }

    /// Increment committed write transactions
    pub fn increment_write_txns(&self) {
        self.write_txns.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment evaluated txn requests
    pub fn increment_txns(&self) {
        self.txns.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment range requests
    pub fn increment_ranges(&self) {
        self.ranges.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment write rollbacks
    pub fn increment_rollbacks(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment finished compactions
    pub fn increment_compactions(&self) {
        self.compactions.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment cancelled compactions
    pub fn increment_compactions_cancelled(&self) {
        self.compactions_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Add records removed by compaction
    pub fn add_compacted_records(&self, n: u64) {
        self.compacted_records.fetch_add(n, Ordering::Relaxed);
    }

    /// Increment restore runs
    pub fn increment_restores(&self) {
        self.restores.fetch_add(1, Ordering::Relaxed);
    }

    /// Add records replayed by restore
    pub fn add_restored_records(&self, n: u64) {
        self.restored_records.fetch_add(n, Ordering::Relaxed);
    }

    /// Get all metrics as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            puts: self.puts.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            write_txns: self.write_txns.load(Ordering::Relaxed),
            txns: self.txns.load(Ordering::Relaxed),
            ranges: self.ranges.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            compactions: self.compactions.load(Ordering::Relaxed),
            compactions_cancelled: self.compactions_cancelled.load(Ordering::Relaxed),
            compacted_records: self.compacted_records.load(Ordering::Relaxed),
            restores: self.restores.load(Ordering::Relaxed),
            restored_records: self.restored_records.load(Ordering::Relaxed),
        }
    }

    /// Get current snapshot of all metrics as JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub puts: u64,
    pub deletes: u64,
    pub write_txns: u64,
    pub txns: u64,
    pub ranges: u64,
    pub rollbacks: u64,
    pub compactions: u64,
    pub compactions_cancelled: u64,
    pub compacted_records: u64,
    pub restores: u64,
    pub restored_records: u64,
}
