//! Restore: rebuilding the store's memory from its backend
//!
//! # Sequence (strict order)
//!
//! 1. Read the persisted markers from the meta bucket
//! 2. Replay every record, in revision order, into the tree index
//! 3. Verify the markers against each other and the surviving records
//! 4. Re-attach leased keys to the lease registry
//! 5. Report an interrupted compaction for the caller to resume
//!
//! # Invariants
//!
//! - Restoring an untouched backend twice yields identical indexes
//! - Any inconsistency halts the restore as corruption; nothing is repaired

mod replay;
mod verifier;

pub use replay::{RecordReplayer, ReplayStats};
pub use verifier::{MarkerVerifier, PersistedMarkers};

use std::time::Instant;

use tracing::{error, info, warn};

use crate::backend::Backend;
use crate::lease::Lessor;
use crate::mvcc::TreeIndex;
use crate::observability::{log_event, Event, MvccMetrics};
use crate::store::{StoreConfig, StoreError, StoreResult, Watermarks};

/// Outcome of a successful restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreOutcome {
    /// Watermarks to serve with.
    pub watermarks: Watermarks,
    /// Compaction scheduled but never finished before the last shutdown.
    pub resume_compaction: Option<i64>,
    /// Record replay statistics.
    pub stats: ReplayStats,
}

/// Rebuilds `index` from `backend` and re-attaches leases.
///
/// `index` must be empty.
pub fn restore(
    backend: &dyn Backend,
    index: &TreeIndex,
    lessor: &dyn Lessor,
    config: &StoreConfig,
    metrics: &MvccMetrics,
) -> StoreResult<RestoreOutcome> {
    log_event(Event::RestoreBegin);
    let started = Instant::now();

    let outcome = rebuild(backend, index, lessor, config);
    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            if let StoreError::Corruption(reason) = &e {
                error!(event = Event::Corruption.as_str(), %reason);
            }
            return Err(e);
        }
    };

    metrics.increment_restores();
    metrics.add_restored_records(outcome.stats.records_replayed);
    info!(
        event = Event::RestoreComplete.as_str(),
        records = outcome.stats.records_replayed,
        keys = index.len(),
        rev = outcome.watermarks.current,
        compact_rev = outcome.watermarks.finished_compact,
        took_ms = started.elapsed().as_millis() as u64,
    );
    Ok(outcome)
}

fn rebuild(
    backend: &dyn Backend,
    index: &TreeIndex,
    lessor: &dyn Lessor,
    config: &StoreConfig,
) -> StoreResult<RestoreOutcome> {
    let tx = backend.begin_read()?;
    let markers = PersistedMarkers::read(tx.as_ref())?;
    let (stats, leases) = RecordReplayer::replay(tx.as_ref(), index, config.restore_chunk_size)?;
    let watermarks = MarkerVerifier::verify(&markers, stats.max_revision)?;

    for (key, lease) in leases {
        if let Err(e) = lessor.attach(lease, &key) {
            warn!(
                key = %String::from_utf8_lossy(&key),
                %lease,
                error = %e,
                "failed to re-attach lease"
            );
        }
    }

    Ok(RestoreOutcome {
        watermarks,
        resume_compaction: markers.interrupted_compaction(),
        stats,
    })
}
