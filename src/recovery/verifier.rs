//! Watermark verification for restore
//!
//! Checks the persisted markers against each other and against the records
//! that survived, then derives the in-memory watermarks:
//!
//! - `finished <= scheduled`: a compaction finishes only after it was
//!   scheduled
//! - no record above the persisted current revision
//! - `scheduled <= current`: compaction never targets the future

use crate::backend::ReadTxn;
use crate::store::meta::{self, CURRENT_REV_KEY, FINISHED_COMPACT_KEY, SCHEDULED_COMPACT_KEY};
use crate::store::{StoreError, StoreResult, Watermarks, INITIAL_REVISION};

/// Watermarks as found in the meta bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistedMarkers {
    /// Target of the last scheduled compaction.
    pub scheduled_compact: Option<i64>,
    /// Target of the last finished compaction.
    pub finished_compact: Option<i64>,
    /// Main revision of the last write transaction.
    pub current: Option<i64>,
}

impl PersistedMarkers {
    /// Reads every marker through `tx`.
    pub fn read<T: ReadTxn + ?Sized>(tx: &T) -> StoreResult<Self> {
        Ok(Self {
            scheduled_compact: meta::read_marker(tx, SCHEDULED_COMPACT_KEY)?,
            finished_compact: meta::read_marker(tx, FINISHED_COMPACT_KEY)?,
            current: meta::read_marker(tx, CURRENT_REV_KEY)?,
        })
    }

    /// Returns the revision of a compaction that was scheduled but never
    /// finished.
    pub fn interrupted_compaction(&self) -> Option<i64> {
        let scheduled = self.scheduled_compact.unwrap_or(0);
        (scheduled > self.finished_compact.unwrap_or(0)).then_some(scheduled)
    }
}

/// Derives watermarks from persisted markers.
pub struct MarkerVerifier;

impl MarkerVerifier {
    /// Verifies `markers` against the highest surviving record revision.
    pub fn verify(markers: &PersistedMarkers, max_record_rev: i64) -> StoreResult<Watermarks> {
        let scheduled = markers.scheduled_compact.unwrap_or(0);
        let finished = markers.finished_compact.unwrap_or(0);

        if finished > scheduled {
            return Err(StoreError::corruption(format!(
                "finished compaction {} is above scheduled compaction {}",
                finished, scheduled
            )));
        }

        if let Some(persisted) = markers.current {
            if max_record_rev > persisted {
                return Err(StoreError::corruption(format!(
                    "record at revision {} is above persisted current revision {}",
                    max_record_rev, persisted
                )));
            }
        }

        let current = INITIAL_REVISION
            .max(max_record_rev)
            .max(markers.current.unwrap_or(0));
        if scheduled > current {
            return Err(StoreError::corruption(format!(
                "compaction marker {} is above current revision {}",
                scheduled, current
            )));
        }

        Ok(Watermarks {
            current,
            scheduled_compact: scheduled,
            finished_compact: finished,
        })
    }
}
