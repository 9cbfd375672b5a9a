//! Record replay for restore
//!
//! Scans the record bucket in ascending revision order, in chunks, and
//! replays each record into the tree index:
//! - live records become puts (or seed a new key index)
//! - tombstones close the key's open generation; a tombstone for a key with
//!   no surviving history is skipped
//!
//! Any record that fails to decode, or whose key and payload disagree on the
//! revision, aborts the restore as corruption.

use std::collections::HashMap;

use crate::backend::{Bucket, ReadTxn};
use crate::lease::LeaseId;
use crate::mvcc::{BucketKey, KeyValue, Revision, TreeIndex};
use crate::storage::KvRecord;
use crate::store::{StoreError, StoreResult};

/// Statistics from record replay
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Number of records replayed
    pub records_replayed: u64,
    /// Number of live records
    pub puts: u64,
    /// Number of tombstones applied
    pub tombstones: u64,
    /// Number of tombstones whose key had no surviving history
    pub skipped_tombstones: u64,
    /// Highest main revision seen; 0 when the bucket is empty
    pub max_revision: i64,
}

/// Replays persisted records into a tree index.
pub struct RecordReplayer;

impl RecordReplayer {
    /// Replays every record visible to `tx` into `index`.
    ///
    /// Returns the replay statistics and the lease of every live key that
    /// carries one.
    pub fn replay<T: ReadTxn + ?Sized>(
        tx: &T,
        index: &TreeIndex,
        chunk_size: usize,
    ) -> StoreResult<(ReplayStats, HashMap<Vec<u8>, LeaseId>)> {
        let mut stats = ReplayStats::default();
        let mut leases = HashMap::new();
        let mut start = Vec::new();

        loop {
            let chunk = tx.range(Bucket::Key, &start, None, chunk_size)?;
            for (key, value) in &chunk {
                Self::apply(key, value, index, &mut stats, &mut leases)?;
            }

            if chunk.len() < chunk_size {
                break;
            }
            if let Some((last, _)) = chunk.last() {
                start = last.clone();
                start.push(0);
            }
        }
        Ok((stats, leases))
    }

    fn apply(
        key: &[u8],
        value: &[u8],
        index: &TreeIndex,
        stats: &mut ReplayStats,
        leases: &mut HashMap<Vec<u8>, LeaseId>,
    ) -> StoreResult<()> {
        let bucket_key = BucketKey::try_from_bytes(key)
            .map_err(|e| StoreError::corruption(format!("malformed record key: {}", e)))?;
        let rev = bucket_key.revision;
        let kv: KeyValue = KvRecord::deserialize(value).map_err(|e| {
            StoreError::corruption(format!("record at revision {}: {}", rev, e))
        })?;
        if kv.mod_revision != rev.main {
            return Err(StoreError::corruption(format!(
                "record at revision {} claims mod revision {}",
                rev, kv.mod_revision
            )));
        }

        stats.records_replayed += 1;
        stats.max_revision = stats.max_revision.max(rev.main);

        if bucket_key.tombstone {
            let applied = index.restore_tombstone(&kv.key, rev).map_err(|_| {
                StoreError::corruption(format!(
                    "tombstone at revision {} for key {:?} without a live generation",
                    rev,
                    String::from_utf8_lossy(&kv.key)
                ))
            })?;
            if applied {
                stats.tombstones += 1;
            } else {
                stats.skipped_tombstones += 1;
            }
            leases.remove(&kv.key);
        } else {
            index.restore_put(&kv.key, Revision::main(kv.create_revision), rev, kv.version);
            stats.puts += 1;
            if kv.has_lease() {
                leases.insert(kv.key, kv.lease);
            } else {
                leases.remove(&kv.key);
            }
        }
        Ok(())
    }
}
