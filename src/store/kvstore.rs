//! Store - The MVCC key-value façade
//!
//! Combines the tree index with backend transactions:
//! - writes run one at a time under the writer lock and advance `main` by
//!   one per committed transaction
//! - reads snapshot the watermarks, open their own backend read
//!   transaction, and never wait on writers
//! - compaction is scheduled here and carried out by the compactor worker

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::backend::{Backend, Bucket, ReadTxn};
use crate::lease::{LeaseId, Lessor};
use crate::mvcc::{BucketKey, KeyValue, Revision, TreeIndex};
use crate::observability::{log_revision_event, Event, MetricsSnapshot, MvccMetrics};
use crate::recovery;
use crate::storage::KvRecord;

use super::compactor::{CompactionHandle, Compactor};
use super::config::StoreConfig;
use super::errors::{StoreError, StoreResult};
use super::meta;
use super::request::{RangeOptions, RangeResult, TxnRequest, TxnResponse};
use super::txn::TxnWrite;

/// Revision watermarks of a store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Watermarks {
    /// Main revision of the most recent committed write.
    pub current: i64,
    /// Target of the most recently scheduled compaction.
    pub scheduled_compact: i64,
    /// Target of the most recently finished compaction.
    pub finished_compact: i64,
}

/// Revision of an empty store. The first write commits at revision 2.
pub(crate) const INITIAL_REVISION: i64 = 1;

/// State shared by the façade, its write transactions and the compactor.
pub(crate) struct StoreInner {
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) index: TreeIndex,
    pub(crate) lessor: Arc<dyn Lessor>,
    pub(crate) config: StoreConfig,
    pub(crate) metrics: Arc<MvccMetrics>,
    /// Serializes write transactions and compaction scheduling.
    pub(crate) writer: Mutex<()>,
    marks: RwLock<Watermarks>,
    pub(crate) stop: CancellationToken,
}

impl StoreInner {
    pub(crate) fn watermarks(&self) -> Watermarks {
        *self.marks.read()
    }

    pub(crate) fn check_open(&self) -> StoreResult<()> {
        if self.stop.is_cancelled() {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    /// Publishes a committed write. Caller holds the writer lock.
    pub(crate) fn set_current(&self, rev: i64) {
        let mut marks = self.marks.write();
        marks.current = marks.current.max(rev);
    }

    /// Publishes a persisted compaction schedule. Caller holds the writer lock.
    pub(crate) fn set_scheduled_compact(&self, rev: i64) {
        let mut marks = self.marks.write();
        marks.scheduled_compact = marks.scheduled_compact.max(rev);
    }

    pub(crate) fn set_finished_compact(&self, rev: i64) {
        let mut marks = self.marks.write();
        marks.finished_compact = marks.finished_compact.max(rev);
    }

    /// Reads the record stored at `rev` through `tx`.
    pub(crate) fn read_record<T: ReadTxn + ?Sized>(
        &self,
        tx: &T,
        rev: Revision,
    ) -> StoreResult<Option<KeyValue>> {
        let Some(bytes) = tx.get(Bucket::Key, &BucketKey::new(rev).to_bytes())? else {
            return Ok(None);
        };
        let kv = KvRecord::deserialize(&bytes).map_err(|e| {
            StoreError::corruption(format!("record at revision {}: {}", rev, e))
        })?;
        Ok(Some(kv))
    }

    /// Serves a range read from `tx` as of store revision `current`.
    pub(crate) fn range_in<T: ReadTxn + ?Sized>(
        &self,
        ctx: &CancellationToken,
        tx: &T,
        key: &[u8],
        end: Option<&[u8]>,
        opts: &RangeOptions,
        current: i64,
    ) -> StoreResult<RangeResult> {
        if opts.rev > current {
            return Err(StoreError::FutureRevision {
                requested: opts.rev,
                current,
            });
        }
        let rev = if opts.rev <= 0 { current } else { opts.rev };
        self.check_compacted(rev)?;

        if opts.count_only {
            return Ok(RangeResult {
                kvs: Vec::new(),
                rev: current,
                count: self.index.count_revisions(key, end, rev),
            });
        }

        let (revs, total) = self.index.revisions(key, end, rev, opts.limit);

        let mut kvs = Vec::with_capacity(revs.len());
        for r in revs {
            if ctx.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
            match self.read_record(tx, r)? {
                Some(kv) => kvs.push(kv),
                None => {
                    // A compaction scheduled after the index lookup removed it.
                    self.check_compacted(rev)?;
                    return Err(StoreError::corruption(format!(
                        "index references missing record at revision {}",
                        r
                    )));
                }
            }
        }
        // The index may have been compacted past `rev` while resolving.
        self.check_compacted(rev)?;

        Ok(RangeResult {
            kvs,
            rev: current,
            count: total,
        })
    }

    fn check_compacted(&self, rev: i64) -> StoreResult<()> {
        let compacted = self.watermarks().scheduled_compact;
        if rev < compacted {
            return Err(StoreError::Compacted {
                requested: rev,
                compacted,
            });
        }
        Ok(())
    }
}

/// A multi-version key-value store.
///
/// `Store` is `Sync`: reads, writes and compaction may be issued from any
/// number of threads.
pub struct Store {
    inner: Arc<StoreInner>,
    compactor: Compactor,
}

impl Store {
    /// Opens a store over `backend`, rebuilding the index from its records.
    ///
    /// An interrupted compaction found in the backend is resumed in the
    /// background.
    pub fn open(
        backend: Arc<dyn Backend>,
        lessor: Arc<dyn Lessor>,
        config: StoreConfig,
    ) -> StoreResult<Self> {
        Self::build(backend, lessor, config, Arc::new(MvccMetrics::new()))
    }

    fn build(
        backend: Arc<dyn Backend>,
        lessor: Arc<dyn Lessor>,
        config: StoreConfig,
        metrics: Arc<MvccMetrics>,
    ) -> StoreResult<Self> {
        config.validate()?;

        let index = TreeIndex::new();
        let restored =
            recovery::restore(backend.as_ref(), &index, lessor.as_ref(), &config, &metrics)?;

        let inner = Arc::new(StoreInner {
            backend,
            index,
            lessor,
            config,
            metrics,
            writer: Mutex::new(()),
            marks: RwLock::new(restored.watermarks),
            stop: CancellationToken::new(),
        });
        let compactor = Compactor::start(Arc::clone(&inner))?;

        if let Some(rev) = restored.resume_compaction {
            log_revision_event(Event::CompactionResumed, rev);
            // Restart resumes unconditionally; nobody holds the handle.
            compactor.schedule(rev, CancellationToken::new());
        }

        info!(
            event = Event::StoreOpen.as_str(),
            rev = restored.watermarks.current,
            compact_rev = restored.watermarks.finished_compact,
            keys = inner.index.len(),
        );
        Ok(Self { inner, compactor })
    }

    /// Current revision: main revision of the latest committed write.
    pub fn rev(&self) -> i64 {
        self.inner.watermarks().current
    }

    /// Revision of the latest finished compaction.
    pub fn compact_rev(&self) -> i64 {
        self.inner.watermarks().finished_compact
    }

    /// Revision of the latest scheduled compaction; reads below it fail.
    pub fn scheduled_compact_rev(&self) -> i64 {
        self.inner.watermarks().scheduled_compact
    }

    /// All watermarks, read atomically.
    pub fn watermarks(&self) -> Watermarks {
        self.inner.watermarks()
    }

    /// The backend the store persists to.
    pub fn backend(&self) -> Arc<dyn Backend> {
        Arc::clone(&self.inner.backend)
    }

    /// The in-memory index of every key's history.
    pub fn index(&self) -> &TreeIndex {
        &self.inner.index
    }

    /// Current counter values.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Begins an exclusive write transaction.
    ///
    /// Blocks while another write transaction is open.
    pub fn write(&self) -> StoreResult<TxnWrite<'_>> {
        TxnWrite::begin(&self.inner)
    }

    /// Writes `value` under `key`, returning the new revision.
    pub fn put(&self, key: &[u8], value: &[u8], lease: LeaseId) -> StoreResult<i64> {
        let mut txn = self.write()?;
        txn.put(key, value, lease)?;
        txn.end()
    }

    /// Deletes every key in the range visible now.
    ///
    /// Returns the number of deleted keys and the store revision afterwards;
    /// deleting nothing does not advance the revision.
    pub fn delete_range(&self, key: &[u8], end: Option<&[u8]>) -> StoreResult<(usize, i64)> {
        let mut txn = self.write()?;
        let deleted = txn.delete_range(key, end)?;
        let rev = txn.end()?;
        Ok((deleted, rev))
    }

    /// Evaluates `req.compare` and applies exactly one branch atomically.
    pub fn txn_apply(&self, req: &TxnRequest) -> StoreResult<TxnResponse> {
        let mut txn = self.write()?;
        let (succeeded, responses) = txn.apply(req)?;
        let revision = txn.end()?;
        self.inner.metrics.increment_txns();
        Ok(TxnResponse {
            succeeded,
            responses,
            revision,
        })
    }

    /// Reads the keys in the range at `opts.rev`.
    ///
    /// `end` follows the range convention: `None` reads only `key`,
    /// `Some(RANGE_END_ALL)` reads every key from `key` on.
    pub fn range(
        &self,
        ctx: &CancellationToken,
        key: &[u8],
        end: Option<&[u8]>,
        opts: RangeOptions,
    ) -> StoreResult<RangeResult> {
        self.inner.check_open()?;
        if ctx.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let current = self.inner.watermarks().current;
        let tx = self.inner.backend.begin_read()?;
        let result = self
            .inner
            .range_in(ctx, tx.as_ref(), key, end, &opts, current);
        self.inner.metrics.increment_ranges();
        result
    }

    /// Every change to keys in the range at or after main revision `rev`,
    /// sorted by revision.
    pub fn revisions_since(&self, key: &[u8], end: Option<&[u8]>, rev: i64) -> Vec<Revision> {
        self.inner.index.range_since(key, end, rev)
    }

    /// Schedules compaction of every revision superseded at `rev`.
    ///
    /// The schedule is durable when this returns; reads below `rev` fail
    /// from now on. The returned handle resolves when the physical deletion
    /// has finished, after which [`Store::compact_rev`] reports `rev`.
    /// Cancelling `ctx` aborts the deletion between batches.
    ///
    /// Asking again for the pending scheduled revision re-queues its
    /// deletion, so a cancelled compaction can be retried. A revision below
    /// the pending schedule is already covered by it.
    pub fn compact(&self, ctx: &CancellationToken, rev: i64) -> StoreResult<CompactionHandle> {
        self.inner.check_open()?;
        if ctx.is_cancelled() {
            return Err(StoreError::Cancelled);
        }

        // Held until the job is queued: schedules reach the compactor in the
        // order they were persisted.
        let _writer = self.inner.writer.lock();
        let marks = self.inner.watermarks();
        if rev <= marks.finished_compact {
            return Err(StoreError::AlreadyCompacted {
                requested: rev,
                compacted: marks.finished_compact,
            });
        }
        if rev < marks.scheduled_compact {
            return Err(StoreError::AlreadyCompacted {
                requested: rev,
                compacted: marks.scheduled_compact,
            });
        }
        if rev > marks.current {
            return Err(StoreError::FutureRevision {
                requested: rev,
                current: marks.current,
            });
        }

        if rev > marks.scheduled_compact {
            let mut tx = self.inner.backend.begin_write()?;
            meta::write_marker(tx.as_mut(), meta::SCHEDULED_COMPACT_KEY, rev)?;
            if let Err(e) = tx.commit() {
                error!(event = Event::BackendCommitFailed.as_str(), rev, error = %e);
                return Err(e.into());
            }
            self.inner.set_scheduled_compact(rev);
            log_revision_event(Event::CompactionScheduled, rev);
        } else {
            log_revision_event(Event::CompactionResumed, rev);
        }

        Ok(self.compactor.schedule(rev, ctx.clone()))
    }

    /// Replaces the backend and rebuilds every in-memory structure from it.
    ///
    /// The compactor is stopped first; an in-flight compaction resolves
    /// `Cancelled` and resumes from the new backend's markers if they call
    /// for it.
    pub fn restore(&mut self, backend: Arc<dyn Backend>) -> StoreResult<()> {
        self.close();
        let lessor = Arc::clone(&self.inner.lessor);
        let config = self.inner.config.clone();
        let metrics = Arc::clone(&self.inner.metrics);
        *self = Self::build(backend, lessor, config, metrics)?;
        Ok(())
    }

    /// Stops the compactor and rejects further operations with `Closed`.
    ///
    /// Idempotent.
    pub fn close(&self) {
        if self.inner.stop.is_cancelled() {
            return;
        }
        self.inner.stop.cancel();
        self.compactor.shutdown();
        info!(event = Event::StoreClose.as_str(), rev = self.rev());
    }

    /// Returns true once [`Store::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.inner.stop.is_cancelled()
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::lease::{MemoryLessor, NopLessor};
    use crate::mvcc::RANGE_END_ALL;

    fn open_memory() -> Store {
        Store::open(
            Arc::new(MemoryBackend::new()),
            Arc::new(NopLessor),
            StoreConfig::default(),
        )
        .unwrap()
    }

    fn get(store: &Store, key: &[u8], rev: i64) -> StoreResult<Option<Vec<u8>>> {
        let res = store.range(&CancellationToken::new(), key, None, RangeOptions::at(rev))?;
        Ok(res.kvs.into_iter().next().map(|kv| kv.value))
    }

    #[test]
    fn test_empty_store_starts_at_initial_revision() {
        let store = open_memory();
        assert_eq!(store.rev(), INITIAL_REVISION);
        assert_eq!(store.compact_rev(), 0);
        assert_eq!(get(&store, b"foo", 0).unwrap(), None);
    }

    #[test]
    fn test_put_advances_revision_and_versions() {
        let store = open_memory();
        assert_eq!(store.put(b"foo", b"bar", LeaseId::NONE).unwrap(), 2);
        assert_eq!(store.put(b"foo", b"baz", LeaseId::NONE).unwrap(), 3);

        let res = store
            .range(&CancellationToken::new(), b"foo", None, RangeOptions::default())
            .unwrap();
        assert_eq!(res.rev, 3);
        assert_eq!(
            res.kvs,
            vec![KeyValue {
                key: b"foo".to_vec(),
                create_revision: 2,
                mod_revision: 3,
                version: 2,
                value: b"baz".to_vec(),
                lease: LeaseId::NONE,
            }]
        );
    }

    #[test]
    fn test_revision_visibility() {
        let store = open_memory();
        store.put(b"k", b"v1", LeaseId::NONE).unwrap();
        store.put(b"k", b"v2", LeaseId::NONE).unwrap();
        assert_eq!(store.delete_range(b"k", None).unwrap(), (1, 4));

        assert_eq!(get(&store, b"k", 1).unwrap(), None);
        assert_eq!(get(&store, b"k", 2).unwrap(), Some(b"v1".to_vec()));
        assert_eq!(get(&store, b"k", 3).unwrap(), Some(b"v2".to_vec()));
        assert_eq!(get(&store, b"k", 4).unwrap(), None);
    }

    #[test]
    fn test_future_revision_rejected() {
        let store = open_memory();
        store.put(b"k", b"v", LeaseId::NONE).unwrap();
        let err = get(&store, b"k", 3).unwrap_err();
        assert_eq!(
            err,
            StoreError::FutureRevision {
                requested: 3,
                current: 2
            }
        );
    }

    #[test]
    fn test_delete_nothing_keeps_revision() {
        let store = open_memory();
        store.put(b"a", b"1", LeaseId::NONE).unwrap();
        assert_eq!(store.delete_range(b"x", None).unwrap(), (0, 2));
        assert_eq!(store.rev(), 2);
    }

    #[test]
    fn test_range_limit_and_count() {
        let store = open_memory();
        for key in [b"a", b"b", b"c"] {
            store.put(key, b"v", LeaseId::NONE).unwrap();
        }
        let ctx = CancellationToken::new();

        let res = store
            .range(&ctx, b"a", Some(RANGE_END_ALL), RangeOptions::default().with_limit(2))
            .unwrap();
        assert_eq!(res.kvs.len(), 2);
        assert_eq!(res.count, 3);

        let res = store
            .range(&ctx, b"a", Some(b"c"), RangeOptions::default().count_only())
            .unwrap();
        assert!(res.kvs.is_empty());
        assert_eq!(res.count, 2);
    }

    #[test]
    fn test_cancelled_context_rejected() {
        let store = open_memory();
        let ctx = CancellationToken::new();
        ctx.cancel();
        assert_eq!(
            store.range(&ctx, b"a", None, RangeOptions::default()),
            Err(StoreError::Cancelled)
        );
        assert!(matches!(store.compact(&ctx, 1), Err(StoreError::Cancelled)));
    }

    #[test]
    fn test_lease_attach_and_detach() {
        let lessor = Arc::new(MemoryLessor::new());
        let lease = LeaseId::new(7);
        lessor.grant(lease);
        let store = Store::open(
            Arc::new(MemoryBackend::new()),
            lessor.clone(),
            StoreConfig::default(),
        )
        .unwrap();

        assert_eq!(
            store.put(b"k", b"v", LeaseId::new(8)),
            Err(StoreError::LeaseNotFound(LeaseId::new(8)))
        );
        assert_eq!(store.rev(), INITIAL_REVISION);

        store.put(b"k", b"v", lease).unwrap();
        assert_eq!(lessor.keys(lease), vec![b"k".to_vec()]);

        store.put(b"k", b"v2", LeaseId::NONE).unwrap();
        assert!(lessor.keys(lease).is_empty());

        store.put(b"k", b"v3", lease).unwrap();
        store.delete_range(b"k", None).unwrap();
        assert!(lessor.keys(lease).is_empty());
    }

    #[test]
    fn test_closed_store_rejects_operations() {
        let store = open_memory();
        store.close();
        store.close();
        assert!(store.is_closed());
        assert!(matches!(
            store.put(b"k", b"v", LeaseId::NONE),
            Err(StoreError::Closed)
        ));
        assert!(matches!(
            store.range(&CancellationToken::new(), b"k", None, RangeOptions::default()),
            Err(StoreError::Closed)
        ));
    }

    #[test]
    fn test_revisions_since() {
        let store = open_memory();
        store.put(b"a", b"1", LeaseId::NONE).unwrap();
        store.put(b"b", b"1", LeaseId::NONE).unwrap();
        store.put(b"a", b"2", LeaseId::NONE).unwrap();

        let revs = store.revisions_since(b"a", Some(RANGE_END_ALL), 3);
        assert_eq!(revs, vec![Revision::new(3, 0), Revision::new(4, 0)]);
    }
}
