//! In-memory engine
//!
//! Committed state lives behind an `Arc` that read transactions snapshot.
//! A write transaction buffers its puts and deletes in an overlay above the
//! snapshot it started from and folds them into the committed tables on
//! commit. The tables are copied only when a reader still holds the old
//! snapshot. Writers are serialized by a mutex held for the transaction's
//! lifetime.
//!
//! Nothing is persisted: the backend serves tests and small ephemeral
//! stores. Commit failures can be injected to exercise rollback paths.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};

use super::{Backend, BackendError, BackendResult, Bucket, KvPair, ReadTxn, WriteTxn};

type Table = BTreeMap<Vec<u8>, Vec<u8>>;

/// Buffered writes of one bucket; `None` marks a delete.
type Overlay = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

fn bounds<'a>(
    start: &'a [u8],
    end: Option<&'a [u8]>,
) -> Option<(Bound<&'a [u8]>, Bound<&'a [u8]>)> {
    match end {
        Some(end) if end <= start => None,
        Some(end) => Some((Bound::Included(start), Bound::Excluded(end))),
        None => Some((Bound::Included(start), Bound::Unbounded)),
    }
}

#[derive(Clone, Debug, Default)]
struct Tables {
    key: Table,
    meta: Table,
}

impl Tables {
    fn table(&self, bucket: Bucket) -> &Table {
        match bucket {
            Bucket::Key => &self.key,
            Bucket::Meta => &self.meta,
        }
    }

    fn table_mut(&mut self, bucket: Bucket) -> &mut Table {
        match bucket {
            Bucket::Key => &mut self.key,
            Bucket::Meta => &mut self.meta,
        }
    }

    fn range(&self, bucket: Bucket, start: &[u8], end: Option<&[u8]>, limit: usize) -> Vec<KvPair> {
        let Some(bounds) = bounds(start, end) else {
            return Vec::new();
        };
        let iter = self
            .table(bucket)
            .range::<[u8], _>(bounds)
            .map(|(k, v)| (k.clone(), v.clone()));

        if limit > 0 {
            iter.take(limit).collect()
        } else {
            iter.collect()
        }
    }
}

/// Ephemeral backend for tests and small in-process stores.
#[derive(Default)]
pub struct MemoryBackend {
    committed: RwLock<Arc<Tables>>,
    writer: Mutex<()>,
    failing_commits: AtomicUsize,
    commits: AtomicUsize,
}

impl MemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` commits fail with [`BackendError::Injected`].
    pub fn fail_next_commits(&self, n: usize) {
        self.failing_commits.store(n, Ordering::SeqCst);
    }

    /// Number of successful commits so far.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Number of committed entries in `bucket`.
    pub fn len(&self, bucket: Bucket) -> usize {
        self.committed.read().table(bucket).len()
    }

    /// Returns true if `bucket` holds no committed entries.
    pub fn is_empty(&self, bucket: Bucket) -> bool {
        self.len(bucket) == 0
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Backend for MemoryBackend {
    fn begin_read(&self) -> BackendResult<Box<dyn ReadTxn + '_>> {
        Ok(Box::new(MemoryReadTxn {
            snapshot: Arc::clone(&self.committed.read()),
        }))
    }

    fn begin_write(&self) -> BackendResult<Box<dyn WriteTxn + '_>> {
        let guard = self.writer.lock();
        let base = Arc::clone(&self.committed.read());
        Ok(Box::new(MemoryWriteTxn {
            backend: self,
            base,
            pending: BTreeMap::new(),
            _guard: guard,
        }))
    }
}

struct MemoryReadTxn {
    snapshot: Arc<Tables>,
}

impl ReadTxn for MemoryReadTxn {
    fn range(
        &self,
        bucket: Bucket,
        start: &[u8],
        end: Option<&[u8]>,
        limit: usize,
    ) -> BackendResult<Vec<KvPair>> {
        Ok(self.snapshot.range(bucket, start, end, limit))
    }

    fn get(&self, bucket: Bucket, key: &[u8]) -> BackendResult<Option<Vec<u8>>> {
        Ok(self.snapshot.table(bucket).get(key).cloned())
    }
}

struct MemoryWriteTxn<'a> {
    backend: &'a MemoryBackend,
    base: Arc<Tables>,
    pending: BTreeMap<Bucket, Overlay>,
    _guard: MutexGuard<'a, ()>,
}

impl ReadTxn for MemoryWriteTxn<'_> {
    fn range(
        &self,
        bucket: Bucket,
        start: &[u8],
        end: Option<&[u8]>,
        limit: usize,
    ) -> BackendResult<Vec<KvPair>> {
        let Some(overlay) = self.pending.get(&bucket) else {
            return Ok(self.base.range(bucket, start, end, limit));
        };
        let Some(bounds) = bounds(start, end) else {
            return Ok(Vec::new());
        };

        // Merge the committed snapshot with the overlay; overlay entries
        // shadow committed ones with the same key.
        let mut committed = self.base.table(bucket).range::<[u8], _>(bounds).peekable();
        let mut buffered = overlay.range::<[u8], _>(bounds).peekable();
        let mut pairs = Vec::new();
        while limit == 0 || pairs.len() < limit {
            let take_committed = match (committed.peek(), buffered.peek()) {
                (None, None) => break,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (Some((ck, _)), Some((bk, _))) => ck < bk,
            };
            if take_committed {
                if let Some((k, v)) = committed.next() {
                    pairs.push((k.clone(), v.clone()));
                }
                continue;
            }
            if let Some((k, v)) = buffered.next() {
                if committed.peek().is_some_and(|(ck, _)| *ck == k) {
                    committed.next();
                }
                if let Some(v) = v {
                    pairs.push((k.clone(), v.clone()));
                }
            }
        }
        Ok(pairs)
    }

    fn get(&self, bucket: Bucket, key: &[u8]) -> BackendResult<Option<Vec<u8>>> {
        match self.pending.get(&bucket).and_then(|overlay| overlay.get(key)) {
            Some(buffered) => Ok(buffered.clone()),
            None => Ok(self.base.table(bucket).get(key).cloned()),
        }
    }
}

impl WriteTxn for MemoryWriteTxn<'_> {
    fn put(&mut self, bucket: Bucket, key: &[u8], value: &[u8]) -> BackendResult<()> {
        self.pending
            .entry(bucket)
            .or_default()
            .insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, bucket: Bucket, key: &[u8]) -> BackendResult<()> {
        self.pending
            .entry(bucket)
            .or_default()
            .insert(key.to_vec(), None);
        Ok(())
    }

    fn commit(self: Box<Self>) -> BackendResult<()> {
        if self.backend.take_injected_failure() {
            return Err(BackendError::Injected("commit".to_string()));
        }
        let MemoryWriteTxn {
            backend,
            base,
            pending,
            _guard,
        } = *self;
        drop(base);

        let mut committed = backend.committed.write();
        let tables = Arc::make_mut(&mut *committed);
        for (bucket, overlay) in pending {
            let table = tables.table_mut(bucket);
            for (key, value) in overlay {
                match value {
                    Some(value) => table.insert(key, value),
                    None => table.remove(&key),
                };
            }
        }
        backend.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_snapshot_isolated_from_later_commit() {
        let backend = MemoryBackend::new();

        let mut tx = backend.begin_write().unwrap();
        tx.put(Bucket::Key, b"a", b"1").unwrap();
        tx.commit().unwrap();

        let before = backend.begin_read().unwrap();

        let mut tx = backend.begin_write().unwrap();
        tx.put(Bucket::Key, b"a", b"2").unwrap();
        tx.put(Bucket::Key, b"b", b"3").unwrap();
        tx.commit().unwrap();

        assert_eq!(before.get(Bucket::Key, b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(before.get(Bucket::Key, b"b").unwrap(), None);

        let after = backend.begin_read().unwrap();
        assert_eq!(after.get(Bucket::Key, b"a").unwrap(), Some(b"2".to_vec()));
        assert_eq!(backend.commit_count(), 2);
    }

    #[test]
    fn test_injected_commit_failure_discards_writes() {
        let backend = MemoryBackend::new();
        backend.fail_next_commits(1);

        let mut tx = backend.begin_write().unwrap();
        tx.put(Bucket::Key, b"a", b"1").unwrap();
        let err = tx.commit().unwrap_err();
        assert!(matches!(err, BackendError::Injected(_)));
        assert!(backend.is_empty(Bucket::Key));

        let mut tx = backend.begin_write().unwrap();
        tx.put(Bucket::Key, b"a", b"1").unwrap();
        tx.commit().unwrap();
        assert_eq!(backend.len(Bucket::Key), 1);
    }

    #[test]
    fn test_range_half_open_with_limit() {
        let backend = MemoryBackend::new();
        let mut tx = backend.begin_write().unwrap();
        for k in [b"a", b"b", b"c"] {
            tx.put(Bucket::Meta, k, b"x").unwrap();
        }
        tx.commit().unwrap();

        let rtx = backend.begin_read().unwrap();
        assert_eq!(rtx.range(Bucket::Meta, b"a", Some(b"c"), 0).unwrap().len(), 2);
        assert_eq!(rtx.range(Bucket::Meta, b"b", None, 0).unwrap().len(), 2);
        assert_eq!(rtx.range(Bucket::Meta, b"a", None, 2).unwrap().len(), 2);
        assert!(rtx.range(Bucket::Key, b"", None, 0).unwrap().is_empty());
    }

    #[test]
    fn test_write_txn_reads_through_overlay() {
        let backend = MemoryBackend::new();
        let mut tx = backend.begin_write().unwrap();
        for k in [b"a", b"b", b"c", b"d"] {
            tx.put(Bucket::Key, k, b"old").unwrap();
        }
        tx.commit().unwrap();

        let mut tx = backend.begin_write().unwrap();
        tx.delete(Bucket::Key, b"b").unwrap();
        tx.put(Bucket::Key, b"c", b"new").unwrap();
        tx.put(Bucket::Key, b"bb", b"new").unwrap();

        let pairs = tx.range(Bucket::Key, b"a", None, 0).unwrap();
        let keys: Vec<&[u8]> = pairs.iter().map(|(k, _)| k.as_slice()).collect();
        let expected: [&[u8]; 4] = [b"a", b"bb", b"c", b"d"];
        assert_eq!(keys, expected);
        assert_eq!(pairs[2].1, b"new".to_vec());
        assert_eq!(tx.range(Bucket::Key, b"a", None, 2).unwrap().len(), 2);
        assert_eq!(tx.get(Bucket::Key, b"b").unwrap(), None);
        assert_eq!(tx.get(Bucket::Key, b"d").unwrap(), Some(b"old".to_vec()));

        // Uncommitted writes are invisible to readers.
        let rtx = backend.begin_read().unwrap();
        assert_eq!(rtx.get(Bucket::Key, b"b").unwrap(), Some(b"old".to_vec()));

        tx.commit().unwrap();
        assert_eq!(backend.len(Bucket::Key), 4);
        assert_eq!(rtx.get(Bucket::Key, b"c").unwrap(), Some(b"old".to_vec()));
        let after = backend.begin_read().unwrap();
        assert_eq!(after.get(Bucket::Key, b"c").unwrap(), Some(b"new".to_vec()));
    }
}
