//! TxnWrite - Exclusive write transaction
//!
//! All changes of one transaction share main revision `current + 1`; the
//! sub revision counts changes from 0. The tree index is updated as each
//! change is made so later reads in the same transaction observe it, and
//! every index change is recorded for rollback:
//!
//! ```text
//! put/delete ──► backend txn (buffered) ──► tree index ──► undo log
//!                                                             │
//! end() ──► commit ok  ──► publish revision, apply lease ops  │
//!       └─► commit err ──► revert index newest first ◄────────┘
//! ```
//!
//! Readers never observe the uncommitted main revision: they read at or
//! below the published current revision.

use parking_lot::MutexGuard;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::backend::{Bucket, WriteTxn};
use crate::lease::LeaseId;
use crate::mvcc::{BucketKey, KeyValue, Revision};
use crate::observability::Event;
use crate::storage::KvRecord;

use super::errors::{StoreError, StoreResult};
use super::kvstore::StoreInner;
use super::meta;
use super::request::{RangeOptions, RangeResult, RequestOp, ResponseOp, TxnRequest};

#[derive(Clone, Debug, PartialEq, Eq)]
enum LeaseOp {
    Attach(LeaseId, Vec<u8>),
    Detach(LeaseId, Vec<u8>),
}

/// An open write transaction. Dropping it without [`TxnWrite::end`]
/// discards every change.
pub struct TxnWrite<'a> {
    inner: &'a StoreInner,
    tx: Option<Box<dyn WriteTxn + 'a>>,
    begin_rev: i64,
    changes: Vec<KeyValue>,
    undo: Vec<(Vec<u8>, Revision)>,
    lease_ops: Vec<LeaseOp>,
    ctx: CancellationToken,
    _writer: MutexGuard<'a, ()>,
}

impl<'a> TxnWrite<'a> {
    pub(crate) fn begin(inner: &'a StoreInner) -> StoreResult<Self> {
        inner.check_open()?;
        let writer = inner.writer.lock();
        let tx = inner.backend.begin_write()?;
        Ok(Self {
            inner,
            tx: Some(tx),
            begin_rev: inner.watermarks().current,
            changes: Vec::new(),
            undo: Vec::new(),
            lease_ops: Vec::new(),
            ctx: CancellationToken::new(),
            _writer: writer,
        })
    }

    /// Store revision when the transaction began.
    pub fn begin_rev(&self) -> i64 {
        self.begin_rev
    }

    /// Revision reads inside this transaction observe.
    pub fn rev(&self) -> i64 {
        if self.changes.is_empty() {
            self.begin_rev
        } else {
            self.begin_rev + 1
        }
    }

    /// Changes made so far, in order.
    pub fn changes(&self) -> &[KeyValue] {
        &self.changes
    }

    fn next_revision(&self) -> Revision {
        Revision::new(self.begin_rev + 1, self.changes.len() as i64)
    }

    fn backend_tx(&mut self) -> StoreResult<&mut Box<dyn WriteTxn + 'a>> {
        // Only `end` takes the transaction, and it consumes `self`.
        self.tx
            .as_mut()
            .ok_or_else(|| StoreError::corruption("write transaction already finished"))
    }

    /// Lease of the record at `rev`, as seen by this transaction.
    fn lease_at(&mut self, rev: Revision) -> StoreResult<LeaseId> {
        let inner = self.inner;
        let tx = self.backend_tx()?;
        match inner.read_record(tx.as_ref(), rev)? {
            Some(kv) => Ok(kv.lease),
            None => Err(StoreError::corruption(format!(
                "index references missing record at revision {}",
                rev
            ))),
        }
    }

    /// Reads through this transaction, observing its own changes.
    pub fn range(
        &mut self,
        key: &[u8],
        end: Option<&[u8]>,
        opts: RangeOptions,
    ) -> StoreResult<RangeResult> {
        let current = self.rev();
        let inner = self.inner;
        let ctx = self.ctx.clone();
        let tx = self.backend_tx()?;
        inner.range_in(&ctx, tx.as_ref(), key, end, &opts, current)
    }

    /// Writes `value` under `key`.
    pub fn put(&mut self, key: &[u8], value: &[u8], lease: LeaseId) -> StoreResult<()> {
        if !lease.is_none() && !self.inner.lessor.lookup(lease) {
            return Err(StoreError::LeaseNotFound(lease));
        }

        let rev = self.next_revision();
        let (create_revision, version, old_lease) = match self.inner.index.get(key, rev.main) {
            Ok((modified, created, ver)) => (created.main, ver + 1, self.lease_at(modified)?),
            Err(_) => (rev.main, 1, LeaseId::NONE),
        };

        let kv = KeyValue {
            key: key.to_vec(),
            create_revision,
            mod_revision: rev.main,
            version,
            value: value.to_vec(),
            lease,
        };
        let record = KvRecord::serialize(&kv);
        self.backend_tx()?
            .put(Bucket::Key, &BucketKey::new(rev).to_bytes(), &record)?;

        self.inner.index.put(key, rev);
        self.undo.push((key.to_vec(), rev));
        self.changes.push(kv);

        if !old_lease.is_none() && old_lease != lease {
            self.lease_ops.push(LeaseOp::Detach(old_lease, key.to_vec()));
        }
        if !lease.is_none() {
            self.lease_ops.push(LeaseOp::Attach(lease, key.to_vec()));
        }
        Ok(())
    }

    /// Deletes every key in the range visible to this transaction, returning
    /// how many were deleted.
    pub fn delete_range(&mut self, key: &[u8], end: Option<&[u8]>) -> StoreResult<usize> {
        let (entries, _) = self.inner.index.range_keys(key, end, self.rev(), 0);
        for entry in &entries {
            let old_lease = self.lease_at(entry.modified)?;
            self.delete(&entry.key, old_lease)?;
        }
        Ok(entries.len())
    }

    fn delete(&mut self, key: &[u8], old_lease: LeaseId) -> StoreResult<()> {
        let rev = self.next_revision();
        let kv = KeyValue {
            key: key.to_vec(),
            mod_revision: rev.main,
            ..KeyValue::default()
        };
        let record = KvRecord::serialize(&kv);
        self.backend_tx()?
            .put(Bucket::Key, &BucketKey::tombstone(rev).to_bytes(), &record)?;

        self.inner.index.tombstone(key, rev).map_err(|e| {
            StoreError::corruption(format!(
                "tombstone of visible key {:?} at {}: {}",
                String::from_utf8_lossy(key),
                rev,
                e
            ))
        })?;
        self.undo.push((key.to_vec(), rev));
        self.changes.push(kv);

        if !old_lease.is_none() {
            self.lease_ops.push(LeaseOp::Detach(old_lease, key.to_vec()));
        }
        Ok(())
    }

    /// Evaluates the request's comparisons and runs the chosen branch.
    ///
    /// Leases named by the chosen branch are checked before any operation
    /// runs, so a missing lease leaves the transaction untouched.
    pub fn apply(&mut self, req: &TxnRequest) -> StoreResult<(bool, Vec<ResponseOp>)> {
        let mut succeeded = true;
        for cmp in &req.compare {
            let res = self.range(
                &cmp.key,
                cmp.range_end.as_deref(),
                RangeOptions::default(),
            )?;
            if !cmp.evaluate(&res.kvs) {
                succeeded = false;
                break;
            }
        }

        let ops = if succeeded { &req.success } else { &req.failure };
        for op in ops {
            if let RequestOp::Put { lease, .. } = op {
                if !lease.is_none() && !self.inner.lessor.lookup(*lease) {
                    return Err(StoreError::LeaseNotFound(*lease));
                }
            }
        }

        let mut responses = Vec::with_capacity(ops.len());
        for op in ops {
            let response = match op {
                RequestOp::Range {
                    key,
                    range_end,
                    options,
                } => ResponseOp::Range(self.range(key, range_end.as_deref(), *options)?),
                RequestOp::Put { key, value, lease } => {
                    self.put(key, value, *lease)?;
                    ResponseOp::Put
                }
                RequestOp::DeleteRange { key, range_end } => ResponseOp::DeleteRange {
                    deleted: self.delete_range(key, range_end.as_deref())?,
                },
            };
            responses.push(response);
        }
        Ok((succeeded, responses))
    }

    /// Commits the transaction and returns the store revision afterwards.
    ///
    /// A transaction without changes commits nothing and keeps the
    /// revision. On commit failure every index change is reverted.
    pub fn end(mut self) -> StoreResult<i64> {
        let Some(mut tx) = self.tx.take() else {
            return Err(StoreError::corruption("write transaction already finished"));
        };
        if self.changes.is_empty() {
            return Ok(self.begin_rev);
        }

        let rev = self.begin_rev + 1;
        let committed = meta::write_marker(tx.as_mut(), meta::CURRENT_REV_KEY, rev)
            .and_then(|_| tx.commit().map_err(StoreError::from));
        if let Err(e) = committed {
            error!(event = Event::BackendCommitFailed.as_str(), rev, error = %e);
            self.rollback();
            return Err(e);
        }
        self.undo.clear();

        self.inner.set_current(rev);
        for op in self.lease_ops.drain(..) {
            let result = match &op {
                LeaseOp::Attach(lease, key) => self.inner.lessor.attach(*lease, key),
                LeaseOp::Detach(lease, key) => self.inner.lessor.detach(*lease, key),
            };
            if let Err(e) = result {
                warn!(?op, error = %e, "lease update after commit failed");
            }
        }

        let metrics = &self.inner.metrics;
        let deletes = self.changes.iter().filter(|kv| kv.version == 0).count() as u64;
        metrics.add_puts(self.changes.len() as u64 - deletes);
        metrics.add_deletes(deletes);
        metrics.increment_write_txns();
        debug!(
            event = Event::WriteCommit.as_str(),
            rev,
            changes = self.changes.len()
        );
        Ok(rev)
    }

    fn rollback(&mut self) {
        if self.undo.is_empty() {
            return;
        }
        for (key, rev) in self.undo.drain(..).rev() {
            if let Err(e) = self.inner.index.revert(&key, rev) {
                error!(
                    event = Event::WriteRollback.as_str(),
                    key = %String::from_utf8_lossy(&key),
                    %rev,
                    error = %e,
                    "index revert failed"
                );
            }
        }
        self.inner.metrics.increment_rollbacks();
        debug!(event = Event::WriteRollback.as_str(), rev = self.begin_rev + 1);
    }
}

impl Drop for TxnWrite<'_> {
    fn drop(&mut self) {
        // Uncommitted: the backend transaction aborts on drop, the index
        // must follow.
        self.rollback();
    }
}
