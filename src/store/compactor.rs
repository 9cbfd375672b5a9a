//! Compactor - Background deletion of superseded revisions
//!
//! One named worker thread consumes compaction jobs in FIFO order. For a job
//! at revision `R`:
//!
//! 1. compact the tree index at `R`, yielding the keep-set
//! 2. scan every record at or below `R` in batches of
//!    `compaction_batch_limit`, deleting every record not in the keep-set,
//!    one backend transaction per batch, pausing between batches
//! 3. once every batch has committed, persist `R` as the finished-compaction
//!    marker in its own transaction
//!
//! A job stops between batches when its caller's context is cancelled, a
//! newer job supersedes it, or the store shuts down. Committed batches only
//! ever delete records the keep-set does not need, so a stopped job leaves
//! the backend consistent and a later job to the same or a higher revision
//! completes the work.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::backend::Bucket;
use crate::mvcc::{BucketKey, Revision};
use crate::observability::{log_revision_event, Event};

use super::errors::{StoreError, StoreResult};
use super::kvstore::StoreInner;
use super::meta;

const WORKER_NAME: &str = "revstore-compactor";

/// One-shot result slot shared by a job and its handles.
#[derive(Debug, Default)]
struct Completion {
    result: Mutex<Option<StoreResult<()>>>,
    ready: Condvar,
}

impl Completion {
    fn resolve(&self, result: StoreResult<()>) {
        let mut slot = self.result.lock();
        if slot.is_none() {
            *slot = Some(result);
        }
        self.ready.notify_all();
    }
}

/// Tracks one scheduled compaction.
#[derive(Clone, Debug)]
pub struct CompactionHandle {
    rev: i64,
    completion: Arc<Completion>,
    token: CancellationToken,
}

impl CompactionHandle {
    /// Target revision of the compaction.
    pub fn revision(&self) -> i64 {
        self.rev
    }

    /// Blocks until the compaction finishes, fails or is cancelled.
    pub fn wait(&self) -> StoreResult<()> {
        let mut slot = self.completion.result.lock();
        loop {
            if let Some(result) = slot.as_ref() {
                return result.clone();
            }
            self.completion.ready.wait(&mut slot);
        }
    }

    /// Like [`CompactionHandle::wait`], giving up after `timeout`.
    ///
    /// Returns `None` if the compaction is still running.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<StoreResult<()>> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.completion.result.lock();
        loop {
            if let Some(result) = slot.as_ref() {
                return Some(result.clone());
            }
            if self
                .completion
                .ready
                .wait_until(&mut slot, deadline)
                .timed_out()
            {
                return (*slot).clone();
            }
        }
    }

    /// Returns true once the outcome is known.
    pub fn is_finished(&self) -> bool {
        self.completion.result.lock().is_some()
    }

    /// Asks the compaction to stop at the next batch boundary.
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

struct CompactionJob {
    rev: i64,
    ctx: CancellationToken,
    token: CancellationToken,
    completion: Arc<Completion>,
}

impl CompactionJob {
    fn is_cancelled(&self) -> bool {
        self.ctx.is_cancelled() || self.token.is_cancelled()
    }
}

/// Owner of the compaction worker thread.
pub(crate) struct Compactor {
    sender: Mutex<Option<Sender<CompactionJob>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    latest: Mutex<Option<CancellationToken>>,
    shutdown: CancellationToken,
}

impl Compactor {
    /// Spawns the worker. It stops when the store's stop token fires.
    pub(crate) fn start(inner: Arc<StoreInner>) -> StoreResult<Self> {
        let shutdown = inner.stop.clone();
        let (sender, receiver) = mpsc::channel();
        let worker = thread::Builder::new()
            .name(WORKER_NAME.to_string())
            .spawn(move || run_worker(inner, receiver))
            .map_err(|e| StoreError::Worker(e.to_string()))?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            latest: Mutex::new(None),
            shutdown,
        })
    }

    /// Queues a compaction to `rev`, superseding any earlier one.
    pub(crate) fn schedule(&self, rev: i64, ctx: CancellationToken) -> CompactionHandle {
        let token = self.shutdown.child_token();
        if let Some(previous) = self.latest.lock().replace(token.clone()) {
            previous.cancel();
        }

        let completion = Arc::new(Completion::default());
        let job = CompactionJob {
            rev,
            ctx,
            token: token.clone(),
            completion: Arc::clone(&completion),
        };

        let unsent = match self.sender.lock().as_ref() {
            Some(sender) => sender.send(job).err().map(|e| e.0),
            None => Some(job),
        };
        if let Some(job) = unsent {
            job.completion.resolve(Err(StoreError::Closed));
        }

        CompactionHandle {
            rev,
            completion,
            token,
        }
    }

    /// Cancels queued and running jobs and joins the worker.
    pub(crate) fn shutdown(&self) {
        self.shutdown.cancel();
        self.sender.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                error!(event = Event::CompactionFailed.as_str(), "compaction worker panicked");
            }
        }
    }
}

fn run_worker(inner: Arc<StoreInner>, jobs: Receiver<CompactionJob>) {
    for job in jobs {
        let result = if job.is_cancelled() {
            Err(StoreError::Cancelled)
        } else {
            compact(&inner, &job)
        };

        match &result {
            Ok(()) => inner.metrics.increment_compactions(),
            Err(StoreError::Cancelled) => {
                inner.metrics.increment_compactions_cancelled();
                log_revision_event(Event::CompactionCancelled, job.rev);
            }
            Err(e) => {
                error!(event = Event::CompactionFailed.as_str(), rev = job.rev, error = %e);
            }
        }
        job.completion.resolve(result);
    }
    debug!("compaction worker stopped");
}

/// Runs one compaction job to completion or cancellation.
fn compact(inner: &StoreInner, job: &CompactionJob) -> StoreResult<()> {
    let rev = job.rev;
    let started = Instant::now();

    let keep = inner.index.compact(rev);

    // Earlier compactions may have kept records this one supersedes, so the
    // scan always starts at the first record.
    let mut start = Revision::main(0).to_bytes();
    let end = Revision::main(rev + 1).to_bytes();
    let batch_limit = inner.config.compaction_batch_limit;
    let mut total_deleted = 0u64;

    loop {
        if job.is_cancelled() {
            return Err(StoreError::Cancelled);
        }

        let mut tx = inner.backend.begin_write()?;
        let batch = tx.range(Bucket::Key, &start, Some(&end), batch_limit)?;

        let mut deleted = 0u64;
        for (key, _) in &batch {
            let bucket_key = BucketKey::try_from_bytes(key).map_err(|e| {
                StoreError::corruption(format!("malformed record key during compaction: {}", e))
            })?;
            if !keep.contains(&bucket_key.revision) {
                tx.delete(Bucket::Key, key)?;
                deleted += 1;
            }
        }

        let done = batch.len() < batch_limit;
        tx.commit()?;

        total_deleted += deleted;
        inner.metrics.add_compacted_records(deleted);
        debug!(
            event = Event::CompactionBatch.as_str(),
            rev,
            scanned = batch.len(),
            deleted
        );

        if done {
            break;
        }
        if let Some((last, _)) = batch.last() {
            // Smallest key sorting after `last`.
            start = last.clone();
            start.push(0);
        }
        thread::sleep(inner.config.compaction_sleep_interval());
    }

    let mut tx = inner.backend.begin_write()?;
    meta::write_marker(tx.as_mut(), meta::FINISHED_COMPACT_KEY, rev)?;
    tx.commit()?;
    inner.set_finished_compact(rev);
    info!(
        event = Event::CompactionFinished.as_str(),
        rev,
        deleted = total_deleted,
        kept = keep.len(),
        took_ms = started.elapsed().as_millis() as u64,
    );
    Ok(())
}
