//! Restore tests
//!
//! - A reopened store reads every revision exactly as before
//! - Watermarks and leases survive a restart
//! - Interrupted compactions resume
//! - Inconsistent backends are rejected

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use revstore::backend::{Backend, Bucket, MemoryBackend, RedbBackend};
use revstore::lease::{LeaseId, MemoryLessor, NopLessor};
use revstore::mvcc::{Revision, RANGE_END_ALL};
use revstore::store::{RangeOptions, Store, StoreConfig, StoreError};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Helper Functions
// =============================================================================

type Snapshot = BTreeMap<Vec<u8>, (Vec<u8>, i64, i64, i64)>;

fn open_redb(dir: &TempDir) -> Store {
    let backend = RedbBackend::open(dir.path().join("revstore.redb")).unwrap();
    Store::open(Arc::new(backend), Arc::new(NopLessor), StoreConfig::default()).unwrap()
}

fn snapshot(store: &Store, rev: i64) -> Result<Snapshot, StoreError> {
    let res = store.range(
        &CancellationToken::new(),
        b"",
        Some(RANGE_END_ALL),
        RangeOptions::at(rev),
    )?;
    Ok(res
        .kvs
        .into_iter()
        .map(|kv| {
            (
                kv.key,
                (kv.value, kv.create_revision, kv.mod_revision, kv.version),
            )
        })
        .collect())
}

fn write_meta(backend: &dyn Backend, key: &[u8], rev: i64) {
    let mut tx = backend.begin_write().unwrap();
    tx.put(Bucket::Meta, key, &Revision::main(rev).to_bytes())
        .unwrap();
    tx.commit().unwrap();
}

fn wait_for_compaction(store: &Store, rev: i64) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while store.compact_rev() < rev {
        assert!(Instant::now() < deadline, "compaction to {} never finished", rev);
        thread::sleep(Duration::from_millis(5));
    }
}

// =============================================================================
// Restore Fidelity
// =============================================================================

/// Every revision reads identically before and after reopening.
#[test]
fn test_reopen_preserves_every_revision() {
    let dir = TempDir::new().unwrap();
    let mut rng = StdRng::seed_from_u64(42);

    let (current, before) = {
        let store = open_redb(&dir);
        for step in 0..80 {
            let key = format!("key/{}", rng.gen_range(0..10)).into_bytes();
            if rng.gen_bool(0.8) {
                store
                    .put(&key, format!("{}", step).as_bytes(), LeaseId::NONE)
                    .unwrap();
            } else {
                store.delete_range(&key, None).unwrap();
            }
        }
        let current = store.rev();
        let before: Vec<Snapshot> = (1..=current)
            .map(|rev| snapshot(&store, rev).unwrap())
            .collect();
        store.close();
        (current, before)
    };

    let store = open_redb(&dir);
    assert_eq!(store.rev(), current);
    for (rev, expected) in (1..=current).zip(before) {
        assert_eq!(snapshot(&store, rev).unwrap(), expected, "revision {}", rev);
    }
    assert!(store.metrics().restored_records > 0);
}

/// Writes continue from the restored revision.
#[test]
fn test_writes_continue_after_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let store = open_redb(&dir);
        store.put(b"a", b"1", LeaseId::NONE).unwrap();
        store.put(b"a", b"2", LeaseId::NONE).unwrap();
    }

    let store = open_redb(&dir);
    assert_eq!(store.put(b"a", b"3", LeaseId::NONE).unwrap(), 4);
    let kv = &snapshot(&store, 0).unwrap()[&b"a".to_vec()];
    assert_eq!(kv, &(b"3".to_vec(), 2, 4, 3));
}

/// Put at 2, 3, 4, delete at 5, compact at 5: the restart keeps revision 5
/// even though no record at 5 survives.
#[test]
fn test_compact_all_and_restore() {
    let dir = TempDir::new().unwrap();
    {
        let store = open_redb(&dir);
        store.put(b"foo", b"bar0", LeaseId::NONE).unwrap();
        store.put(b"foo", b"bar1", LeaseId::NONE).unwrap();
        store.put(b"foo", b"bar2", LeaseId::NONE).unwrap();
        assert_eq!(store.delete_range(b"foo", None).unwrap(), (1, 5));

        store
            .compact(&CancellationToken::new(), 5)
            .unwrap()
            .wait()
            .unwrap();
    }

    let store = open_redb(&dir);
    assert_eq!(store.rev(), 5);
    assert_eq!(store.compact_rev(), 5);
    assert!(snapshot(&store, 0).unwrap().is_empty());
    assert!(matches!(snapshot(&store, 4), Err(StoreError::Compacted { .. })));
}

/// Leased keys are re-attached to the registry on restore.
#[test]
fn test_leases_reattached() {
    let backend = Arc::new(MemoryBackend::new());
    let lease = LeaseId::new(7);
    {
        let lessor = Arc::new(MemoryLessor::new());
        lessor.grant(lease);
        let store = Store::open(backend.clone(), lessor, StoreConfig::default()).unwrap();
        store.put(b"a", b"1", lease).unwrap();
        store.put(b"b", b"1", lease).unwrap();
        store.put(b"b", b"2", LeaseId::NONE).unwrap();
    }

    let lessor = Arc::new(MemoryLessor::new());
    lessor.grant(lease);
    let _store = Store::open(backend, lessor.clone(), StoreConfig::default()).unwrap();
    assert_eq!(lessor.keys(lease), vec![b"a".to_vec()]);
}

/// Restore reads the backend in chunks without changing the outcome.
#[test]
fn test_restore_in_small_chunks() {
    let backend = Arc::new(MemoryBackend::new());
    {
        let store = Store::open(backend.clone(), Arc::new(NopLessor), StoreConfig::default())
            .unwrap();
        for i in 0..25 {
            store
                .put(format!("k{}", i % 4).as_bytes(), b"v", LeaseId::NONE)
                .unwrap();
        }
        store.delete_range(b"k0", None).unwrap();
    }

    let config = StoreConfig {
        restore_chunk_size: 3,
        ..StoreConfig::default()
    };
    let store = Store::open(backend, Arc::new(NopLessor), config).unwrap();
    assert_eq!(store.rev(), 27);
    assert_eq!(store.metrics().restored_records, 26);
    assert_eq!(snapshot(&store, 0).unwrap().len(), 3);
}

// =============================================================================
// Compaction Resumption
// =============================================================================

/// A compaction scheduled but not finished before shutdown resumes on open.
#[test]
fn test_interrupted_compaction_resumes() {
    let backend = Arc::new(MemoryBackend::new());
    {
        let store = Store::open(backend.clone(), Arc::new(NopLessor), StoreConfig::default())
            .unwrap();
        for i in 0..6 {
            store.put(b"k", format!("{}", i).as_bytes(), LeaseId::NONE).unwrap();
        }
    }
    // Crash after the schedule was persisted, before any batch ran.
    write_meta(backend.as_ref(), b"scheduledCompactRev", 5);
    assert_eq!(backend.len(Bucket::Key), 6);

    let store = Store::open(backend.clone(), Arc::new(NopLessor), StoreConfig::default()).unwrap();
    assert_eq!(store.scheduled_compact_rev(), 5);
    assert!(matches!(snapshot(&store, 4), Err(StoreError::Compacted { .. })));

    wait_for_compaction(&store, 5);
    assert_eq!(backend.len(Bucket::Key), 3);
    assert_eq!(snapshot(&store, 5).unwrap()[&b"k".to_vec()].0, b"3".to_vec());
}

// =============================================================================
// Corruption Detection
// =============================================================================

#[test]
fn test_malformed_record_key_rejected() {
    let backend = Arc::new(MemoryBackend::new());
    {
        let mut tx = backend.begin_write().unwrap();
        tx.put(Bucket::Key, b"not-a-revision", b"junk").unwrap();
        tx.commit().unwrap();
    }

    let err = Store::open(backend, Arc::new(NopLessor), StoreConfig::default())
        .err()
        .expect("open must fail");
    assert!(matches!(err, StoreError::Corruption(_)));
    assert!(err.is_fatal());
}

#[test]
fn test_finished_beyond_scheduled_rejected() {
    let backend = Arc::new(MemoryBackend::new());
    {
        let store = Store::open(backend.clone(), Arc::new(NopLessor), StoreConfig::default())
            .unwrap();
        store.put(b"k", b"1", LeaseId::NONE).unwrap();
        store.put(b"k", b"2", LeaseId::NONE).unwrap();
    }
    write_meta(backend.as_ref(), b"scheduledCompactRev", 2);
    write_meta(backend.as_ref(), b"finishedCompactRev", 3);

    let result = Store::open(backend, Arc::new(NopLessor), StoreConfig::default());
    assert!(matches!(result, Err(StoreError::Corruption(_))));
}

// =============================================================================
// Backend Swap
// =============================================================================

/// Restoring from another backend replaces all in-memory state.
#[test]
fn test_restore_swaps_backend() {
    let other = Arc::new(MemoryBackend::new());
    {
        let store = Store::open(other.clone(), Arc::new(NopLessor), StoreConfig::default())
            .unwrap();
        store.put(b"remote", b"1", LeaseId::NONE).unwrap();
        store.put(b"remote", b"2", LeaseId::NONE).unwrap();
        store.put(b"more", b"1", LeaseId::NONE).unwrap();
    }

    let mut store = Store::open(
        Arc::new(MemoryBackend::new()),
        Arc::new(NopLessor),
        StoreConfig::default(),
    )
    .unwrap();
    store.put(b"local", b"1", LeaseId::NONE).unwrap();

    store.restore(other).unwrap();
    assert_eq!(store.rev(), 4);
    let state = snapshot(&store, 0).unwrap();
    assert_eq!(
        state.keys().cloned().collect::<Vec<_>>(),
        vec![b"more".to_vec(), b"remote".to_vec()]
    );
    assert_eq!(store.put(b"local", b"2", LeaseId::NONE).unwrap(), 5);
}
