//! revstore - A multi-version key-value storage core
//!
//! Keeps every historical revision of every key, answers point and range
//! reads at any retained revision, and reclaims superseded revisions with a
//! background compactor.
//!
//! # Layers (leaves first)
//!
//! - [`mvcc`]: revision codec, per-key generations, ordered tree index
//! - [`backend`]: durable ordered byte store behind a transaction interface
//! - [`storage`]: checksummed record codec for persisted key-values
//! - [`lease`]: the narrow lease registry interface the store consumes
//! - [`store`]: the façade serving writes, reads and compaction
//! - [`recovery`]: index rebuild from the backend on open
//! - [`observability`]: typed events and counters
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use revstore::backend::RedbBackend;
//! use revstore::lease::{LeaseId, NopLessor};
//! use revstore::store::{RangeOptions, Store, StoreConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let backend = Arc::new(RedbBackend::open("/var/lib/revstore/db.redb")?);
//! let store = Store::open(backend, Arc::new(NopLessor), StoreConfig::default())?;
//!
//! let rev = store.put(b"foo", b"bar", LeaseId::NONE)?;
//! let res = store.range(&CancellationToken::new(), b"foo", None, RangeOptions::at(rev))?;
//! store.compact(&CancellationToken::new(), rev)?.wait()?;
//! ```

pub mod backend;
pub mod lease;
pub mod mvcc;
pub mod observability;
pub mod recovery;
pub mod storage;
pub mod store;
