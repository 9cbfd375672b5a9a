//! MVCC store
//!
//! The public façade of the crate:
//! - [`Store`] serves `put`, `delete_range`, `txn_apply`, `range` and
//!   `compact`, and restores itself from its backend on open
//! - [`TxnWrite`] is the exclusive write transaction every write runs in
//! - [`CompactionHandle`] tracks a background compaction
//!
//! # Watermarks
//!
//! ```text
//!   finished_compact <= scheduled_compact <= current
//!   ───────┬──────────────────┬──────────────┬─────►  revision
//!          │  deletion        │  readable    │
//!          │  in progress     │  history     │
//! ```
//!
//! Reads below `scheduled_compact` fail with `Compacted`; reads above
//! `current` fail with `FutureRevision`.

mod compactor;
mod config;
mod errors;
mod kvstore;
pub(crate) mod meta;
mod request;
mod txn;

pub use compactor::CompactionHandle;
pub use config::StoreConfig;
pub use errors::{Severity, StoreError, StoreResult};
pub use kvstore::{Store, Watermarks};
pub(crate) use kvstore::INITIAL_REVISION;
pub use request::{
    Compare, CompareResult, CompareTarget, RangeOptions, RangeResult, RequestOp, ResponseOp,
    TxnRequest, TxnResponse,
};
pub use txn::TxnWrite;
