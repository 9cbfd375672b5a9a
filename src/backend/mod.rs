//! Backend transaction layer
//!
//! The store persists through a durable, ordered byte-range key-value store
//! exposed as a capability interface:
//! - [`Backend`] opens read and write transactions
//! - [`ReadTxn`] ranges over a bucket from a consistent snapshot
//! - [`WriteTxn`] buffers puts/deletes that become visible atomically on commit
//!
//! Dropping a write transaction without committing aborts it. Read
//! transactions never observe a partially applied write transaction.
//!
//! Two engines implement it: [`RedbBackend`] (durable, file-backed) and
//! [`MemoryBackend`] (ephemeral, with commit fault injection).

mod durable;
mod errors;
mod memory;

pub use durable::RedbBackend;
pub use errors::{BackendError, BackendResult};
pub use memory::MemoryBackend;

/// A logical namespace inside the backend.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Bucket {
    /// Revision-keyed key-value records.
    Key,
    /// Store metadata such as compaction markers.
    Meta,
}

impl Bucket {
    /// Every bucket, in a fixed order.
    pub const ALL: [Bucket; 2] = [Bucket::Key, Bucket::Meta];

    /// Stable on-disk name of the bucket.
    pub fn name(&self) -> &'static str {
        match self {
            Bucket::Key => "key",
            Bucket::Meta => "meta",
        }
    }
}

/// A key/value pair read from a bucket.
pub type KvPair = (Vec<u8>, Vec<u8>);

/// A consistent read view of the backend.
pub trait ReadTxn {
    /// Returns pairs with keys in `[start, end)` in ascending key order.
    ///
    /// `end = None` scans to the end of the bucket. `limit = 0` means no
    /// limit.
    fn range(
        &self,
        bucket: Bucket,
        start: &[u8],
        end: Option<&[u8]>,
        limit: usize,
    ) -> BackendResult<Vec<KvPair>>;

    /// Returns the value stored under `key`.
    fn get(&self, bucket: Bucket, key: &[u8]) -> BackendResult<Option<Vec<u8>>> {
        let mut pairs = self.range(bucket, key, None, 1)?;
        match pairs.pop() {
            Some((k, v)) if k == key => Ok(Some(v)),
            _ => Ok(None),
        }
    }
}

/// An exclusive write transaction.
///
/// Reads through a write transaction observe its own buffered writes.
pub trait WriteTxn: ReadTxn {
    /// Stores `value` under `key`.
    fn put(&mut self, bucket: Bucket, key: &[u8], value: &[u8]) -> BackendResult<()>;

    /// Removes `key`; removing an absent key is not an error.
    fn delete(&mut self, bucket: Bucket, key: &[u8]) -> BackendResult<()>;

    /// Atomically publishes every buffered write.
    fn commit(self: Box<Self>) -> BackendResult<()>;
}

/// A durable ordered byte store.
///
/// Implementations serialize write transactions: `begin_write` blocks while
/// another write transaction is open.
pub trait Backend: Send + Sync {
    /// Opens a snapshot read transaction.
    fn begin_read(&self) -> BackendResult<Box<dyn ReadTxn + '_>>;

    /// Opens the single write transaction.
    fn begin_write(&self) -> BackendResult<Box<dyn WriteTxn + '_>>;
}
