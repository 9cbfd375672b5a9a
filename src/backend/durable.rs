//! redb-backed durable engine
//!
//! Each [`Bucket`] maps to one redb table of raw byte keys and values.
//! redb serializes write transactions itself, so `begin_write` blocks while
//! another writer is open.

use std::path::{Path, PathBuf};

use redb::{Database, ReadableTable, TableDefinition};
use tracing::debug;

use super::{Backend, BackendError, BackendResult, Bucket, KvPair, ReadTxn, WriteTxn};

const KEY_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("key");
const META_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("meta");

fn table(bucket: Bucket) -> TableDefinition<'static, &'static [u8], &'static [u8]> {
    match bucket {
        Bucket::Key => KEY_TABLE,
        Bucket::Meta => META_TABLE,
    }
}

impl From<redb::TransactionError> for BackendError {
    fn from(err: redb::TransactionError) -> Self {
        BackendError::Transaction(err.to_string())
    }
}

impl From<redb::TableError> for BackendError {
    fn from(err: redb::TableError) -> Self {
        BackendError::Bucket(err.to_string())
    }
}

impl From<redb::StorageError> for BackendError {
    fn from(err: redb::StorageError) -> Self {
        BackendError::Storage(err.to_string())
    }
}

impl From<redb::CommitError> for BackendError {
    fn from(err: redb::CommitError) -> Self {
        BackendError::Commit(err.to_string())
    }
}

/// Durable backend stored in a single redb file.
pub struct RedbBackend {
    db: Database,
    path: PathBuf,
}

impl RedbBackend {
    /// Creates or opens the database file at `path`.
    ///
    /// Missing parent directories are created and every bucket is
    /// initialized so read transactions never see a missing table.
    pub fn open(path: impl AsRef<Path>) -> BackendResult<Self> {
        let path = path.as_ref().to_path_buf();
        let open_err = |message: String| BackendError::Open {
            path: path.display().to_string(),
            message,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| open_err(e.to_string()))?;
        }

        let db = Database::create(&path).map_err(|e| open_err(e.to_string()))?;

        let write_txn = db.begin_write()?;
        for bucket in Bucket::ALL {
            write_txn.open_table(table(bucket))?;
        }
        write_txn.commit()?;

        debug!(path = %path.display(), "opened redb backend");
        Ok(Self { db, path })
    }

    /// Location of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Backend for RedbBackend {
    fn begin_read(&self) -> BackendResult<Box<dyn ReadTxn + '_>> {
        Ok(Box::new(RedbReadTxn {
            txn: self.db.begin_read()?,
        }))
    }

    fn begin_write(&self) -> BackendResult<Box<dyn WriteTxn + '_>> {
        Ok(Box::new(RedbWriteTxn {
            txn: self.db.begin_write()?,
        }))
    }
}

fn collect_range<T>(
    table: &T,
    start: &[u8],
    end: Option<&[u8]>,
    limit: usize,
) -> BackendResult<Vec<KvPair>>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    let iter = match end {
        Some(end) if end <= start => return Ok(Vec::new()),
        Some(end) => table.range::<&[u8]>(start..end)?,
        None => table.range::<&[u8]>(start..)?,
    };

    let mut pairs = Vec::new();
    for item in iter {
        let (key, value) = item?;
        pairs.push((key.value().to_vec(), value.value().to_vec()));
        if limit > 0 && pairs.len() >= limit {
            break;
        }
    }
    Ok(pairs)
}

struct RedbReadTxn {
    txn: redb::ReadTransaction,
}

impl ReadTxn for RedbReadTxn {
    fn range(
        &self,
        bucket: Bucket,
        start: &[u8],
        end: Option<&[u8]>,
        limit: usize,
    ) -> BackendResult<Vec<KvPair>> {
        let table = self.txn.open_table(table(bucket))?;
        collect_range(&table, start, end, limit)
    }

    fn get(&self, bucket: Bucket, key: &[u8]) -> BackendResult<Option<Vec<u8>>> {
        let table = self.txn.open_table(table(bucket))?;
        let value = table.get(key)?;
        Ok(value.map(|v| v.value().to_vec()))
    }
}

struct RedbWriteTxn {
    txn: redb::WriteTransaction,
}

impl ReadTxn for RedbWriteTxn {
    fn range(
        &self,
        bucket: Bucket,
        start: &[u8],
        end: Option<&[u8]>,
        limit: usize,
    ) -> BackendResult<Vec<KvPair>> {
        let table = self.txn.open_table(table(bucket))?;
        collect_range(&table, start, end, limit)
    }

    fn get(&self, bucket: Bucket, key: &[u8]) -> BackendResult<Option<Vec<u8>>> {
        let table = self.txn.open_table(table(bucket))?;
        let value = table.get(key)?;
        Ok(value.map(|v| v.value().to_vec()))
    }
}

impl WriteTxn for RedbWriteTxn {
    fn put(&mut self, bucket: Bucket, key: &[u8], value: &[u8]) -> BackendResult<()> {
        let mut table = self.txn.open_table(table(bucket))?;
        table.insert(key, value)?;
        Ok(())
    }

    fn delete(&mut self, bucket: Bucket, key: &[u8]) -> BackendResult<()> {
        let mut table = self.txn.open_table(table(bucket))?;
        table.remove(key)?;
        Ok(())
    }

    fn commit(self: Box<Self>) -> BackendResult<()> {
        self.txn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, RedbBackend) {
        let dir = TempDir::new().unwrap();
        let backend = RedbBackend::open(dir.path().join("db").join("store.redb")).unwrap();
        (dir, backend)
    }

    #[test]
    fn test_committed_writes_visible_to_new_readers() {
        let (_dir, backend) = open_temp();

        let mut tx = backend.begin_write().unwrap();
        tx.put(Bucket::Key, b"a", b"1").unwrap();
        tx.put(Bucket::Meta, b"a", b"meta").unwrap();
        tx.commit().unwrap();

        let rtx = backend.begin_read().unwrap();
        assert_eq!(rtx.get(Bucket::Key, b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(rtx.get(Bucket::Meta, b"a").unwrap(), Some(b"meta".to_vec()));
        assert_eq!(rtx.get(Bucket::Key, b"b").unwrap(), None);
    }

    #[test]
    fn test_dropped_write_txn_aborts() {
        let (_dir, backend) = open_temp();

        {
            let mut tx = backend.begin_write().unwrap();
            tx.put(Bucket::Key, b"a", b"1").unwrap();
            assert_eq!(tx.get(Bucket::Key, b"a").unwrap(), Some(b"1".to_vec()));
        }

        let rtx = backend.begin_read().unwrap();
        assert_eq!(rtx.get(Bucket::Key, b"a").unwrap(), None);
    }

    #[test]
    fn test_range_bounds_and_limit() {
        let (_dir, backend) = open_temp();

        let mut tx = backend.begin_write().unwrap();
        for k in [b"a", b"b", b"c", b"d"] {
            tx.put(Bucket::Key, k, k).unwrap();
        }
        tx.delete(Bucket::Key, b"c").unwrap();
        tx.commit().unwrap();

        let rtx = backend.begin_read().unwrap();
        let keys = |pairs: Vec<KvPair>| pairs.into_iter().map(|(k, _)| k).collect::<Vec<_>>();

        assert_eq!(
            keys(rtx.range(Bucket::Key, b"a", Some(b"d"), 0).unwrap()),
            vec![b"a".to_vec(), b"b".to_vec()]
        );
        assert_eq!(
            keys(rtx.range(Bucket::Key, b"b", None, 0).unwrap()),
            vec![b"b".to_vec(), b"d".to_vec()]
        );
        assert_eq!(rtx.range(Bucket::Key, b"a", None, 1).unwrap().len(), 1);
        assert!(rtx.range(Bucket::Key, b"d", Some(b"a"), 0).unwrap().is_empty());
        assert!(rtx.range(Bucket::Meta, b"", None, 0).unwrap().is_empty());
    }

    #[test]
    fn test_reopen_preserves_data() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.redb");

        {
            let backend = RedbBackend::open(&path).unwrap();
            let mut tx = backend.begin_write().unwrap();
            tx.put(Bucket::Key, b"k", b"v").unwrap();
            tx.commit().unwrap();
        }

        let backend = RedbBackend::open(&path).unwrap();
        let rtx = backend.begin_read().unwrap();
        assert_eq!(rtx.get(Bucket::Key, b"k").unwrap(), Some(b"v".to_vec()));
    }
}
