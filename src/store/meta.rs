//! Store metadata records
//!
//! Watermarks persisted in the meta bucket, each stored as an encoded
//! revision so the layout matches the record bucket.

use crate::backend::{Bucket, ReadTxn, WriteTxn};
use crate::mvcc::{BucketKey, Revision};

use super::errors::{StoreError, StoreResult};

/// Target of the most recently scheduled compaction.
pub(crate) const SCHEDULED_COMPACT_KEY: &[u8] = b"scheduledCompactRev";

/// Target of the most recently finished compaction.
pub(crate) const FINISHED_COMPACT_KEY: &[u8] = b"finishedCompactRev";

/// Main revision of the most recent write transaction.
pub(crate) const CURRENT_REV_KEY: &[u8] = b"currentRev";

/// Reads a watermark, or `None` if it was never written.
pub(crate) fn read_marker<T: ReadTxn + ?Sized>(tx: &T, key: &[u8]) -> StoreResult<Option<i64>> {
    let Some(bytes) = tx.get(Bucket::Meta, key)? else {
        return Ok(None);
    };
    let decoded = BucketKey::try_from_bytes(&bytes).map_err(|e| {
        StoreError::corruption(format!(
            "malformed {} marker: {}",
            String::from_utf8_lossy(key),
            e
        ))
    })?;
    Ok(Some(decoded.revision.main))
}

/// Writes a watermark inside `tx`.
pub(crate) fn write_marker<T: WriteTxn + ?Sized>(tx: &mut T, key: &[u8], rev: i64) -> StoreResult<()> {
    tx.put(Bucket::Meta, key, &Revision::main(rev).to_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, MemoryBackend};

    #[test]
    fn test_marker_roundtrip() {
        let backend = MemoryBackend::new();
        let mut tx = backend.begin_write().unwrap();
        write_marker(tx.as_mut(), FINISHED_COMPACT_KEY, 42).unwrap();
        tx.commit().unwrap();

        let rtx = backend.begin_read().unwrap();
        assert_eq!(read_marker(rtx.as_ref(), FINISHED_COMPACT_KEY).unwrap(), Some(42));
        assert_eq!(read_marker(rtx.as_ref(), SCHEDULED_COMPACT_KEY).unwrap(), None);
    }

    #[test]
    fn test_malformed_marker_is_corruption() {
        let backend = MemoryBackend::new();
        let mut tx = backend.begin_write().unwrap();
        tx.put(Bucket::Meta, CURRENT_REV_KEY, b"bogus").unwrap();
        tx.commit().unwrap();

        let rtx = backend.begin_read().unwrap();
        let err = read_marker(rtx.as_ref(), CURRENT_REV_KEY).unwrap_err();
        assert!(matches!(err, StoreError::Corruption(_)));
    }
}
