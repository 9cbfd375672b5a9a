//! Key-value record codec
//!
//! Value stored under each revision key in the record bucket:
//!
//! ```text
//! +------------------+
//! | Record Length    | (u32 LE, whole record including this field)
//! +------------------+
//! | Key              | (length-prefixed bytes)
//! +------------------+
//! | Create Revision  | (i64 LE)
//! +------------------+
//! | Mod Revision     | (i64 LE)
//! +------------------+
//! | Version          | (i64 LE)
//! +------------------+
//! | Lease            | (i64 LE)
//! +------------------+
//! | Value            | (length-prefixed bytes)
//! +------------------+
//! | Checksum         | (u32 LE)
//! +------------------+
//! ```
//!
//! Checksum covers all bytes except the checksum itself. Tombstone records
//! carry only the key; the revision key's mark identifies them.

use std::io::{self, Cursor, Read};

use super::checksum::compute_checksum;
use crate::lease::LeaseId;
use crate::mvcc::KeyValue;

/// Smallest possible record: length + empty key + 4 revisions + empty value + checksum.
const MIN_RECORD_SIZE: usize = 4 + 4 + 8 * 4 + 4 + 4;

/// Codec for [`KeyValue`] records.
pub struct KvRecord;

impl KvRecord {
    /// Serializes `kv` with its length prefix and checksum.
    pub fn serialize(kv: &KeyValue) -> Vec<u8> {
        let body_len = 4 + kv.key.len() + 8 * 4 + 4 + kv.value.len();
        let record_length = 4 + body_len + 4;

        let mut buf = Vec::with_capacity(record_length);
        buf.extend_from_slice(&(record_length as u32).to_le_bytes());

        buf.extend_from_slice(&(kv.key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&kv.key);
        buf.extend_from_slice(&kv.create_revision.to_le_bytes());
        buf.extend_from_slice(&kv.mod_revision.to_le_bytes());
        buf.extend_from_slice(&kv.version.to_le_bytes());
        buf.extend_from_slice(&kv.lease.value().to_le_bytes());
        buf.extend_from_slice(&(kv.value.len() as u32).to_le_bytes());
        buf.extend_from_slice(&kv.value);

        let checksum = compute_checksum(&buf);
        buf.extend_from_slice(&checksum.to_le_bytes());
        buf
    }

    /// Deserializes a record, verifying its length and checksum.
    pub fn deserialize(data: &[u8]) -> io::Result<KeyValue> {
        if data.len() < MIN_RECORD_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("Record too short: {} bytes", data.len()),
            ));
        }

        let record_length = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if record_length != data.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Record length mismatch: header says {}, got {}",
                    record_length,
                    data.len()
                ),
            ));
        }

        let checksum_offset = record_length - 4;
        let stored_checksum = u32::from_le_bytes([
            data[checksum_offset],
            data[checksum_offset + 1],
            data[checksum_offset + 2],
            data[checksum_offset + 3],
        ]);
        let computed_checksum = compute_checksum(&data[..checksum_offset]);
        if computed_checksum != stored_checksum {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Checksum mismatch: computed {:08x}, stored {:08x}",
                    computed_checksum, stored_checksum
                ),
            ));
        }

        let mut cursor = Cursor::new(&data[4..checksum_offset]);
        let key = read_bytes(&mut cursor)?;
        let create_revision = read_i64(&mut cursor)?;
        let mod_revision = read_i64(&mut cursor)?;
        let version = read_i64(&mut cursor)?;
        let lease = LeaseId::new(read_i64(&mut cursor)?);
        let value = read_bytes(&mut cursor)?;

        if cursor.position() as usize != checksum_offset - 4 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Trailing bytes after record body",
            ));
        }

        Ok(KeyValue {
            key,
            create_revision,
            mod_revision,
            version,
            value,
            lease,
        })
    }
}

fn read_i64<R: Read>(reader: &mut R) -> io::Result<i64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

fn read_bytes(cursor: &mut Cursor<&[u8]>) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    cursor.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;

    let remaining = cursor.get_ref().len() - cursor.position() as usize;
    if len > remaining {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Field length {} exceeds remaining {} bytes", len, remaining),
        ));
    }

    let mut buf = vec![0u8; len];
    cursor.read_exact(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_kv() -> KeyValue {
        KeyValue {
            key: b"foo".to_vec(),
            create_revision: 2,
            mod_revision: 4,
            version: 3,
            value: b"bar2".to_vec(),
            lease: LeaseId::new(7),
        }
    }

    #[test]
    fn test_record_roundtrip() {
        let kv = sample_kv();
        let bytes = KvRecord::serialize(&kv);
        assert_eq!(KvRecord::deserialize(&bytes).unwrap(), kv);
    }

    #[test]
    fn test_tombstone_record_carries_only_key() {
        let kv = KeyValue {
            key: b"foo".to_vec(),
            ..KeyValue::default()
        };
        let bytes = KvRecord::serialize(&kv);
        let decoded = KvRecord::deserialize(&bytes).unwrap();
        assert_eq!(decoded.key, b"foo");
        assert!(decoded.value.is_empty());
        assert!(!decoded.has_lease());
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let mut bytes = KvRecord::serialize(&sample_kv());
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;

        let err = KvRecord::deserialize(&bytes).unwrap_err();
        assert!(err.to_string().contains("Checksum mismatch"));
    }

    #[test]
    fn test_truncated_record_rejected() {
        let bytes = KvRecord::serialize(&sample_kv());
        assert!(KvRecord::deserialize(&bytes[..bytes.len() - 1]).is_err());
        assert!(KvRecord::deserialize(&bytes[..8]).is_err());
    }
}
