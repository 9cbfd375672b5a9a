//! Persisted record format
//!
//! Values stored in the record bucket are length-prefixed, checksummed
//! encodings of [`KeyValue`](crate::mvcc::KeyValue). Any checksum failure is
//! treated as corruption.

mod checksum;
mod record;

pub use checksum::compute_checksum;
pub use record::KvRecord;
