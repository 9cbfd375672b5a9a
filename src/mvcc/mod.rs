//! MVCC Domain Types
//!
//! This module provides the in-memory side of the multi-version store:
//! - `Revision` / `BucketKey` - Totally ordered revision and its byte codec
//! - `KeyIndex` - Generations of one key
//! - `TreeIndex` - Ordered collection of all key indices
//! - `KeyValue` - A user-visible versioned entry
//!
//! None of these types touch the backend. The store combines them with
//! backend transactions.

mod key_index;
mod kv;
mod revision;
mod tree_index;

pub use key_index::{Generation, KeyIndex, KeyIndexError};
pub use kv::KeyValue;
pub use revision::{BucketKey, Revision, MARKED_REV_BYTES_LEN, REV_BYTES_LEN};
pub use tree_index::{IndexEntry, TreeIndex, RANGE_END_ALL};
