//! TreeIndex - Ordered map of user keys to their revision histories
//!
//! Every key ever written has exactly one [`KeyIndex`]. Range lookups copy
//! their results out under a short read lock, so callers iterate a stable
//! snapshot and may paginate with [`TreeIndex::range_keys`] while writers
//! proceed.
//!
//! Key ranges follow the store's end-key convention:
//! - `None` selects the single key `start`
//! - `Some(&[0])` selects every key `>= start`
//! - `Some(end)` selects `[start, end)`

use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;

use parking_lot::RwLock;

use super::{KeyIndex, KeyIndexError, Revision};

/// Number of key indices compacted per write-lock acquisition.
const COMPACT_KEYS_PER_LOCK: usize = 1000;

/// End key selecting every key greater than or equal to the start key.
pub const RANGE_END_ALL: &[u8] = &[0];

/// One visible key as resolved by [`TreeIndex::range_keys`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    /// User key.
    pub key: Vec<u8>,
    /// Revision of the visible value.
    pub modified: Revision,
    /// Creation revision of the visible value's generation.
    pub created: Revision,
    /// Version of the visible value within its generation.
    pub version: i64,
}

/// Ordered collection of all key indices.
#[derive(Debug, Default)]
pub struct TreeIndex {
    tree: RwLock<BTreeMap<Vec<u8>, KeyIndex>>,
}

/// Converts a `(start, end)` key range into map bounds, or `None` when the
/// range is empty.
fn key_bounds<'a>(
    start: &'a [u8],
    end: Option<&'a [u8]>,
) -> Option<(Bound<&'a [u8]>, Bound<&'a [u8]>)> {
    match end {
        None => Some((Bound::Included(start), Bound::Included(start))),
        Some(end) if end == RANGE_END_ALL => Some((Bound::Included(start), Bound::Unbounded)),
        Some(end) if end <= start => None,
        Some(end) => Some((Bound::Included(start), Bound::Excluded(end))),
    }
}

impl TreeIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of key indices, including keys that are currently deleted but
    /// still hold uncompacted history.
    pub fn len(&self) -> usize {
        self.tree.read().len()
    }

    /// Returns true if no key has any history.
    pub fn is_empty(&self) -> bool {
        self.tree.read().is_empty()
    }

    /// Records a modification of `key` at `rev`.
    pub fn put(&self, key: &[u8], rev: Revision) {
        let mut tree = self.tree.write();
        match tree.get_mut(key) {
            Some(ki) => ki.put(rev),
            None => {
                let mut ki = KeyIndex::new(key.to_vec());
                ki.put(rev);
                tree.insert(key.to_vec(), ki);
            }
        }
    }

    /// Records a deletion of `key` at `rev`.
    pub fn tombstone(&self, key: &[u8], rev: Revision) -> Result<(), KeyIndexError> {
        let mut tree = self.tree.write();
        let ki = tree.get_mut(key).ok_or(KeyIndexError::RevisionNotFound)?;
        ki.tombstone(rev)
    }

    /// Undoes the most recent change of `key`, which must be at `rev`.
    ///
    /// A key index left without history is removed.
    pub fn revert(&self, key: &[u8], rev: Revision) -> Result<(), KeyIndexError> {
        let mut tree = self.tree.write();
        let ki = tree.get_mut(key).ok_or(KeyIndexError::RevisionNotFound)?;
        ki.revert(rev)?;
        if ki.is_empty() {
            tree.remove(key);
        }
        Ok(())
    }

    /// Replays a persisted live record during restore.
    pub fn restore_put(&self, key: &[u8], created: Revision, modified: Revision, ver: i64) {
        let mut tree = self.tree.write();
        match tree.get_mut(key) {
            Some(ki) => ki.put(modified),
            None => {
                let mut ki = KeyIndex::new(key.to_vec());
                ki.restore(created, modified, ver);
                tree.insert(key.to_vec(), ki);
            }
        }
    }

    /// Replays a persisted tombstone during restore.
    ///
    /// Returns false when the key has no known history; its earlier
    /// revisions were compacted away and the tombstone carries no state.
    pub fn restore_tombstone(&self, key: &[u8], rev: Revision) -> Result<bool, KeyIndexError> {
        let mut tree = self.tree.write();
        match tree.get_mut(key) {
            Some(ki) => ki.tombstone(rev).map(|_| true),
            None => Ok(false),
        }
    }

    /// Returns `(modified, created, version)` of `key` at main revision `at_rev`.
    pub fn get(&self, key: &[u8], at_rev: i64) -> Result<(Revision, Revision, i64), KeyIndexError> {
        let tree = self.tree.read();
        let ki = tree.get(key).ok_or(KeyIndexError::RevisionNotFound)?;
        ki.get(at_rev)
    }

    /// Returns a copy of the key index for `key`.
    pub fn key_index(&self, key: &[u8]) -> Option<KeyIndex> {
        self.tree.read().get(key).cloned()
    }

    /// Returns every change of `key` at or after main revision `rev`.
    pub fn since(&self, key: &[u8], rev: i64) -> Vec<Revision> {
        self.tree
            .read()
            .get(key)
            .map(|ki| ki.since(rev))
            .unwrap_or_default()
    }

    /// Returns every change to keys in the range at or after main revision
    /// `rev`, sorted by revision.
    pub fn range_since(&self, start: &[u8], end: Option<&[u8]>, rev: i64) -> Vec<Revision> {
        let Some(bounds) = key_bounds(start, end) else {
            return Vec::new();
        };
        let tree = self.tree.read();
        let mut revs: Vec<Revision> = tree
            .range::<[u8], _>(bounds)
            .flat_map(|(_, ki)| ki.since(rev))
            .collect();
        drop(tree);
        revs.sort();
        revs
    }

    /// Resolves keys in the range visible at `at_rev`, in ascending key
    /// order, stopping after `limit` entries when `limit > 0`.
    ///
    /// The second value is true when more visible keys follow the last
    /// returned one; resume with a start key just past it.
    pub fn range_keys(
        &self,
        start: &[u8],
        end: Option<&[u8]>,
        at_rev: i64,
        limit: usize,
    ) -> (Vec<IndexEntry>, bool) {
        let Some(bounds) = key_bounds(start, end) else {
            return (Vec::new(), false);
        };
        let tree = self.tree.read();
        let mut entries = Vec::new();
        for (key, ki) in tree.range::<[u8], _>(bounds) {
            let Ok((modified, created, version)) = ki.get(at_rev) else {
                continue;
            };
            if limit > 0 && entries.len() == limit {
                return (entries, true);
            }
            entries.push(IndexEntry {
                key: key.clone(),
                modified,
                created,
                version,
            });
        }
        (entries, false)
    }

    /// Returns the revisions of the first `limit` (0 = unlimited) visible
    /// keys in the range, together with the total number of visible keys.
    pub fn revisions(
        &self,
        start: &[u8],
        end: Option<&[u8]>,
        at_rev: i64,
        limit: usize,
    ) -> (Vec<Revision>, usize) {
        let Some(bounds) = key_bounds(start, end) else {
            return (Vec::new(), 0);
        };
        let tree = self.tree.read();
        let mut revs = Vec::new();
        let mut total = 0;
        for (_, ki) in tree.range::<[u8], _>(bounds) {
            if let Ok((modified, _, _)) = ki.get(at_rev) {
                if limit == 0 || revs.len() < limit {
                    revs.push(modified);
                }
                total += 1;
            }
        }
        (revs, total)
    }

    /// Counts the keys in the range visible at `at_rev`.
    pub fn count_revisions(&self, start: &[u8], end: Option<&[u8]>, at_rev: i64) -> usize {
        let Some(bounds) = key_bounds(start, end) else {
            return 0;
        };
        let tree = self.tree.read();
        tree.range::<[u8], _>(bounds)
            .filter(|(_, ki)| ki.get(at_rev).is_ok())
            .count()
    }

    /// Compacts every key index at main revision `at_rev` and returns the
    /// revisions whose backend records must be kept.
    ///
    /// Keys are visited from a snapshot of the key set and compacted in
    /// short write-locked chunks. Keys created after the snapshot only hold
    /// revisions newer than `at_rev` and need no compaction.
    pub fn compact(&self, at_rev: i64) -> HashSet<Revision> {
        let keys: Vec<Vec<u8>> = self.tree.read().keys().cloned().collect();
        let mut available = HashSet::new();

        for chunk in keys.chunks(COMPACT_KEYS_PER_LOCK) {
            let mut tree = self.tree.write();
            for key in chunk {
                let emptied = match tree.get_mut(key.as_slice()) {
                    Some(ki) => {
                        ki.compact(at_rev, &mut available);
                        ki.is_empty()
                    }
                    None => false,
                };
                if emptied {
                    tree.remove(key.as_slice());
                }
            }
        }
        available
    }
}
