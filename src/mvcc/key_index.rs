//! KeyIndex - Revision history of a single user key
//!
//! A key's history is a list of generations. Each generation is one
//! create-to-delete lifecycle:
//!
//! ```text
//! put(1.0); put(2.0); tombstone(3.0); put(4.0); tombstone(5.0)
//!
//! generations:
//!     {empty}
//!     {4.0, 5.0(t)}
//!     {1.0, 2.0, 3.0(t)}
//! ```
//!
//! A tombstone closes the current generation and opens an empty one. Only the
//! last generation may be empty. Revisions across all generations are
//! strictly increasing.
//!
//! Compacting at revision `N` drops every revision older than the newest
//! revision `<= N` of the first generation still reachable at `N`, and drops
//! whole generations whose tombstone is older than `N`:
//!
//! ```text
//! compact(2) -> {empty} {4.0, 5.0(t)} {2.0, 3.0(t)}
//! compact(4) -> {empty} {4.0, 5.0(t)}
//! compact(5) -> {empty}             (lone tombstone removed)
//! ```

use std::collections::HashSet;

use thiserror::Error;

use super::Revision;

/// Errors from key index operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum KeyIndexError {
    /// No live revision exists at the requested point.
    #[error("revision not found")]
    RevisionNotFound,
}

/// One create-to-delete lifecycle of a key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Generation {
    /// Number of modifications in this generation.
    ver: i64,
    /// Revision at which the key was created in this generation.
    created: Revision,
    /// Revisions in ascending order; the last one is the tombstone when the
    /// generation is closed.
    revs: Vec<Revision>,
}

impl Generation {
    /// Returns true if the generation holds no revisions.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.revs.is_empty()
    }

    /// Modification count.
    #[inline]
    pub fn version(&self) -> i64 {
        self.ver
    }

    /// Creation revision.
    #[inline]
    pub fn created(&self) -> Revision {
        self.created
    }

    /// Revisions in ascending order.
    #[inline]
    pub fn revisions(&self) -> &[Revision] {
        &self.revs
    }

    /// Walks revisions newest first and returns the position of the first one
    /// for which `keep_walking` returns false.
    fn walk<F>(&self, mut keep_walking: F) -> Option<usize>
    where
        F: FnMut(&Revision) -> bool,
    {
        (0..self.revs.len())
            .rev()
            .find(|&idx| !keep_walking(&self.revs[idx]))
    }
}

/// Revision history of one user key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyIndex {
    key: Vec<u8>,
    /// Most recent revision applied to this key.
    modified: Revision,
    generations: Vec<Generation>,
}

impl KeyIndex {
    /// Creates an index with no history.
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            modified: Revision::default(),
            generations: Vec::new(),
        }
    }

    /// The user key.
    #[inline]
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// The most recent revision applied to this key.
    #[inline]
    pub fn modified(&self) -> Revision {
        self.modified
    }

    /// All generations, oldest first.
    #[inline]
    pub fn generations(&self) -> &[Generation] {
        &self.generations
    }

    /// Returns true if no generation holds any revision.
    pub fn is_empty(&self) -> bool {
        self.generations.iter().all(Generation::is_empty)
    }

    /// Returns true if the key currently has an open, non-empty generation.
    pub fn is_live(&self) -> bool {
        self.generations.last().is_some_and(|g| !g.is_empty())
    }

    /// Records a modification at `rev`, opening a generation if needed.
    ///
    /// # Panics
    ///
    /// Panics if `rev` is not greater than the last applied revision.
    pub fn put(&mut self, rev: Revision) {
        if !rev.greater_than(&self.modified) {
            panic!(
                "put with unexpected smaller revision {} (modified {}) for key {:?}",
                rev,
                self.modified,
                String::from_utf8_lossy(&self.key)
            );
        }
        if self.generations.is_empty() {
            self.generations.push(Generation::default());
        }
        if let Some(g) = self.generations.last_mut() {
            if g.revs.is_empty() {
                g.created = rev;
            }
            g.revs.push(rev);
            g.ver += 1;
        }
        self.modified = rev;
    }

    /// Seeds a fresh index from a persisted record whose earlier history may
    /// have been compacted away.
    ///
    /// # Panics
    ///
    /// Panics if the index already has history.
    pub fn restore(&mut self, created: Revision, modified: Revision, ver: i64) {
        if !self.generations.is_empty() {
            panic!(
                "restore on a non-empty key index for key {:?}",
                String::from_utf8_lossy(&self.key)
            );
        }
        self.modified = modified;
        self.generations.push(Generation {
            ver,
            created,
            revs: vec![modified],
        });
    }

    /// Closes the current generation with a deletion at `rev`.
    ///
    /// Fails with `RevisionNotFound` if the key has no open generation.
    pub fn tombstone(&mut self, rev: Revision) -> Result<(), KeyIndexError> {
        if !self.is_live() {
            return Err(KeyIndexError::RevisionNotFound);
        }
        self.put(rev);
        self.generations.push(Generation::default());
        Ok(())
    }

    /// Undoes the most recent put or tombstone, which must be at `rev`.
    ///
    /// Used to roll back index changes of a write whose commit failed.
    pub fn revert(&mut self, rev: Revision) -> Result<(), KeyIndexError> {
        if self.modified != rev {
            return Err(KeyIndexError::RevisionNotFound);
        }

        let len = self.generations.len();
        let closed_by_tombstone = len >= 2
            && self.generations[len - 1].is_empty()
            && self.generations[len - 2].revs.last() == Some(&rev);
        if closed_by_tombstone {
            self.generations.pop();
        }

        let Some(g) = self.generations.last_mut() else {
            return Err(KeyIndexError::RevisionNotFound);
        };
        if g.revs.pop() != Some(rev) {
            return Err(KeyIndexError::RevisionNotFound);
        }
        g.ver -= 1;
        if g.revs.is_empty() {
            g.ver = 0;
            g.created = Revision::default();
        }

        if self.generations.len() == 1 && self.generations[0].is_empty() {
            self.generations.clear();
        }

        self.modified = self
            .generations
            .iter()
            .rev()
            .find_map(|g| g.revs.last().copied())
            .unwrap_or_default();
        Ok(())
    }

    /// Returns `(modified, created, version)` of the key as seen at main
    /// revision `at_rev`.
    pub fn get(&self, at_rev: i64) -> Result<(Revision, Revision, i64), KeyIndexError> {
        let g = self
            .find_generation(at_rev)
            .ok_or(KeyIndexError::RevisionNotFound)?;

        match g.walk(|rev| rev.main > at_rev) {
            Some(idx) => {
                let ver = g.ver - (g.revs.len() - idx - 1) as i64;
                Ok((g.revs[idx], g.created, ver))
            }
            None => Err(KeyIndexError::RevisionNotFound),
        }
    }

    /// Returns every revision with main `>= rev`, keeping only the highest
    /// sub-revision of each main revision.
    pub fn since(&self, rev: i64) -> Vec<Revision> {
        if self.is_empty() {
            return Vec::new();
        }
        let since = Revision::main(rev);

        let mut gi = self.generations.len() - 1;
        while gi > 0 {
            let g = &self.generations[gi];
            if !g.is_empty() && since.greater_than(&g.created) {
                break;
            }
            gi -= 1;
        }

        let mut revs: Vec<Revision> = Vec::new();
        let mut last = None;
        for g in &self.generations[gi..] {
            for r in &g.revs {
                if since.greater_than(r) {
                    continue;
                }
                if last == Some(r.main) {
                    // Only the final change of a transaction is externally visible.
                    if let Some(slot) = revs.last_mut() {
                        *slot = *r;
                    }
                    continue;
                }
                revs.push(*r);
                last = Some(r.main);
            }
        }
        revs
    }

    /// Compacts history at main revision `at_rev`.
    ///
    /// Revisions that must survive on the backend are inserted into
    /// `available`. Afterwards the index may be empty, in which case the
    /// caller removes it.
    pub fn compact(&mut self, at_rev: i64, available: &mut HashSet<Revision>) {
        if self.is_empty() {
            return;
        }

        let (mut gen_idx, rev_idx) = self.do_compact(at_rev, available);

        let last_idx = self.generations.len() - 1;
        let g = &mut self.generations[gen_idx];
        if !g.is_empty() {
            if let Some(idx) = rev_idx {
                g.revs.drain(..idx);
            }
            // A lone tombstone at or before the compaction point is not needed.
            if g.revs.len() == 1 && gen_idx != last_idx {
                available.remove(&g.revs[0]);
                gen_idx += 1;
            }
        }
        self.generations.drain(..gen_idx);
    }

    fn do_compact(&self, at_rev: i64, available: &mut HashSet<Revision>) -> (usize, Option<usize>) {
        let mut gen_idx = 0;
        while gen_idx < self.generations.len() - 1 {
            let tomb = self.generations[gen_idx].revs.last().map(|r| r.main);
            if tomb.is_some_and(|t| t >= at_rev) {
                break;
            }
            gen_idx += 1;
        }

        let rev_idx = self.generations[gen_idx].walk(|rev| {
            if rev.main <= at_rev {
                available.insert(*rev);
                return false;
            }
            true
        });
        (gen_idx, rev_idx)
    }

    /// Finds the generation in which the key was live at main revision `rev`.
    fn find_generation(&self, rev: i64) -> Option<&Generation> {
        let last = self.generations.len().checked_sub(1)?;
        for (idx, g) in self.generations.iter().enumerate().rev() {
            let (Some(first), Some(tail)) = (g.revs.first(), g.revs.last()) else {
                continue;
            };
            if idx != last && tail.main <= rev {
                // Deleted at or before `rev`.
                return None;
            }
            if first.main <= rev {
                return Some(g);
            }
        }
        None
    }
}
