//! Lease registry interface
//!
//! Lease expiry lives outside the store. The store only tells the registry
//! which keys are bound to which lease:
//! - `attach` when a key is written with a lease
//! - `detach` when the key is deleted or rebound to another lease
//! - `lookup` before accepting a write that names a lease

use std::collections::{HashMap, HashSet};
use std::fmt;

use parking_lot::RwLock;
use thiserror::Error;

/// Identifier of a lease. Zero means "no lease".
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct LeaseId(i64);

impl LeaseId {
    /// The absent lease.
    pub const NONE: LeaseId = LeaseId(0);

    /// Creates a lease identifier.
    #[inline]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw identifier.
    #[inline]
    pub fn value(&self) -> i64 {
        self.0
    }

    /// Returns true for [`LeaseId::NONE`].
    #[inline]
    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Errors reported by a lease registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LeaseError {
    /// The lease is unknown or already expired.
    #[error("lease {0} not found")]
    NotFound(LeaseId),
}

/// Result type for lease registry operations.
pub type LeaseResult<T> = Result<T, LeaseError>;

/// The narrow lease interface the store consumes.
pub trait Lessor: Send + Sync {
    /// Binds `key` to `lease`.
    fn attach(&self, lease: LeaseId, key: &[u8]) -> LeaseResult<()>;

    /// Unbinds `key` from `lease`.
    fn detach(&self, lease: LeaseId, key: &[u8]) -> LeaseResult<()>;

    /// Returns true if `lease` exists.
    fn lookup(&self, lease: LeaseId) -> bool;
}

/// Registry that accepts every lease and records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NopLessor;

impl Lessor for NopLessor {
    fn attach(&self, _lease: LeaseId, _key: &[u8]) -> LeaseResult<()> {
        Ok(())
    }

    fn detach(&self, _lease: LeaseId, _key: &[u8]) -> LeaseResult<()> {
        Ok(())
    }

    fn lookup(&self, _lease: LeaseId) -> bool {
        true
    }
}

/// In-memory registry of granted leases and their attached keys.
#[derive(Debug, Default)]
pub struct MemoryLessor {
    leases: RwLock<HashMap<LeaseId, HashSet<Vec<u8>>>>,
}

impl MemoryLessor {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants `lease` with no attached keys.
    pub fn grant(&self, lease: LeaseId) {
        self.leases.write().entry(lease).or_default();
    }

    /// Revokes `lease`, returning the keys that were attached to it.
    pub fn revoke(&self, lease: LeaseId) -> Option<Vec<Vec<u8>>> {
        self.leases.write().remove(&lease).map(|keys| {
            let mut keys: Vec<_> = keys.into_iter().collect();
            keys.sort();
            keys
        })
    }

    /// Keys currently attached to `lease`, sorted.
    pub fn keys(&self, lease: LeaseId) -> Vec<Vec<u8>> {
        let mut keys: Vec<_> = self
            .leases
            .read()
            .get(&lease)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

impl Lessor for MemoryLessor {
    fn attach(&self, lease: LeaseId, key: &[u8]) -> LeaseResult<()> {
        let mut leases = self.leases.write();
        let keys = leases.get_mut(&lease).ok_or(LeaseError::NotFound(lease))?;
        keys.insert(key.to_vec());
        Ok(())
    }

    fn detach(&self, lease: LeaseId, key: &[u8]) -> LeaseResult<()> {
        let mut leases = self.leases.write();
        let keys = leases.get_mut(&lease).ok_or(LeaseError::NotFound(lease))?;
        keys.remove(key);
        Ok(())
    }

    fn lookup(&self, lease: LeaseId) -> bool {
        self.leases.read().contains_key(&lease)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_lease() {
        assert!(LeaseId::NONE.is_none());
        assert!(!LeaseId::new(7).is_none());
        assert_eq!(LeaseId::default(), LeaseId::NONE);
    }

    #[test]
    fn test_attach_requires_grant() {
        let lessor = MemoryLessor::new();
        let lease = LeaseId::new(1);

        assert_eq!(
            lessor.attach(lease, b"foo"),
            Err(LeaseError::NotFound(lease))
        );
        assert!(!lessor.lookup(lease));

        lessor.grant(lease);
        lessor.attach(lease, b"foo").unwrap();
        lessor.attach(lease, b"bar").unwrap();
        assert_eq!(lessor.keys(lease), vec![b"bar".to_vec(), b"foo".to_vec()]);

        lessor.detach(lease, b"foo").unwrap();
        assert_eq!(lessor.keys(lease), vec![b"bar".to_vec()]);
    }

    #[test]
    fn test_revoke_returns_attached_keys() {
        let lessor = MemoryLessor::new();
        let lease = LeaseId::new(9);
        lessor.grant(lease);
        lessor.attach(lease, b"k").unwrap();

        assert_eq!(lessor.revoke(lease), Some(vec![b"k".to_vec()]));
        assert!(!lessor.lookup(lease));
        assert_eq!(lessor.revoke(lease), None);
    }

    #[test]
    fn test_nop_lessor_accepts_everything() {
        let lessor = NopLessor;
        assert!(lessor.lookup(LeaseId::new(42)));
        lessor.attach(LeaseId::new(42), b"k").unwrap();
        lessor.detach(LeaseId::new(42), b"k").unwrap();
    }
}
