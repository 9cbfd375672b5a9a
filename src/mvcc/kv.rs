//! KeyValue - A user-visible versioned entry

use crate::lease::LeaseId;

/// One version of a key as returned by reads.
///
/// `version` counts modifications within the key's current generation:
/// 1 on creation, reset when the key is deleted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyValue {
    /// User key.
    pub key: Vec<u8>,
    /// Main revision at which the key's current generation was created.
    pub create_revision: i64,
    /// Main revision of this version.
    pub mod_revision: i64,
    /// Modification count within the generation.
    pub version: i64,
    /// Stored value.
    pub value: Vec<u8>,
    /// Lease attached to this version, or [`LeaseId::NONE`].
    pub lease: LeaseId,
}

impl KeyValue {
    /// Returns true if the entry is bound to a lease.
    #[inline]
    pub fn has_lease(&self) -> bool {
        self.lease != LeaseId::NONE
    }
}
