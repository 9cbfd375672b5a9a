//! Revision - Totally ordered point in the store's history
//!
//! A revision is a `(main, sub)` pair:
//! - `main` increases once per committed write transaction
//! - `sub` orders the changes inside one transaction, starting from 0
//!
//! Revisions are encoded as fixed-width big-endian byte keys so that the
//! backend's native byte ordering yields revisions in commit order:
//!
//! ```text
//! +-----------------+-----+-----------------+------+
//! | main (i64 BE)   | '_' | sub (i64 BE)    | 't'? |
//! +-----------------+-----+-----------------+------+
//!       8 bytes       1        8 bytes        1 (tombstones only)
//! ```

use std::fmt;

/// Length of an encoded revision without a mark.
pub const REV_BYTES_LEN: usize = 8 + 1 + 8;

/// Length of an encoded revision carrying the tombstone mark.
pub const MARKED_REV_BYTES_LEN: usize = REV_BYTES_LEN + 1;

const SEPARATOR: u8 = b'_';
const TOMBSTONE_MARK: u8 = b't';

/// A totally ordered revision.
///
/// Field order matters: the derived `Ord` compares `main` first, then `sub`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Revision {
    /// Main revision of the write transaction that produced this change.
    pub main: i64,
    /// Position of the change inside its transaction.
    pub sub: i64,
}

impl Revision {
    /// Creates a revision from its parts.
    #[inline]
    pub const fn new(main: i64, sub: i64) -> Self {
        Self { main, sub }
    }

    /// Creates the first revision of a write transaction.
    #[inline]
    pub const fn main(main: i64) -> Self {
        Self { main, sub: 0 }
    }

    /// Returns true if this revision is strictly greater than `other`.
    #[inline]
    pub fn greater_than(&self, other: &Revision) -> bool {
        self > other
    }

    /// Encodes this revision into its 17-byte sortable form.
    pub fn to_bytes(&self) -> Vec<u8> {
        BucketKey::new(*self).to_bytes()
    }

    /// Decodes a revision from bytes produced by [`Revision::to_bytes`] or
    /// [`BucketKey::to_bytes`]; any tombstone mark is ignored.
    ///
    /// # Panics
    ///
    /// Panics on malformed input. Encoded revisions only originate from this
    /// crate, so a malformed one means the backend content is corrupt.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        BucketKey::from_bytes(bytes).revision
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.main, self.sub)
    }
}

/// A key in the revision-keyed record bucket: a revision plus an optional
/// tombstone mark.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct BucketKey {
    /// The revision of the record.
    pub revision: Revision,
    /// Whether the record is a deletion marker.
    pub tombstone: bool,
}

impl BucketKey {
    /// Key for a live record.
    pub fn new(revision: Revision) -> Self {
        Self {
            revision,
            tombstone: false,
        }
    }

    /// Key for a tombstone record.
    pub fn tombstone(revision: Revision) -> Self {
        Self {
            revision,
            tombstone: true,
        }
    }

    /// Encodes to 17 bytes, or 18 when marked as a tombstone.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MARKED_REV_BYTES_LEN);
        buf.extend_from_slice(&self.revision.main.to_be_bytes());
        buf.push(SEPARATOR);
        buf.extend_from_slice(&self.revision.sub.to_be_bytes());
        if self.tombstone {
            buf.push(TOMBSTONE_MARK);
        }
        buf
    }

    /// Decodes a bucket key.
    ///
    /// # Panics
    ///
    /// Panics when `bytes` is not 17 or 18 bytes long or carries an unknown
    /// separator or mark byte.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        match Self::try_from_bytes(bytes) {
            Ok(key) => key,
            Err(msg) => panic!("malformed revision key: {}", msg),
        }
    }

    /// Decodes a bucket key, describing the defect on malformed input.
    pub fn try_from_bytes(bytes: &[u8]) -> Result<Self, String> {
        let tombstone = match bytes.len() {
            REV_BYTES_LEN => false,
            MARKED_REV_BYTES_LEN if bytes[REV_BYTES_LEN] == TOMBSTONE_MARK => true,
            MARKED_REV_BYTES_LEN => {
                return Err(format!(
                    "unknown mark byte {:#04x}",
                    bytes[REV_BYTES_LEN]
                ))
            }
            len => {
                return Err(format!(
                    "expected {} or {} bytes, got {}",
                    REV_BYTES_LEN, MARKED_REV_BYTES_LEN, len
                ))
            }
        };
        if bytes[8] != SEPARATOR {
            return Err(format!("bad separator {:#04x}", bytes[8]));
        }

        let mut main = [0u8; 8];
        main.copy_from_slice(&bytes[0..8]);
        let mut sub = [0u8; 8];
        sub.copy_from_slice(&bytes[9..17]);

        Ok(Self {
            revision: Revision::new(i64::from_be_bytes(main), i64::from_be_bytes(sub)),
            tombstone,
        })
    }

    /// Returns true if the encoded key carries the tombstone mark.
    pub fn is_tombstone_bytes(bytes: &[u8]) -> bool {
        bytes.len() == MARKED_REV_BYTES_LEN && bytes[REV_BYTES_LEN] == TOMBSTONE_MARK
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revision_ordering_main_then_sub() {
        assert!(Revision::new(2, 0) > Revision::new(1, 9));
        assert!(Revision::new(2, 1) > Revision::new(2, 0));
        assert!(Revision::new(2, 1).greater_than(&Revision::new(2, 0)));
        assert!(!Revision::new(2, 0).greater_than(&Revision::new(2, 0)));
    }

    #[test]
    fn test_encoded_order_matches_revision_order() {
        let revs = [
            Revision::new(0, 0),
            Revision::new(1, 0),
            Revision::new(1, 1),
            Revision::new(1, 255),
            Revision::new(2, 0),
            Revision::new(256, 0),
            Revision::new(i64::MAX, 0),
        ];
        for pair in revs.windows(2) {
            assert!(pair[0].to_bytes() < pair[1].to_bytes(), "{} vs {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_tombstone_key_sorts_after_live_key_of_same_revision() {
        let rev = Revision::new(5, 0);
        let live = BucketKey::new(rev).to_bytes();
        let dead = BucketKey::tombstone(rev).to_bytes();

        assert_eq!(live.len(), REV_BYTES_LEN);
        assert_eq!(dead.len(), MARKED_REV_BYTES_LEN);
        assert!(live < dead);
        assert!(dead < Revision::new(5, 1).to_bytes());
        assert!(BucketKey::is_tombstone_bytes(&dead));
        assert!(!BucketKey::is_tombstone_bytes(&live));
    }

    #[test]
    fn test_decode_is_inverse_of_encode() {
        let key = BucketKey::tombstone(Revision::new(42, 7));
        assert_eq!(BucketKey::from_bytes(&key.to_bytes()), key);
        assert_eq!(Revision::from_bytes(&key.to_bytes()), Revision::new(42, 7));
    }

    #[test]
    #[should_panic(expected = "malformed revision key")]
    fn test_decode_wrong_width_panics() {
        Revision::from_bytes(&[0u8; 9]);
    }

    #[test]
    #[should_panic(expected = "unknown mark byte")]
    fn test_decode_unknown_mark_panics() {
        let mut bytes = Revision::new(1, 0).to_bytes();
        bytes.push(b'x');
        BucketKey::from_bytes(&bytes);
    }

    #[test]
    fn test_try_decode_reports_defect() {
        let err = BucketKey::try_from_bytes(b"short").unwrap_err();
        assert!(err.contains("got 5"));

        let mut bytes = Revision::new(1, 0).to_bytes();
        bytes[8] = b'-';
        assert!(BucketKey::try_from_bytes(&bytes).unwrap_err().contains("separator"));
    }

    #[test]
    fn test_display() {
        assert_eq!(Revision::new(3, 1).to_string(), "3_1");
    }
}
