//! Range and transaction request types
//!
//! A [`TxnRequest`] evaluates every [`Compare`] against the current state
//! and then runs exactly one of its two operation lists: `success` when all
//! comparisons hold, `failure` otherwise.

use std::cmp::Ordering;

use crate::lease::LeaseId;
use crate::mvcc::KeyValue;

/// Options of a range read.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RangeOptions {
    /// Revision to read at; 0 reads at the current revision.
    pub rev: i64,
    /// Maximum entries returned; 0 means unlimited.
    pub limit: usize,
    /// Return only the number of matching keys.
    pub count_only: bool,
}

impl RangeOptions {
    /// Reads at revision `rev`.
    pub fn at(rev: i64) -> Self {
        Self {
            rev,
            ..Self::default()
        }
    }

    /// Caps the number of returned entries.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Counts matches without returning them.
    pub fn count_only(mut self) -> Self {
        self.count_only = true;
        self
    }
}

/// Result of a range read.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RangeResult {
    /// Visible entries in ascending key order, capped by the limit.
    pub kvs: Vec<KeyValue>,
    /// Current revision of the store when the read was served.
    pub rev: i64,
    /// Number of matching keys before the limit was applied.
    pub count: usize,
}

/// The field of a key a [`Compare`] inspects, with the operand.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompareTarget {
    /// Modification count in the current generation.
    Version(i64),
    /// Creation revision of the current generation.
    CreateRevision(i64),
    /// Revision of the latest modification.
    ModRevision(i64),
    /// Stored value.
    Value(Vec<u8>),
    /// Attached lease.
    Lease(LeaseId),
}

/// Relation required between the key's field and the operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareResult {
    Equal,
    NotEqual,
    Greater,
    Less,
}

impl CompareResult {
    fn holds(&self, ord: Ordering) -> bool {
        match self {
            CompareResult::Equal => ord == Ordering::Equal,
            CompareResult::NotEqual => ord != Ordering::Equal,
            CompareResult::Greater => ord == Ordering::Greater,
            CompareResult::Less => ord == Ordering::Less,
        }
    }
}

/// A predicate over a key (or every key of a range).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Compare {
    /// Key, or start of the range.
    pub key: Vec<u8>,
    /// End of the range, with the same convention as range reads.
    pub range_end: Option<Vec<u8>>,
    /// Inspected field and operand.
    pub target: CompareTarget,
    /// Required relation.
    pub result: CompareResult,
}

impl Compare {
    /// Creates a single-key comparison.
    pub fn new(key: impl Into<Vec<u8>>, target: CompareTarget, result: CompareResult) -> Self {
        Self {
            key: key.into(),
            range_end: None,
            target,
            result,
        }
    }

    /// Applies the comparison to every key in `[key, range_end)`.
    pub fn with_range_end(mut self, range_end: impl Into<Vec<u8>>) -> Self {
        self.range_end = Some(range_end.into());
        self
    }

    /// Evaluates the comparison against the keys currently in range.
    ///
    /// An absent key compares as a zero-valued entry, except for value
    /// comparisons, which fail.
    pub(crate) fn evaluate(&self, kvs: &[KeyValue]) -> bool {
        if kvs.is_empty() {
            if matches!(self.target, CompareTarget::Value(_)) {
                return false;
            }
            return self.evaluate_one(&KeyValue::default());
        }
        kvs.iter().all(|kv| self.evaluate_one(kv))
    }

    fn evaluate_one(&self, kv: &KeyValue) -> bool {
        let ord = match &self.target {
            CompareTarget::Version(v) => kv.version.cmp(v),
            CompareTarget::CreateRevision(r) => kv.create_revision.cmp(r),
            CompareTarget::ModRevision(r) => kv.mod_revision.cmp(r),
            CompareTarget::Value(v) => kv.value.as_slice().cmp(v.as_slice()),
            CompareTarget::Lease(l) => kv.lease.cmp(l),
        };
        self.result.holds(ord)
    }
}

/// One operation of a transaction branch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestOp {
    Range {
        key: Vec<u8>,
        range_end: Option<Vec<u8>>,
        options: RangeOptions,
    },
    Put {
        key: Vec<u8>,
        value: Vec<u8>,
        lease: LeaseId,
    },
    DeleteRange {
        key: Vec<u8>,
        range_end: Option<Vec<u8>>,
    },
}

impl RequestOp {
    /// A put without a lease.
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        RequestOp::Put {
            key: key.into(),
            value: value.into(),
            lease: LeaseId::NONE,
        }
    }

    /// A read of a single key at the transaction's revision.
    pub fn get(key: impl Into<Vec<u8>>) -> Self {
        RequestOp::Range {
            key: key.into(),
            range_end: None,
            options: RangeOptions::default(),
        }
    }

    /// A deletion of a single key.
    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        RequestOp::DeleteRange {
            key: key.into(),
            range_end: None,
        }
    }
}

/// Result of one [`RequestOp`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResponseOp {
    Range(RangeResult),
    Put,
    DeleteRange { deleted: usize },
}

/// A guarded multi-operation write.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TxnRequest {
    pub compare: Vec<Compare>,
    pub success: Vec<RequestOp>,
    pub failure: Vec<RequestOp>,
}

/// Outcome of a [`TxnRequest`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxnResponse {
    /// True when every comparison held and `success` ran.
    pub succeeded: bool,
    /// One response per executed operation, in order.
    pub responses: Vec<ResponseOp>,
    /// Store revision after the transaction.
    pub revision: i64,
}
