use alloc::vec::Vec;
use core::fmt::{Debug, Formatter, Result};

/// Identifier of a transaction as recorded in the log. Tid `0` is reserved for
/// the synthetic initial transaction.
pub type TransactionId = u64;
/// Identifier of an operation as recorded in the log.
pub type OperationId = u64;
/// Row key.
pub type Key = u64;
/// Column of a row.
pub type Field = u64;
/// Value stored in a field.
pub type Value = u64;
/// Logical timestamp.
pub type Timestamp = u64;

/// One row returned by a predicate read, attributed to the write that installed it.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PredicateMatch {
    pub key: Key,
    pub from_tid: TransactionId,
    pub from_oid: OperationId,
}

/// A range read `lower <= field <= upper` and the rows it returned.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredicateRead {
    pub field: Field,
    pub lower: Value,
    pub upper: Value,
    pub matches: Vec<PredicateMatch>,
}

impl PredicateRead {
    /// A range read that returned nothing yet.
    #[must_use]
    pub const fn new(field: Field, lower: Value, upper: Value) -> Self {
        Self {
            field,
            lower,
            upper,
            matches: Vec::new(),
        }
    }

    #[must_use]
    pub fn returned(&self, key: Key) -> Option<&PredicateMatch> {
        self.matches.iter().find(|m| m.key == key)
    }

    #[must_use]
    pub const fn admits(&self, value: Value) -> bool {
        self.lower <= value && value <= self.upper
    }
}

#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Clone, PartialEq, Eq)]
pub enum OperationKind {
    Begin,
    Write {
        key: Key,
        field: Field,
        value: Value,
    },
    Read {
        key: Key,
        from_tid: TransactionId,
        from_oid: OperationId,
    },
    Predicate(PredicateRead),
    Commit,
    Abort,
}

/// A single timestamped operation of a transaction.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub id: OperationId,
    pub start: Timestamp,
    pub end: Timestamp,
    pub kind: OperationKind,
}

impl Operation {
    #[must_use]
    pub const fn new(id: OperationId, start: Timestamp, end: Timestamp, kind: OperationKind) -> Self {
        Self {
            id,
            start,
            end,
            kind,
        }
    }

    #[must_use]
    pub const fn write(id: OperationId, at: Timestamp, key: Key, field: Field, value: Value) -> Self {
        Self::new(id, at, at, OperationKind::Write { key, field, value })
    }

    #[must_use]
    pub const fn read(
        id: OperationId,
        at: Timestamp,
        key: Key,
        from_tid: TransactionId,
        from_oid: OperationId,
    ) -> Self {
        Self::new(
            id,
            at,
            at,
            OperationKind::Read {
                key,
                from_tid,
                from_oid,
            },
        )
    }

    #[must_use]
    pub const fn predicate(id: OperationId, at: Timestamp, read: PredicateRead) -> Self {
        Self::new(id, at, at, OperationKind::Predicate(read))
    }
}

impl Debug for OperationKind {
    fn fmt(&self, f: &mut Formatter) -> Result {
        match self {
            Self::Begin => write!(f, "begin"),
            Self::Commit => write!(f, "commit"),
            Self::Abort => write!(f, "abort"),
            Self::Write { key, field, value } => write!(f, "{key}.{field}:={value}"),
            Self::Read {
                key,
                from_tid,
                from_oid,
            } => write!(f, "{key}<-{from_tid}/{from_oid}"),
            Self::Predicate(p) => {
                write!(f, "{}..={} on {} ->", p.lower, p.upper, p.field)?;
                for m in &p.matches {
                    write!(f, " {}<-{}/{}", m.key, m.from_tid, m.from_oid)?;
                }
                Ok(())
            }
        }
    }
}

/// A transaction as recorded by a client: its interval and its operations in
/// program order, normally bracketed by `Begin` and `Commit`/`Abort`.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub tid: TransactionId,
    pub start: Timestamp,
    pub end: Timestamp,
    pub operations: Vec<Operation>,
}

impl Transaction {
    #[must_use]
    pub const fn new(tid: TransactionId, start: Timestamp, end: Timestamp) -> Self {
        Self {
            tid,
            start,
            end,
            operations: Vec::new(),
        }
    }

    /// Builder-style push of an operation.
    #[must_use]
    pub fn with(mut self, operation: Operation) -> Self {
        self.operations.push(operation);
        self
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(
            self.operations.last(),
            Some(Operation {
                kind: OperationKind::Abort,
                ..
            })
        )
    }

    /// Start of the first operation after `Begin`. Snapshots are taken lazily,
    /// so this is when the transaction effectively started.
    #[must_use]
    pub fn effective_start(&self) -> Timestamp {
        let mut ops = self.operations.iter();
        match ops.next() {
            Some(Operation {
                kind: OperationKind::Begin,
                ..
            }) => ops
                .next()
                .filter(|op| !matches!(op.kind, OperationKind::Commit | OperationKind::Abort))
                .map_or(self.start, |op| op.start.max(self.start)),
            _ => self.start,
        }
    }
}
