use crate::history::types::{Key, OperationId, TransactionId};

/// A history that cannot be reproduced by any execution.
///
/// Raised while loading, before any ordering is attempted.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anomaly {
    /// Reads a write of an aborted transaction.
    AbortedReads {
        reader: TransactionId,
        key: Key,
        from_tid: TransactionId,
    },
    /// Reads a write that its own transaction later overwrote.
    IntermediateReads {
        reader: TransactionId,
        key: Key,
        from_tid: TransactionId,
        from_oid: OperationId,
    },
    /// No committed write matches the claimed source.
    InconsistentReads {
        reader: TransactionId,
        key: Key,
        from_tid: TransactionId,
        from_oid: OperationId,
    },
    /// Does not observe the transaction's own earlier write.
    ReadSelfUpdateFailed { reader: TransactionId, key: Key },
    /// Two committed transactions share an id (or one claims tid `0`).
    DuplicateTransaction { tid: TransactionId },
}
