//! Input model: recorded transactions, grouped into client sessions.
//!
//! A [`History`] is the committed part of a log, ordered by effective start
//! time and headed by a synthetic initial transaction (tid `0`) that installs
//! the initial version of every key.

pub mod error;
pub mod types;

use alloc::vec::Vec;

use hashbrown::HashSet;

use crate::history::types::{Transaction, TransactionId};

/// Committed transactions ordered by effective start, with the initial
/// transaction at index `0`.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Debug, Clone, Default)]
pub struct History {
    transactions: Vec<Transaction>,
    aborted: HashSet<TransactionId>,
}

impl History {
    /// Merges per-session logs into one history.
    ///
    /// Aborted transactions are dropped (but remembered so that reads from them
    /// can be reported), each start time is replaced by the effective start,
    /// and ties on start keep session order.
    #[must_use]
    pub fn from_sessions(sessions: Vec<Vec<Transaction>>) -> Self {
        let mut aborted = HashSet::new();
        let mut committed: Vec<Transaction> = sessions
            .into_iter()
            .flatten()
            .filter_map(|mut txn| {
                if txn.is_aborted() {
                    aborted.insert(txn.tid);
                    None
                } else {
                    txn.start = txn.effective_start();
                    Some(txn)
                }
            })
            .collect();
        committed.sort_by_key(|txn| txn.start);

        let mut transactions = Vec::with_capacity(committed.len() + 1);
        transactions.push(Transaction::new(0, 0, 0));
        transactions.extend(committed);

        tracing::debug!(
            committed = transactions.len() - 1,
            aborted = aborted.len(),
            "history loaded"
        );

        Self {
            transactions,
            aborted,
        }
    }

    /// Ordered committed transactions, initial transaction first.
    #[must_use]
    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    #[must_use]
    pub fn is_aborted(&self, tid: TransactionId) -> bool {
        self.aborted.contains(&tid)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    /// `true` when nothing but the initial transaction is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transactions.len() <= 1
    }
}
