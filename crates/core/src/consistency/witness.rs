use alloc::vec::Vec;

use crate::graph::dependency::DependencyGraph;
use crate::graph::TransitiveClosure;
use crate::history::types::TransactionId;

/// Evidence that a history is strictly serializable.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Witness {
    /// Serial order of the committed transactions, initial transaction
    /// omitted.
    CommitOrder(Vec<TransactionId>),
}

impl Witness {
    /// Linear extension of a closure that orders every conflicting pair.
    ///
    /// A vertex has strictly more ancestors than each of its ancestors, so
    /// sorting by ancestor count respects every reachable pair.
    #[must_use]
    pub fn commit_order(closure: &TransitiveClosure, graph: &DependencyGraph) -> Self {
        let mut order: Vec<(usize, u32)> = (1..graph.vertices.len())
            .filter_map(|v| u32::try_from(v).ok())
            .map(|v| (closure.ancestors(v), v))
            .collect();
        order.sort_unstable();
        Self::CommitOrder(order.into_iter().map(|(_, v)| graph.tid(v)).collect())
    }

    #[must_use]
    pub fn transactions(&self) -> &[TransactionId] {
        match self {
            Self::CommitOrder(order) => order,
        }
    }
}
