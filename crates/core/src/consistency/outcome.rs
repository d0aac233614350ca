use alloc::vec;
use alloc::vec::Vec;
use core::fmt::{Display, Formatter, Result};

use derive_more::From;

use crate::consistency::error::Violation;
use crate::consistency::pruner::PruneStatistics;
use crate::consistency::solver::SolveStatistics;
use crate::consistency::witness::Witness;
use crate::graph::dependency::DependencyGraph;
use crate::history::error::Anomaly;
use crate::history::types::TransactionId;

/// Verdict of a run.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Accept(Report),
    Reject(Rejection),
}

impl Outcome {
    #[must_use]
    pub const fn is_accept(&self) -> bool {
        matches!(self, Self::Accept(_))
    }

    #[must_use]
    pub const fn report(&self) -> Option<&Report> {
        match self {
            Self::Accept(report) => Some(report),
            Self::Reject(_) => None,
        }
    }

    #[must_use]
    pub const fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Accept(_) => None,
            Self::Reject(rejection) => Some(rejection),
        }
    }
}

#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub witness: Witness,
    pub statistics: Statistics,
}

/// Counters collected along the pipeline.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    /// Committed transactions, initial transaction excluded.
    pub transactions: usize,
    /// Edges known before pruning, write-read edges included.
    pub known_edges: usize,
    pub item_constraints: usize,
    pub predicate_constraints: usize,
    pub merged: usize,
    /// Item constraints handed to the solver.
    pub live_items: usize,
    /// Predicate constraints handed to the solver.
    pub live_predicates: usize,
    pub pruning: PruneStatistics,
    pub solving: SolveStatistics,
}

#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, From)]
pub enum Reason {
    Anomaly(Anomaly),
    Violation(Violation),
}

/// Why a history was rejected, with the transactions involved.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub reason: Reason,
    pub transactions: Vec<TransactionId>,
}

impl Rejection {
    /// Names the transactions behind the vertices of `violation`.
    #[must_use]
    pub fn violation(graph: &DependencyGraph, violation: Violation) -> Self {
        let transactions = violation
            .vertices()
            .into_iter()
            .filter(|&v| (v as usize) < graph.len())
            .map(|v| graph.tid(v))
            .collect();
        Self {
            reason: violation.into(),
            transactions,
        }
    }
}

impl From<Anomaly> for Rejection {
    fn from(anomaly: Anomaly) -> Self {
        let transactions = match anomaly {
            Anomaly::AbortedReads {
                reader, from_tid, ..
            }
            | Anomaly::IntermediateReads {
                reader, from_tid, ..
            }
            | Anomaly::InconsistentReads {
                reader, from_tid, ..
            } => vec![reader, from_tid],
            Anomaly::ReadSelfUpdateFailed { reader, .. } => vec![reader],
            Anomaly::DuplicateTransaction { tid } => vec![tid],
        };
        Self {
            reason: anomaly.into(),
            transactions,
        }
    }
}

impl Display for Reason {
    fn fmt(&self, f: &mut Formatter) -> Result {
        match self {
            Self::Anomaly(anomaly) => write!(f, "anomaly: {anomaly}"),
            Self::Violation(violation) => write!(f, "violation: {violation}"),
        }
    }
}

impl Display for Rejection {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(f, "{} (transactions {:?})", self.reason, self.transactions)
    }
}
