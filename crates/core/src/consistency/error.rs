use core::fmt::{Display, Formatter, Result};

use derive_more::From;

use crate::graph::vertex::Edge;
use crate::history::error::Anomaly;
use crate::history::types::Key;

/// Phase of the run that found a contradiction.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Construction,
    Pruning,
}

/// The history is well formed but no serial order explains it.
///
/// Vertex indices refer to positions in the loaded history.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// Adding `edge` would close a cycle.
    Cycle { stage: Stage, edge: Edge },
    /// Both orders of two writers of the same key close a cycle.
    ItemConflict { edge: Edge },
    /// No writer can explain what a predicate read did not return.
    PredicateExhausted { reader: u32, key: Key },
    /// The solver exhausted every assignment.
    Unsatisfiable,
}

impl Violation {
    /// Vertices named by the violation.
    #[must_use]
    pub fn vertices(&self) -> alloc::vec::Vec<u32> {
        match self {
            Self::Cycle { edge, .. } | Self::ItemConflict { edge } => alloc::vec![edge.from, edge.to],
            Self::PredicateExhausted { reader, .. } => alloc::vec![*reader],
            Self::Unsatisfiable => alloc::vec![],
        }
    }
}

/// Internal invariant breach; aborts the run instead of producing a verdict.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Defect {
    /// One item direction was found on both sides of a new constraint.
    MergeConflict { edge: Edge },
    /// An edge names a vertex the closure does not hold.
    VertexOutOfRange { index: u32 },
    /// A learned clause asserts a variable that is still assigned after
    /// backjumping.
    StaleLearnedClause { variable: u32 },
}

#[derive(Debug, From)]
pub enum Error {
    Anomaly(Anomaly),
    Violation(Violation),
    Defect(Defect),
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter) -> Result {
        match self {
            Self::Construction => write!(f, "construction"),
            Self::Pruning => write!(f, "pruning"),
        }
    }
}

impl Display for Violation {
    fn fmt(&self, f: &mut Formatter) -> Result {
        match self {
            Self::Cycle { stage, edge } => write!(f, "cycle through {edge:?} during {stage}"),
            Self::ItemConflict { edge } => {
                write!(f, "writers {} and {} cannot be ordered", edge.from, edge.to)
            }
            Self::PredicateExhausted { reader, key } => {
                write!(f, "no writer explains predicate of {reader} on key {key}")
            }
            Self::Unsatisfiable => write!(f, "no consistent ordering exists"),
        }
    }
}

impl Display for Anomaly {
    fn fmt(&self, f: &mut Formatter) -> Result {
        match self {
            Self::AbortedReads {
                reader,
                key,
                from_tid,
            } => write!(f, "{reader} reads key {key} from aborted {from_tid}"),
            Self::IntermediateReads {
                reader,
                key,
                from_tid,
                from_oid,
            } => write!(
                f,
                "{reader} reads key {key} from overwritten write {from_tid}/{from_oid}"
            ),
            Self::InconsistentReads {
                reader,
                key,
                from_tid,
                from_oid,
            } => write!(
                f,
                "{reader} reads key {key} from unknown write {from_tid}/{from_oid}"
            ),
            Self::ReadSelfUpdateFailed { reader, key } => {
                write!(f, "{reader} misses its own write of key {key}")
            }
            Self::DuplicateTransaction { tid } => write!(f, "transaction {tid} appears twice"),
        }
    }
}

impl Display for Defect {
    fn fmt(&self, f: &mut Formatter) -> Result {
        match self {
            Self::MergeConflict { edge } => write!(f, "merge conflict on {edge:?}"),
            Self::VertexOutOfRange { index } => write!(f, "vertex {index} out of range"),
            Self::StaleLearnedClause { variable } => {
                write!(f, "learned clause asserts assigned variable {variable}")
            }
        }
    }
}
