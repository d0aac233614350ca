//! Knobs of a verification run.
//!
//! Every combination is sound; they trade memory and time against each other.

/// Layout of the reachability matrix.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Storage {
    /// `n x n` matrices.
    Dense,
    /// Hash rows holding reachable pairs only.
    Sparse,
    /// One row per vertex covering its overlap window.
    #[default]
    Interval,
}

/// Batch algorithm building the closure of the known edges.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Construction {
    Warshall,
    Italiano,
    ItalianoInterval,
    Purdom,
    #[default]
    PurdomInterval,
}

/// Algorithm adding a single edge to an existing closure.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Update {
    Warshall,
    Italiano,
    #[default]
    ItalianoInterval,
}

/// How constraints are resolved before solving.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Prune {
    /// Work queue reacting to every closure delta.
    #[default]
    Incremental,
    /// Full rescans until nothing is forced.
    Rescan,
    /// Hand every constraint to the solver.
    Disabled,
}

#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Options {
    pub storage: Storage,
    pub construction: Construction,
    pub update: Update,
    pub prune: Prune,
    /// Fold item constraints that share an edge into one.
    pub merge: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            storage: Storage::default(),
            construction: Construction::default(),
            update: Update::default(),
            prune: Prune::default(),
            merge: true,
        }
    }
}
