//! Storage backends for the reachability relation.
//!
//! Every backend stores, per ordered vertex pair, whether the pair is
//! reachable and which inserted edge justifies it. They differ only in memory
//! layout.

use alloc::vec;
use alloc::vec::Vec;

use hashbrown::HashMap;

use crate::graph::vertex::{Edge, Timeline};

/// Reachability and justification storage.
pub trait ReachabilityMatrix {
    fn reach(&self, from: u32, to: u32) -> bool;

    fn set_reach(&mut self, from: u32, to: u32, reachable: bool);

    fn parent(&self, from: u32, to: u32) -> Option<Edge>;

    fn set_parent(&mut self, from: u32, to: u32, parent: Option<Edge>);

    /// Number of vertices.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Flat `n x n` matrices.
#[derive(Debug, Clone)]
pub struct DenseMatrix {
    n: usize,
    reach: Vec<bool>,
    parent: Vec<Option<Edge>>,
}

impl DenseMatrix {
    #[must_use]
    pub fn new(n: usize) -> Self {
        Self {
            n,
            reach: vec![false; n * n],
            parent: vec![None; n * n],
        }
    }

    const fn slot(&self, from: u32, to: u32) -> usize {
        from as usize * self.n + to as usize
    }
}

impl ReachabilityMatrix for DenseMatrix {
    fn reach(&self, from: u32, to: u32) -> bool {
        self.reach[self.slot(from, to)]
    }

    fn set_reach(&mut self, from: u32, to: u32, reachable: bool) {
        let slot = self.slot(from, to);
        self.reach[slot] = reachable;
    }

    fn parent(&self, from: u32, to: u32) -> Option<Edge> {
        self.parent[self.slot(from, to)]
    }

    fn set_parent(&mut self, from: u32, to: u32, parent: Option<Edge>) {
        let slot = self.slot(from, to);
        self.parent[slot] = parent;
    }

    fn len(&self) -> usize {
        self.n
    }
}

/// Row maps holding only reachable pairs.
#[derive(Debug, Clone, Default)]
pub struct SparseMatrix {
    n: usize,
    rows: HashMap<u32, HashMap<u32, Option<Edge>>>,
}

impl SparseMatrix {
    #[must_use]
    pub fn new(n: usize) -> Self {
        Self {
            n,
            rows: HashMap::new(),
        }
    }
}

impl ReachabilityMatrix for SparseMatrix {
    fn reach(&self, from: u32, to: u32) -> bool {
        self.rows
            .get(&from)
            .is_some_and(|row| row.contains_key(&to))
    }

    fn set_reach(&mut self, from: u32, to: u32, reachable: bool) {
        if reachable {
            self.rows.entry(from).or_default().entry(to).or_insert(None);
        } else if let Some(row) = self.rows.get_mut(&from) {
            row.remove(&to);
            if row.is_empty() {
                self.rows.remove(&from);
            }
        }
    }

    fn parent(&self, from: u32, to: u32) -> Option<Edge> {
        self.rows.get(&from).and_then(|row| row.get(&to).copied().flatten())
    }

    fn set_parent(&mut self, from: u32, to: u32, parent: Option<Edge>) {
        if let Some(slot) = self.rows.get_mut(&from).and_then(|row| row.get_mut(&to)) {
            *slot = parent;
        }
    }

    fn len(&self) -> usize {
        self.n
    }
}

/// One row per vertex covering only its overlap window, laid out back to
/// back. Pairs outside a window read as unreachable and writes to them are
/// dropped; the closure answers those pairs from real-time order instead.
#[derive(Debug, Clone)]
pub struct IntervalMatrix {
    offsets: Vec<usize>,
    lefts: Vec<u32>,
    rights: Vec<u32>,
    reach: Vec<bool>,
    parent: Vec<Option<Edge>>,
}

impl IntervalMatrix {
    #[must_use]
    pub fn new(timeline: &Timeline) -> Self {
        let mut offsets = Vec::with_capacity(timeline.len() + 1);
        let mut lefts = Vec::with_capacity(timeline.len());
        let mut rights = Vec::with_capacity(timeline.len());
        let mut total = 0;
        for span in timeline.spans() {
            offsets.push(total);
            lefts.push(span.left);
            rights.push(span.right);
            total += (span.right - span.left) as usize;
        }
        offsets.push(total);
        tracing::trace!(cells = total, "interval matrix allocated");
        Self {
            offsets,
            lefts,
            rights,
            reach: vec![false; total],
            parent: vec![None; total],
        }
    }

    fn slot(&self, from: u32, to: u32) -> Option<usize> {
        let row = from as usize;
        (self.lefts[row] <= to && to < self.rights[row])
            .then(|| self.offsets[row] + (to - self.lefts[row]) as usize)
    }

    #[cfg(test)]
    fn cells(&self) -> usize {
        self.reach.len()
    }
}

impl ReachabilityMatrix for IntervalMatrix {
    fn reach(&self, from: u32, to: u32) -> bool {
        self.slot(from, to).is_some_and(|slot| self.reach[slot])
    }

    fn set_reach(&mut self, from: u32, to: u32, reachable: bool) {
        if let Some(slot) = self.slot(from, to) {
            self.reach[slot] = reachable;
        }
    }

    fn parent(&self, from: u32, to: u32) -> Option<Edge> {
        self.slot(from, to).and_then(|slot| self.parent[slot])
    }

    fn set_parent(&mut self, from: u32, to: u32, parent: Option<Edge>) {
        if let Some(slot) = self.slot(from, to) {
            self.parent[slot] = parent;
        }
    }

    fn len(&self) -> usize {
        self.lefts.len()
    }
}
