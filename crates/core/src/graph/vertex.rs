use alloc::vec::Vec;
use core::fmt::{Debug, Formatter, Result};

use hashbrown::{HashMap, HashSet};

use crate::history::types::{
    Field, Key, OperationId, PredicateRead, Timestamp, TransactionId, Value,
};

/// Directed pair of vertex indices.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Edge {
    pub from: u32,
    pub to: u32,
}

impl Edge {
    #[must_use]
    pub const fn new(from: u32, to: u32) -> Self {
        Self { from, to }
    }

    #[must_use]
    pub const fn reversed(self) -> Self {
        Self {
            from: self.to,
            to: self.from,
        }
    }
}

impl Debug for Edge {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(f, "{}->{}", self.from, self.to)
    }
}

/// All writes of one vertex to one key, folded into a single row image.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Write {
    /// Id of the latest write folded in.
    pub oid: OperationId,
    /// Ids of every folded write, in program order.
    pub history: Vec<OperationId>,
    pub updates: HashMap<Field, (OperationId, Value)>,
}

impl Write {
    #[must_use]
    pub fn single(oid: OperationId, field: Field, value: Value) -> Self {
        let mut updates = HashMap::new();
        updates.insert(field, (oid, value));
        Self {
            oid,
            history: alloc::vec![oid],
            updates,
        }
    }

    /// Folds `other` in; for each field the update with the higher id wins.
    pub fn combine(&mut self, other: &Self) {
        for (field, &(oid, value)) in &other.updates {
            self.updates
                .entry(*field)
                .and_modify(|current| {
                    if current.0 < oid {
                        *current = (oid, value);
                    }
                })
                .or_insert((oid, value));
        }
        self.history.extend_from_slice(&other.history);
        self.oid = self.oid.max(other.oid);
    }

    #[must_use]
    pub fn value(&self, field: Field) -> Option<Value> {
        self.updates.get(&field).map(|&(_, value)| value)
    }

    /// Updates the predicate's field.
    #[must_use]
    pub fn relevant(&self, predicate: &PredicateRead) -> bool {
        self.updates.contains_key(&predicate.field)
    }

    /// Relevant, and the installed value falls inside the predicate's range.
    #[must_use]
    pub fn matches(&self, predicate: &PredicateRead) -> bool {
        self.value(predicate.field)
            .is_some_and(|value| predicate.admits(value))
    }
}

/// A predicate read issued by a vertex, with the keys its own earlier writes
/// already decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedPredicate {
    pub read: PredicateRead,
    pub shadowed: HashSet<Key>,
}

/// One committed transaction in the dependency graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vertex {
    pub index: u32,
    pub tid: TransactionId,
    pub start: Timestamp,
    pub end: Timestamp,
    /// Key to the vertices that read this vertex's version of it.
    pub reads: HashMap<Key, HashSet<u32>>,
    pub writes: HashMap<Key, Write>,
    pub predicates: Vec<IssuedPredicate>,
}

impl Vertex {
    #[must_use]
    pub fn new(index: u32, tid: TransactionId, start: Timestamp, end: Timestamp) -> Self {
        Self {
            index,
            tid,
            start,
            end,
            reads: HashMap::new(),
            writes: HashMap::new(),
            predicates: Vec::new(),
        }
    }

    pub fn add_reader(&mut self, key: Key, reader: u32) {
        self.reads.entry(key).or_default().insert(reader);
    }

    #[must_use]
    pub fn readers(&self, key: Key) -> Option<&HashSet<u32>> {
        self.reads.get(&key)
    }

    pub fn add_write(&mut self, key: Key, write: &Write) {
        self.writes
            .entry(key)
            .and_modify(|w| w.combine(write))
            .or_insert_with(|| write.clone());
    }
}

/// Start/end times and windows of every vertex; the only data the closure
/// needs beyond its own matrix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timeline {
    spans: Vec<Span>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: Timestamp,
    pub end: Timestamp,
    pub left: u32,
    pub right: u32,
}

impl Timeline {
    /// Computes overlap windows for intervals sorted by start.
    ///
    /// `right` is the first later vertex starting no earlier than this one
    /// ends; `left` is the smallest vertex still running when this one starts.
    #[must_use]
    pub fn from_intervals(intervals: &[(Timestamp, Timestamp)]) -> Self {
        let n = u32::try_from(intervals.len()).unwrap_or(u32::MAX);
        let mut spans: Vec<Span> = intervals
            .iter()
            .zip(0..n)
            .map(|(&(start, end), i)| Span {
                start,
                end,
                left: i,
                right: n,
            })
            .collect();

        // vertices not yet superseded, in index order
        let mut active: Vec<u32> = Vec::new();
        for i in 0..n {
            let start = spans[i as usize].start;
            active.retain(|&u| {
                let span = &mut spans[u as usize];
                if span.end <= start {
                    span.right = i;
                    false
                } else {
                    true
                }
            });
            if let Some(&first) = active.first() {
                spans[i as usize].left = first;
            }
            active.push(i);
        }
        Self { spans }
    }

    /// Windows of a graph whose vertices all overlap each other.
    #[must_use]
    pub fn concurrent(n: usize) -> Self {
        Self::from_intervals(&alloc::vec![(0, 1); n])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    #[must_use]
    pub fn span(&self, index: u32) -> &Span {
        &self.spans[index as usize]
    }

    #[must_use]
    pub fn left(&self, index: u32) -> u32 {
        self.spans[index as usize].left
    }

    #[must_use]
    pub fn right(&self, index: u32) -> u32 {
        self.spans[index as usize].right
    }

    /// `u` finished before `v` started.
    #[must_use]
    pub fn precedes(&self, u: u32, v: u32) -> bool {
        u < v && self.spans[u as usize].end <= self.spans[v as usize].start
    }

    pub fn spans(&self) -> impl Iterator<Item = &Span> {
        self.spans.iter()
    }
}
