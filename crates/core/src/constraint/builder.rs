use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use hashbrown::{HashMap, HashSet};

use crate::consistency::error::{Defect, Error, Violation};
use crate::constraint::{Attach, Constraints, ItemConstraint, ItemDirectionId, Side};
use crate::graph::dependency::DependencyGraph;
use crate::graph::vertex::{Edge, IssuedPredicate};
use crate::history::types::{Key, Timestamp};

/// Everything the builder derived from a dependency graph.
#[derive(Debug, Clone, Default)]
pub struct Built {
    pub constraints: Constraints,
    /// Edges that hold in every serial order, sorted.
    pub known: Vec<Edge>,
    /// Item constraints folded into another one.
    pub merged: usize,
}

/// Scans per-key write histories and predicate reads for ordering choices.
pub struct ConstraintBuilder<'g> {
    graph: &'g DependencyGraph,
    merge: bool,
    constraints: Constraints,
    known: HashSet<Edge>,
    merged: usize,
}

impl<'g> ConstraintBuilder<'g> {
    #[must_use]
    pub fn new(graph: &'g DependencyGraph, merge: bool) -> Self {
        Self {
            graph,
            merge,
            constraints: Constraints::default(),
            known: graph.edges.iter().copied().collect(),
            merged: 0,
        }
    }

    /// # Errors
    ///
    /// Returns a [`Violation`] when a predicate read can be explained by no
    /// writer, or a [`Defect`] when merging meets an inconsistent index.
    pub fn build(mut self) -> Result<Built, Error> {
        let installs = self.installs();
        for (key, writers) in &installs {
            self.item_constraints(*key, writers)?;
        }
        let graph = self.graph;
        for vertex in &graph.vertices {
            for predicate in &vertex.predicates {
                for (key, writers) in &installs {
                    self.predicate_constraint(vertex.index, predicate, *key, writers)?;
                }
            }
        }

        let mut known: Vec<Edge> = self.known.into_iter().collect();
        known.sort_unstable();
        tracing::debug!(
            known = known.len(),
            items = self.constraints.live_item_count(),
            predicates = self.constraints.live_predicate_count(),
            merged = self.merged,
            "constraints built"
        );
        Ok(Built {
            constraints: self.constraints,
            known,
            merged: self.merged,
        })
    }

    /// Writers of every key in index order, headed by the initial vertex.
    fn installs(&self) -> BTreeMap<Key, Vec<u32>> {
        let mut installs: BTreeMap<Key, Vec<u32>> = BTreeMap::new();
        if let Some(init) = self.graph.vertices.first() {
            for key in init.reads.keys() {
                installs.entry(*key).or_insert_with(|| alloc::vec![0]);
            }
        }
        for vertex in self.graph.vertices.iter().skip(1) {
            for key in vertex.writes.keys() {
                installs
                    .entry(*key)
                    .or_insert_with(|| alloc::vec![0])
                    .push(vertex.index);
            }
        }
        installs
    }

    fn readers(&self, writer: u32, key: Key) -> impl Iterator<Item = u32> + '_ {
        self.graph.vertices[writer as usize]
            .readers(key)
            .into_iter()
            .flatten()
            .copied()
    }

    fn item_constraints(&mut self, key: Key, writers: &[u32]) -> Result<(), Error> {
        let graph = self.graph;
        let timeline = &graph.timeline;
        // earliest end of a writer that real time places after this one
        let mut replaced: HashMap<u32, Timestamp> = HashMap::new();
        let mut active: Vec<u32> = Vec::new();

        for &i in writers {
            let span = *timeline.span(i);
            let mut kept = Vec::with_capacity(active.len() + 1);
            for &u in &active {
                if replaced.get(&u).is_some_and(|&end| end <= span.start) {
                    continue;
                }
                kept.push(u);
                if timeline.precedes(u, i) {
                    let anti: Vec<u32> = self.readers(u, key).filter(|&r| r != i).collect();
                    for r in anti {
                        if !timeline.precedes(r, i) {
                            self.known.insert(Edge::new(r, i));
                        }
                    }
                    let end = replaced.entry(u).or_insert(Timestamp::MAX);
                    *end = (*end).min(span.end);
                } else {
                    self.item_constraint(key, u, i)?;
                }
            }
            kept.push(i);
            active = kept;
        }
        Ok(())
    }

    fn item_constraint(&mut self, key: Key, u: u32, i: u32) -> Result<(), Error> {
        let mut constraint = ItemConstraint::pair(u, i);
        let alpha: Vec<Edge> = self
            .readers(u, key)
            .filter(|&r| r != i)
            .map(|r| Edge::new(r, i))
            .collect();
        let beta: Vec<Edge> = self
            .readers(i, key)
            .filter(|&r| r != u)
            .map(|r| Edge::new(r, u))
            .collect();
        constraint.alpha.extend(alpha);
        constraint.beta.extend(beta);

        if self.merge {
            self.absorb(&mut constraint)?;
        }
        let id = self.constraints.push_item(constraint);
        tracing::trace!(key, u, i, constraint = id.0, "item constraint");
        Ok(())
    }

    /// Folds every live direction sharing an edge with `constraint` into it.
    ///
    /// A direction sharing an edge with the alpha side holds exactly when
    /// alpha does, so its edges join alpha and its adversary's join beta;
    /// the same holds for beta.
    fn absorb(&mut self, constraint: &mut ItemConstraint) -> Result<(), Error> {
        let owners = |edges: &HashSet<Edge>| -> HashSet<ItemDirectionId> {
            edges
                .iter()
                .filter_map(|edge| self.constraints.index.item_directions.get(edge))
                .copied()
                .filter(|owner| !self.constraints.item(owner.constraint).removed)
                .collect()
        };
        let alpha = owners(&constraint.alpha);
        let beta = owners(&constraint.beta);
        if let Some(owner) = alpha.intersection(&beta).next() {
            tracing::debug!(constraint = owner.constraint.0, "direction on both sides");
            return Err(Defect::MergeConflict {
                edge: Edge::new(constraint.i, constraint.j),
            }
            .into());
        }

        let mut absorbed = HashSet::new();
        for (directions, side) in [(alpha, Side::Alpha), (beta, Side::Beta)] {
            for direction in directions {
                let old = self.constraints.item_mut(direction.constraint);
                old.removed = true;
                constraint
                    .side_mut(side)
                    .extend(old.side(direction.side).iter().copied());
                constraint
                    .side_mut(side.opposite())
                    .extend(old.side(direction.side.opposite()).iter().copied());
                if absorbed.insert(direction.constraint) {
                    self.merged += 1;
                }
            }
        }
        Ok(())
    }

    fn predicate_constraint(
        &mut self,
        v: u32,
        predicate: &IssuedPredicate,
        key: Key,
        writers: &[u32],
    ) -> Result<(), Error> {
        if predicate.shadowed.contains(&key) || predicate.read.returned(key).is_some() {
            return Ok(());
        }
        let graph = self.graph;
        let timeline = &graph.timeline;
        let vertices = &graph.vertices;
        let relevant: Vec<u32> = writers
            .iter()
            .copied()
            .filter(|&w| w != 0 && w != v && !timeline.precedes(v, w))
            .filter(|&w| {
                vertices[w as usize]
                    .writes
                    .get(&key)
                    .is_some_and(|write| write.relevant(&predicate.read))
            })
            .collect();
        let matching = |w: u32| {
            vertices[w as usize]
                .writes
                .get(&key)
                .is_some_and(|write| write.matches(&predicate.read))
        };
        let visible: Vec<u32> = relevant.iter().copied().filter(|&w| matching(w)).collect();
        if visible.is_empty() {
            return Ok(());
        }

        let mut candidates: Vec<u32> = Vec::new();
        if !relevant.iter().any(|&w| timeline.precedes(w, v)) {
            candidates.push(0);
        }
        candidates.extend(relevant.iter().copied().filter(|&j| {
            !matching(j)
                && !relevant
                    .iter()
                    .any(|&w| timeline.precedes(j, w) && timeline.precedes(w, v))
        }));

        let mut directions = Vec::with_capacity(candidates.len());
        for &j in &candidates {
            let mut determined = HashSet::new();
            let mut undetermined = HashMap::new();
            if j != 0 {
                determined.insert(Edge::new(j, v));
            }
            for &k in &visible {
                if k == j || timeline.precedes(k, j) {
                    continue;
                }
                if timeline.precedes(j, k) {
                    determined.insert(Edge::new(v, k));
                } else {
                    undetermined.insert(Edge::new(v, k), Edge::new(j, k));
                }
            }
            directions.push((j, determined, undetermined));
        }

        match directions.len() {
            0 => {
                tracing::debug!(reader = v, key, "predicate read has no candidate writer");
                Err(Violation::PredicateExhausted { reader: v, key }.into())
            }
            1 => {
                let Some((writer, determined, undetermined)) = directions.pop() else {
                    return Ok(());
                };
                tracing::trace!(reader = v, key, writer, "predicate resolved during build");
                self.known.extend(determined);
                for (edge, derivation) in undetermined {
                    let direction = self.constraints.ensure_item_direction(derivation);
                    if self.constraints.attach(edge, direction) == Attach::Forced {
                        self.known.insert(edge);
                    }
                }
                Ok(())
            }
            _ => {
                let id = self.constraints.push_predicate(v, key, directions);
                tracing::trace!(reader = v, key, constraint = id.0, "predicate constraint");
                Ok(())
            }
        }
    }
}
