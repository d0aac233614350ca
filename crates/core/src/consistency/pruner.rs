//! Resolves constraints that the closure already decides.
//!
//! Each round rescans live item constraints, then live predicate
//! constraints, queueing the edges of every choice that became forced, and
//! finally inserts the queue. With [`Prune::Incremental`] every pair an
//! insertion adds re-examines only the constraints indexed under it, so most
//! forced edges are found while draining. Rounds repeat until one queues
//! nothing.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use hashbrown::HashSet;

use crate::consistency::error::{Stage, Violation};
use crate::constraint::{
    Attach, Constraints, ItemConstraintId, ItemDirectionId, PredicateConstraintId,
    PredicateDirectionId, Side,
};
use crate::graph::vertex::Edge;
use crate::graph::TransitiveClosure;
use crate::options::Prune;

#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStatistics {
    pub rounds: usize,
    /// Edges inserted into the closure.
    pub forced: usize,
    pub items_resolved: usize,
    pub predicates_resolved: usize,
    pub directions_rejected: usize,
}

pub struct Pruner<'a> {
    closure: &'a mut TransitiveClosure,
    constraints: &'a mut Constraints,
    strategy: Prune,
    queue: VecDeque<Edge>,
    statistics: PruneStatistics,
}

impl<'a> Pruner<'a> {
    pub fn new(
        closure: &'a mut TransitiveClosure,
        constraints: &'a mut Constraints,
        strategy: Prune,
    ) -> Self {
        Self {
            closure,
            constraints,
            strategy,
            queue: VecDeque::new(),
            statistics: PruneStatistics::default(),
        }
    }

    /// Runs rounds until nothing more is forced.
    ///
    /// # Errors
    ///
    /// Returns a [`Violation`] when a forced edge closes a cycle, both sides
    /// of an item constraint are contradicted, or a predicate constraint
    /// loses every direction.
    pub fn prune(mut self) -> Result<PruneStatistics, Violation> {
        if self.strategy == Prune::Disabled {
            return Ok(self.statistics);
        }
        loop {
            self.statistics.rounds += 1;
            let items: Vec<ItemConstraintId> = self.constraints.live_items().collect();
            for id in items {
                self.check_item(id)?;
            }
            let predicates: Vec<PredicateConstraintId> =
                self.constraints.live_predicates().collect();
            for id in predicates {
                self.check_predicate(id)?;
            }
            if self.queue.is_empty() {
                break;
            }
            self.drain()?;
        }
        tracing::debug!(
            rounds = self.statistics.rounds,
            forced = self.statistics.forced,
            items = self.constraints.live_item_count(),
            predicates = self.constraints.live_predicate_count(),
            "pruning finished"
        );
        Ok(self.statistics)
    }

    fn contradicted(&self, edge: Edge) -> bool {
        self.closure.reach(edge.to, edge.from)
    }

    fn drain(&mut self) -> Result<(), Violation> {
        while let Some(edge) = self.queue.pop_front() {
            if self.contradicted(edge) {
                tracing::debug!(?edge, "forced edge closes a cycle");
                return Err(Violation::Cycle {
                    stage: Stage::Pruning,
                    edge,
                });
            }
            let delta = self.closure.insert(edge);
            if delta.is_empty() {
                continue;
            }
            self.statistics.forced += 1;
            if self.strategy == Prune::Incremental {
                for pair in delta {
                    self.react(pair)?;
                }
            }
        }
        Ok(())
    }

    /// Re-examines the constraints indexed under a newly reachable pair.
    fn react(&mut self, pair: Edge) -> Result<(), Violation> {
        let index = &self.constraints.index;
        let mut items = HashSet::new();
        let mut predicates = HashSet::new();
        for edge in [pair, pair.reversed()] {
            if let Some(owner) = index.item_directions.get(&edge) {
                items.insert(owner.constraint);
            }
            let dependents = index.re_derivations.get(&edge).into_iter().flatten();
            let directions = index
                .determined_directions
                .get(&edge)
                .into_iter()
                .chain(index.undetermined_directions.get(&edge))
                .chain(
                    dependents.filter_map(|e| index.undetermined_directions.get(e)),
                )
                .flatten();
            for &direction in directions {
                predicates.insert(self.constraints.direction(direction).constraint);
            }
        }
        for id in items {
            self.check_item(id)?;
        }
        for id in predicates {
            self.check_predicate(id)?;
        }
        Ok(())
    }

    fn check_item(&mut self, id: ItemConstraintId) -> Result<(), Violation> {
        let constraint = self.constraints.item(id);
        if !constraint.is_live() {
            return Ok(());
        }
        let dead = |side: Side| constraint.side(side).iter().any(|&e| self.contradicted(e));
        match (dead(Side::Alpha), dead(Side::Beta)) {
            (true, true) => Err(Violation::ItemConflict {
                edge: Edge::new(constraint.i, constraint.j),
            }),
            (true, false) => {
                self.resolve_item(ItemDirectionId::new(id, Side::Beta));
                Ok(())
            }
            (false, true) => {
                self.resolve_item(ItemDirectionId::new(id, Side::Alpha));
                Ok(())
            }
            (false, false) => Ok(()),
        }
    }

    fn resolve_item(&mut self, direction: ItemDirectionId) {
        let constraint = self.constraints.item_mut(direction.constraint);
        constraint.resolved = Some(direction.side);
        tracing::trace!(
            i = constraint.i,
            j = constraint.j,
            side = ?direction.side,
            "item constraint resolved"
        );
        self.queue
            .extend(constraint.side(direction.side).iter().copied());
        self.statistics.items_resolved += 1;
    }

    /// Settles undetermined edges whose outcome is known, rejects
    /// contradicted directions, and resolves the constraint once a single
    /// direction is left.
    fn check_predicate(&mut self, id: PredicateConstraintId) -> Result<(), Violation> {
        if self.constraints.predicate(id).resolved {
            return Ok(());
        }
        for direction in self.constraints.live_directions(id) {
            self.settle(direction);
        }

        let live = self.constraints.live_directions(id);
        match live.as_slice() {
            [] => {
                let constraint = self.constraints.predicate(id);
                Err(Violation::PredicateExhausted {
                    reader: constraint.reader,
                    key: constraint.key,
                })
            }
            [direction] => {
                self.resolve_predicate(id, *direction);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn settle(&mut self, direction: PredicateDirectionId) {
        let undetermined: Vec<(Edge, Edge)> = self
            .constraints
            .direction(direction)
            .undetermined
            .iter()
            .map(|(&e, &d)| (e, d))
            .collect();
        for (edge, derivation) in undetermined {
            if self.closure.reach(edge.from, edge.to) {
                self.constraints.drop_undetermined(direction, edge);
            } else if self.contradicted(edge) {
                // choosing this writer now requires the opposite write order
                self.constraints.drop_undetermined(direction, edge);
                self.constraints
                    .add_determined(direction, derivation.reversed());
            } else if self.closure.reach(derivation.from, derivation.to) {
                self.constraints.promote(direction, edge);
            } else if self.contradicted(derivation) {
                self.constraints.drop_undetermined(direction, edge);
            }
        }

        let determined: Vec<Edge> = self
            .constraints
            .direction(direction)
            .determined
            .iter()
            .copied()
            .collect();
        if determined.iter().any(|&e| self.contradicted(e)) {
            tracing::trace!(writer = self.constraints.direction(direction).writer, "direction rejected");
            self.constraints.reject(direction);
            self.statistics.directions_rejected += 1;
            return;
        }
        for edge in determined {
            if self.closure.reach(edge.from, edge.to) {
                self.constraints.drop_determined(direction, edge);
            }
        }
    }

    fn resolve_predicate(&mut self, id: PredicateConstraintId, direction: PredicateDirectionId) {
        self.constraints.predicates[id.0 as usize].resolved = true;
        self.statistics.predicates_resolved += 1;
        let chosen = self.constraints.direction(direction);
        tracing::trace!(
            reader = self.constraints.predicate(id).reader,
            writer = chosen.writer,
            "predicate constraint resolved"
        );
        self.queue.extend(chosen.determined.iter().copied());
        let undetermined: Vec<(Edge, Edge)> =
            chosen.undetermined.iter().map(|(&e, &d)| (e, d)).collect();

        for (edge, derivation) in undetermined {
            if self.closure.reach(derivation.from, derivation.to) {
                self.queue.push_back(edge);
                continue;
            }
            if self.contradicted(derivation) {
                continue;
            }
            let target = self.constraints.ensure_item_direction(derivation);
            match self.constraints.item(target.constraint).resolved {
                Some(side) if side == target.side => self.queue.push_back(edge),
                Some(_) => {}
                None => {
                    if self.constraints.attach(edge, target) == Attach::Forced {
                        self.queue.push_back(edge);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use hashbrown::HashMap;

    use super::*;
    use crate::constraint::builder::{Built, ConstraintBuilder};
    use crate::graph::dependency::DependencyGraph;
    use crate::graph::vertex::Timeline;
    use crate::history::types::{Operation, PredicateRead, Transaction};
    use crate::history::History;
    use crate::options::{Construction, Storage, Update};

    fn setup(sessions: Vec<Vec<Transaction>>) -> (TransitiveClosure, Built) {
        let history = History::from_sessions(sessions);
        let graph = DependencyGraph::load(&history).unwrap();
        let built = ConstraintBuilder::new(&graph, true).build().unwrap();
        let mut closure =
            TransitiveClosure::new(graph.timeline.clone(), Storage::Interval, Update::ItalianoInterval);
        closure
            .construct(&built.known, Construction::PurdomInterval)
            .unwrap();
        (closure, built)
    }

    fn crossed_readers() -> Vec<Vec<Transaction>> {
        // 3 reads x from 1 and y from 2, 4 reads x from 2 and z from 1, so
        // neither order of the two writers of x explains both readers
        vec![
            vec![Transaction::new(1, 1, 10)
                .with(Operation::write(1, 1, 7, 0, 1))
                .with(Operation::write(2, 1, 9, 0, 1))],
            vec![Transaction::new(2, 2, 11)
                .with(Operation::write(3, 2, 7, 0, 2))
                .with(Operation::write(4, 2, 8, 0, 2))],
            vec![Transaction::new(3, 3, 12)
                .with(Operation::read(5, 3, 7, 1, 1))
                .with(Operation::read(6, 3, 8, 2, 4))],
            vec![Transaction::new(4, 4, 13)
                .with(Operation::read(7, 4, 7, 2, 3))
                .with(Operation::read(8, 4, 9, 1, 2))],
        ]
    }

    #[test]
    fn test_both_orders_contradicted() {
        for strategy in [Prune::Incremental, Prune::Rescan] {
            let (mut closure, mut built) = setup(crossed_readers());
            let result = Pruner::new(&mut closure, &mut built.constraints, strategy).prune();
            assert_eq!(
                result,
                Err(Violation::ItemConflict {
                    edge: Edge::new(1, 2)
                }),
                "{strategy:?}"
            );
        }
    }

    #[test]
    fn test_disabled_leaves_constraints() {
        let (mut closure, mut built) = setup(crossed_readers());
        let stats = Pruner::new(&mut closure, &mut built.constraints, Prune::Disabled)
            .prune()
            .unwrap();
        assert_eq!(stats, PruneStatistics::default());
        assert_eq!(built.constraints.live_item_count(), 1);
    }

    #[test]
    fn test_observed_order_resolves_item() {
        // 2 reads 1's x and then overwrites it
        let sessions = vec![
            vec![Transaction::new(1, 1, 10).with(Operation::write(1, 1, 7, 0, 1))],
            vec![Transaction::new(2, 2, 11)
                .with(Operation::read(2, 5, 7, 1, 1))
                .with(Operation::write(3, 6, 7, 0, 2))],
        ];
        for strategy in [Prune::Incremental, Prune::Rescan] {
            let (mut closure, mut built) = setup(sessions.clone());
            let stats = Pruner::new(&mut closure, &mut built.constraints, strategy)
                .prune()
                .unwrap();
            assert_eq!(stats.items_resolved, 1);
            assert_eq!(built.constraints.live_item_count(), 0);
            assert!(closure.reach(1, 2));
        }
    }

    #[test]
    fn test_every_direction_contradicted() {
        // 3 already precedes both candidate writers of its scan
        for strategy in [Prune::Incremental, Prune::Rescan] {
            let mut closure =
                TransitiveClosure::new(Timeline::concurrent(4), Storage::Dense, Update::Italiano);
            closure
                .construct(&[Edge::new(3, 1), Edge::new(3, 2)], Construction::Warshall)
                .unwrap();
            let mut constraints = Constraints::default();
            constraints.push_predicate(
                3,
                7,
                vec![
                    (1, [Edge::new(1, 3)].into(), HashMap::new()),
                    (2, [Edge::new(2, 3)].into(), HashMap::new()),
                ],
            );
            let result = Pruner::new(&mut closure, &mut constraints, strategy).prune();
            assert_eq!(
                result,
                Err(Violation::PredicateExhausted { reader: 3, key: 7 }),
                "{strategy:?}"
            );
        }
    }

    #[test]
    fn test_predicate_collapses_to_single_writer() {
        // 3 scans field 0 below 10 and returns nothing while 1 (out of range)
        // and 2 (in range) run; 3 also reads 2's y, so it must have seen
        // 1 installed over 2
        let scan = PredicateRead {
            field: 0,
            lower: 0,
            upper: 9,
            matches: vec![],
        };
        let sessions = vec![
            vec![Transaction::new(1, 1, 10).with(Operation::write(1, 1, 7, 0, 50))],
            vec![Transaction::new(2, 2, 11)
                .with(Operation::write(2, 2, 7, 0, 5))
                .with(Operation::write(3, 2, 8, 1, 1))],
            vec![Transaction::new(3, 3, 9)
                .with(Operation::read(4, 3, 8, 2, 3))
                .with(Operation::predicate(5, 4, scan))],
        ];
        for strategy in [Prune::Incremental, Prune::Rescan] {
            let (mut closure, mut built) = setup(sessions.clone());
            assert_eq!(built.constraints.live_predicate_count(), 1);
            let stats = Pruner::new(&mut closure, &mut built.constraints, strategy)
                .prune()
                .unwrap();
            assert_eq!(stats.directions_rejected, 1);
            assert_eq!(built.constraints.live_predicate_count(), 0);
            assert_eq!(built.constraints.live_item_count(), 0);
            assert!(closure.reach(1, 3));
            assert!(closure.reach(2, 1));
        }
    }
}
