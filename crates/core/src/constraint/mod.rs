//! Unresolved ordering choices between transactions.
//!
//! Two kinds of constraint remain once the known edges are in place:
//!
//! * an [`ItemConstraint`] between two overlapping writers of the same key,
//!   with one [`Side`] per commit order; each side carries the write-write
//!   edge and the anti-dependencies of the readers of the earlier writer;
//! * a [`PredicateConstraint`] per predicate read and unreturned key, with
//!   one [`PredicateDirection`] per writer that may have installed the
//!   version the predicate saw.
//!
//! Constraints live in arenas inside [`Constraints`] and refer to each other
//! by id. [`ConstraintIndex`] maps edges back to the directions that would
//! add them, so a change in reachability finds the affected choices without
//! a scan.

pub mod builder;

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use hashbrown::{HashMap, HashSet};

use crate::graph::vertex::Edge;
use crate::history::types::Key;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemConstraintId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PredicateConstraintId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PredicateDirectionId(pub u32);

/// Which of the two commit orders of an item constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Side {
    /// `i` commits before `j`.
    Alpha,
    /// `j` commits before `i`.
    Beta,
}

impl Side {
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Alpha => Self::Beta,
            Self::Beta => Self::Alpha,
        }
    }
}

/// One side of one item constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemDirectionId {
    pub constraint: ItemConstraintId,
    pub side: Side,
}

impl ItemDirectionId {
    #[must_use]
    pub const fn new(constraint: ItemConstraintId, side: Side) -> Self {
        Self { constraint, side }
    }

    /// The other side of the same constraint.
    #[must_use]
    pub const fn adversary(self) -> Self {
        Self {
            constraint: self.constraint,
            side: self.side.opposite(),
        }
    }
}

/// Exactly one of `alpha` and `beta` holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemConstraint {
    pub i: u32,
    pub j: u32,
    pub alpha: HashSet<Edge>,
    pub beta: HashSet<Edge>,
    /// Folded into another constraint.
    pub removed: bool,
    /// The side chosen once its edges were forced.
    pub resolved: Option<Side>,
}

impl ItemConstraint {
    /// The two orders of `i` and `j` with no anti-dependencies yet.
    #[must_use]
    pub fn pair(i: u32, j: u32) -> Self {
        Self {
            i,
            j,
            alpha: [Edge::new(i, j)].into(),
            beta: [Edge::new(j, i)].into(),
            removed: false,
            resolved: None,
        }
    }

    #[must_use]
    pub const fn side(&self, side: Side) -> &HashSet<Edge> {
        match side {
            Side::Alpha => &self.alpha,
            Side::Beta => &self.beta,
        }
    }

    pub fn side_mut(&mut self, side: Side) -> &mut HashSet<Edge> {
        match side {
            Side::Alpha => &mut self.alpha,
            Side::Beta => &mut self.beta,
        }
    }

    /// The side that holds exactly when `edge` does: it contains `edge` and
    /// the other side contains the reverse. True for the write-write edges,
    /// and for the edges merging brought in with both orientations.
    #[must_use]
    pub fn orders(&self, edge: Edge) -> Option<Side> {
        [Side::Alpha, Side::Beta].into_iter().find(|&side| {
            self.side(side).contains(&edge)
                && self.side(side.opposite()).contains(&edge.reversed())
        })
    }

    #[must_use]
    pub const fn is_live(&self) -> bool {
        !self.removed && self.resolved.is_none()
    }
}

/// Exactly one direction of a predicate read over one key holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredicateConstraint {
    pub reader: u32,
    pub key: Key,
    /// Candidate writer to its direction.
    pub directions: BTreeMap<u32, PredicateDirectionId>,
    pub resolved: bool,
}

/// The predicate saw the version installed by `writer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredicateDirection {
    pub writer: u32,
    pub constraint: PredicateConstraintId,
    /// Edges that hold whenever this direction holds.
    pub determined: HashSet<Edge>,
    /// Edges that hold when this direction holds and their derivation holds.
    pub undetermined: HashMap<Edge, Edge>,
    /// Ruled out by a contradicting reachability fact.
    pub rejected: bool,
}

/// Reverse maps from edges to the choices that would add them.
#[derive(Debug, Clone, Default)]
pub struct ConstraintIndex {
    pub item_directions: HashMap<Edge, ItemDirectionId>,
    pub determined_directions: HashMap<Edge, HashSet<PredicateDirectionId>>,
    pub undetermined_directions: HashMap<Edge, HashSet<PredicateDirectionId>>,
    /// Derivation edge to the undetermined edges it conditions.
    pub re_derivations: HashMap<Edge, HashSet<Edge>>,
}

/// Arenas of every constraint of a history plus the index over them.
#[derive(Debug, Clone, Default)]
pub struct Constraints {
    pub items: Vec<ItemConstraint>,
    pub predicates: Vec<PredicateConstraint>,
    pub directions: Vec<PredicateDirection>,
    pub index: ConstraintIndex,
}

/// How an edge joined an item direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attach {
    /// The edge now holds whenever the direction holds.
    Attached,
    /// The edge was already owned by the opposite side too, so it holds in
    /// every model.
    Forced,
}

impl Constraints {
    #[must_use]
    pub fn item(&self, id: ItemConstraintId) -> &ItemConstraint {
        &self.items[id.0 as usize]
    }

    pub fn item_mut(&mut self, id: ItemConstraintId) -> &mut ItemConstraint {
        &mut self.items[id.0 as usize]
    }

    #[must_use]
    pub fn item_edges(&self, direction: ItemDirectionId) -> &HashSet<Edge> {
        self.item(direction.constraint).side(direction.side)
    }

    #[must_use]
    pub fn predicate(&self, id: PredicateConstraintId) -> &PredicateConstraint {
        &self.predicates[id.0 as usize]
    }

    #[must_use]
    pub fn direction(&self, id: PredicateDirectionId) -> &PredicateDirection {
        &self.directions[id.0 as usize]
    }

    pub fn direction_mut(&mut self, id: PredicateDirectionId) -> &mut PredicateDirection {
        &mut self.directions[id.0 as usize]
    }

    /// Ids of item constraints neither merged away nor resolved.
    pub fn live_items(&self) -> impl Iterator<Item = ItemConstraintId> + '_ {
        (0..)
            .zip(&self.items)
            .filter(|(_, c)| c.is_live())
            .map(|(i, _)| ItemConstraintId(i))
    }

    pub fn live_predicates(&self) -> impl Iterator<Item = PredicateConstraintId> + '_ {
        (0..)
            .zip(&self.predicates)
            .filter(|(_, c)| !c.resolved)
            .map(|(i, _)| PredicateConstraintId(i))
    }

    /// Directions of `id` not yet rejected.
    #[must_use]
    pub fn live_directions(&self, id: PredicateConstraintId) -> Vec<PredicateDirectionId> {
        self.predicate(id)
            .directions
            .values()
            .copied()
            .filter(|&d| !self.direction(d).rejected)
            .collect()
    }

    /// Stores a constraint and registers its edges.
    pub fn push_item(&mut self, constraint: ItemConstraint) -> ItemConstraintId {
        let id = ItemConstraintId(u32::try_from(self.items.len()).unwrap_or(u32::MAX));
        self.items.push(constraint);
        for side in [Side::Alpha, Side::Beta] {
            let direction = ItemDirectionId::new(id, side);
            let edges: Vec<Edge> = self.item_edges(direction).iter().copied().collect();
            for edge in edges {
                self.register(edge, direction);
            }
        }
        id
    }

    /// Points `edge` at `direction` unless a live owner already holds it.
    /// Edges the direction orders always take over.
    fn register(&mut self, edge: Edge, direction: ItemDirectionId) {
        let pair = self.item(direction.constraint).orders(edge) == Some(direction.side);
        let keep = match self.index.item_directions.get(&edge) {
            Some(owner) => {
                let current = self.item(owner.constraint);
                !pair && current.is_live()
            }
            None => false,
        };
        if !keep {
            self.index.item_directions.insert(edge, direction);
        }
    }

    /// The live direction ordering the two endpoints of `edge` as `edge`
    /// does, if any constraint covers that pair.
    #[must_use]
    pub fn pair_direction(&self, edge: Edge) -> Option<ItemDirectionId> {
        let owner = *self.index.item_directions.get(&edge)?;
        let constraint = self.item(owner.constraint);
        (constraint.orders(edge) == Some(owner.side) && !constraint.removed).then_some(owner)
    }

    /// Makes `edge` hold whenever `target` holds.
    pub fn attach(&mut self, edge: Edge, target: ItemDirectionId) -> Attach {
        if self.item_edges(target.adversary()).contains(&edge) {
            return Attach::Forced;
        }
        if let Some(owner) = self.index.item_directions.get(&edge).copied() {
            if owner == target.adversary() {
                return Attach::Forced;
            }
        }
        let side = target.side;
        self.item_mut(target.constraint).side_mut(side).insert(edge);
        self.register(edge, target);
        Attach::Attached
    }

    /// Direction ordering `edge`, creating a fresh two-sided constraint over
    /// its endpoints when none exists.
    pub fn ensure_item_direction(&mut self, edge: Edge) -> ItemDirectionId {
        if let Some(direction) = self.pair_direction(edge) {
            return direction;
        }
        let id = self.push_item(ItemConstraint::pair(edge.from, edge.to));
        tracing::trace!(?edge, constraint = id.0, "fresh item constraint");
        ItemDirectionId::new(id, Side::Alpha)
    }

    /// Stores a predicate constraint with one direction per candidate
    /// writer and registers all their edges.
    pub fn push_predicate(
        &mut self,
        reader: u32,
        key: Key,
        candidates: Vec<(u32, HashSet<Edge>, HashMap<Edge, Edge>)>,
    ) -> PredicateConstraintId {
        let id = PredicateConstraintId(u32::try_from(self.predicates.len()).unwrap_or(u32::MAX));
        let mut directions = BTreeMap::new();
        for (writer, determined, undetermined) in candidates {
            let direction =
                PredicateDirectionId(u32::try_from(self.directions.len()).unwrap_or(u32::MAX));
            for &edge in &determined {
                self.index
                    .determined_directions
                    .entry(edge)
                    .or_default()
                    .insert(direction);
            }
            for (&edge, &derivation) in &undetermined {
                self.index
                    .undetermined_directions
                    .entry(edge)
                    .or_default()
                    .insert(direction);
                self.index
                    .re_derivations
                    .entry(derivation)
                    .or_default()
                    .insert(edge);
            }
            self.directions.push(PredicateDirection {
                writer,
                constraint: id,
                determined,
                undetermined,
                rejected: false,
            });
            directions.insert(writer, direction);
        }
        self.predicates.push(PredicateConstraint {
            reader,
            key,
            directions,
            resolved: false,
        });
        id
    }

    /// Turns an undetermined edge of `direction` into a determined one.
    pub fn promote(&mut self, direction: PredicateDirectionId, edge: Edge) {
        if self.direction_mut(direction).undetermined.remove(&edge).is_none() {
            return;
        }
        self.unindex_undetermined(direction, edge);
        self.add_determined(direction, edge);
    }

    pub fn add_determined(&mut self, direction: PredicateDirectionId, edge: Edge) {
        if self.direction_mut(direction).determined.insert(edge) {
            self.index
                .determined_directions
                .entry(edge)
                .or_default()
                .insert(direction);
        }
    }

    /// Forgets a determined edge that already holds.
    pub fn drop_determined(&mut self, direction: PredicateDirectionId, edge: Edge) {
        if self.direction_mut(direction).determined.remove(&edge) {
            if let Some(set) = self.index.determined_directions.get_mut(&edge) {
                set.remove(&direction);
            }
        }
    }

    /// Forgets an undetermined edge of `direction`.
    pub fn drop_undetermined(&mut self, direction: PredicateDirectionId, edge: Edge) {
        if self.direction_mut(direction).undetermined.remove(&edge).is_some() {
            self.unindex_undetermined(direction, edge);
        }
    }

    fn unindex_undetermined(&mut self, direction: PredicateDirectionId, edge: Edge) {
        if let Some(set) = self.index.undetermined_directions.get_mut(&edge) {
            set.remove(&direction);
            if set.is_empty() {
                self.index.undetermined_directions.remove(&edge);
            }
        }
    }

    /// Marks `direction` impossible and removes it from the index.
    pub fn reject(&mut self, direction: PredicateDirectionId) {
        let entry = self.direction_mut(direction);
        if entry.rejected {
            return;
        }
        entry.rejected = true;
        let determined: Vec<Edge> = entry.determined.iter().copied().collect();
        let undetermined: Vec<Edge> = entry.undetermined.keys().copied().collect();
        for edge in determined {
            if let Some(set) = self.index.determined_directions.get_mut(&edge) {
                set.remove(&direction);
            }
        }
        for edge in undetermined {
            self.unindex_undetermined(direction, edge);
        }
    }

    #[must_use]
    pub fn live_item_count(&self) -> usize {
        self.live_items().count()
    }

    #[must_use]
    pub fn live_predicate_count(&self) -> usize {
        self.live_predicates().count()
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;

    #[test]
    fn test_pair_edges_take_over_the_index() {
        let mut constraints = Constraints::default();
        let mut reader_side = ItemConstraint::pair(1, 2);
        reader_side.alpha.insert(Edge::new(3, 2));
        let first = constraints.push_item(reader_side);
        assert_eq!(
            constraints.index.item_directions.get(&Edge::new(3, 2)),
            Some(&ItemDirectionId::new(first, Side::Alpha))
        );
        assert_eq!(constraints.pair_direction(Edge::new(3, 2)), None);

        let second = constraints.push_item(ItemConstraint::pair(2, 3));
        assert_eq!(
            constraints.pair_direction(Edge::new(3, 2)),
            Some(ItemDirectionId::new(second, Side::Beta))
        );
        assert_eq!(
            constraints.ensure_item_direction(Edge::new(2, 3)),
            ItemDirectionId::new(second, Side::Alpha)
        );
        assert_eq!(constraints.live_item_count(), 2);
    }

    #[test]
    fn test_attach_to_both_sides_forces() {
        let mut constraints = Constraints::default();
        let direction = constraints.ensure_item_direction(Edge::new(1, 2));
        assert_eq!(constraints.items.len(), 1);
        assert_eq!(
            constraints.attach(Edge::new(4, 2), direction),
            Attach::Attached
        );
        assert_eq!(
            constraints.attach(Edge::new(4, 2), direction.adversary()),
            Attach::Forced
        );
        assert!(constraints.item_edges(direction).contains(&Edge::new(4, 2)));
    }

    #[test]
    fn test_predicate_bookkeeping() {
        let mut constraints = Constraints::default();
        let id = constraints.push_predicate(
            5,
            7,
            vec![
                (1, [Edge::new(1, 5)].into(), [(Edge::new(5, 2), Edge::new(1, 2))].into()),
                (2, [Edge::new(2, 5)].into(), HashMap::new()),
            ],
        );
        let first = constraints.predicate(id).directions[&1];
        assert_eq!(
            constraints.index.re_derivations[&Edge::new(1, 2)],
            [Edge::new(5, 2)].into()
        );

        constraints.promote(first, Edge::new(5, 2));
        assert!(constraints.direction(first).determined.contains(&Edge::new(5, 2)));
        assert!(!constraints
            .index
            .undetermined_directions
            .contains_key(&Edge::new(5, 2)));

        constraints.reject(first);
        assert_eq!(constraints.live_directions(id).len(), 1);
        assert!(constraints.index.determined_directions[&Edge::new(1, 5)].is_empty());
    }
}
