//! Conflict-driven search over the constraints left after pruning.
//!
//! Every remaining choice becomes a boolean variable whose literals carry
//! the edges they add to the closure. The closure is the theory: assigning
//! a literal inserts its edges, a pair made reachable forces false every
//! literal that would add the reverse pair, and an edge whose reverse is
//! already reachable is a conflict. Explanations come from
//! [`TransitiveClosure::path`]: each edge on the path is traced back to the
//! literal that inserted it.

use alloc::vec;
use alloc::vec::Vec;
use core::ops::Not;

use hashbrown::HashMap;

use crate::consistency::error::{Defect, Error};
use crate::constraint::{Constraints, ItemDirectionId, PredicateDirectionId, Side};
use crate::graph::vertex::Edge;
use crate::graph::TransitiveClosure;

/// Backend deciding whether the remaining constraints admit an acyclic
/// extension of the closure.
pub trait ConstraintSolver {
    /// Encodes the live constraints.
    ///
    /// # Errors
    ///
    /// Returns a [`Defect`] when a constraint names a vertex outside the
    /// closure.
    fn formulate(&mut self, constraints: &Constraints) -> Result<(), Defect>;

    /// Searches for a satisfying assignment. On success the closure holds
    /// the edges of the model.
    ///
    /// # Errors
    ///
    /// Returns a [`Defect`] when the search state breaks an invariant.
    fn check(&mut self) -> Result<bool, Error>;

    /// Undoes every search decision and forgets the encoding.
    fn clear(&mut self);
}

#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SolveStatistics {
    pub variables: usize,
    pub clauses: usize,
    pub decisions: usize,
    pub conflicts: usize,
    pub propagations: usize,
    pub learned: usize,
}

/// Variable and polarity packed as `var << 1 | negative`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct Literal(u32);

impl Literal {
    const fn new(var: u32, positive: bool) -> Self {
        if positive {
            Self(var << 1)
        } else {
            Self((var << 1) | 1)
        }
    }

    const fn var(self) -> usize {
        (self.0 >> 1) as usize
    }

    const fn is_positive(self) -> bool {
        self.0 & 1 == 0
    }

    const fn code(self) -> usize {
        self.0 as usize
    }
}

impl Not for Literal {
    type Output = Self;

    fn not(self) -> Self {
        Self(self.0 ^ 1)
    }
}

impl core::fmt::Debug for Literal {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        let sign = if self.is_positive() { "" } else { "-" };
        write!(f, "{sign}{}", self.var())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Origin {
    /// True means alpha.
    Item(ItemDirectionId),
    Direction(PredicateDirectionId),
    /// An undetermined edge of a direction became active.
    Derived,
    /// Order of two writers no live item constraint covers.
    Pair,
}

#[derive(Debug, Clone)]
struct Variable {
    origin: Origin,
    /// Edges added when true.
    positive: Vec<Edge>,
    /// Edges added when false.
    negative: Vec<Edge>,
}

impl Variable {
    fn edges(&self, positive: bool) -> &[Edge] {
        if positive {
            &self.positive
        } else {
            &self.negative
        }
    }
}

/// Closure changes made at one decision level, for undo.
#[derive(Debug, Default)]
struct Frame {
    deltas: Vec<Vec<Edge>>,
    owned: Vec<Edge>,
}

/// Solver using the closure as its theory.
pub struct VboxSolver<'c> {
    closure: &'c mut TransitiveClosure,
    variables: Vec<Variable>,
    clauses: Vec<Vec<Literal>>,
    /// Literal code to the clauses containing it.
    occurrences: Vec<Vec<usize>>,
    /// Edge to the literals that would add it.
    implied_by: HashMap<Edge, Vec<Literal>>,

    assignment: Vec<Option<bool>>,
    level: Vec<usize>,
    /// True literals implying the variable's value; empty for decisions.
    reason: Vec<Vec<Literal>>,
    trail: Vec<Literal>,
    trail_lim: Vec<usize>,
    qhead: usize,

    /// Inserted edge to the literal that inserted it.
    owner: HashMap<Edge, Literal>,
    frames: Vec<Frame>,
    /// Set once a conflict at level zero is found.
    unsatisfiable: bool,
    statistics: SolveStatistics,
}

impl<'c> VboxSolver<'c> {
    pub fn new(closure: &'c mut TransitiveClosure) -> Self {
        Self {
            closure,
            variables: Vec::new(),
            clauses: Vec::new(),
            occurrences: Vec::new(),
            implied_by: HashMap::new(),
            assignment: Vec::new(),
            level: Vec::new(),
            reason: Vec::new(),
            trail: Vec::new(),
            trail_lim: Vec::new(),
            qhead: 0,
            owner: HashMap::new(),
            frames: vec![Frame::default()],
            unsatisfiable: false,
            statistics: SolveStatistics::default(),
        }
    }

    #[must_use]
    pub const fn statistics(&self) -> SolveStatistics {
        self.statistics
    }

    /// Item sides chosen by the current assignment.
    #[must_use]
    pub fn chosen_sides(&self) -> Vec<ItemDirectionId> {
        self.variables
            .iter()
            .zip(&self.assignment)
            .filter_map(|(variable, value)| match (variable.origin, value) {
                (Origin::Item(alpha), Some(true)) => Some(alpha),
                (Origin::Item(alpha), Some(false)) => Some(alpha.adversary()),
                _ => None,
            })
            .collect()
    }

    /// Predicate directions chosen by the current assignment.
    #[must_use]
    pub fn chosen_directions(&self) -> Vec<PredicateDirectionId> {
        self.variables
            .iter()
            .zip(&self.assignment)
            .filter_map(|(variable, value)| match (variable.origin, value) {
                (Origin::Direction(direction), Some(true)) => Some(direction),
                _ => None,
            })
            .collect()
    }

    fn decision_level(&self) -> usize {
        self.trail_lim.len()
    }

    fn new_var(&mut self, origin: Origin, positive: Vec<Edge>, negative: Vec<Edge>) -> u32 {
        let var = u32::try_from(self.variables.len()).unwrap_or(u32::MAX);
        for &edge in &positive {
            self.implied_by
                .entry(edge)
                .or_default()
                .push(Literal::new(var, true));
        }
        for &edge in &negative {
            self.implied_by
                .entry(edge)
                .or_default()
                .push(Literal::new(var, false));
        }
        self.variables.push(Variable {
            origin,
            positive,
            negative,
        });
        self.assignment.push(None);
        self.level.push(0);
        self.reason.push(Vec::new());
        self.occurrences.push(Vec::new());
        self.occurrences.push(Vec::new());
        var
    }

    fn add_clause(&mut self, literals: Vec<Literal>) -> usize {
        let id = self.clauses.len();
        for &literal in &literals {
            self.occurrences[literal.code()].push(id);
        }
        self.clauses.push(literals);
        id
    }

    fn value(&self, literal: Literal) -> Option<bool> {
        self.assignment[literal.var()].map(|v| v == literal.is_positive())
    }

    fn enqueue(&mut self, literal: Literal, reason: Vec<Literal>) {
        let var = literal.var();
        self.assignment[var] = Some(literal.is_positive());
        self.level[var] = self.decision_level();
        self.reason[var] = reason;
        self.trail.push(literal);
    }

    fn decide(&mut self, literal: Literal) {
        self.statistics.decisions += 1;
        self.trail_lim.push(self.trail.len());
        self.frames.push(Frame::default());
        tracing::trace!(?literal, level = self.decision_level(), "decide");
        self.enqueue(literal, Vec::new());
    }

    /// Literals that inserted the edges justifying `from ~> to`.
    fn explain(&self, from: u32, to: u32) -> Vec<Literal> {
        let mut reason: Vec<Literal> = self
            .closure
            .path(from, to)
            .into_iter()
            .filter_map(|edge| self.owner.get(&edge).copied())
            .collect();
        reason.sort_unstable();
        reason.dedup();
        reason
    }

    /// Unit and theory propagation. Returns a set of true literals that
    /// cannot hold together.
    fn propagate(&mut self) -> Option<Vec<Literal>> {
        while self.qhead < self.trail.len() {
            let literal = self.trail[self.qhead];
            self.qhead += 1;
            self.statistics.propagations += 1;

            if let Some(conflict) = self.propagate_theory(literal) {
                return Some(conflict);
            }
            if let Some(conflict) = self.propagate_clauses(literal) {
                return Some(conflict);
            }
        }
        None
    }

    fn propagate_theory(&mut self, literal: Literal) -> Option<Vec<Literal>> {
        let edges = self.variables[literal.var()]
            .edges(literal.is_positive())
            .to_vec();
        for edge in edges {
            if edge.from == edge.to {
                continue;
            }
            if self.closure.reach(edge.to, edge.from) {
                let mut conflict = self.explain(edge.to, edge.from);
                conflict.push(literal);
                return Some(conflict);
            }
            let delta = self.closure.insert(edge);
            if delta.is_empty() {
                continue;
            }
            self.owner.insert(edge, literal);
            if let Some(frame) = self.frames.last_mut() {
                frame.owned.push(edge);
                frame.deltas.push(delta.clone());
            }

            for pair in delta {
                let Some(opposed) = self.implied_by.get(&pair.reversed()) else {
                    continue;
                };
                for opposed in opposed.clone() {
                    match self.value(opposed) {
                        Some(false) => {}
                        Some(true) => {
                            let mut conflict = self.explain(pair.from, pair.to);
                            conflict.push(opposed);
                            return Some(conflict);
                        }
                        None => {
                            let reason = self.explain(pair.from, pair.to);
                            self.enqueue(!opposed, reason);
                        }
                    }
                }
            }
        }
        None
    }

    fn propagate_clauses(&mut self, literal: Literal) -> Option<Vec<Literal>> {
        let watched = self.occurrences[(!literal).code()].clone();
        for id in watched {
            let mut unassigned = None;
            let mut open = 0;
            let mut satisfied = false;
            for &l in &self.clauses[id] {
                match self.value(l) {
                    Some(true) => {
                        satisfied = true;
                        break;
                    }
                    Some(false) => {}
                    None => {
                        open += 1;
                        unassigned = Some(l);
                    }
                }
            }
            if satisfied {
                continue;
            }
            match (open, unassigned) {
                (0, _) => return Some(self.clauses[id].iter().map(|&l| !l).collect()),
                (1, Some(unit)) => {
                    let reason = self.clauses[id]
                        .iter()
                        .filter(|&&l| l != unit)
                        .map(|&l| !l)
                        .collect();
                    self.enqueue(unit, reason);
                }
                _ => {}
            }
        }
        None
    }

    /// First-UIP analysis. Returns the learned clause, asserting literal
    /// first, and the level to return to.
    fn analyze(&self, conflict: &[Literal]) -> (Vec<Literal>, usize) {
        let current = self.decision_level();
        let mut seen = vec![false; self.variables.len()];
        let mut lower: Vec<Literal> = Vec::new();
        let mut pending = 0;

        let mut visit = |literal: Literal, seen: &mut [bool], pending: &mut usize| {
            let var = literal.var();
            if seen[var] {
                return;
            }
            seen[var] = true;
            if self.level[var] == current {
                *pending += 1;
            } else if self.level[var] > 0 {
                lower.push(literal);
            }
        };
        for &literal in conflict {
            visit(literal, &mut seen, &mut pending);
        }

        let mut index = self.trail.len();
        let uip = loop {
            index -= 1;
            let literal = self.trail[index];
            if !seen[literal.var()] {
                continue;
            }
            pending -= 1;
            if pending == 0 {
                break literal;
            }
            for &cause in &self.reason[literal.var()] {
                visit(cause, &mut seen, &mut pending);
            }
        };

        let backtrack = lower
            .iter()
            .map(|l| self.level[l.var()])
            .max()
            .unwrap_or(0);
        let mut learned = vec![!uip];
        learned.extend(lower.iter().map(|&l| !l));
        (learned, backtrack)
    }

    /// Keeps decision levels up to `level`.
    fn backtrack(&mut self, level: usize) {
        if self.decision_level() <= level {
            return;
        }
        let keep = self.trail_lim[level];
        for literal in self.trail.drain(keep..) {
            let var = literal.var();
            self.assignment[var] = None;
            self.reason[var].clear();
        }
        self.trail_lim.truncate(level);
        self.qhead = self.trail.len();

        while self.frames.len() > level + 1 {
            let Some(frame) = self.frames.pop() else {
                break;
            };
            for delta in frame.deltas.iter().rev() {
                self.closure.backtrace(delta);
            }
            for edge in frame.owned {
                self.owner.remove(&edge);
            }
        }
    }

    /// Forces false every literal whose edges the closure already refutes.
    fn refute_at_root(&mut self) -> Option<Vec<Literal>> {
        let mut refuted = Vec::new();
        for (edge, literals) in &self.implied_by {
            if edge.from != edge.to && self.closure.reach(edge.to, edge.from) {
                refuted.extend(literals.iter().copied());
            }
        }
        refuted.sort_unstable();
        refuted.dedup();
        for literal in refuted {
            match self.value(literal) {
                Some(true) => return Some(vec![literal]),
                Some(false) => {}
                None => self.enqueue(!literal, Vec::new()),
            }
        }
        None
    }

    fn pick(&self) -> Option<Literal> {
        let var = self.assignment.iter().position(Option::is_none)?;
        let positive = !matches!(self.variables[var].origin, Origin::Derived);
        Some(Literal::new(u32::try_from(var).unwrap_or(u32::MAX), positive))
    }

    /// Literal meaning "`edge` holds", if some variable orders its endpoints.
    fn ordering(
        &mut self,
        constraints: &Constraints,
        items: &HashMap<ItemDirectionId, Literal>,
        pairs: &mut HashMap<Edge, Literal>,
        edge: Edge,
    ) -> Literal {
        if let Some(direction) = constraints.pair_direction(edge) {
            if let Some(&literal) = items.get(&direction) {
                return literal;
            }
        }
        let forward = Edge::new(edge.from.min(edge.to), edge.from.max(edge.to));
        let literal = match pairs.get(&forward) {
            Some(&literal) => literal,
            None => {
                let var = self.new_var(Origin::Pair, vec![forward], vec![forward.reversed()]);
                let literal = Literal::new(var, true);
                pairs.insert(forward, literal);
                literal
            }
        };
        if edge == forward {
            literal
        } else {
            !literal
        }
    }

    fn check_bounds(&self, edges: &[Edge]) -> Result<(), Defect> {
        let n = u32::try_from(self.closure.len()).unwrap_or(u32::MAX);
        match edges.iter().find(|e| e.from >= n || e.to >= n) {
            Some(edge) => Err(Defect::VertexOutOfRange {
                index: edge.from.max(edge.to),
            }),
            None => Ok(()),
        }
    }
}

impl ConstraintSolver for VboxSolver<'_> {
    fn formulate(&mut self, constraints: &Constraints) -> Result<(), Defect> {
        let mut items: HashMap<ItemDirectionId, Literal> = HashMap::new();
        for id in constraints.live_items() {
            let constraint = constraints.item(id);
            let alpha: Vec<Edge> = constraint.alpha.iter().copied().collect();
            let beta: Vec<Edge> = constraint.beta.iter().copied().collect();
            self.check_bounds(&alpha)?;
            self.check_bounds(&beta)?;
            let var = self.new_var(
                Origin::Item(ItemDirectionId::new(id, Side::Alpha)),
                alpha,
                beta,
            );
            items.insert(ItemDirectionId::new(id, Side::Alpha), Literal::new(var, true));
            items.insert(ItemDirectionId::new(id, Side::Beta), Literal::new(var, false));
        }

        let mut pairs: HashMap<Edge, Literal> = HashMap::new();
        for id in constraints.live_predicates() {
            let mut chosen = Vec::new();
            for direction_id in constraints.live_directions(id) {
                let direction = constraints.direction(direction_id);
                let mut determined: Vec<Edge> = direction.determined.iter().copied().collect();
                let mut derived = Vec::new();
                for (&edge, &derivation) in &direction.undetermined {
                    if self.closure.reach(derivation.from, derivation.to) {
                        determined.push(edge);
                    } else if !self.closure.reach(derivation.to, derivation.from) {
                        derived.push((edge, derivation));
                    }
                }
                self.check_bounds(&determined)?;
                determined.sort_unstable();
                let var = self.new_var(Origin::Direction(direction_id), determined, Vec::new());
                chosen.push(Literal::new(var, true));

                derived.sort_unstable();
                for (edge, derivation) in derived {
                    self.check_bounds(&[edge, derivation])?;
                    let holds = self.ordering(constraints, &items, &mut pairs, derivation);
                    let active = self.new_var(Origin::Derived, vec![edge], Vec::new());
                    self.add_clause(vec![
                        Literal::new(var, false),
                        !holds,
                        Literal::new(active, true),
                    ]);
                }
            }
            for (a, &first) in chosen.iter().enumerate() {
                for &second in &chosen[a + 1..] {
                    self.add_clause(vec![!first, !second]);
                }
            }
            match chosen.len() {
                0 => self.unsatisfiable = true,
                1 => self.enqueue(chosen[0], Vec::new()),
                _ => {
                    self.add_clause(chosen);
                }
            }
        }

        self.statistics.variables = self.variables.len();
        self.statistics.clauses = self.clauses.len();
        tracing::debug!(
            variables = self.statistics.variables,
            clauses = self.statistics.clauses,
            "solver formulated"
        );
        Ok(())
    }

    fn check(&mut self) -> Result<bool, Error> {
        if self.unsatisfiable {
            return Ok(false);
        }
        if self.refute_at_root().is_some() {
            self.unsatisfiable = true;
            return Ok(false);
        }
        // singleton predicate constraints were enqueued while formulating
        loop {
            if let Some(conflict) = self.propagate() {
                self.statistics.conflicts += 1;
                if self.decision_level() == 0 {
                    tracing::debug!(conflicts = self.statistics.conflicts, "unsatisfiable");
                    self.unsatisfiable = true;
                    return Ok(false);
                }
                let (learned, level) = self.analyze(&conflict);
                tracing::trace!(?learned, level, "learned clause");
                self.backtrack(level);
                let asserting = learned[0];
                let reason = learned[1..].iter().map(|&l| !l).collect();
                if learned.len() > 1 {
                    self.add_clause(learned);
                }
                self.statistics.learned += 1;
                if self.value(asserting).is_some() {
                    return Err(Defect::StaleLearnedClause {
                        variable: u32::try_from(asserting.var()).unwrap_or(u32::MAX),
                    }
                    .into());
                }
                self.enqueue(asserting, reason);
                continue;
            }
            match self.pick() {
                Some(literal) => self.decide(literal),
                None => {
                    tracing::debug!(
                        decisions = self.statistics.decisions,
                        conflicts = self.statistics.conflicts,
                        "satisfiable"
                    );
                    return Ok(true);
                }
            }
        }
    }

    fn clear(&mut self) {
        self.backtrack(0);
        for frame in self.frames.drain(..).rev() {
            for delta in frame.deltas.iter().rev() {
                self.closure.backtrace(delta);
            }
        }
        self.variables.clear();
        self.clauses.clear();
        self.occurrences.clear();
        self.implied_by.clear();
        self.assignment.clear();
        self.level.clear();
        self.reason.clear();
        self.trail.clear();
        self.qhead = 0;
        self.owner.clear();
        self.frames = vec![Frame::default()];
        self.unsatisfiable = false;
        self.statistics = SolveStatistics::default();
    }
}
