use alloc::vec::Vec;
use core::fmt::Debug;
use core::hash::Hash;

use hashbrown::{HashMap, HashSet};

/// Directed graph backed by an adjacency map.
///
/// Each vertex of type `T` maps to the set of its outgoing neighbors.
/// Vertices are added implicitly when they appear in an edge. Holds the
/// explicit dependency edges before they are folded into a closure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiGraph<T>
where
    T: Hash + Eq + Clone + Debug,
{
    /// Maps each vertex to the set of vertices it has edges to.
    pub adj_map: HashMap<T, HashSet<T>>,
}

impl<T> Default for DiGraph<T>
where
    T: Hash + Eq + Clone + Debug,
{
    fn default() -> Self {
        Self {
            adj_map: HashMap::new(),
        }
    }
}

impl<T> DiGraph<T>
where
    T: Hash + Eq + Clone + Debug,
{
    /// Inserts a directed edge from `source` to `target`.
    ///
    /// Returns `true` if the edge was not present.
    pub fn add_edge(&mut self, source: T, target: T) -> bool {
        self.adj_map.entry(target.clone()).or_default();
        self.adj_map.entry(source).or_default().insert(target)
    }

    /// Returns `true` if an edge from `source` to `target` exists.
    pub fn has_edge(&self, source: &T, target: &T) -> bool {
        self.adj_map
            .get(source)
            .is_some_and(|neighbor| neighbor.contains(target))
    }

    /// Outgoing neighbors of `source`; empty for unknown vertices.
    pub fn successors(&self, source: &T) -> impl Iterator<Item = &T> {
        self.adj_map.get(source).into_iter().flatten()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.adj_map.values().map(HashSet::len).sum()
    }

    /// Every vertex reachable from `source` by at least one edge.
    ///
    /// Iterative depth-first search; `source` is included only if it lies on a
    /// cycle.
    #[must_use]
    pub fn reachable_from(&self, source: &T) -> HashSet<T> {
        let mut reachable = HashSet::new();
        let mut stack: Vec<&T> = self.successors(source).collect();
        while let Some(node) = stack.pop() {
            if reachable.insert(node.clone()) {
                stack.extend(self.successors(node));
            }
        }
        reachable
    }

    /// Returns `true` if the graph has no cycles (Kahn's algorithm, O(V+E)).
    #[must_use]
    pub fn is_acyclic(&self) -> bool {
        let mut in_degree: HashMap<&T, usize> = self.adj_map.keys().map(|v| (v, 0)).collect();
        for neighbors in self.adj_map.values() {
            for neighbor in neighbors {
                *in_degree.entry(neighbor).or_insert(0) += 1;
            }
        }

        let mut queue: Vec<&T> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(&vertex, _)| vertex)
            .collect();

        let mut visited = 0;
        while let Some(vertex) = queue.pop() {
            visited += 1;
            for neighbor in self.successors(vertex) {
                if let Some(degree) = in_degree.get_mut(neighbor) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push(neighbor);
                    }
                }
            }
        }
        visited == self.adj_map.len()
    }
}

impl<T> FromIterator<(T, T)> for DiGraph<T>
where
    T: Hash + Eq + Clone + Debug,
{
    fn from_iter<I: IntoIterator<Item = (T, T)>>(iter: I) -> Self {
        let mut graph = Self::default();
        for (source, target) in iter {
            graph.add_edge(source, target);
        }
        graph
    }
}
