//! A dependency graph over changeset ids, with the two operations the
//! conversion pipeline needs: topological traversal under a caller-supplied
//! ordering of ready nodes, and extraction of one induced cycle when the
//! traversal stalls.
//!
//! The representation is successor sets plus predecessor sets; in-degrees are
//! derived from the latter. Cycle detection is the dual of Kahn's algorithm:
//! when the ready heap empties while nodes remain, every remaining node has a
//! remaining predecessor, so walking predecessors from any of them must
//! revisit a node, and the revisited segment is a cycle.

use std::{
    cmp::Ordering,
    collections::{BTreeSet, HashMap},
    fmt::Debug,
    hash::Hash,
};

use binary_heap_plus::BinaryHeap;
use thiserror::Error;

/// A directed graph where an edge `a → b` means `a` must be committed before
/// `b`.
#[derive(Debug, Clone, Default)]
pub struct Graph<N>
where
    N: Copy + Debug + Eq + Hash + Ord,
{
    succs: HashMap<N, BTreeSet<N>>,
    preds: HashMap<N, BTreeSet<N>>,
}

impl<N> Graph<N>
where
    N: Copy + Debug + Eq + Hash + Ord,
{
    pub fn new() -> Self {
        Self {
            succs: HashMap::new(),
            preds: HashMap::new(),
        }
    }

    /// Adds a node without edges. Adding an existing node is a no-op.
    pub fn add_node(&mut self, node: N) {
        self.succs.entry(node).or_default();
        self.preds.entry(node).or_default();
    }

    /// Adds an edge `from → to`, inserting both endpoints as needed.
    /// Self-edges are rejected: an item never depends on its own changeset.
    pub fn add_edge(&mut self, from: N, to: N) {
        debug_assert_ne!(from, to);
        self.add_node(from);
        self.add_node(to);
        self.succs.get_mut(&from).unwrap().insert(to);
        self.preds.get_mut(&to).unwrap().insert(from);
    }

    pub fn len(&self) -> usize {
        self.succs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.succs.is_empty()
    }

    pub fn contains(&self, node: &N) -> bool {
        self.succs.contains_key(node)
    }

    pub fn nodes(&self) -> impl Iterator<Item = N> + '_ {
        self.succs.keys().copied()
    }

    pub fn successors(&self, node: &N) -> impl Iterator<Item = N> + '_ {
        self.succs.get(node).into_iter().flatten().copied()
    }

    pub fn predecessors(&self, node: &N) -> impl Iterator<Item = N> + '_ {
        self.preds.get(node).into_iter().flatten().copied()
    }

    /// Topologically sorts the graph. Whenever several nodes are ready, the
    /// one that sorts first under `cmp` is emitted first, which makes the
    /// result deterministic for a deterministic comparator.
    ///
    /// On stall, returns the induced cycle instead.
    pub fn toposort_by<F>(&self, cmp: F) -> Result<Vec<N>, CycleError<N>>
    where
        F: Fn(&N, &N) -> Ordering,
    {
        let mut in_degree: HashMap<N, usize> = self
            .preds
            .iter()
            .map(|(node, preds)| (*node, preds.len()))
            .collect();

        // binary-heap-plus pops the maximum under the comparator, so flip it
        // to get the conventional smallest-first draw.
        let mut ready = BinaryHeap::new_by(|a: &N, b: &N| cmp(b, a));
        for (node, degree) in &in_degree {
            if *degree == 0 {
                ready.push(*node);
            }
        }

        let mut order = Vec::with_capacity(self.len());
        while let Some(node) = ready.pop() {
            order.push(node);
            for succ in self.successors(&node) {
                let degree = in_degree.get_mut(&succ).unwrap();
                *degree -= 1;
                if *degree == 0 {
                    ready.push(succ);
                }
            }
        }

        if order.len() == self.len() {
            Ok(order)
        } else {
            let emitted: BTreeSet<N> = order.into_iter().collect();
            Err(CycleError {
                nodes: self.extract_cycle(&emitted),
            })
        }
    }

    // Walks predecessors among the non-emitted nodes until one repeats; the
    // repeated segment, reversed, is a cycle in dependency order.
    fn extract_cycle(&self, emitted: &BTreeSet<N>) -> Vec<N> {
        let mut node = self
            .succs
            .keys()
            .filter(|node| !emitted.contains(*node))
            .min()
            .copied()
            .expect("stalled traversal must leave nodes behind");

        let mut path = Vec::new();
        let mut on_path: HashMap<N, usize> = HashMap::new();
        loop {
            if let Some(&start) = on_path.get(&node) {
                let mut cycle = path.split_off(start);
                cycle.reverse();
                rotate_to_min(&mut cycle);
                return cycle;
            }
            on_path.insert(node, path.len());
            path.push(node);
            node = self
                .predecessors(&node)
                .filter(|pred| !emitted.contains(pred))
                .min()
                .expect("every remaining node has a remaining predecessor");
        }
    }
}

// Starting the reported cycle at its smallest node keeps error messages and
// split decisions stable across runs.
fn rotate_to_min<N: Copy + Ord>(cycle: &mut Vec<N>) {
    if let Some(min_index) = cycle
        .iter()
        .enumerate()
        .min_by_key(|(_, node)| **node)
        .map(|(index, _)| index)
    {
        cycle.rotate_left(min_index);
    }
}

/// A topological traversal stalled on `nodes`, where each node depends on the
/// previous one and the first depends on the last.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("dependency cycle through {nodes:?}")]
pub struct CycleError<N: Debug> {
    pub nodes: Vec<N>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toposort_diamond() {
        let mut graph = Graph::new();
        graph.add_edge(1u32, 2);
        graph.add_edge(1, 3);
        graph.add_edge(2, 4);
        graph.add_edge(3, 4);

        let order = graph.toposort_by(|a, b| a.cmp(b)).unwrap();
        assert_eq!(order, vec![1, 2, 3, 4]);

        // A flipped comparator flips the tie-break but not the constraints.
        let order = graph.toposort_by(|a, b| b.cmp(a)).unwrap();
        assert_eq!(order, vec![1, 3, 2, 4]);
    }

    #[test]
    fn test_toposort_disconnected() {
        let mut graph = Graph::new();
        graph.add_node(7u32);
        graph.add_edge(3, 1);

        assert_eq!(graph.toposort_by(|a, b| a.cmp(b)).unwrap(), vec![3, 1, 7]);
    }

    #[test]
    fn test_cycle_detection() {
        let mut graph = Graph::new();
        graph.add_edge(1u32, 2);
        graph.add_edge(2, 3);
        graph.add_edge(3, 2);

        let err = graph.toposort_by(|a, b| a.cmp(b)).unwrap_err();
        assert_eq!(err.nodes, vec![2, 3]);
    }

    #[test]
    fn test_cycle_reported_in_dependency_order() {
        let mut graph = Graph::new();
        // 5 → 9 → 4 → 5, with an acyclic lead-in.
        graph.add_edge(1u32, 5);
        graph.add_edge(5, 9);
        graph.add_edge(9, 4);
        graph.add_edge(4, 5);

        let err = graph.toposort_by(|a, b| a.cmp(b)).unwrap_err();
        assert_eq!(err.nodes, vec![4, 5, 9]);
    }
}
