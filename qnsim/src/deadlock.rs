//! Deadlock detection.
//!
//! Blocking relationships are kept in a directed graph over servers: an edge `a -> b` means that
//! the customer held by server `a` is blocked waiting to enter the node of server `b`.
//! The network is deadlocked if and only if this graph contains a **knot**: a nonempty, strongly
//! connected set of vertices with no edges leaving it. Every server in a knot waits for another
//! server in the same knot, and none of them can ever be freed from the outside.

use std::collections::{BTreeMap, BTreeSet};

use crate::ServerId;

/// Implementors maintain the blocking relationships of a network and detect deadlocks.
pub trait DeadlockDetector {
    /// Server `blocked` now holds a customer that cannot enter the node of `destination` servers.
    fn on_block(&mut self, blocked: ServerId, destination: &[ServerId]);

    /// `server` released its customer: drops all edges in and out of it.
    fn on_unblock(&mut self, server: ServerId);

    /// Restores the edges from servers still blocked on the node of `server`, which could have
    /// been dropped when `server` released its customer.
    fn on_reattach(&mut self, server: ServerId, blockers: &[ServerId]);

    /// Returns `true` if the network is deadlocked.
    fn detect(&self) -> bool;

    /// Returns all knots, each as a sorted list of servers.
    fn knots(&self) -> Vec<Vec<ServerId>>;
}

/// Detector used when no node can ever block. Never reports a deadlock.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDetection;

impl DeadlockDetector for NoDetection {
    fn on_block(&mut self, _: ServerId, _: &[ServerId]) {}
    fn on_unblock(&mut self, _: ServerId) {}
    fn on_reattach(&mut self, _: ServerId, _: &[ServerId]) {}
    fn detect(&self) -> bool {
        false
    }
    fn knots(&self) -> Vec<Vec<ServerId>> {
        Vec::new()
    }
}

/// Directed graph over servers.
///
/// Adjacency is kept in ordered maps so that traversal order, and therefore the order of
/// reported components, is deterministic.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BlockingGraph {
    successors: BTreeMap<ServerId, BTreeSet<ServerId>>,
    predecessors: BTreeMap<ServerId, BTreeSet<ServerId>>,
}

const UNVISITED: usize = usize::MAX;

impl BlockingGraph {
    /// Adds an isolated vertex, if not present yet.
    pub fn add_vertex(&mut self, vertex: ServerId) {
        self.successors.entry(vertex).or_default();
        self.predecessors.entry(vertex).or_default();
    }

    /// Adds an edge, along with its endpoints if necessary.
    pub fn add_edge(&mut self, from: ServerId, to: ServerId) {
        self.add_vertex(from);
        self.add_vertex(to);
        self.successors.entry(from).or_default().insert(to);
        self.predecessors.entry(to).or_default().insert(from);
    }

    /// Removes all edges going in and out of `vertex`. The vertex itself stays.
    pub fn remove_incident(&mut self, vertex: ServerId) {
        if let Some(successors) = self.successors.get_mut(&vertex) {
            for to in std::mem::take(successors) {
                if let Some(preds) = self.predecessors.get_mut(&to) {
                    preds.remove(&vertex);
                }
            }
        }
        if let Some(predecessors) = self.predecessors.get_mut(&vertex) {
            for from in std::mem::take(predecessors) {
                if let Some(succs) = self.successors.get_mut(&from) {
                    succs.remove(&vertex);
                }
            }
        }
    }

    /// Whether the edge `from -> to` exists.
    #[must_use]
    pub fn has_edge(&self, from: ServerId, to: ServerId) -> bool {
        self.successors
            .get(&from)
            .map_or(false, |succs| succs.contains(&to))
    }

    /// Total number of edges.
    #[must_use]
    pub fn num_edges(&self) -> usize {
        self.successors.values().map(BTreeSet::len).sum()
    }

    /// All vertices in increasing order.
    pub fn vertices(&self) -> impl Iterator<Item = ServerId> + '_ {
        self.successors.keys().copied()
    }

    /// Direct successors of `vertex`.
    pub fn successors(&self, vertex: ServerId) -> impl Iterator<Item = ServerId> + '_ {
        self.successors
            .get(&vertex)
            .into_iter()
            .flat_map(|succs| succs.iter().copied())
    }

    /// Computes strongly connected components with Tarjan's algorithm.
    ///
    /// The traversal keeps its own call stack instead of recursing, so long blocking chains
    /// cannot overflow the thread's stack.
    #[must_use]
    pub fn strongly_connected_components(&self) -> Vec<Vec<ServerId>> {
        let vertices: Vec<ServerId> = self.vertices().collect();
        let position: BTreeMap<ServerId, usize> = vertices
            .iter()
            .enumerate()
            .map(|(idx, &v)| (v, idx))
            .collect();
        let adjacency: Vec<Vec<usize>> = vertices
            .iter()
            .map(|&v| self.successors(v).map(|w| position[&w]).collect())
            .collect();

        let n = vertices.len();
        let mut index = vec![UNVISITED; n];
        let mut lowlink = vec![0; n];
        let mut on_stack = vec![false; n];
        let mut stack = Vec::new();
        let mut call_stack: Vec<(usize, usize)> = Vec::new();
        let mut next_index = 0;
        let mut components = Vec::new();

        for root in 0..n {
            if index[root] != UNVISITED {
                continue;
            }
            call_stack.push((root, 0));
            while let Some((v, child)) = call_stack.pop() {
                if child == 0 {
                    index[v] = next_index;
                    lowlink[v] = next_index;
                    next_index += 1;
                    stack.push(v);
                    on_stack[v] = true;
                }
                if let Some(&w) = adjacency[v].get(child) {
                    call_stack.push((v, child + 1));
                    if index[w] == UNVISITED {
                        call_stack.push((w, 0));
                    } else if on_stack[w] {
                        lowlink[v] = lowlink[v].min(index[w]);
                    }
                    continue;
                }
                if lowlink[v] == index[v] {
                    let mut component = Vec::new();
                    while let Some(w) = stack.pop() {
                        on_stack[w] = false;
                        component.push(vertices[w]);
                        if w == v {
                            break;
                        }
                    }
                    component.sort();
                    components.push(component);
                }
                if let Some(&(parent, _)) = call_stack.last() {
                    lowlink[parent] = lowlink[parent].min(lowlink[v]);
                }
            }
        }
        components
    }

    /// Returns all knots of the graph.
    ///
    /// A strongly connected component is a knot if no edge leaves it. A single vertex is a knot
    /// only if it has a self-loop as its sole outgoing edge.
    #[must_use]
    pub fn knots(&self) -> Vec<Vec<ServerId>> {
        self.strongly_connected_components()
            .into_iter()
            .filter(|component| {
                let members: BTreeSet<ServerId> = component.iter().copied().collect();
                let closed = component
                    .iter()
                    .all(|&v| self.successors(v).all(|w| members.contains(&w)));
                let cyclic = component.len() > 1 || self.has_edge(component[0], component[0]);
                closed && cyclic
            })
            .collect()
    }

    /// Whether the graph contains at least one knot.
    #[must_use]
    pub fn has_knot(&self) -> bool {
        !self.knots().is_empty()
    }
}

/// Detects deadlocks by looking for knots in the blocking graph.
#[derive(Debug, Default, Clone)]
pub struct KnotDetector {
    graph: BlockingGraph,
}

impl KnotDetector {
    /// Current blocking graph.
    #[must_use]
    pub fn graph(&self) -> &BlockingGraph {
        &self.graph
    }
}

impl DeadlockDetector for KnotDetector {
    fn on_block(&mut self, blocked: ServerId, destination: &[ServerId]) {
        for &server in destination {
            self.graph.add_edge(blocked, server);
        }
    }

    fn on_unblock(&mut self, server: ServerId) {
        self.graph.remove_incident(server);
    }

    fn on_reattach(&mut self, server: ServerId, blockers: &[ServerId]) {
        for &blocker in blockers {
            self.graph.add_edge(blocker, server);
        }
    }

    fn detect(&self) -> bool {
        self.graph.has_knot()
    }

    fn knots(&self) -> Vec<Vec<ServerId>> {
        self.graph.knots()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaChaRng;

    fn s(id: usize) -> ServerId {
        ServerId::from(id)
    }

    fn graph(vertices: usize, edges: &[(usize, usize)]) -> BlockingGraph {
        let mut graph = BlockingGraph::default();
        for v in 0..vertices {
            graph.add_vertex(s(v));
        }
        for &(from, to) in edges {
            graph.add_edge(s(from), s(to));
        }
        graph
    }

    #[test]
    fn test_empty_graph() {
        assert!(!BlockingGraph::default().has_knot());
        assert!(!NoDetection.detect());
    }

    #[test]
    fn test_self_loop_is_knot() {
        let graph = graph(1, &[(0, 0)]);
        assert_eq!(graph.knots(), vec![vec![s(0)]]);
    }

    #[test]
    fn test_isolated_vertex_is_not_knot() {
        assert!(!graph(1, &[]).has_knot());
    }

    #[test]
    fn test_self_loop_with_exit_is_not_knot() {
        assert!(!graph(2, &[(0, 0), (0, 1)]).has_knot());
    }

    #[test]
    fn test_acyclic_graph_has_no_knot() {
        let graph = graph(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]);
        assert_eq!(graph.strongly_connected_components().len(), 4);
        assert!(!graph.has_knot());
    }

    #[test]
    fn test_single_knot() {
        // 0 -> 1 feeds the closed cycle 2 -> 3 -> 4 -> 2.
        let graph = graph(5, &[(0, 1), (1, 2), (2, 3), (3, 4), (4, 2), (1, 0)]);
        assert_eq!(graph.knots(), vec![vec![s(2), s(3), s(4)]]);
    }

    #[test]
    fn test_cycle_with_escape_is_not_knot() {
        let graph = graph(3, &[(0, 1), (1, 0), (1, 2)]);
        assert!(!graph.has_knot());
        let mut graph = graph;
        graph.add_edge(s(2), s(0));
        assert_eq!(graph.knots(), vec![vec![s(0), s(1), s(2)]]);
    }

    #[test]
    fn test_remove_incident() {
        let mut graph = graph(3, &[(0, 1), (1, 0), (2, 1), (1, 2)]);
        assert_eq!(graph.num_edges(), 4);
        graph.remove_incident(s(1));
        assert_eq!(graph.num_edges(), 0);
        assert_eq!(graph.vertices().count(), 3);
        assert!(!graph.has_edge(s(2), s(1)));
    }

    #[test]
    fn test_knot_detector_lifecycle() {
        let mut detector = KnotDetector::default();
        detector.on_block(s(0), &[s(1)]);
        assert!(!detector.detect());
        detector.on_block(s(1), &[s(0)]);
        assert!(detector.detect());
        assert_eq!(detector.knots(), vec![vec![s(0), s(1)]]);

        // Server 2 waits on the node of server 1 too; freeing server 1 drops that edge.
        detector.on_block(s(2), &[s(1)]);
        detector.on_unblock(s(1));
        assert!(!detector.graph().has_edge(s(2), s(1)));
        detector.on_reattach(s(1), &[s(2)]);
        assert!(detector.graph().has_edge(s(2), s(1)));
        assert!(!detector.detect());
    }

    #[test]
    fn test_long_chain_does_not_overflow() {
        let n = 200_000;
        let edges: Vec<_> = (0..n).map(|v| (v, (v + 1) % n)).collect();
        assert_eq!(graph(n, &edges).knots().len(), 1);
    }

    proptest! {
        #[test]
        fn test_matches_brute_force(
            seed: u64,
            vertices in 1..12_usize,
            probability in 0.0..0.5_f64,
        ) {
            let mut rng = ChaChaRng::seed_from_u64(seed);
            let edges = testing::random_digraph(&mut rng, vertices, probability);
            let graph = graph(vertices, &edges);
            prop_assert_eq!(graph.has_knot(), testing::has_knot(vertices, &edges));
        }
    }
}
