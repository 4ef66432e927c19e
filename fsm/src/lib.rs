//! Generic directed-graph substrate for finite-state machines.
//!
//! A [`Fsm`] is a thin, typed wrapper around a [`petgraph`] directed graph:
//! nodes carry a state label `N`, edges carry an action/tag label `E`, and the
//! graph additionally tracks a distinguished initial state and a set of
//! terminal states. This is deliberately un-opinionated about what `N` and
//! `E` are — the control-flow graph and the per-role communicating
//! finite-state machine built on top of it (see the `scribble-dmst` crate)
//! both sit on this same substrate, referencing nodes by [`NodeIndex`]
//! rather than by owning handles.

pub mod dot;

use petgraph::graph::DiGraph;
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::HashSet;

pub use petgraph::graph::{EdgeIndex, NodeIndex};

/// A labeled, rooted, directed graph: `(Q, q0, A, Delta, F)`.
///
/// `R` identifies the owner of the machine (e.g. a role name); it carries no
/// graph-structural meaning and may be `()` for ownerless graphs such as a
/// global control-flow graph.
#[derive(Debug, Clone)]
pub struct Fsm<R, N, E> {
    owner: R,
    graph: DiGraph<N, E>,
    initial: Option<NodeIndex>,
    terminal: HashSet<NodeIndex>,
}

impl<R, N, E> Fsm<R, N, E> {
    /// Creates an empty machine owned by `owner`.
    pub fn new(owner: R) -> Self {
        Fsm {
            owner,
            graph: DiGraph::new(),
            initial: None,
            terminal: HashSet::new(),
        }
    }

    /// The owning role of this machine.
    pub fn owner(&self) -> &R {
        &self.owner
    }

    /// Inserts a new state and returns its id.
    pub fn add_state(&mut self, label: N) -> NodeIndex {
        self.graph.add_node(label)
    }

    /// Designates `node` as the initial state `q0`. A machine has exactly one.
    pub fn set_initial(&mut self, node: NodeIndex) {
        self.initial = Some(node);
    }

    /// The initial state, if one has been set.
    pub fn initial(&self) -> Option<NodeIndex> {
        self.initial
    }

    /// Marks `node` as terminal (a member of `F`).
    pub fn mark_terminal(&mut self, node: NodeIndex) {
        self.terminal.insert(node);
    }

    /// Whether `node` is a terminal state.
    pub fn is_terminal(&self, node: NodeIndex) -> bool {
        self.terminal.contains(&node)
    }

    /// All terminal states.
    pub fn terminal_states(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.terminal.iter().copied()
    }

    /// Adds a transition `from -(action)-> to`.
    pub fn add_transition(&mut self, from: NodeIndex, to: NodeIndex, action: E) -> EdgeIndex {
        self.graph.add_edge(from, to, action)
    }

    /// The label of a state.
    pub fn state(&self, node: NodeIndex) -> &N {
        &self.graph[node]
    }

    /// A mutable reference to the label of a state.
    pub fn state_mut(&mut self, node: NodeIndex) -> &mut N {
        &mut self.graph[node]
    }

    /// All state ids, in insertion order.
    pub fn states(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    /// All transitions as `(from, to, action)` triples.
    pub fn transitions(&self) -> impl Iterator<Item = (NodeIndex, NodeIndex, &E)> + '_ {
        self.graph
            .edge_references()
            .map(|e| (e.source(), e.target(), e.weight()))
    }

    /// Outgoing transitions from `node`.
    pub fn outgoing(&self, node: NodeIndex) -> impl Iterator<Item = (NodeIndex, &E)> + '_ {
        self.graph
            .edges_directed(node, Direction::Outgoing)
            .map(|e| (e.target(), e.weight()))
    }

    /// Incoming transitions into `node`.
    pub fn incoming(&self, node: NodeIndex) -> impl Iterator<Item = (NodeIndex, &E)> + '_ {
        self.graph
            .edges_directed(node, Direction::Incoming)
            .map(|e| (e.source(), e.weight()))
    }

    /// `(state_count, transition_count)`.
    pub fn size(&self) -> (usize, usize) {
        (self.graph.node_count(), self.graph.edge_count())
    }

    /// Whether every non-terminal state has at least one outgoing transition
    /// and every state is reachable from the initial state. Used by the
    /// projector's post-conditions (no dead states, every state reachable).
    pub fn is_well_formed(&self) -> bool {
        let Some(initial) = self.initial else {
            return self.graph.node_count() == 0;
        };
        let reachable = self.reachable_from(initial);
        if reachable.len() != self.graph.node_count() {
            return false;
        }
        self.graph
            .node_indices()
            .all(|n| self.is_terminal(n) || self.graph.edges_directed(n, Direction::Outgoing).next().is_some())
    }

    /// Breadth-first reachable set from `start`.
    pub fn reachable_from(&self, start: NodeIndex) -> HashSet<NodeIndex> {
        let mut seen = HashSet::new();
        let mut queue = std::collections::VecDeque::new();
        seen.insert(start);
        queue.push_back(start);
        while let Some(n) = queue.pop_front() {
            for (next, _) in self.outgoing(n) {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        seen
    }

    /// Exposes the underlying petgraph for algorithms (SCC, etc.) that need
    /// direct access.
    pub fn graph(&self) -> &DiGraph<N, E> {
        &self.graph
    }
}

impl<R, N, E> Fsm<R, N, E>
where
    R: Clone,
{
    /// Clones only the topology, discarding node/edge labels in favor of
    /// labels produced by `f`/`g`. Used when re-tagging a graph in place
    /// (e.g. the CFG builder's continue-edge retagging pass).
    pub fn map<N2, E2>(&self, f: impl Fn(&N) -> N2, g: impl Fn(&E) -> E2) -> Fsm<R, N2, E2> {
        let graph = self.graph.map(|_, n| f(n), |_, e| g(e));
        Fsm {
            owner: self.owner.clone(),
            graph,
            initial: self.initial,
            terminal: self.terminal.clone(),
        }
    }
}
