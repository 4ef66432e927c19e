//! The control-flow graph (§3, §4.1): the single semantic source of truth
//! that the verifier and projector both treat as a pure, immutable input.

pub mod builder;

use crate::ast::{Message, Role, SourceLoc};
use mpst_fsm::{Fsm, NodeIndex};
use std::fmt;

pub use builder::{build, BuildWarning, CfgBuilder};

/// A DMst local action: `new role`, `create`, or `invite` (§3). The
/// `update-marker` transition is instead emitted directly by the projector
/// when it passes an `updatable` node, since that marker is a structural
/// event on the recursion rather than a role performing a local action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DmstAction {
    NewRole(Role),
    Creates { parent: Role, role: Role },
    Invites { from: Role, to: Role },
}

impl fmt::Display for DmstAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DmstAction::NewRole(r) => write!(f, "new role {r}"),
            DmstAction::Creates { parent, role } => write!(f, "{parent} creates {role}"),
            DmstAction::Invites { from, to } => write!(f, "{from} invites {to}"),
        }
    }
}

/// The payload of an `action` node (§3): either an ordinary message transfer
/// or a DMst structural action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionPayload {
    Message { from: Role, to: Vec<Role>, message: Message, loc: SourceLoc },
    Dmst(DmstAction, SourceLoc),
}

impl ActionPayload {
    pub fn loc(&self) -> SourceLoc {
        match self {
            ActionPayload::Message { loc, .. } => *loc,
            ActionPayload::Dmst(_, loc) => *loc,
        }
    }

    /// Returns `(sender, receivers)` for checks that only care about who
    /// originates and who observes this action (connectedness, races,
    /// self-communication).
    pub fn participants(&self) -> (Role, Vec<Role>) {
        match self {
            ActionPayload::Message { from, to, .. } => (from.clone(), to.clone()),
            ActionPayload::Dmst(DmstAction::NewRole(r), _) => (r.clone(), vec![]),
            ActionPayload::Dmst(DmstAction::Creates { parent, role }, _) => {
                (parent.clone(), vec![role.clone()])
            }
            ActionPayload::Dmst(DmstAction::Invites { from, to }, _) => (from.clone(), vec![to.clone()]),
        }
    }
}

impl fmt::Display for ActionPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionPayload::Message { from, to, message, .. } => {
                write!(f, "{from}->{}: {message}", to.iter().map(Role::to_string).collect::<Vec<_>>().join(","))
            }
            ActionPayload::Dmst(a, _) => write!(f, "{a}"),
        }
    }
}

/// A node tag (§3): `initial | terminal | action | branch | merge | fork |
/// join | recursive | do | updatable`, plus one implementation node,
/// `continue-marker`, used to disambiguate a `continue` that is the very
/// first interaction of a branch/fork/recursion body — see
/// [`builder`] module docs for why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CfgNode {
    Initial,
    Terminal,
    Action(ActionPayload),
    Branch { decider: Role },
    Merge,
    Fork { parallel_id: u64 },
    Join { parallel_id: u64 },
    Recursive { label: String },
    Do { protocol: String, args: Vec<Role> },
    Updatable { label: String },
    ContinueMarker,
}

impl fmt::Display for CfgNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CfgNode::Initial => write!(f, "initial"),
            CfgNode::Terminal => write!(f, "terminal"),
            CfgNode::Action(a) => write!(f, "{a}"),
            CfgNode::Branch { decider } => write!(f, "branch@{decider}"),
            CfgNode::Merge => write!(f, "merge"),
            CfgNode::Fork { parallel_id } => write!(f, "fork#{parallel_id}"),
            CfgNode::Join { parallel_id } => write!(f, "join#{parallel_id}"),
            CfgNode::Recursive { label } => write!(f, "rec {label}"),
            CfgNode::Do { protocol, .. } => write!(f, "do {protocol}"),
            CfgNode::Updatable { label } => write!(f, "update-continue {label}"),
            CfgNode::ContinueMarker => write!(f, "continue"),
        }
    }
}

/// An edge tag (§3): `sequence | branch | fork | continue | epsilon`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CfgEdge {
    Sequence,
    Branch,
    Fork,
    Continue,
    Epsilon,
}

impl fmt::Display for CfgEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CfgEdge::Sequence => "sequence",
            CfgEdge::Branch => "branch",
            CfgEdge::Fork => "fork",
            CfgEdge::Continue => "continue",
            CfgEdge::Epsilon => "epsilon",
        };
        write!(f, "{s}")
    }
}

/// A built control-flow graph for one protocol declaration.
#[derive(Debug, Clone)]
pub struct Cfg {
    pub protocol_name: String,
    pub roles: Vec<Role>,
    pub(crate) graph: Fsm<String, CfgNode, CfgEdge>,
}

impl Cfg {
    pub fn initial(&self) -> NodeIndex {
        self.graph.initial().expect("a built Cfg always has an initial node")
    }

    pub fn node(&self, id: NodeIndex) -> &CfgNode {
        self.graph.state(id)
    }

    pub fn is_terminal(&self, id: NodeIndex) -> bool {
        self.graph.is_terminal(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.states()
    }

    pub fn outgoing(&self, id: NodeIndex) -> impl Iterator<Item = (NodeIndex, &CfgEdge)> + '_ {
        self.graph.outgoing(id)
    }

    pub fn incoming(&self, id: NodeIndex) -> impl Iterator<Item = (NodeIndex, &CfgEdge)> + '_ {
        self.graph.incoming(id)
    }

    pub fn size(&self) -> (usize, usize) {
        self.graph.size()
    }

    pub fn dot(&self) -> mpst_fsm::dot::Dot<'_, String, CfgNode, CfgEdge> {
        mpst_fsm::dot::Dot::new(&self.graph)
    }

    /// Direct access to the underlying graph for algorithms (SCC analysis,
    /// liveness) that petgraph already provides and [`Fsm`] does not need to
    /// re-expose one by one.
    pub(crate) fn graph_ref(&self) -> &petgraph::graph::DiGraph<CfgNode, CfgEdge> {
        self.graph.graph()
    }
}
