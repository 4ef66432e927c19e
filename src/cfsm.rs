//! The enriched per-role Communicating Finite-State Machine (§3):
//! `(Q, q0, A, Delta, F)` with actions living on transitions, not states, per
//! LTS discipline.

use crate::ast::{Message, Role, SourceLoc};
use mpst_fsm::{Fsm, NodeIndex};
use std::collections::HashMap;
use std::fmt;

/// A transition label. Multicast is preserved atomically in `send` — it is
/// never exploded into per-receiver sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Send { to: Vec<Role>, message: Message, loc: Option<SourceLoc> },
    Receive { from: Role, message: Message, loc: Option<SourceLoc> },
    Tau,
    Choice { branch: String },
    SubprotocolCall { protocol: String, role_mapping: HashMap<Role, Role>, return_state: NodeIndex },
    Create { role: Role, instance: Role },
    Invite { who: Role },
    UpdateMarker,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Send { to, message, .. } => {
                write!(f, "!{}({message})", to.iter().map(Role::to_string).collect::<Vec<_>>().join(","))
            }
            Action::Receive { from, message, .. } => write!(f, "?{from}({message})"),
            Action::Tau => write!(f, "tau"),
            Action::Choice { branch } => write!(f, "choice({branch})"),
            Action::SubprotocolCall { protocol, .. } => write!(f, "call({protocol})"),
            Action::Create { role, instance } => write!(f, "create({role} as {instance})"),
            Action::Invite { who } => write!(f, "invite({who})"),
            Action::UpdateMarker => write!(f, "update"),
        }
    }
}

/// A CFSM state: an opaque id plus an optional human-readable label carried
/// through for diagnostics and DOT export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CfsmState {
    pub label: Option<String>,
}

impl fmt::Display for CfsmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(l) => write!(f, "{l}"),
            None => write!(f, "q"),
        }
    }
}

/// One role's projected machine, plus the metadata a code generator or
/// runtime needs that is not itself graph structure.
#[derive(Debug, Clone)]
pub struct Cfsm {
    pub role: Role,
    pub protocol_name: String,
    pub parameters: Vec<Role>,
    pub(crate) graph: Fsm<Role, CfsmState, Action>,
}

impl Cfsm {
    pub fn new(role: Role, protocol_name: impl Into<String>, parameters: Vec<Role>) -> Self {
        Cfsm { protocol_name: protocol_name.into(), parameters, graph: Fsm::new(role.clone()), role }
    }

    pub fn add_state(&mut self, label: Option<String>) -> NodeIndex {
        self.graph.add_state(CfsmState { label })
    }

    pub fn set_initial(&mut self, node: NodeIndex) {
        self.graph.set_initial(node);
    }

    pub fn initial(&self) -> Option<NodeIndex> {
        self.graph.initial()
    }

    pub fn mark_terminal(&mut self, node: NodeIndex) {
        self.graph.mark_terminal(node);
    }

    pub fn is_terminal(&self, node: NodeIndex) -> bool {
        self.graph.is_terminal(node)
    }

    pub fn add_transition(&mut self, from: NodeIndex, to: NodeIndex, action: Action) {
        self.graph.add_transition(from, to, action);
    }

    pub fn states(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.states()
    }

    pub fn outgoing(&self, node: NodeIndex) -> impl Iterator<Item = (NodeIndex, &Action)> + '_ {
        self.graph.outgoing(node)
    }

    pub fn transitions(&self) -> impl Iterator<Item = (NodeIndex, NodeIndex, &Action)> + '_ {
        self.graph.transitions()
    }

    pub fn size(&self) -> (usize, usize) {
        self.graph.size()
    }

    pub fn is_well_formed(&self) -> bool {
        self.graph.is_well_formed()
    }

    pub fn dot(&self) -> mpst_fsm::dot::Dot<'_, Role, CfsmState, Action> {
        mpst_fsm::dot::Dot::new(&self.graph)
    }

    /// Rewrites every role reference in this machine under `mapping`
    /// (formal -> actual), used by a call frame to turn a sub-protocol's
    /// pre-projected, formally-named machine into one that talks to the
    /// actual roles bound at the call site (§4.3 "role substitution").
    /// Roles absent from `mapping` pass through unchanged.
    pub fn substitute_roles(&self, mapping: &HashMap<Role, Role>) -> Cfsm {
        let sub = |r: &Role| mapping.get(r).cloned().unwrap_or_else(|| r.clone());
        let graph = self.graph.map(|state| state.clone(), |action| substitute_action_roles(action, &sub));
        Cfsm {
            role: sub(&self.role),
            protocol_name: self.protocol_name.clone(),
            parameters: self.parameters.iter().map(&sub).collect(),
            graph,
        }
    }
}

fn substitute_action_roles(action: &Action, sub: &impl Fn(&Role) -> Role) -> Action {
    match action {
        Action::Send { to, message, loc } => {
            Action::Send { to: to.iter().map(sub).collect(), message: message.clone(), loc: *loc }
        }
        Action::Receive { from, message, loc } => {
            Action::Receive { from: sub(from), message: message.clone(), loc: *loc }
        }
        Action::Tau => Action::Tau,
        Action::Choice { branch } => Action::Choice { branch: branch.clone() },
        Action::SubprotocolCall { protocol, role_mapping, return_state } => Action::SubprotocolCall {
            protocol: protocol.clone(),
            role_mapping: role_mapping.iter().map(|(formal, actual)| (formal.clone(), sub(actual))).collect(),
            return_state: *return_state,
        },
        Action::Create { role, instance } => Action::Create { role: sub(role), instance: instance.clone() },
        Action::Invite { who } => Action::Invite { who: sub(who) },
        Action::UpdateMarker => Action::UpdateMarker,
    }
}
