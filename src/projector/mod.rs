//! The projector (§4.3): a BFS/DFS traversal from a verified [`Cfg`] that
//! produces one enriched [`Cfsm`] per role.
//!
//! Node handling collapses to a few general rules instead of one branch per
//! CFG node kind:
//! - A node with exactly one structural successor and no role-specific
//!   payload (`initial`, `do`, `continue-marker`) is pure tau pass-through.
//! - `action` nodes allocate a new CFSM state and a `send`/`receive`
//!   transition only when the projecting role is a participant; otherwise
//!   they are tau pass-through too — this single rule *is* tau-elision.
//! - `merge`, `join` and `recursive` nodes are "convergence points": the
//!   first arrival records which CFSM state represents them, later arrivals
//!   (a second choice branch, a `continue` back-edge) just add a transition
//!   into that recorded state and stop recursing. This is the same
//!   mechanism for both a choice rejoining and a loop closing.
//! - `branch` only needs special handling for the *deciding* role (it must
//!   actively emit `choice{branch}` before entering each arm); every other
//!   role falls out of the general action-node rule, because the first
//!   action node inside the arm where it participates already produces
//!   exactly the "first observable action" transition the external-choice
//!   rule calls for.

use crate::ast::Role;
use crate::cfg::{ActionPayload, Cfg, CfgEdge, CfgNode, DmstAction};
use crate::cfsm::{Action, Cfsm};
use crate::error::ProjectionError;
use crate::registry::ProtocolRegistry;
use mpst_fsm::NodeIndex;
use std::collections::HashMap;

/// The result of projecting one role: a best-effort CFSM plus any semantic
/// issues found along the way (§7 — projection never panics).
#[derive(Debug, Clone)]
pub struct ProjectionOutcome {
    pub cfsm: Cfsm,
    pub errors: Vec<ProjectionError>,
}

/// Projects `cfg` for a single `role`.
pub fn project(cfg: &Cfg, role: &Role, registry: &ProtocolRegistry) -> ProjectionOutcome {
    let mut cfsm = Cfsm::new(role.clone(), cfg.protocol_name.clone(), cfg.roles.clone());
    let q0 = cfsm.add_state(Some("q0".to_string()));
    cfsm.set_initial(q0);

    let mut ctx = Ctx { cfsm: &mut cfsm, registry, converge: HashMap::new(), errors: Vec::new(), next_branch_id: 0 };

    if !cfg.roles.contains(role) {
        ctx.errors.push(ProjectionError::RoleNotFound(role.to_string()));
    }

    ctx.step(cfg, cfg.initial(), q0, role, None);
    let errors = ctx.errors;
    ProjectionOutcome { cfsm, errors }
}

/// Projects every declared role of `cfg`.
pub fn project_all(cfg: &Cfg, registry: &ProtocolRegistry) -> HashMap<Role, ProjectionOutcome> {
    cfg.roles.iter().map(|r| (r.clone(), project(cfg, r, registry))).collect()
}

struct Ctx<'a> {
    cfsm: &'a mut Cfsm,
    registry: &'a ProtocolRegistry,
    converge: HashMap<NodeIndex, NodeIndex>,
    errors: Vec<ProjectionError>,
    next_branch_id: u64,
}

impl<'a> Ctx<'a> {
    /// Walks forward from `node` with the projecting role at CFSM state
    /// `state`, returning the CFSM state reached once execution hits
    /// `stop_at` (used by fork/join sequencing) or a dead end.
    fn step(&mut self, cfg: &Cfg, node: NodeIndex, state: NodeIndex, role: &Role, stop_at: Option<NodeIndex>) -> NodeIndex {
        if Some(node) == stop_at {
            return state;
        }

        match cfg.node(node) {
            CfgNode::Initial => self.step(cfg, self.single_successor(cfg, node), state, role, stop_at),

            CfgNode::Terminal => {
                self.cfsm.mark_terminal(state);
                state
            }

            CfgNode::Action(payload) => self.step_action(cfg, node, payload.clone(), state, role, stop_at),

            CfgNode::Branch { decider } => self.step_branch(cfg, node, decider.clone(), state, role, stop_at),

            CfgNode::Merge | CfgNode::Join { .. } | CfgNode::Recursive { .. } => {
                self.step_convergence(cfg, node, state, role, stop_at)
            }

            CfgNode::Fork { parallel_id } => self.step_fork(cfg, node, *parallel_id, state, role, stop_at),

            CfgNode::Do { protocol, args } => self.step_do(cfg, node, protocol.clone(), args.clone(), state, role, stop_at),

            CfgNode::Updatable { .. } => {
                let next = self.cfsm.add_state(None);
                self.cfsm.add_transition(state, next, Action::UpdateMarker);
                self.step(cfg, self.updatable_successor(cfg, node), next, role, stop_at)
            }

            CfgNode::ContinueMarker => self.step(cfg, self.single_successor(cfg, node), state, role, stop_at),
        }
    }

    fn step_action(
        &mut self,
        cfg: &Cfg,
        node: NodeIndex,
        payload: ActionPayload,
        state: NodeIndex,
        role: &Role,
        stop_at: Option<NodeIndex>,
    ) -> NodeIndex {
        let successor = self.single_successor(cfg, node);

        let next_state = match &payload {
            ActionPayload::Message { from, to, message, loc } if from == role => {
                let s = self.cfsm.add_state(None);
                self.cfsm.add_transition(state, s, Action::Send { to: to.clone(), message: message.clone(), loc: Some(*loc) });
                s
            }
            ActionPayload::Message { from, to, message, loc } if to.contains(role) => {
                let s = self.cfsm.add_state(None);
                self.cfsm.add_transition(state, s, Action::Receive { from: from.clone(), message: message.clone(), loc: Some(*loc) });
                s
            }
            ActionPayload::Message { .. } => state,
            ActionPayload::Dmst(DmstAction::NewRole(r), _) if r == role => state,
            ActionPayload::Dmst(DmstAction::Creates { parent, role: created }, _) if parent == role => {
                let s = self.cfsm.add_state(None);
                self.cfsm.add_transition(state, s, Action::Create { role: parent.clone(), instance: created.clone() });
                s
            }
            ActionPayload::Dmst(DmstAction::Invites { from, to }, _) if from == role => {
                let s = self.cfsm.add_state(None);
                self.cfsm.add_transition(state, s, Action::Invite { who: to.clone() });
                s
            }
            ActionPayload::Dmst(DmstAction::Invites { to, .. }, _) if to == role => {
                let s = self.cfsm.add_state(None);
                self.cfsm.add_transition(state, s, Action::Tau);
                s
            }
            ActionPayload::Dmst(..) => state,
        };

        self.step(cfg, successor, next_state, role, stop_at)
    }

    fn step_branch(
        &mut self,
        cfg: &Cfg,
        node: NodeIndex,
        decider: Role,
        state: NodeIndex,
        role: &Role,
        stop_at: Option<NodeIndex>,
    ) -> NodeIndex {
        let mut last = state;
        for (target, edge) in cfg.outgoing(node) {
            if !matches!(edge, CfgEdge::Branch) || target == node {
                continue;
            }
            let entry_state = if *role == decider {
                let s = self.cfsm.add_state(None);
                let label = format!("branch_{}", self.next_branch_id);
                self.next_branch_id += 1;
                self.cfsm.add_transition(state, s, Action::Choice { branch: label });
                s
            } else {
                state
            };
            last = self.step(cfg, target, entry_state, role, stop_at);
        }
        last
    }

    fn step_convergence(&mut self, cfg: &Cfg, node: NodeIndex, state: NodeIndex, role: &Role, stop_at: Option<NodeIndex>) -> NodeIndex {
        if let Some(&recorded) = self.converge.get(&node) {
            self.cfsm.add_transition(state, recorded, Action::Tau);
            return recorded;
        }
        self.converge.insert(node, state);
        match self.single_successor_opt(cfg, node) {
            Some(successor) => self.step(cfg, successor, state, role, stop_at),
            None => state,
        }
    }

    fn step_fork(
        &mut self,
        cfg: &Cfg,
        node: NodeIndex,
        parallel_id: u64,
        state: NodeIndex,
        role: &Role,
        stop_at: Option<NodeIndex>,
    ) -> NodeIndex {
        let join = cfg
            .nodes()
            .find(|n| matches!(cfg.node(*n), CfgNode::Join { parallel_id: j } if *j == parallel_id))
            .expect("builder always creates a matching join for every fork");

        let mut state = state;
        for (target, edge) in cfg.outgoing(node) {
            if !matches!(edge, CfgEdge::Fork) {
                continue;
            }
            if target == join {
                continue;
            }
            if branch_involves_role(cfg, target, role) {
                state = self.step(cfg, target, state, role, Some(join));
            }
        }
        self.step(cfg, join, state, role, stop_at)
    }

    fn step_do(
        &mut self,
        cfg: &Cfg,
        node: NodeIndex,
        protocol: String,
        args: Vec<Role>,
        state: NodeIndex,
        role: &Role,
        stop_at: Option<NodeIndex>,
    ) -> NodeIndex {
        let successor = self.single_successor(cfg, node);

        if !args.contains(role) {
            return self.step(cfg, successor, state, role, stop_at);
        }

        let role_mapping = match self.registry.get(&protocol) {
            Some(decl) => decl.roles.iter().cloned().zip(args.iter().cloned()).collect::<HashMap<_, _>>(),
            None => {
                self.errors.push(ProjectionError::ProtocolNotFound(protocol.clone()));
                HashMap::new()
            }
        };

        let next = self.cfsm.add_state(None);
        self.cfsm.add_transition(
            state,
            next,
            Action::SubprotocolCall { protocol: protocol.clone(), role_mapping, return_state: next },
        );
        self.step(cfg, successor, next, role, stop_at)
    }

    fn single_successor(&self, cfg: &Cfg, node: NodeIndex) -> NodeIndex {
        self.single_successor_opt(cfg, node).expect("node is expected to have exactly one structural successor")
    }

    fn single_successor_opt(&self, cfg: &Cfg, node: NodeIndex) -> Option<NodeIndex> {
        cfg.outgoing(node).map(|(t, _)| t).next()
    }

    fn updatable_successor(&self, cfg: &Cfg, node: NodeIndex) -> NodeIndex {
        cfg.outgoing(node)
            .find(|(_, e)| matches!(e, CfgEdge::Sequence))
            .or_else(|| cfg.outgoing(node).find(|(_, e)| matches!(e, CfgEdge::Continue)))
            .map(|(t, _)| t)
            .expect("an updatable node always has an update body or a direct continue")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Block, Interaction, Message, ProtocolDecl, SourceLoc};
    use crate::cfg;

    fn msg(from: &str, to: &str, label: &str) -> Interaction {
        Interaction::Message {
            from: Role::new(from),
            to: vec![Role::new(to)],
            message: Message::new(label),
            loc: SourceLoc::synthesized(),
        }
    }

    #[test]
    fn request_response_projects_dual_machines() {
        let body: Block = vec![msg("Client", "Server", "Request"), msg("Server", "Client", "Response")];
        let decl = ProtocolDecl::new("RequestResponse", vec![Role::new("Client"), Role::new("Server")], body);
        let mut registry = ProtocolRegistry::empty();
        registry.insert(decl);
        let (cfg, _) = cfg::build("RequestResponse", &registry).unwrap();

        let projected = project_all(&cfg, &registry);
        let client = &projected[&Role::new("Client")];
        let server = &projected[&Role::new("Server")];

        assert!(client.errors.is_empty());
        assert!(server.errors.is_empty());
        assert_eq!(client.cfsm.size(), (3, 2));
        assert_eq!(server.cfsm.size(), (3, 2));
    }

    #[test]
    fn choice_decider_emits_choice_action_other_role_sees_receive() {
        let body: Block = vec![Interaction::Choice {
            at: Role::new("Buyer"),
            branches: vec![vec![msg("Buyer", "Seller", "Accept")], vec![msg("Buyer", "Seller", "Reject")]],
            loc: SourceLoc::synthesized(),
        }];
        let decl = ProtocolDecl::new("Quote", vec![Role::new("Buyer"), Role::new("Seller")], body);
        let mut registry = ProtocolRegistry::empty();
        registry.insert(decl);
        let (cfg, _) = cfg::build("Quote", &registry).unwrap();

        let outcome = project(&cfg, &Role::new("Seller"), &registry);
        let has_receive = outcome.cfsm.transitions().any(|(_, _, a)| matches!(a, Action::Receive { .. }));
        assert!(has_receive);
    }
}

fn branch_involves_role(cfg: &Cfg, start: NodeIndex, role: &Role) -> bool {
    let mut seen = std::collections::HashSet::new();
    let mut stack = vec![start];
    while let Some(n) = stack.pop() {
        if !seen.insert(n) {
            continue;
        }
        if matches!(cfg.node(n), CfgNode::Join { .. }) {
            continue;
        }
        if let CfgNode::Action(payload) = cfg.node(n) {
            let (from, to) = payload.participants();
            if &from == role || to.contains(role) {
                return true;
            }
        }
        if let CfgNode::Do { args, .. } = cfg.node(n) {
            if args.contains(role) {
                return true;
            }
        }
        for (next, edge) in cfg.outgoing(n) {
            if matches!(edge, CfgEdge::Continue) {
                continue;
            }
            stack.push(next);
        }
    }
    false
}
