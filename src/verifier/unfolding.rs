//! The DMst 1-unfolding safety check (Definition 14, Castro-Perez & Yoshida
//! ECOOP 2023): an `updatable` continue's replacement body `U` must be
//! channel-disjoint from the loop body `B` it is combined with via `B ♢ U`,
//! and the combined one-iteration CFG must itself pass the full verifier.

use super::violation::Violation;
use crate::ast::Role;
use crate::cfg::{ActionPayload, Cfg, CfgEdge, CfgNode};
use mpst_fsm::{Fsm, NodeIndex};
use std::collections::{HashMap, HashSet};

/// Definition 14's three steps: (1) extract B and U, (2) check
/// channel-disjointness between them, (3) build the combined `B ♢ U` CFG and
/// run the full verifier on it, reporting anything it finds under an
/// `unsafe-update` wrapper. Step 2 alone is not sufficient — a combined body
/// can introduce e.g. a fresh non-deterministic choice that only step 3
/// would catch.
pub fn unsafe_updates(cfg: &Cfg) -> Vec<Violation> {
    let mut out = Vec::new();

    for n in cfg.nodes() {
        let CfgNode::Updatable { .. } = cfg.node(n) else { continue };

        let (update_nodes, update_channels, target) = walk_update_body(cfg, n);
        let Some(recursive_node) = target else { continue };

        let body_channels = channels_reachable_from(cfg, recursive_node, &update_nodes);
        let shared_channels: Vec<Channel> = update_channels.intersection(&body_channels).cloned().collect();

        let combined = build_unfolded_cfg(cfg, recursive_node, &update_nodes);
        let wrapped = super::verify(&combined).violations;

        if !shared_channels.is_empty() || !wrapped.is_empty() {
            out.push(Violation::UnsafeUpdate { updatable_node: n, shared_channels, wrapped });
        }
    }

    out
}

/// Builds the 1-unfolded combinator `B ♢ U` as its own standalone CFG: the
/// recursion body reachable from `recursive_node` (stopping at `continue`
/// back-edges and at the boundary into the update body) plus the update
/// body itself, with every `continue` edge that would otherwise loop back to
/// `recursive_node` instead redirected to a fresh terminal — this is exactly
/// one iteration with the update substituted in, so the ordinary verifier
/// can check it like any other protocol.
fn build_unfolded_cfg(cfg: &Cfg, recursive_node: NodeIndex, update_nodes: &HashSet<NodeIndex>) -> Cfg {
    let mut body_nodes = HashSet::new();
    let mut stack = vec![recursive_node];
    while let Some(n) = stack.pop() {
        if !body_nodes.insert(n) {
            continue;
        }
        for (next, edge) in cfg.outgoing(n) {
            if matches!(edge, CfgEdge::Continue) || update_nodes.contains(&next) {
                continue;
            }
            stack.push(next);
        }
    }

    let combined_nodes: HashSet<NodeIndex> = body_nodes.union(update_nodes).copied().collect();

    let mut graph: Fsm<String, CfgNode, CfgEdge> = Fsm::new(format!("{}::unfolding", cfg.protocol_name));
    let mut id_map: HashMap<NodeIndex, NodeIndex> = HashMap::new();
    for &old in &combined_nodes {
        id_map.insert(old, graph.add_state(cfg.node(old).clone()));
    }
    let loop_exit = graph.add_state(CfgNode::Terminal);

    for &old in &combined_nodes {
        let new_from = id_map[&old];
        for (target, edge) in cfg.outgoing(old) {
            if matches!(edge, CfgEdge::Continue) && target == recursive_node {
                graph.add_transition(new_from, loop_exit, CfgEdge::Sequence);
                continue;
            }
            if let Some(&new_to) = id_map.get(&target) {
                graph.add_transition(new_from, new_to, *edge);
            }
        }
    }

    graph.set_initial(id_map[&recursive_node]);
    graph.mark_terminal(loop_exit);

    Cfg { protocol_name: format!("{}::unfolding", cfg.protocol_name), roles: cfg.roles.clone(), graph }
}

type Channel = (Role, Role);

/// Collects the node set and channel set of an `updatable` body, plus the
/// recursion node its closing `continue` targets.
fn walk_update_body(cfg: &Cfg, start: NodeIndex) -> (HashSet<NodeIndex>, HashSet<Channel>, Option<NodeIndex>) {
    let mut visited = HashSet::new();
    let mut channels = HashSet::new();
    let mut target = None;
    let mut stack = vec![start];

    while let Some(n) = stack.pop() {
        if !visited.insert(n) {
            continue;
        }
        if let CfgNode::Action(ActionPayload::Message { from, to, .. }) = cfg.node(n) {
            for receiver in to {
                channels.insert((from.clone(), receiver.clone()));
            }
        }
        for (next, edge) in cfg.outgoing(n) {
            if matches!(edge, CfgEdge::Continue) {
                target = Some(next);
                continue;
            }
            stack.push(next);
        }
    }

    (visited, channels, target)
}

/// Channels used by the normal recursion body reachable from `recursive_node`,
/// excluding anything already claimed by `exclude` (the update body itself).
fn channels_reachable_from(cfg: &Cfg, recursive_node: NodeIndex, exclude: &HashSet<NodeIndex>) -> HashSet<Channel> {
    let mut visited = HashSet::new();
    let mut channels = HashSet::new();
    let mut stack = vec![recursive_node];

    while let Some(n) = stack.pop() {
        if !visited.insert(n) || exclude.contains(&n) {
            continue;
        }
        if let CfgNode::Action(ActionPayload::Message { from, to, .. }) = cfg.node(n) {
            for receiver in to {
                channels.insert((from.clone(), receiver.clone()));
            }
        }
        for (next, edge) in cfg.outgoing(n) {
            if matches!(edge, CfgEdge::Continue) && next == recursive_node {
                continue;
            }
            if !exclude.contains(&next) {
                stack.push(next);
            }
        }
    }

    channels
}
