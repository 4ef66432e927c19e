//! The individual structural and behavioral checks (§5) that
//! [`super::verify`] runs in sequence and folds into one [`Diagnosis`].

use super::violation::Violation;
use crate::ast::Role;
use crate::cfg::{ActionPayload, Cfg, CfgEdge, CfgNode};
use mpst_fsm::NodeIndex;
use petgraph::algo::tarjan_scc;
use petgraph::visit::EdgeRef;
use std::collections::{HashMap, HashSet};

/// §5.1: every declared role must originate or receive at least one action.
pub fn orphan_roles(cfg: &Cfg) -> Vec<Violation> {
    let mut mentioned: HashSet<Role> = HashSet::new();
    for n in cfg.nodes() {
        if let CfgNode::Action(payload) = cfg.node(n) {
            let (from, to) = payload.participants();
            mentioned.insert(from);
            mentioned.extend(to);
        }
    }

    cfg.roles
        .iter()
        .filter(|r| !mentioned.contains(r))
        .map(|r| Violation::OrphanRole { role: r.clone() })
        .collect()
}

/// §5.1: a choice's decider must originate the first action of every
/// non-empty branch; every other participant must see a consistent next
/// action across branches so the choice can be merged on projection.
pub fn choice_consistency(cfg: &Cfg) -> Vec<Violation> {
    let mut out = Vec::new();

    for n in cfg.nodes() {
        let CfgNode::Branch { decider } = cfg.node(n) else { continue };

        let mut branch_first_senders: Vec<Option<Role>> = Vec::new();
        let mut branch_roles: Vec<HashSet<Role>> = Vec::new();
        let mut branch_diverges: Vec<bool> = Vec::new();

        for (target, edge) in cfg.outgoing(n) {
            if !matches!(edge, CfgEdge::Branch) {
                continue;
            }
            if target == n {
                // Empty branch wired straight back to the branch node itself.
                out.push(Violation::EmptyChoiceBranch { branch_node: n });
                continue;
            }
            let first_sender = first_action_sender(cfg, target);
            branch_first_senders.push(first_sender);
            branch_roles.push(roles_before_merge(cfg, target));
            branch_diverges.push(diverges_into_updatable_recursion(cfg, target));
        }

        for sender in branch_first_senders.iter().flatten() {
            if sender != decider {
                out.push(Violation::NonDeterministicChoice { branch_node: n, decider: decider.clone() });
                break;
            }
        }

        // Mergeability exception (a), §4.2: a branch that diverges into an
        // updatable recursion never rejoins the ordinary continuation, so its
        // role set is exempt from the cross-branch comparison below.
        let comparable: Vec<usize> =
            (0..branch_roles.len()).filter(|i| !branch_diverges[*i]).collect();

        let mut all_roles: HashSet<Role> = HashSet::new();
        for &i in &comparable {
            all_roles.extend(branch_roles[i].iter().cloned());
        }
        for role in all_roles {
            if role == *decider {
                continue;
            }
            let seen_in: Vec<bool> = comparable.iter().map(|&i| branch_roles[i].contains(&role)).collect();
            if seen_in.iter().any(|b| *b) && seen_in.iter().any(|b| !*b) {
                out.push(Violation::UnmergeableChoice {
                    branch_node: n,
                    role,
                    loc: crate::ast::SourceLoc::synthesized(),
                });
            }
        }
    }

    out
}

/// Whether the branch starting at `start` reaches an `updatable` node
/// before (if ever) reaching the choice's `merge` — i.e. it replaces the
/// recursion instead of rejoining the ordinary continuation.
fn diverges_into_updatable_recursion(cfg: &Cfg, start: NodeIndex) -> bool {
    let mut seen = HashSet::new();
    let mut stack = vec![start];
    while let Some(n) = stack.pop() {
        if !seen.insert(n) {
            continue;
        }
        if matches!(cfg.node(n), CfgNode::Updatable { .. }) {
            return true;
        }
        if matches!(cfg.node(n), CfgNode::Merge) {
            continue;
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

fn first_action_sender(cfg: &Cfg, start: NodeIndex) -> Option<Role> {
    let mut seen = HashSet::new();
    let mut stack = vec![start];
    while let Some(n) = stack.pop() {
        if !seen.insert(n) {
            continue;
        }
        if let CfgNode::Action(ActionPayload::Message { from, .. }) = cfg.node(n) {
            return Some(from.clone());
        }
        if matches!(cfg.node(n), CfgNode::Merge | CfgNode::Join { .. }) {
            continue;
        }
        for (next, edge) in cfg.outgoing(n) {
            if matches!(edge, CfgEdge::Continue) {
                continue;
            }
            stack.push(next);
        }
    }
    None
}

/// Every role mentioned by an action reachable before the branch's matching
/// `merge` (or protocol end, if the branch never returns).
fn roles_before_merge(cfg: &Cfg, start: NodeIndex) -> HashSet<Role> {
    let mut roles = HashSet::new();
    let mut seen = HashSet::new();
    let mut stack = vec![start];
    while let Some(n) = stack.pop() {
        if !seen.insert(n) {
            continue;
        }
        if matches!(cfg.node(n), CfgNode::Merge) {
            continue;
        }
        if let CfgNode::Action(payload) = cfg.node(n) {
            let (from, to) = payload.participants();
            roles.insert(from);
            roles.extend(to);
        }
        for (next, edge) in cfg.outgoing(n) {
            if matches!(edge, CfgEdge::Continue) {
                continue;
            }
            stack.push(next);
        }
    }
    roles
}

/// §5.1: every `continue` edge must target a `recursive` node.
pub fn dangling_continues(cfg: &Cfg) -> Vec<Violation> {
    let mut out = Vec::new();
    for n in cfg.nodes() {
        for (target, edge) in cfg.outgoing(n) {
            if matches!(edge, CfgEdge::Continue) && !matches!(cfg.node(target), CfgNode::Recursive { .. }) {
                out.push(Violation::DanglingContinue { node: n });
            }
        }
    }
    out
}

/// §5.1 Priority-1: a `continue` must not jump out of a `fork` branch it
/// entered without passing through the matching `join` first.
pub fn continue_crosses_parallel(cfg: &Cfg) -> Vec<Violation> {
    let depth = fork_depth_map(cfg);
    let mut out = Vec::new();
    for n in cfg.nodes() {
        for (target, edge) in cfg.outgoing(n) {
            if !matches!(edge, CfgEdge::Continue) {
                continue;
            }
            let d_n = depth.get(&n).copied().unwrap_or(0);
            let d_t = depth.get(&target).copied().unwrap_or(0);
            if d_n != d_t {
                out.push(Violation::ContinueCrossesParallel { node: n, recursive_node: target });
            }
        }
    }
    out
}

fn fork_depth_map(cfg: &Cfg) -> HashMap<NodeIndex, u32> {
    let mut depth = HashMap::new();
    let initial = cfg.initial();
    depth.insert(initial, 0);
    let mut queue = std::collections::VecDeque::new();
    queue.push_back(initial);
    while let Some(n) = queue.pop_front() {
        let d: u32 = depth[&n];
        for (next, edge) in cfg.outgoing(n) {
            if matches!(edge, CfgEdge::Continue) {
                continue;
            }
            let next_depth = if matches!(cfg.node(next), CfgNode::Join { .. }) {
                d.saturating_sub(1)
            } else if matches!(edge, CfgEdge::Fork) {
                d + 1
            } else {
                d
            };
            if depth.insert(next, next_depth).is_none() {
                queue.push_back(next);
            }
        }
    }
    depth
}

/// §5.1: within one `fork`/`join` pair, no role may participate in more than
/// one branch — otherwise its projected machine cannot tell which branch it
/// is in.
pub fn malformed_parallel(cfg: &Cfg) -> Vec<Violation> {
    let mut out = Vec::new();
    for n in cfg.nodes() {
        let CfgNode::Fork { .. } = cfg.node(n) else { continue };

        let branch_entries: Vec<NodeIndex> =
            cfg.outgoing(n).filter(|(_, e)| matches!(e, CfgEdge::Fork)).map(|(t, _)| t).collect();

        let mut role_branches: HashMap<Role, HashSet<usize>> = HashMap::new();
        for (idx, entry) in branch_entries.iter().enumerate() {
            for role in roles_in_fork_branch(cfg, *entry) {
                role_branches.entry(role).or_default().insert(idx);
            }
        }

        for (role, branches) in role_branches {
            if branches.len() > 1 {
                out.push(Violation::MalformedParallel { fork_node: n, role });
            }
        }
    }
    out
}

fn roles_in_fork_branch(cfg: &Cfg, start: NodeIndex) -> HashSet<Role> {
    let mut roles = HashSet::new();
    let mut seen = HashSet::new();
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
            roles.insert(from);
            roles.extend(to);
        }
        for (next, edge) in cfg.outgoing(n) {
            if matches!(edge, CfgEdge::Continue) {
                continue;
            }
            stack.push(next);
        }
    }
    roles
}

/// Theorem 4.5 (Deniélou & Yoshida 2012): two actions on the same ordered
/// channel that sit in different branches of the same `fork` race, because
/// neither the sender nor receiver can tell which arrives first.
pub fn races(cfg: &Cfg) -> Vec<Violation> {
    let mut out = Vec::new();
    for n in cfg.nodes() {
        let CfgNode::Fork { .. } = cfg.node(n) else { continue };

        let branch_entries: Vec<NodeIndex> =
            cfg.outgoing(n).filter(|(_, e)| matches!(e, CfgEdge::Fork)).map(|(t, _)| t).collect();

        let mut per_branch_channels: Vec<Vec<(NodeIndex, Role, Role)>> = Vec::new();
        for entry in &branch_entries {
            per_branch_channels.push(channels_in_fork_branch(cfg, *entry));
        }

        for i in 0..per_branch_channels.len() {
            for j in (i + 1)..per_branch_channels.len() {
                for (node_a, from_a, to_a) in &per_branch_channels[i] {
                    for (node_b, from_b, to_b) in &per_branch_channels[j] {
                        if from_a == from_b && to_a == to_b {
                            out.push(Violation::Race {
                                first: *node_a,
                                second: *node_b,
                                from: from_a.clone(),
                                to: to_a.clone(),
                            });
                        }
                    }
                }
            }
        }
    }
    out
}

fn channels_in_fork_branch(cfg: &Cfg, start: NodeIndex) -> Vec<(NodeIndex, Role, Role)> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    let mut stack = vec![start];
    while let Some(n) = stack.pop() {
        if !seen.insert(n) {
            continue;
        }
        if matches!(cfg.node(n), CfgNode::Join { .. }) {
            continue;
        }
        if let CfgNode::Action(ActionPayload::Message { from, to, .. }) = cfg.node(n) {
            for receiver in to {
                out.push((n, from.clone(), receiver.clone()));
            }
        }
        for (next, edge) in cfg.outgoing(n) {
            if matches!(edge, CfgEdge::Continue) {
                continue;
            }
            stack.push(next);
        }
    }
    out
}

/// A sender may not be among its own action's receivers.
pub fn self_communication(cfg: &Cfg) -> Vec<Violation> {
    let mut out = Vec::new();
    for n in cfg.nodes() {
        if let CfgNode::Action(ActionPayload::Message { from, to, .. }) = cfg.node(n) {
            if to.contains(from) {
                out.push(Violation::SelfCommunication { node: n, role: from.clone() });
            }
        }
    }
    out
}

/// §5.1: a multicast's receiver list must be non-empty, duplicate-free, and
/// must not include the sender (self-communication is reported separately
/// but would otherwise also trip this check).
pub fn multicast_validation(cfg: &Cfg) -> Vec<Violation> {
    let mut out = Vec::new();
    for n in cfg.nodes() {
        if let CfgNode::Action(ActionPayload::Message { to, .. }) = cfg.node(n) {
            if to.is_empty() {
                out.push(Violation::MulticastInvalid { node: n, reason: "receiver list is empty".into() });
                continue;
            }
            let unique: HashSet<&Role> = to.iter().collect();
            if unique.len() != to.len() {
                out.push(Violation::MulticastInvalid { node: n, reason: "receiver list has duplicates".into() });
            }
        }
    }
    out
}

/// A `merge` node must be reachable from every `branch` edge leaving its
/// choice — otherwise some branch never rejoins the protocol.
pub fn unreached_merges(cfg: &Cfg) -> Vec<Violation> {
    let mut out = Vec::new();
    for n in cfg.nodes() {
        let CfgNode::Branch { .. } = cfg.node(n) else { continue };

        let merges: HashSet<NodeIndex> = cfg
            .outgoing(n)
            .filter(|(_, e)| matches!(e, CfgEdge::Branch))
            .filter_map(|(t, _)| if t == n { None } else { reaches_merge(cfg, t) })
            .collect();

        if merges.len() > 1 {
            for m in merges {
                out.push(Violation::UnreachedMerge { merge_node: m });
            }
        }
    }
    out
}

fn reaches_merge(cfg: &Cfg, start: NodeIndex) -> Option<NodeIndex> {
    let mut seen = HashSet::new();
    let mut stack = vec![start];
    while let Some(n) = stack.pop() {
        if !seen.insert(n) {
            continue;
        }
        if matches!(cfg.node(n), CfgNode::Merge) {
            return Some(n);
        }
        for (next, edge) in cfg.outgoing(n) {
            if matches!(edge, CfgEdge::Continue) {
                continue;
            }
            stack.push(next);
        }
    }
    None
}

/// Theorem 5.10 (Honda et al.): a strongly connected component with no edge
/// leaving it traps every role that enters it forever. §4.2 Priority-3 calls
/// for the dependency graph to be built *ignoring* `continue` edges first —
/// those are the only back-edges a protocol's ordinary recursion produces,
/// so leaving them in makes every unconditional-but-progressing loop look
/// like a non-trivial SCC with no way out.
pub fn deadlocks(cfg: &Cfg) -> Vec<Violation> {
    let graph = cfg.graph_ref();
    let without_continue =
        petgraph::visit::EdgeFiltered::from_fn(graph, |e| !matches!(e.weight(), CfgEdge::Continue));
    let sccs = tarjan_scc(&without_continue);
    let mut out = Vec::new();
    for scc in sccs {
        if scc.len() < 2 {
            continue;
        }
        let members: HashSet<_> = scc.iter().copied().collect();
        let has_exit = scc.iter().any(|n| graph.edges(*n).any(|e| !members.contains(&e.target())));
        if !has_exit {
            out.push(Violation::Deadlock { cycle: scc });
        }
    }
    out
}

/// §4.2 Priority-3 cross-parallel check: a cycle-free pair of branches can
/// still deadlock if each one's first observable action receives from the
/// role the other branch's first action sends to — neither side's send is
/// reachable until the other already ran, so Tarjan (which only sees actual
/// graph cycles) cannot catch it. Branch entries are pooled across every
/// `fork` in the CFG rather than compared only within one fork, since
/// `malformed_parallel` already forbids a role from straddling two branches
/// of the *same* fork — the deadlock-prone case is always across separate
/// parallel regions.
pub fn cross_parallel_deadlocks(cfg: &Cfg) -> Vec<Violation> {
    let mut entries = Vec::new();
    for n in cfg.nodes() {
        let CfgNode::Fork { .. } = cfg.node(n) else { continue };
        entries.extend(cfg.outgoing(n).filter(|(_, e)| matches!(e, CfgEdge::Fork)).map(|(t, _)| t));
    }

    let firsts: Vec<Option<(NodeIndex, Role, Role)>> = entries.iter().map(|e| first_message(cfg, *e)).collect();

    let mut out = Vec::new();
    for i in 0..firsts.len() {
        for j in (i + 1)..firsts.len() {
            let (Some((node_a, from_a, to_a)), Some((node_b, from_b, to_b))) = (&firsts[i], &firsts[j]) else {
                continue;
            };
            if from_a == to_b && to_a == from_b {
                out.push(Violation::Deadlock { cycle: vec![*node_a, *node_b] });
            }
        }
    }
    out
}

/// The first message action reachable from a fork branch's entry, as
/// `(node, sender, first receiver)` — used to tell which pair of roles a
/// branch blocks on before it sends anything of its own.
fn first_message(cfg: &Cfg, start: NodeIndex) -> Option<(NodeIndex, Role, Role)> {
    let mut seen = HashSet::new();
    let mut stack = vec![start];
    while let Some(n) = stack.pop() {
        if !seen.insert(n) {
            continue;
        }
        if let CfgNode::Action(ActionPayload::Message { from, to, .. }) = cfg.node(n) {
            if let Some(first_to) = to.first() {
                return Some((n, from.clone(), first_to.clone()));
            }
        }
        if matches!(cfg.node(n), CfgNode::Join { .. }) {
            continue;
        }
        for (next, edge) in cfg.outgoing(n) {
            if matches!(edge, CfgEdge::Continue) {
                continue;
            }
            stack.push(next);
        }
    }
    None
}
