//! The optional "local Scribble" textual rendering of a projected role
//! (§6 "Serialization format"). A display artifact only — round-tripping
//! back through [`crate::parser`] is not attempted or guaranteed.

use scribble_dmst::cfsm::{Action, Cfsm};
use mpst_fsm::NodeIndex;
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

/// Renders one role's CFSM as indented local-Scribble text.
pub fn render(cfsm: &Cfsm) -> String {
    let Some(initial) = cfsm.initial() else {
        return String::new();
    };

    let headers = loop_headers(cfsm, initial);
    let mut out = String::new();
    let mut labels: HashMap<NodeIndex, String> = HashMap::new();
    let mut next_label = 0usize;
    let mut finished: HashSet<NodeIndex> = HashSet::new();
    let mut stack: Vec<NodeIndex> = Vec::new();

    render_node(cfsm, initial, 0, &headers, &mut labels, &mut next_label, &mut finished, &mut stack, &mut out);
    out
}

/// Nodes reachable from a back-edge (an edge whose target is an ancestor on
/// the current DFS stack) are the `rec` binders this rendering needs.
fn loop_headers(cfsm: &Cfsm, initial: NodeIndex) -> HashSet<NodeIndex> {
    let mut headers = HashSet::new();
    let mut visited = HashSet::new();
    let mut stack = Vec::new();
    walk_for_headers(cfsm, initial, &mut visited, &mut stack, &mut headers);
    headers
}

fn walk_for_headers(
    cfsm: &Cfsm,
    node: NodeIndex,
    visited: &mut HashSet<NodeIndex>,
    stack: &mut Vec<NodeIndex>,
    headers: &mut HashSet<NodeIndex>,
) {
    if stack.contains(&node) {
        headers.insert(node);
        return;
    }
    if !visited.insert(node) {
        return;
    }
    stack.push(node);
    for (target, _) in cfsm.outgoing(node) {
        walk_for_headers(cfsm, target, visited, stack, headers);
    }
    stack.pop();
}

fn indent_str(indent: usize) -> String {
    "    ".repeat(indent)
}

#[allow(clippy::too_many_arguments)]
fn render_node(
    cfsm: &Cfsm,
    node: NodeIndex,
    indent: usize,
    headers: &HashSet<NodeIndex>,
    labels: &mut HashMap<NodeIndex, String>,
    next_label: &mut usize,
    finished: &mut HashSet<NodeIndex>,
    stack: &mut Vec<NodeIndex>,
    out: &mut String,
) {
    if stack.contains(&node) {
        let label = labels.get(&node).cloned().unwrap_or_else(|| "L?".to_string());
        let _ = writeln!(out, "{}continue {};", indent_str(indent), label);
        return;
    }
    if finished.contains(&node) {
        return;
    }

    let wraps_rec = headers.contains(&node);
    let body_indent = if wraps_rec { indent + 1 } else { indent };

    if wraps_rec {
        let label = format!("L{next_label}");
        *next_label += 1;
        labels.insert(node, label.clone());
        let _ = writeln!(out, "{}rec {} {{", indent_str(indent), label);
    }

    stack.push(node);
    let outgoing: Vec<(NodeIndex, Action)> = cfsm.outgoing(node).map(|(n, a)| (n, a.clone())).collect();

    if outgoing.len() <= 1 {
        if let Some((target, action)) = outgoing.into_iter().next() {
            render_action_line(&action, body_indent, out);
            render_node(cfsm, target, body_indent, headers, labels, next_label, finished, stack, out);
        }
    } else {
        let internal = outgoing.iter().all(|(_, a)| matches!(a, Action::Send { .. } | Action::Choice { .. }));
        let keyword = if internal { "select" } else { "offer" };
        let _ = writeln!(out, "{}{} {{", indent_str(body_indent), keyword);
        for (i, (target, action)) in outgoing.iter().enumerate() {
            if i > 0 {
                let _ = writeln!(out, "{}}} or {{", indent_str(body_indent));
            }
            render_action_line(action, body_indent + 1, out);
            render_node(cfsm, *target, body_indent + 1, headers, labels, next_label, finished, stack, out);
        }
        let _ = writeln!(out, "{}}}", indent_str(body_indent));
    }
    stack.pop();

    if wraps_rec {
        let _ = writeln!(out, "{}}}", indent_str(indent));
    }
    finished.insert(node);
}

fn render_action_line(action: &Action, indent: usize, out: &mut String) {
    let pad = indent_str(indent);
    match action {
        Action::Send { to, message, .. } => {
            for recipient in to {
                let _ = writeln!(out, "{pad}!{message} to {recipient}");
            }
        }
        Action::Receive { from, message, .. } => {
            let _ = writeln!(out, "{pad}?{message} from {from}");
        }
        Action::Tau => {}
        Action::Choice { branch } => {
            let _ = writeln!(out, "{pad}// {branch}");
        }
        Action::SubprotocolCall { protocol, .. } => {
            let _ = writeln!(out, "{pad}do {protocol};");
        }
        Action::Create { role, instance } => {
            let _ = writeln!(out, "{pad}creates {role} as {instance};");
        }
        Action::Invite { who } => {
            let _ = writeln!(out, "{pad}invites {who};");
        }
        Action::UpdateMarker => {
            let _ = writeln!(out, "{pad}// update point");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribble_dmst::ast::{Block, Interaction, Message, ProtocolDecl, Role, SourceLoc};
    use scribble_dmst::registry::ProtocolRegistry;
    use scribble_dmst::{cfg, projector};

    fn msg(from: &str, to: &str, label: &str) -> Interaction {
        Interaction::Message {
            from: Role::new(from),
            to: vec![Role::new(to)],
            message: Message::new(label),
            loc: SourceLoc::synthesized(),
        }
    }

    #[test]
    fn renders_send_and_receive_lines() {
        let body: Block = vec![msg("Client", "Server", "Request"), msg("Server", "Client", "Response")];
        let decl = ProtocolDecl::new("RequestResponse", vec![Role::new("Client"), Role::new("Server")], body);
        let mut registry = ProtocolRegistry::empty();
        registry.insert(decl);
        let (cfg, _) = cfg::build("RequestResponse", &registry).unwrap();

        let outcome = projector::project(&cfg, &Role::new("Client"), &registry);
        let text = render(&outcome.cfsm);
        assert!(text.contains("!Request to Server"));
        assert!(text.contains("?Response from Server"));
    }
}
