//! The structural and behavioral verifier (§5): a pure function from a
//! [`Cfg`] to a [`Diagnosis`]. Every check here is independently re-derivable
//! from the CFG's topology alone — none of them consult the builder's
//! intermediate state.

pub mod checks;
mod unfolding;
mod violation;

pub use violation::{Diagnosis, Priority, Violation};

use crate::cfg::Cfg;

/// Runs every check in §5 and folds the results into one [`Diagnosis`].
/// Checks keep running past a `Priority0` failure so that a caller sees the
/// whole picture in one pass rather than fixing violations one at a time.
pub fn verify(cfg: &Cfg) -> Diagnosis {
    let mut diagnosis = Diagnosis::default();

    run_check("orphan_roles", &mut diagnosis, checks::orphan_roles(cfg));
    run_check("choice_consistency", &mut diagnosis, checks::choice_consistency(cfg));
    run_check("dangling_continues", &mut diagnosis, checks::dangling_continues(cfg));
    run_check("continue_crosses_parallel", &mut diagnosis, checks::continue_crosses_parallel(cfg));
    run_check("malformed_parallel", &mut diagnosis, checks::malformed_parallel(cfg));
    run_check("races", &mut diagnosis, checks::races(cfg));
    run_check("self_communication", &mut diagnosis, checks::self_communication(cfg));
    run_check("multicast_validation", &mut diagnosis, checks::multicast_validation(cfg));
    run_check("unreached_merges", &mut diagnosis, checks::unreached_merges(cfg));
    run_check("deadlocks", &mut diagnosis, checks::deadlocks(cfg));
    run_check("cross_parallel_deadlocks", &mut diagnosis, checks::cross_parallel_deadlocks(cfg));
    run_check("unsafe_updates", &mut diagnosis, unfolding::unsafe_updates(cfg));

    diagnosis
}

/// Folds one check's violations into `diagnosis`, logging the check's entry
/// at `debug` and each violation it found at `trace` (§SPEC_FULL "ambient:
/// logging").
fn run_check(name: &str, diagnosis: &mut Diagnosis, violations: Vec<Violation>) {
    tracing::debug!(check = name, "running verifier check");
    for violation in &violations {
        tracing::trace!(check = name, %violation, "violation found");
    }
    diagnosis.extend(violations);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Block, Interaction, Message, ProtocolDecl, Role, SourceLoc};
    use crate::cfg;
    use crate::registry::ProtocolRegistry;

    fn msg(from: &str, to: &str, label: &str) -> Interaction {
        Interaction::Message {
            from: Role::new(from),
            to: vec![Role::new(to)],
            message: Message::new(label),
            loc: SourceLoc::synthesized(),
        }
    }

    #[test]
    fn two_party_request_response_has_no_violations() {
        let body: Block = vec![msg("Client", "Server", "Request"), msg("Server", "Client", "Response")];
        let decl = ProtocolDecl::new("RequestResponse", vec![Role::new("Client"), Role::new("Server")], body);
        let registry = ProtocolRegistry::empty();
        let (cfg, _warnings) = cfg::build("RequestResponse", &{
            let mut r = registry;
            r.insert(decl);
            r
        })
        .unwrap();

        let diagnosis = verify(&cfg);
        assert!(diagnosis.ok(), "{:?}", diagnosis.violations);
    }

    #[test]
    fn orphan_role_is_reported() {
        let body: Block = vec![msg("Client", "Server", "Request")];
        let decl = ProtocolDecl::new(
            "Lonely",
            vec![Role::new("Client"), Role::new("Server"), Role::new("Logger")],
            body,
        );
        let mut registry = ProtocolRegistry::empty();
        registry.insert(decl);
        let (cfg, _) = cfg::build("Lonely", &registry).unwrap();

        let diagnosis = verify(&cfg);
        assert!(diagnosis.violations.iter().any(|v| matches!(v, Violation::OrphanRole { role } if role.as_str() == "Logger")));
    }

    #[test]
    fn self_send_is_flagged() {
        let body: Block = vec![msg("Client", "Client", "Oops")];
        let decl = ProtocolDecl::new("SelfTalk", vec![Role::new("Client")], body);
        let mut registry = ProtocolRegistry::empty();
        registry.insert(decl);
        let (cfg, _) = cfg::build("SelfTalk", &registry).unwrap();

        let diagnosis = verify(&cfg);
        assert!(diagnosis.violations.iter().any(|v| matches!(v, Violation::SelfCommunication { .. })));
    }

    #[test]
    fn unconditional_but_progressing_recursion_is_not_a_deadlock() {
        // Every lap through the loop actually sends and receives a `Ping`
        // before looping — it never terminates, but that is non-termination,
        // not deadlock (Theorem 5.10 only traps roles with no way forward).
        // `continue` edges are excluded from the SCC graph precisely so this
        // case isn't reported.
        let body: Block = vec![Interaction::Recursion {
            label: "Loop".into(),
            body: vec![msg("A", "B", "Ping"), Interaction::Continue { label: "Loop".into(), loc: SourceLoc::synthesized() }],
            loc: SourceLoc::synthesized(),
        }];
        let decl = ProtocolDecl::new("Spin", vec![Role::new("A"), Role::new("B")], body);
        let mut registry = ProtocolRegistry::empty();
        registry.insert(decl);
        let (cfg, _) = cfg::build("Spin", &registry).unwrap();

        let diagnosis = verify(&cfg);
        assert!(!diagnosis.violations.iter().any(|v| matches!(v, Violation::Deadlock { .. })));
    }

    #[test]
    fn a_genuine_cycle_with_no_exit_is_a_deadlock() {
        // A hand-built CFG with a true cycle on `Sequence` edges (not the
        // builder's `Continue` back-edges) — the case `deadlocks()`'s Tarjan
        // pass must still catch once `Continue` edges are excluded.
        use crate::cfg::{ActionPayload, Cfg, CfgEdge, CfgNode};
        use mpst_fsm::Fsm;

        let mut graph: Fsm<String, CfgNode, CfgEdge> = Fsm::new("Spin".into());
        let initial = graph.add_state(CfgNode::Initial);
        let a = graph.add_state(CfgNode::Action(ActionPayload::Message {
            from: Role::new("A"),
            to: vec![Role::new("B")],
            message: Message::new("Ping"),
            loc: SourceLoc::synthesized(),
        }));
        let b = graph.add_state(CfgNode::Action(ActionPayload::Message {
            from: Role::new("B"),
            to: vec![Role::new("A")],
            message: Message::new("Pong"),
            loc: SourceLoc::synthesized(),
        }));
        graph.set_initial(initial);
        graph.add_transition(initial, a, CfgEdge::Sequence);
        graph.add_transition(a, b, CfgEdge::Sequence);
        graph.add_transition(b, a, CfgEdge::Sequence);

        let cfg = Cfg { protocol_name: "Spin".into(), roles: vec![Role::new("A"), Role::new("B")], graph };

        let violations = checks::deadlocks(&cfg);
        assert!(violations.iter().any(|v| matches!(v, Violation::Deadlock { .. })));
    }
}
