//! End-to-end pipeline tests for the worked scenarios of spec §8 that are
//! not already exercised by the `#[cfg(test)]` modules scattered through
//! `cfg`, `verifier`, `projector` and `runtime` — two-buyer mergeable
//! choice, manual-CFSM deadlock, race/no-race detection, sub-protocol call
//! frames, and DMst 1-unfolding safety (both the safe and unsafe case).

use scribble_dmst::ast::{Block, Interaction, Message, ProtocolDecl, Role, SourceLoc};
use scribble_dmst::cfsm::{Action, Cfsm};
use scribble_dmst::registry::ProtocolRegistry;
use scribble_dmst::runtime::{CfsmRegistry, DistributedSimulator, ScheduledConfig};
use scribble_dmst::verifier::Violation;
use scribble_dmst::{cfg, projector, verifier};
use std::collections::HashMap;
use std::sync::Arc;

fn loc() -> SourceLoc {
    SourceLoc::synthesized()
}

fn msg(from: &str, to: &[&str], label: &str) -> Interaction {
    Interaction::Message {
        from: Role::new(from),
        to: to.iter().map(|r| Role::new(*r)).collect(),
        message: Message::new(label),
        loc: loc(),
    }
}

fn role(name: &str) -> Role {
    Role::new(name)
}

#[test]
fn two_buyer_choice_is_deterministic_and_mergeable() {
    // B1 -> Seller: Title; Seller -> B1: Quote; Seller -> B2: Quote;
    // B1 -> B2: Share; choice at B2 { B2 -> Seller: Ok } or { B2 -> Seller: Cancel }
    let body: Block = vec![
        msg("B1", &["Seller"], "Title"),
        msg("Seller", &["B1"], "Quote"),
        msg("Seller", &["B2"], "Quote"),
        msg("B1", &["B2"], "Share"),
        Interaction::Choice {
            at: role("B2"),
            branches: vec![vec![msg("B2", &["Seller"], "Ok")], vec![msg("B2", &["Seller"], "Cancel")]],
            loc: loc(),
        },
    ];
    let decl = ProtocolDecl::new("TwoBuyer", vec![role("B1"), role("B2"), role("Seller")], body);
    let mut registry = ProtocolRegistry::empty();
    registry.insert(decl);
    let (cfg, _warnings) = cfg::build("TwoBuyer", &registry).unwrap();

    let diagnosis = verifier::verify(&cfg);
    assert!(diagnosis.ok(), "{:?}", diagnosis.violations);

    let projections = projector::project_all(&cfg, &registry);

    let b2 = &projections[&role("B2")].cfsm;
    let choice_count = b2.transitions().filter(|(_, _, a)| matches!(a, Action::Choice { .. })).count();
    assert_eq!(choice_count, 2, "B2 should emit an internal choice per branch");

    let seller = &projections[&role("Seller")].cfsm;
    let has_ok = seller
        .transitions()
        .any(|(_, _, a)| matches!(a, Action::Receive { message, .. } if message.label == "Ok"));
    let has_cancel = seller
        .transitions()
        .any(|(_, _, a)| matches!(a, Action::Receive { message, .. } if message.label == "Cancel"));
    assert!(has_ok && has_cancel, "Seller should externally choose on distinct labels");
}

#[tokio::test]
async fn mutually_waiting_roles_are_detected_as_deadlocked() {
    // A's CFSM starts with receive(Start, from=B); B's starts with
    // receive(Ack, from=A) — both block forever since neither ever sends.
    let mut a = Cfsm::new(role("A"), "Swapped", vec![role("A"), role("B")]);
    let a_q0 = a.add_state(Some("q0".into()));
    let a_q1 = a.add_state(Some("q1".into()));
    a.set_initial(a_q0);
    a.mark_terminal(a_q1);
    a.add_transition(a_q0, a_q1, Action::Receive { from: role("B"), message: Message::new("Start"), loc: None });

    let mut b = Cfsm::new(role("B"), "Swapped", vec![role("A"), role("B")]);
    let b_q0 = b.add_state(Some("q0".into()));
    let b_q1 = b.add_state(Some("q1".into()));
    b.set_initial(b_q0);
    b.mark_terminal(b_q1);
    b.add_transition(b_q0, b_q1, Action::Receive { from: role("A"), message: Message::new("Ack"), loc: None });

    let mut cfsms: HashMap<Role, Arc<Cfsm>> = HashMap::new();
    cfsms.insert(role("A"), Arc::new(a));
    cfsms.insert(role("B"), Arc::new(b));

    let mut sim = DistributedSimulator::new(cfsms, Arc::new(CfsmRegistry::new()), ScheduledConfig::default());
    let result = sim.run().await;

    assert!(!result.success);
    match result.error {
        Some(scribble_dmst::RuntimeError::Deadlock { roles }) => {
            let mut roles = roles;
            roles.sort();
            assert_eq!(roles, vec!["A".to_string(), "B".to_string()]);
        }
        other => panic!("expected a deadlock error, got {other:?}"),
    }
}

#[test]
fn parallel_sends_on_the_same_channel_race() {
    let body: Block = vec![Interaction::Parallel {
        branches: vec![vec![msg("Hub", &["A"], "M1")], vec![msg("Hub", &["A"], "M2")]],
        loc: loc(),
    }];
    let decl = ProtocolDecl::new("Racy", vec![role("Hub"), role("A")], body);
    let mut registry = ProtocolRegistry::empty();
    registry.insert(decl);
    let (cfg, _) = cfg::build("Racy", &registry).unwrap();

    let diagnosis = verifier::verify(&cfg);
    assert!(diagnosis.violations.iter().any(|v| matches!(v, Violation::Race { .. })));
}

#[test]
fn parallel_sends_on_different_channels_do_not_race() {
    let body: Block = vec![Interaction::Parallel {
        branches: vec![vec![msg("Hub", &["A"], "M1")], vec![msg("Hub", &["B"], "M2")]],
        loc: loc(),
    }];
    let decl = ProtocolDecl::new("NotRacy", vec![role("Hub"), role("A"), role("B")], body);
    let mut registry = ProtocolRegistry::empty();
    registry.insert(decl);
    let (cfg, _) = cfg::build("NotRacy", &registry).unwrap();

    let diagnosis = verifier::verify(&cfg);
    assert!(!diagnosis.violations.iter().any(|v| matches!(v, Violation::Race { .. })));
}

#[tokio::test]
async fn subprotocol_call_pushes_and_pops_a_call_frame() {
    // Main(A,B): A->B: Go; do Sub(A,B); A->B: End.
    // Sub(X,Y): X->Y: Hello; Y->X: Hi.
    let sub_body: Block = vec![msg("X", &["Y"], "Hello"), msg("Y", &["X"], "Hi")];
    let sub_decl = ProtocolDecl::new("Sub", vec![role("X"), role("Y")], sub_body);

    let main_body: Block = vec![
        msg("A", &["B"], "Go"),
        Interaction::Do { protocol: "Sub".into(), args: vec![role("A"), role("B")], loc: loc() },
        msg("A", &["B"], "End"),
    ];
    let main_decl = ProtocolDecl::new("Main", vec![role("A"), role("B")], main_body);

    let mut registry = ProtocolRegistry::empty();
    registry.insert(sub_decl);
    registry.insert(main_decl);

    let (main_cfg, _) = cfg::build("Main", &registry).unwrap();
    let main_diag = verifier::verify(&main_cfg);
    assert!(main_diag.ok(), "{:?}", main_diag.violations);

    let main_projections = projector::project_all(&main_cfg, &registry);
    let a_cfsm = &main_projections[&role("A")].cfsm;
    assert!(
        a_cfsm.transitions().any(|(_, _, act)| matches!(act, Action::SubprotocolCall { protocol, .. } if protocol == "Sub")),
        "A's projection should call into Sub"
    );

    let (sub_cfg, _) = cfg::build("Sub", &registry).unwrap();
    assert!(verifier::verify(&sub_cfg).ok());
    let sub_projections = projector::project_all(&sub_cfg, &registry);

    let mut call_registry: CfsmRegistry = HashMap::new();
    let mut by_formal_role: HashMap<Role, Arc<Cfsm>> = HashMap::new();
    for (formal_role, outcome) in sub_projections {
        by_formal_role.insert(formal_role, Arc::new(outcome.cfsm));
    }
    call_registry.insert("Sub".to_string(), by_formal_role);

    let main_cfsms: HashMap<Role, Arc<Cfsm>> =
        main_projections.into_iter().map(|(r, o)| (r, Arc::new(o.cfsm))).collect();

    let mut sim = DistributedSimulator::new(main_cfsms, Arc::new(call_registry), ScheduledConfig::default());
    let result = sim.run().await;
    assert!(result.success, "{:?}", result.error);
}

fn updatable_recursion_protocol(update_reuses_original_channel: bool) -> ProtocolDecl {
    // rec Loop {
    //   Manager -> Worker: Task; Worker -> Manager: Result;
    //   choice at Manager {
    //     continue Loop with {
    //       Manager creates Worker2; Manager invites Worker2;
    //       Manager -> Worker2: Task; Worker2 -> Manager: Result
    //       // (or, in the unsafe variant, Manager -> Worker / Worker -> Manager again)
    //     }
    //   } or {
    //     Manager -> Worker: Done;
    //   }
    // }
    let (update_sender_target, update_target_sender) =
        if update_reuses_original_channel { ("Worker", "Worker") } else { ("Worker2", "Worker2") };

    let mut update_body: Block = Vec::new();
    if !update_reuses_original_channel {
        update_body.push(Interaction::Creates { parent: role("Manager"), role: role("Worker2"), loc: loc() });
        update_body.push(Interaction::Invites { from: role("Manager"), to: role("Worker2"), loc: loc() });
    }
    update_body.push(msg("Manager", &[update_sender_target], "Task"));
    update_body.push(msg(update_target_sender, &["Manager"], "Result"));

    let loop_body: Block = vec![
        msg("Manager", &["Worker"], "Task"),
        msg("Worker", &["Manager"], "Result"),
        Interaction::Choice {
            at: role("Manager"),
            branches: vec![
                vec![Interaction::UpdatableContinue { label: "Loop".into(), update: update_body, loc: loc() }],
                vec![msg("Manager", &["Worker"], "Done")],
            ],
            loc: loc(),
        },
    ];

    let body: Block = vec![Interaction::Recursion { label: "Loop".into(), body: loop_body, loc: loc() }];
    ProtocolDecl::new("UpdatableLoop", vec![role("Manager"), role("Worker")], body)
}

#[test]
fn disjoint_channel_update_is_a_safe_one_unfolding() {
    let decl = updatable_recursion_protocol(false);
    let mut registry = ProtocolRegistry::empty();
    registry.insert(decl);
    let (cfg, _) = cfg::build("UpdatableLoop", &registry).unwrap();

    let diagnosis = verifier::verify(&cfg);
    assert!(diagnosis.ok(), "{:?}", diagnosis.violations);
    assert!(!diagnosis.violations.iter().any(|v| matches!(v, Violation::UnsafeUpdate { .. })));
    assert!(
        !diagnosis.violations.iter().any(|v| matches!(v, Violation::UnmergeableChoice { .. })),
        "a branch diverging into updatable recursion is exempt from mergeability (§4.2 exception a)"
    );
}

#[test]
fn channel_reusing_update_is_an_unsafe_one_unfolding() {
    let decl = updatable_recursion_protocol(true);
    let mut registry = ProtocolRegistry::empty();
    registry.insert(decl);
    let (cfg, _) = cfg::build("UpdatableLoop", &registry).unwrap();

    let diagnosis = verifier::verify(&cfg);
    assert!(diagnosis.violations.iter().any(|v| matches!(v, Violation::UnsafeUpdate { .. })));
}
