//! Property-based checks for the quantified invariants of projection
//! duality and per-pair FIFO ordering (the two from the testable-properties
//! list that hold over arbitrary well-formed protocols, not just the worked
//! scenarios in the unit tests scattered through `verifier`/`projector`).

use crate::ast::{Interaction, Message, ProtocolDecl, Role, SourceLoc};
use crate::cfsm::Action;
use crate::registry::ProtocolRegistry;
use crate::runtime::{CfsmRegistry, DistributedSimulator, ScheduledConfig};
use crate::{cfg, projector, verifier};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

/// A flat sequence of distinct-label multicasts among `n` roles, each with a
/// single receiver distinct from the sender. No choice/parallel/recursion —
/// those are covered by the example-based tests elsewhere; this strategy
/// isolates the sequential message-passing core so the generator itself can
/// never accidentally produce a malformed protocol.
fn protocol_strategy() -> impl Strategy<Value = ProtocolDecl> {
    (2usize..=4, 1usize..=6)
        .prop_flat_map(|(role_count, message_count)| {
            let pairs = proptest::collection::vec((0..role_count, 0..role_count), message_count);
            (Just(role_count), pairs)
        })
        .prop_map(|(role_count, pairs)| {
            let mut used = HashSet::new();
            let mut body = Vec::new();
            for (i, (from_idx, to_idx)) in pairs.into_iter().enumerate() {
                let to_idx = if to_idx == from_idx { (to_idx + 1) % role_count } else { to_idx };
                let from = Role::new(format!("R{from_idx}"));
                let to = Role::new(format!("R{to_idx}"));
                used.insert(from_idx);
                used.insert(to_idx);
                body.push(Interaction::Message {
                    from,
                    to: vec![to],
                    message: Message::new(format!("M{i}")),
                    loc: SourceLoc::synthesized(),
                });
            }
            let mut roles: Vec<Role> = used.into_iter().map(|i| Role::new(format!("R{i}"))).collect();
            roles.sort();
            ProtocolDecl::new("Generated", roles, body)
        })
}

proptest! {
    #[test]
    fn projection_preserves_every_message_as_a_dual_send_receive_pair(decl in protocol_strategy()) {
        let mut registry = ProtocolRegistry::empty();
        let original_body = decl.body.clone();
        registry.insert(decl);
        let (cfg, _warnings) = cfg::build("Generated", &registry).expect("flat sequential bodies never fail to build");

        let diagnosis = verifier::verify(&cfg);
        prop_assert!(diagnosis.ok(), "flat distinct-label sequential protocol should never fail P0: {:?}", diagnosis.violations);

        let projections = projector::project_all(&cfg, &registry);

        for interaction in &original_body {
            let Interaction::Message { from, to, message, .. } = interaction else { continue };
            let sender_cfsm = &projections[from].cfsm;
            let has_send = sender_cfsm
                .transitions()
                .any(|(_, _, a)| matches!(a, Action::Send { to: sent_to, message: m, .. } if sent_to == to && m.label == message.label));
            prop_assert!(has_send, "sender `{from}` projection missing send of `{}`", message.label);

            for receiver in to {
                let receiver_cfsm = &projections[receiver].cfsm;
                let has_receive = receiver_cfsm
                    .transitions()
                    .any(|(_, _, a)| matches!(a, Action::Receive { from: f, message: m, .. } if f == from && m.label == message.label));
                prop_assert!(has_receive, "receiver `{receiver}` projection missing receive of `{}`", message.label);
            }
        }
    }

    #[test]
    fn scheduled_runs_of_well_formed_protocols_always_terminate_successfully(decl in protocol_strategy()) {
        let mut registry = ProtocolRegistry::empty();
        registry.insert(decl);
        let (cfg, _warnings) = cfg::build("Generated", &registry).unwrap();
        prop_assert!(verifier::verify(&cfg).ok());

        let projections = projector::project_all(&cfg, &registry);
        let cfsms = projections.into_iter().map(|(r, o)| (r, Arc::new(o.cfsm))).collect();

        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let mut sim = DistributedSimulator::new(cfsms, Arc::new(CfsmRegistry::new()), ScheduledConfig::default());
        let result = rt.block_on(sim.run());
        prop_assert!(result.success, "expected a flat sequential protocol to run to completion: {:?}", result.error);
    }
}
