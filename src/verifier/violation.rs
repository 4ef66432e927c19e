//! Violation taxonomy (§5) and the verifier's overall verdict.

use crate::ast::{Role, SourceLoc};
use mpst_fsm::NodeIndex;
use std::fmt;

/// Severity tier (§5): `Priority0` aborts projection outright, the rest are
/// reported but do not by themselves stop a caller from inspecting the CFG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    P0,
    P1,
    P2,
    P3,
}

/// One failed structural or behavioral check against a [`crate::cfg::Cfg`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// A role declared on the protocol never appears in any action (§5.1).
    OrphanRole { role: Role },

    /// Two branches of a choice disagree on which role decides it, or the
    /// decider does not originate the first action of every branch (§5.1).
    NonDeterministicChoice { branch_node: NodeIndex, decider: Role },

    /// A role not involved in a choice observes branches whose continuations
    /// cannot be merged into a single next action for it (§5.1, Theorem-style
    /// mergeability).
    UnmergeableChoice { branch_node: NodeIndex, role: Role, loc: SourceLoc },

    /// A `continue` targets a label that is not a lexical ancestor — should
    /// be unreachable since the builder already rejects this, kept as a
    /// defense-in-depth structural re-check.
    DanglingContinue { node: NodeIndex },

    /// A `continue` edge's path back to its recursion crosses a `fork`
    /// without a matching `join` (§5.1, Priority-1).
    ContinueCrossesParallel { node: NodeIndex, recursive_node: NodeIndex },

    /// A `fork`/`join` pair's branches send to or receive from overlapping
    /// targets, making the parallel composition ambiguous (§5.1).
    MalformedParallel { fork_node: NodeIndex, role: Role },

    /// Two actions reachable without ordering between them use the same
    /// channel (ordered role pair), violating FIFO-race-freedom (Theorem 4.5,
    /// Deniélou & Yoshida 2012).
    Race { first: NodeIndex, second: NodeIndex, from: Role, to: Role },

    /// An action's sender is also one of its receivers.
    SelfCommunication { node: NodeIndex, role: Role },

    /// A multicast payload/label disagreement across receivers of the same
    /// action.
    MulticastInvalid { node: NodeIndex, reason: String },

    /// A choice branch is structurally empty (§4.1 builder note).
    EmptyChoiceBranch { branch_node: NodeIndex },

    /// A `merge` node is not reachable from its `branch` node by every
    /// declared branch (a branch never rejoins).
    UnreachedMerge { merge_node: NodeIndex },

    /// Tarjan SCC analysis found a non-trivial strongly connected component
    /// with no exit edge — the protocol can spin forever with no participant
    /// able to finish (Theorem 5.10, Honda et al.).
    Deadlock { cycle: Vec<NodeIndex> },

    /// A role has a reachable state with no enabled transition although the
    /// protocol as a whole has not terminated.
    Liveness { role: Role, node: NodeIndex },

    /// The 1-unfolding `B ♢ U` (Definition 14, DMst) of an `updatable`
    /// continue is unsafe: either the update body `U` shares a channel with
    /// the recursion body `B` it replaces, or re-running the full verifier
    /// on the combined one-iteration CFG turned up violations of its own
    /// (`wrapped`).
    UnsafeUpdate { updatable_node: NodeIndex, shared_channels: Vec<(Role, Role)>, wrapped: Vec<Violation> },
}

impl Violation {
    pub fn priority(&self) -> Priority {
        match self {
            // §4.2 Priority-0 — projection-blocking.
            Violation::OrphanRole { .. }
            | Violation::NonDeterministicChoice { .. }
            | Violation::UnmergeableChoice { .. }
            | Violation::UnsafeUpdate { .. } => Priority::P0,

            // §4.2 Priority-1 — well-formedness.
            Violation::DanglingContinue { .. }
            | Violation::ContinueCrossesParallel { .. }
            | Violation::MalformedParallel { .. } => Priority::P1,

            // §4.2 Priority-2 — additional correctness.
            Violation::Race { .. }
            | Violation::SelfCommunication { .. }
            | Violation::MulticastInvalid { .. }
            | Violation::EmptyChoiceBranch { .. } => Priority::P2,

            // §4.2 Priority-3 — structural.
            Violation::UnreachedMerge { .. } | Violation::Deadlock { .. } | Violation::Liveness { .. } => {
                Priority::P3
            }
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::OrphanRole { role } => write!(f, "role `{role}` never participates in any action"),
            Violation::NonDeterministicChoice { branch_node, decider } => {
                write!(f, "choice at node {} is not deterministic for decider `{decider}`", branch_node.index())
            }
            Violation::UnmergeableChoice { branch_node, role, loc } => write!(
                f,
                "choice at node {} ({loc}) cannot be merged into a single continuation for role `{role}`",
                branch_node.index()
            ),
            Violation::DanglingContinue { node } => write!(f, "continue at node {} is dangling", node.index()),
            Violation::ContinueCrossesParallel { node, recursive_node } => write!(
                f,
                "continue at node {} crosses an unmatched fork on its way back to node {}",
                node.index(),
                recursive_node.index()
            ),
            Violation::MalformedParallel { fork_node, role } => write!(
                f,
                "parallel composition at node {} has conflicting branch targets for role `{role}`",
                fork_node.index()
            ),
            Violation::Race { first, second, from, to } => write!(
                f,
                "race on channel {from}->{to}: nodes {} and {} are unordered",
                first.index(),
                second.index()
            ),
            Violation::SelfCommunication { node, role } => {
                write!(f, "node {} has `{role}` sending to itself", node.index())
            }
            Violation::MulticastInvalid { node, reason } => {
                write!(f, "multicast at node {} is invalid: {reason}", node.index())
            }
            Violation::EmptyChoiceBranch { branch_node } => {
                write!(f, "choice at node {} has an empty branch", branch_node.index())
            }
            Violation::UnreachedMerge { merge_node } => {
                write!(f, "merge at node {} is not reachable from every branch", merge_node.index())
            }
            Violation::Deadlock { cycle } => write!(
                f,
                "deadlock cycle through nodes {:?}",
                cycle.iter().map(|n| n.index()).collect::<Vec<_>>()
            ),
            Violation::Liveness { role, node } => {
                write!(f, "role `{role}` is stuck at node {} before the protocol terminates", node.index())
            }
            Violation::UnsafeUpdate { updatable_node, shared_channels, wrapped } => {
                write!(f, "updatable continue at node {} is unsafe", updatable_node.index())?;
                if !shared_channels.is_empty() {
                    write!(
                        f,
                        ": channel(s) {} shared between the old and new body",
                        shared_channels.iter().map(|(a, b)| format!("{a}->{b}")).collect::<Vec<_>>().join(", ")
                    )?;
                }
                if !wrapped.is_empty() {
                    write!(f, ": the 1-unfolded CFG has {} violation(s) of its own", wrapped.len())?;
                }
                Ok(())
            }
        }
    }
}

/// The verifier's verdict: `ok` iff no `Priority0` violation was found.
/// Lower-priority violations are still reported for the caller to act on.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Diagnosis {
    pub violations: Vec<Violation>,
}

impl Diagnosis {
    pub fn ok(&self) -> bool {
        !self.violations.iter().any(|v| v.priority() == Priority::P0)
    }

    pub fn has(&self, priority: Priority) -> bool {
        self.violations.iter().any(|v| v.priority() == priority)
    }

    pub fn push(&mut self, violation: Violation) {
        self.violations.push(violation);
    }

    pub fn extend(&mut self, other: impl IntoIterator<Item = Violation>) {
        self.violations.extend(other);
    }
}
