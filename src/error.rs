//! Error taxonomy (§7).
//!
//! Structural errors halt CFG construction outright; verification and
//! projection issues are collected as values instead of raised, per the
//! propagation policy in §7. Only the genuinely fatal, caller-facing classes
//! (`InvalidAst`, `ProjectionError`, `RuntimeError`) are `std::error::Error`
//! types here.

use crate::ast::SourceLoc;
use thiserror::Error;

/// Failures of the CFG builder (§4.1): the AST is malformed beyond local
/// recovery and construction halts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvalidAst {
    #[error("`continue {label}` at {loc} references a label not in lexical scope")]
    UnboundContinueLabel { label: String, loc: SourceLoc },

    #[error("`do {protocol}` at {loc} references an unknown protocol")]
    UnknownProtocol { protocol: String, loc: SourceLoc },

    #[error("protocol `{0}` is not declared in this module")]
    UnknownRootProtocol(String),

    #[error("choice at {loc} has no branches")]
    EmptyChoice { loc: SourceLoc },

    #[error("parallel composition at {loc} has no branches")]
    EmptyParallel { loc: SourceLoc },
}

/// Errors raised by the projector on its preconditions (§4.3, §7). Semantic
/// issues are instead returned as a list alongside a best-effort partial
/// CFSM — see [`crate::projector::ProjectionOutcome`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProjectionError {
    #[error("role `{0}` is not a participant of this protocol")]
    RoleNotFound(String),

    #[error("protocol `{0}` is not registered")]
    ProtocolNotFound(String),

    #[error("projection of node {node} is not well-formed: {reason}")]
    InvalidProjection { node: usize, reason: String },

    #[error("choice branches for role `{role}` could not be merged at {loc}")]
    MergeConflict { role: String, loc: SourceLoc },

    #[error("external choice at {loc} is ambiguous for role `{role}`")]
    ChoiceInconsistency { role: String, loc: SourceLoc },

    #[error("parallel branches conflict for role `{role}` at {loc}")]
    ParallelConflict { role: String, loc: SourceLoc },
}

/// Fatal runtime errors (§4.4, §7): surfaced as the run's final error and
/// also emitted as a `fatal-error`/`deadlock` event.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("deadlock: roles {roles:?} are blocked with no messages in flight")]
    Deadlock { roles: Vec<String> },

    #[error("FIFO violation on channel {from} -> {to}")]
    FifoViolation { from: String, to: String },

    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("unknown sub-protocol `{0}` requested at runtime")]
    UnknownSubprotocol(String),

    #[error("step limit of {0} exceeded")]
    MaxStepsExceeded(usize),

    #[error("run cancelled")]
    Cancelled,

    #[error("run timed out after {0:?}")]
    TimedOut(std::time::Duration),
}

/// Non-fatal, recoverable step outcomes (§7) — not `Error` impls, just
/// reasons a `step()` call did not advance the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepBlocked {
    MessageNotReady,
    ChoiceRequired(Vec<usize>),
}
