//! `scribble-dmst`: control-flow graph construction, verification,
//! projection and CFSM execution for the Scribble-2.0 / DMst multiparty
//! session type dialect (Castro-Perez & Yoshida, ECOOP 2023).
//!
//! The pipeline is a strict sequence of pure stages:
//! a [`registry::ProtocolRegistry`] of [`ast`] declarations is lowered by
//! [`cfg::build`] into a [`cfg::Cfg`]; [`verifier::verify`] checks that CFG
//! for the structural and behavioral properties of §5; [`projector::project`]
//! turns a verified CFG into one [`cfsm::Cfsm`] per role; and the
//! [`runtime`] module executes a set of projected machines against each
//! other over a pluggable [`runtime::Transport`].

pub mod ast;
pub mod cfg;
pub mod cfsm;
pub mod error;
pub mod projector;
pub mod registry;
pub mod runtime;
pub mod verifier;

pub use cfg::Cfg;
pub use cfsm::Cfsm;
pub use error::{InvalidAst, ProjectionError, RuntimeError, StepBlocked};
pub use registry::ProtocolRegistry;
pub use verifier::{Diagnosis, Priority, Violation};

#[cfg(test)]
mod proptests;
