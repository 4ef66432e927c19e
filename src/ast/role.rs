//! Roles (participants) in a protocol.

use std::fmt;

/// A named participant in a protocol.
///
/// Dynamic roles introduced by `new role` / `creates` (DMst, §3) are
/// ordinary `Role` values minted at build or run time — they need not
/// appear among a protocol's formal parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Role(pub String);

impl Role {
    pub fn new(name: impl Into<String>) -> Self {
        Role(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A fresh instance name for a dynamic role created at runtime, e.g.
    /// `Worker` creating `wN` yields `Worker#3`.
    pub fn instance(base: &str, n: usize) -> Self {
        Role(format!("{base}#{n}"))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Role {
    fn from(s: &str) -> Self {
        Role(s.to_string())
    }
}

impl From<String> for Role {
    fn from(s: String) -> Self {
        Role(s)
    }
}
