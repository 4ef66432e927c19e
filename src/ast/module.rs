//! Protocol declarations and modules (§3, "Protocol AST (input contract)").

use super::protocol::Block;
use super::role::Role;

/// A single `protocol Name(roles..) { body }` declaration.
#[derive(Debug, Clone)]
pub struct ProtocolDecl {
    pub name: String,
    /// Ordered formal role parameters.
    pub roles: Vec<Role>,
    /// Optional type/signature parameters (kept as opaque names; the core
    /// does not typecheck payloads against them).
    pub type_params: Vec<String>,
    pub body: Block,
}

impl ProtocolDecl {
    pub fn new(name: impl Into<String>, roles: Vec<Role>, body: Block) -> Self {
        ProtocolDecl { name: name.into(), roles, type_params: Vec::new(), body }
    }

    pub fn has_role(&self, role: &Role) -> bool {
        self.roles.contains(role)
    }
}

/// A module: one or more protocol declarations, as produced by an external
/// parser. Owned by the caller and read-only from here on (§3 ownership).
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub protocols: Vec<ProtocolDecl>,
}

impl Module {
    pub fn new(protocols: Vec<ProtocolDecl>) -> Self {
        Module { protocols }
    }

    pub fn protocol(&self, name: &str) -> Option<&ProtocolDecl> {
        self.protocols.iter().find(|p| p.name == name)
    }
}
