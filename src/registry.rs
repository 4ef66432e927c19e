//! The protocol registry (§6): a read-mostly `name -> declaration` table
//! consulted by the CFG builder, the projector and the runtime whenever they
//! encounter a `do` / sub-protocol call.

use crate::ast::{Module, ProtocolDecl};
use std::collections::HashMap;

/// Constructed once per module. Cheap to clone (an `Arc` internally would be
/// the production move; the reference implementation keeps it simple since
/// a `ProtocolRegistry` is read-only after construction and never mutated
/// concurrently with use, per §5).
#[derive(Debug, Clone, Default)]
pub struct ProtocolRegistry {
    protocols: HashMap<String, ProtocolDecl>,
}

impl ProtocolRegistry {
    /// An empty registry, for tests that only need a single protocol with no
    /// sub-protocol calls.
    pub fn empty() -> Self {
        ProtocolRegistry { protocols: HashMap::new() }
    }

    pub fn from_module(module: &Module) -> Self {
        let protocols = module
            .protocols
            .iter()
            .map(|p| (p.name.clone(), p.clone()))
            .collect();
        ProtocolRegistry { protocols }
    }

    pub fn get(&self, name: &str) -> Option<&ProtocolDecl> {
        self.protocols.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.protocols.contains_key(name)
    }

    pub fn insert(&mut self, decl: ProtocolDecl) {
        self.protocols.insert(decl.name.clone(), decl);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.protocols.keys().map(String::as_str)
    }
}
