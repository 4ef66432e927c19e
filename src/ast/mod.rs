//! Protocol abstract syntax tree: the CFG builder's input contract (§3).

pub mod location;
pub mod message;
pub mod module;
pub mod protocol;
pub mod role;

pub use location::SourceLoc;
pub use message::{Message, PayloadType};
pub use module::{Module, ProtocolDecl};
pub use protocol::{Block, Interaction};
pub use role::Role;
