//! The interaction grammar (§3): the body of a protocol declaration.
//!
//! Unlike a linked-list-of-continuations AST (where every node embeds its
//! own "rest of the protocol"), sequencing here is a flat [`Block`] — a
//! protocol body is an ordered list of interactions, and the CFG builder's
//! `sequence I1; I2` rule joins consecutive block entries directly. This
//! mirrors how choice/parallel branches are themselves just blocks, and
//! keeps `continue`/`do` from needing to carry a dangling continuation.

use super::location::SourceLoc;
use super::message::Message;
use super::role::Role;

/// An ordered sequence of interactions.
pub type Block = Vec<Interaction>;

#[derive(Debug, Clone)]
pub enum Interaction {
    /// `p -> q1, .., qn: m` — atomic multicast, never unrolled into N sends.
    Message {
        from: Role,
        to: Vec<Role>,
        message: Message,
        loc: SourceLoc,
    },

    /// `choice at p { B1 } or .. or { Bn }`
    Choice { at: Role, branches: Vec<Block>, loc: SourceLoc },

    /// `par { B1 } and .. and { Bn }`
    Parallel { branches: Vec<Block>, loc: SourceLoc },

    /// `rec L { B }`
    Recursion { label: String, body: Block, loc: SourceLoc },

    /// `continue L`
    Continue { label: String, loc: SourceLoc },

    /// `do P(r~)` / `p calls P(r~)` — uniform representation (§3).
    Do { protocol: String, args: Vec<Role>, loc: SourceLoc },

    /// DMst: `new role r`
    NewRole { role: Role, loc: SourceLoc },

    /// DMst: `p creates r`
    Creates { parent: Role, role: Role, loc: SourceLoc },

    /// DMst: `p invites q`
    Invites { from: Role, to: Role, loc: SourceLoc },

    /// DMst: `continue L with { U }` — updatable recursion continue.
    UpdatableContinue { label: String, update: Block, loc: SourceLoc },
}

impl Interaction {
    pub fn loc(&self) -> SourceLoc {
        match self {
            Interaction::Message { loc, .. }
            | Interaction::Choice { loc, .. }
            | Interaction::Parallel { loc, .. }
            | Interaction::Recursion { loc, .. }
            | Interaction::Continue { loc, .. }
            | Interaction::Do { loc, .. }
            | Interaction::NewRole { loc, .. }
            | Interaction::Creates { loc, .. }
            | Interaction::Invites { loc, .. }
            | Interaction::UpdatableContinue { loc, .. } => *loc,
        }
    }

    /// All roles textually mentioned by this interaction and its nested
    /// blocks (used by connectedness checking and by the `do`-call role
    /// substitution).
    pub fn mentions_role(&self, role: &Role) -> bool {
        match self {
            Interaction::Message { from, to, .. } => from == role || to.contains(role),
            Interaction::Choice { at, branches, .. } => {
                at == role || branches.iter().any(|b| block_mentions_role(b, role))
            }
            Interaction::Parallel { branches, .. } => {
                branches.iter().any(|b| block_mentions_role(b, role))
            }
            Interaction::Recursion { body, .. } => block_mentions_role(body, role),
            Interaction::Continue { .. } => false,
            Interaction::Do { args, .. } => args.contains(role),
            Interaction::NewRole { role: r, .. } => r == role,
            Interaction::Creates { parent, role: r, .. } => parent == role || r == role,
            Interaction::Invites { from, to, .. } => from == role || to == role,
            Interaction::UpdatableContinue { update, .. } => block_mentions_role(update, role),
        }
    }
}

pub fn block_mentions_role(block: &Block, role: &Role) -> bool {
    block.iter().any(|i| i.mentions_role(role))
}
