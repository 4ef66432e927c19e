//! DOT graph export for [`Fsm`] values.
//!
//! This is a diagnostic text format only — a way for a caller to pipe a
//! machine through `dot -Tsvg` while debugging, not a front-end in its own
//! right.

use super::Fsm;
use std::fmt::{self, Display, Formatter};

/// Wrapper that renders an [`Fsm`] in DOT format via its `Display` impl.
pub struct Dot<'a, R, N, E>(&'a Fsm<R, N, E>);

impl<'a, R, N, E> Dot<'a, R, N, E> {
    /// Creates a new DOT exporter for `fsm`.
    pub fn new(fsm: &'a Fsm<R, N, E>) -> Self {
        Self(fsm)
    }
}

impl<'a, R: Display, N: Display, E: Display> Display for Dot<'a, R, N, E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "digraph \"{}\" {{", self.0.owner())?;
        let (states, transitions) = self.0.size();

        if states > 0 {
            writeln!(f)?;
        }

        for i in self.0.states() {
            let shape = if self.0.is_terminal(i) { "doublecircle" } else { "circle" };
            writeln!(f, "    {} [shape={}, label=\"{}\"];", i.index(), shape, self.0.state(i))?;
        }

        if transitions > 0 {
            writeln!(f)?;
        }

        for (from, to, action) in self.0.transitions() {
            writeln!(f, "    {} -> {} [label=\"{}\"];", from.index(), to.index(), action)?;
        }

        write!(f, "}}")
    }
}
