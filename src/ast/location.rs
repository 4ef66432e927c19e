//! Source locations, threaded from the AST through the CFG into the
//! projected CFSM so diagnostics can always point back at the original text.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct SourceLoc {
    pub line: u32,
    pub column: u32,
}

impl SourceLoc {
    pub fn new(line: u32, column: u32) -> Self {
        SourceLoc { line, column }
    }

    /// A placeholder for synthesized nodes that have no source text (e.g.
    /// merge nodes inserted by the CFG builder).
    pub fn synthesized() -> Self {
        SourceLoc { line: 0, column: 0 }
    }
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == SourceLoc::synthesized() {
            write!(f, "<synthesized>")
        } else {
            write!(f, "{}:{}", self.line, self.column)
        }
    }
}
