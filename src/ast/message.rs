//! Structured message and payload types.
//!
//! Payloads are kept as a recursive type tree rather than flattened to a
//! string, so that `Map<String, List<User>>` survives verbatim through the
//! CFG, the projector and into the CFSM (§3, "Message structure is
//! preserved verbatim").

use std::fmt;

/// A payload type: either a simple named type or a parametric type applied
/// to further (recursive) payload types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PayloadType {
    Named(String),
    Parametric { name: String, args: Vec<PayloadType> },
}

impl fmt::Display for PayloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadType::Named(name) => write!(f, "{name}"),
            PayloadType::Parametric { name, args } => {
                write!(f, "{name}<")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ">")
            }
        }
    }
}

/// A label plus an optional payload type: `Request(String)` or bare `Go`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Message {
    pub label: String,
    pub payload: Option<PayloadType>,
}

impl Message {
    pub fn new(label: impl Into<String>) -> Self {
        Message { label: label.into(), payload: None }
    }

    pub fn with_payload(label: impl Into<String>, payload: PayloadType) -> Self {
        Message { label: label.into(), payload: Some(payload) }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            Some(p) => write!(f, "{}({})", self.label, p),
            None => write!(f, "{}", self.label),
        }
    }
}
