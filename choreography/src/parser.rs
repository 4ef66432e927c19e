//! Textual-DSL to [`ast::Module`] parser (§6 "AST boundary (consumer)").
//!
//! The core crate never sees pest; this module's only job is lowering a
//! `Pairs` tree into the plain `ast` types it accepts.

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use scribble_dmst::ast::{Block, Interaction, Message, Module, PayloadType, ProtocolDecl, Role, SourceLoc};
use thiserror::Error;

#[derive(Parser)]
#[grammar = "grammar.pest"]
struct ProtocolParser;

#[derive(Debug, Error)]
#[error("parse error: {0}")]
pub struct ParseError(String);

impl From<pest::error::Error<Rule>> for ParseError {
    fn from(e: pest::error::Error<Rule>) -> Self {
        ParseError(e.to_string())
    }
}

/// Parses a full module of `protocol` declarations from source text.
pub fn parse_module(source: &str) -> Result<Module, ParseError> {
    let mut pairs = ProtocolParser::parse(Rule::module, source)?;
    let module_pair = pairs.next().expect("module rule always matches SOI..EOI");

    let mut protocols = Vec::new();
    for pair in module_pair.into_inner() {
        if pair.as_rule() == Rule::protocol_decl {
            protocols.push(lower_protocol(pair));
        }
    }
    Ok(Module::new(protocols))
}

fn loc_of(pair: &Pair<Rule>) -> SourceLoc {
    let (line, column) = pair.as_span().start_pos().line_col();
    SourceLoc::new(line as u32, column as u32)
}

fn lower_protocol(pair: Pair<Rule>) -> ProtocolDecl {
    let mut inner = pair.into_inner();
    let name = inner.next().expect("protocol_decl always names itself").as_str().to_string();

    let mut type_params = Vec::new();
    let mut roles = Vec::new();
    let mut block = Vec::new();

    for item in inner {
        match item.as_rule() {
            Rule::type_params => type_params = item.into_inner().map(|p| p.as_str().to_string()).collect(),
            Rule::role_list => roles = item.into_inner().map(|p| Role::new(p.as_str())).collect(),
            Rule::block => block = lower_block(item),
            _ => unreachable!("protocol_decl has no other children"),
        }
    }

    let mut decl = ProtocolDecl::new(name, roles, block);
    decl.type_params = type_params;
    decl
}

fn lower_block(pair: Pair<Rule>) -> Block {
    pair.into_inner().map(lower_interaction).collect()
}

fn role_list_of(pair: Pair<Rule>) -> Vec<Role> {
    pair.into_inner().map(|p| Role::new(p.as_str())).collect()
}

fn lower_interaction(pair: Pair<Rule>) -> Interaction {
    let loc = loc_of(&pair);
    let rule = pair.as_rule();
    let mut inner = pair.into_inner();

    match rule {
        Rule::message_stmt => {
            let from = Role::new(inner.next().unwrap().as_str());
            let to = role_list_of(inner.next().unwrap());
            let message = lower_message(inner.next().unwrap());
            Interaction::Message { from, to, message, loc }
        }
        Rule::choice_stmt => {
            let at = Role::new(inner.next().unwrap().as_str());
            let branches = inner.map(lower_block).collect();
            Interaction::Choice { at, branches, loc }
        }
        Rule::par_stmt => {
            let branches = inner.map(lower_block).collect();
            Interaction::Parallel { branches, loc }
        }
        Rule::rec_stmt => {
            let label = inner.next().unwrap().as_str().to_string();
            let body = lower_block(inner.next().unwrap());
            Interaction::Recursion { label, body, loc }
        }
        Rule::continue_stmt => {
            let label = inner.next().unwrap().as_str().to_string();
            Interaction::Continue { label, loc }
        }
        Rule::updatable_continue_stmt => {
            let label = inner.next().unwrap().as_str().to_string();
            let update = lower_block(inner.next().unwrap());
            Interaction::UpdatableContinue { label, update, loc }
        }
        Rule::do_stmt => {
            let protocol = inner.next().unwrap().as_str().to_string();
            let args = inner.next().map(role_list_of).unwrap_or_default();
            Interaction::Do { protocol, args, loc }
        }
        Rule::new_role_stmt => {
            let role = Role::new(inner.next().unwrap().as_str());
            Interaction::NewRole { role, loc }
        }
        Rule::creates_stmt => {
            let parent = Role::new(inner.next().unwrap().as_str());
            let role = Role::new(inner.next().unwrap().as_str());
            Interaction::Creates { parent, role, loc }
        }
        Rule::invites_stmt => {
            let from = Role::new(inner.next().unwrap().as_str());
            let to = Role::new(inner.next().unwrap().as_str());
            Interaction::Invites { from, to, loc }
        }
        _ => unreachable!("interaction alternatives are exhaustive"),
    }
}

fn lower_message(pair: Pair<Rule>) -> Message {
    let mut inner = pair.into_inner();
    let label = inner.next().unwrap().as_str().to_string();
    match inner.next() {
        Some(p) => Message::with_payload(label, lower_payload_type(p)),
        None => Message::new(label),
    }
}

fn lower_payload_type(pair: Pair<Rule>) -> PayloadType {
    let mut inner = pair.into_inner();
    let name = inner.next().unwrap().as_str().to_string();
    let args: Vec<PayloadType> = inner.map(lower_payload_type).collect();
    if args.is_empty() {
        PayloadType::Named(name)
    } else {
        PayloadType::Parametric { name, args }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_request_response() {
        let src = r#"
            protocol RequestResponse(Client, Server) {
                Client -> Server: Request(String);
                Server -> Client: Response(String);
            }
        "#;
        let module = parse_module(src).unwrap();
        assert_eq!(module.protocols.len(), 1);
        let decl = &module.protocols[0];
        assert_eq!(decl.name, "RequestResponse");
        assert_eq!(decl.roles, vec![Role::new("Client"), Role::new("Server")]);
        assert_eq!(decl.body.len(), 2);
    }

    #[test]
    fn parses_choice_and_recursion() {
        let src = r#"
            protocol Stream(Producer, Consumer) {
                rec Loop {
                    choice at Producer {
                        Producer -> Consumer: Item(Int);
                        continue Loop;
                    } or {
                        Producer -> Consumer: Done;
                    }
                }
            }
        "#;
        let module = parse_module(src).unwrap();
        assert_eq!(module.protocols[0].body.len(), 1);
    }

    #[test]
    fn parses_dmst_constructs() {
        let src = r#"
            protocol Pool(Coordinator) {
                new role Worker;
                Coordinator creates Worker;
                Coordinator invites Worker;
            }
        "#;
        let module = parse_module(src).unwrap();
        assert_eq!(module.protocols[0].body.len(), 3);
    }

    #[test]
    fn rejects_malformed_source() {
        let src = "protocol Broken(A { A -> : Hi; }";
        assert!(parse_module(src).is_err());
    }
}
