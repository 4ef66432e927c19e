//! Parses real surface syntax all the way through to verified,
//! projected CFSMs and rendered local-Scribble text — a pipeline-level
//! complement to `parser.rs`'s inline grammar unit tests.

use scribble_dmst::ast::Role;
use scribble_dmst::registry::ProtocolRegistry;
use scribble_dmst::{cfg, projector, verifier};
use scribble_dmst_choreography::{parse_module, render};

#[test]
fn request_response_source_parses_verifies_and_projects() {
    let src = r#"
        protocol RequestResponse(Client, Server) {
            Client -> Server: Request(String);
            Server -> Client: Response(String);
        }
    "#;
    let module = parse_module(src).unwrap();
    let registry = ProtocolRegistry::from_module(&module);
    let (cfg, warnings) = cfg::build("RequestResponse", &registry).unwrap();
    assert!(warnings.is_empty());

    let diagnosis = verifier::verify(&cfg);
    assert!(diagnosis.ok(), "{:?}", diagnosis.violations);

    let projections = projector::project_all(&cfg, &registry);
    let client = &projections[&Role::new("Client")];
    assert!(client.errors.is_empty());

    let rendered = render(&client.cfsm);
    assert!(rendered.contains("Server"));
}

#[test]
fn updatable_recursion_source_parses_and_verifies() {
    let src = r#"
        protocol Pool(Manager, Worker) {
            rec Loop {
                Manager -> Worker: Task;
                Worker -> Manager: Result;
                choice at Manager {
                    continue Loop with {
                        new role Worker2;
                        Manager creates Worker2;
                        Manager invites Worker2;
                        Manager -> Worker2: Task;
                        Worker2 -> Manager: Result;
                    };
                } or {
                    Manager -> Worker: Done;
                }
            }
        }
    "#;
    let module = parse_module(src).unwrap();
    let registry = ProtocolRegistry::from_module(&module);
    let (cfg, _) = cfg::build("Pool", &registry).unwrap();

    let diagnosis = verifier::verify(&cfg);
    assert!(diagnosis.ok(), "{:?}", diagnosis.violations);
}

#[test]
fn malformed_source_is_rejected_before_any_later_stage() {
    let src = "protocol Broken(A { A -> : Hi; }";
    assert!(parse_module(src).is_err());
}

#[test]
fn subprotocol_reference_is_lowered_into_a_do_interaction() {
    let src = r#"
        protocol Sub(X, Y) {
            X -> Y: Hello;
        }

        protocol Main(A, B) {
            A -> B: Go;
            do Sub(A, B);
        }
    "#;
    let module = parse_module(src).unwrap();
    assert_eq!(module.protocols.len(), 2);

    let registry = ProtocolRegistry::from_module(&module);
    let (cfg, _) = cfg::build("Main", &registry).unwrap();
    assert!(verifier::verify(&cfg).ok());
}
