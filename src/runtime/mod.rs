//! The CFSM runtime (§4.4): autonomous per-role simulators communicating
//! over a pluggable FIFO transport, coordinated under either deterministic
//! scheduled stepping or concurrent task-per-role execution.

pub mod coordinator;
pub mod events;
pub mod simulator;
pub mod transport;

pub use coordinator::{DistributedRuntime, DistributedSimulator, RunResult, ScheduledConfig, SchedulingPolicy};
pub use events::{BroadcastSink, Event, EventSink, MetricsSink, NoOpSink, TracingSink};
pub use simulator::{CfsmRegistry, CfsmSimulator, SelectionStrategy, StepOutcome, TraceEntry};
pub use transport::{DeliveryDelay, Envelope, InMemoryTransport, Transport};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Block, Interaction, Message, ProtocolDecl, Role, SourceLoc};
    use crate::cfg;
    use crate::projector;
    use crate::registry::ProtocolRegistry;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn msg(from: &str, to: &str, label: &str) -> Interaction {
        Interaction::Message {
            from: Role::new(from),
            to: vec![Role::new(to)],
            message: Message::new(label),
            loc: SourceLoc::synthesized(),
        }
    }

    #[tokio::test]
    async fn request_response_runs_to_completion_under_scheduling() {
        let body: Block = vec![msg("Client", "Server", "Request"), msg("Server", "Client", "Response")];
        let decl = ProtocolDecl::new("RequestResponse", vec![Role::new("Client"), Role::new("Server")], body);
        let mut registry = ProtocolRegistry::empty();
        registry.insert(decl);
        let (cfg, _) = cfg::build("RequestResponse", &registry).unwrap();

        let projected = projector::project_all(&cfg, &registry);
        let cfsms: HashMap<Role, Arc<crate::cfsm::Cfsm>> =
            projected.into_iter().map(|(r, o)| (r, Arc::new(o.cfsm))).collect();

        let mut sim = DistributedSimulator::new(cfsms, Arc::new(CfsmRegistry::new()), ScheduledConfig::default());
        let result = sim.run().await;
        assert!(result.success, "{:?}", result.error);
    }
}
