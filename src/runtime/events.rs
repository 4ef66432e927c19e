//! The observer-pattern event bus (§4.4.1, §9 "prefer composition to
//! inheritance for cross-cutting concerns" — the same shape as the
//! teacher's `Trace`/`Metrics` handler wrappers, just applied to runtime
//! events instead of choreography effects).

use crate::ast::Role;
use crate::cfsm::Action;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One observable occurrence during a simulation run (§4.4.1).
#[derive(Debug, Clone)]
pub enum Event {
    StepStart { role: Role, step: u64 },
    StepEnd { role: Role, step: u64 },
    TransitionFired { role: Role, action: String },
    Send { role: Role, to: Role },
    Receive { role: Role, from: Role },
    Tau { role: Role },
    Choice { role: Role, branch: String },
    StepInto { role: Role, protocol: String },
    StepOut { role: Role, protocol: String },
    Complete { role: Role },
    Blocked { role: Role },
    Deadlock { roles: Vec<Role> },
    Error { role: Role, message: String },
    FatalError { message: String },
    ChoiceRequired { role: Role, options: Vec<usize> },
}

impl Event {
    pub fn from_action(role: &Role, action: &Action) -> Self {
        match action {
            Action::Send { to, .. } => Event::Send { role: role.clone(), to: to.first().cloned().unwrap_or_else(|| role.clone()) },
            Action::Receive { from, .. } => Event::Receive { role: role.clone(), from: from.clone() },
            Action::Tau | Action::UpdateMarker => Event::Tau { role: role.clone() },
            Action::Choice { branch } => Event::Choice { role: role.clone(), branch: branch.clone() },
            Action::SubprotocolCall { protocol, .. } => Event::StepInto { role: role.clone(), protocol: protocol.clone() },
            Action::Create { .. } | Action::Invite { .. } => Event::Tau { role: role.clone() },
        }
    }
}

/// A sink that observes runtime events. Mirrors the teacher's
/// `ChoreoHandler`-wrapper shape: implementations compose (a tracing sink
/// wrapping a counting sink) rather than subclass.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: Event);
}

/// Discards every event — the default for simulators built without tracing.
pub struct NoOpSink;

#[async_trait]
impl EventSink for NoOpSink {
    async fn emit(&self, _event: Event) {}
}

/// Logs every event at `trace` level through `tracing`, the way the
/// teacher's `Trace<H>` middleware instruments every `ChoreoHandler` call.
pub struct TracingSink {
    prefix: String,
}

impl TracingSink {
    pub fn new(prefix: impl Into<String>) -> Self {
        TracingSink { prefix: prefix.into() }
    }
}

#[async_trait]
impl EventSink for TracingSink {
    async fn emit(&self, event: Event) {
        tracing::trace!(prefix = %self.prefix, ?event, "runtime event");
    }
}

/// Counts send/receive/error events, mirroring the teacher's `Metrics<H>`.
#[derive(Default)]
pub struct MetricsSink {
    pub send_count: AtomicU64,
    pub receive_count: AtomicU64,
    pub error_count: AtomicU64,
}

#[async_trait]
impl EventSink for MetricsSink {
    async fn emit(&self, event: Event) {
        match event {
            Event::Send { .. } => {
                self.send_count.fetch_add(1, Ordering::Relaxed);
            }
            Event::Receive { .. } => {
                self.receive_count.fetch_add(1, Ordering::Relaxed);
            }
            Event::Error { .. } | Event::FatalError { .. } => {
                self.error_count.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }
}

/// Fans one event out to every sink in the list — how a caller combines
/// tracing and metrics without either sink knowing about the other.
pub struct BroadcastSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl BroadcastSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        BroadcastSink { sinks }
    }
}

#[async_trait]
impl EventSink for BroadcastSink {
    async fn emit(&self, event: Event) {
        for sink in &self.sinks {
            sink.emit(event.clone()).await;
        }
    }
}
