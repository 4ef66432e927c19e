//! The single-role simulator (§4.4.1): an autonomous state machine that
//! advances its own CFSM against a shared [`Transport`], maintaining a call
//! stack for sub-protocol frames exactly as Rule [CALL]/[RETURN] describe.

use super::events::{Event, EventSink};
use super::transport::{Envelope, Transport};
use crate::ast::Role;
use crate::cfsm::{Action, Cfsm};
use crate::error::{RuntimeError, StepBlocked};
use mpst_fsm::NodeIndex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// How a simulator breaks ties when more than one transition is enabled
/// from the current state (§4.4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionStrategy {
    First,
    RoundRobin,
    Random,
    Manual,
}

/// A suspended sub-protocol call (§3 "Runtime state").
struct Frame {
    parent_cfsm: Arc<Cfsm>,
    return_state: NodeIndex,
    protocol_name: String,
}

/// One fired transition, recorded for replay and debugging.
#[derive(Debug, Clone)]
pub struct TraceEntry {
    pub step: u64,
    pub from_state: NodeIndex,
    pub to_state: NodeIndex,
    pub action: String,
}

/// The outcome of one `step()` call.
#[derive(Debug)]
pub struct StepOutcome {
    pub success: bool,
    pub action: Option<Action>,
    pub blocked: Option<StepBlocked>,
}

/// A registry of pre-projected sub-protocol machines, keyed by protocol
/// name then by the sub-protocol's own *formal* role — the call-stack rule
/// substitutes the actual role only at call time (§4.3 "role substitution").
pub type CfsmRegistry = HashMap<String, HashMap<Role, Arc<Cfsm>>>;

pub struct CfsmSimulator {
    role: Role,
    current_cfsm: Arc<Cfsm>,
    current_state: NodeIndex,
    call_stack: Vec<Frame>,
    transport: Arc<dyn Transport>,
    cfsm_registry: Arc<CfsmRegistry>,
    step_count: u64,
    round_robin_cursor: AtomicU64,
    trace: Vec<TraceEntry>,
    pending_choice: Option<usize>,
    strategy: SelectionStrategy,
    events: Arc<dyn EventSink>,
    completed: bool,
}

impl CfsmSimulator {
    pub fn new(
        role: Role,
        cfsm: Arc<Cfsm>,
        transport: Arc<dyn Transport>,
        cfsm_registry: Arc<CfsmRegistry>,
        strategy: SelectionStrategy,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let current_state = cfsm.initial().expect("a projected CFSM always has an initial state");
        CfsmSimulator {
            role,
            current_cfsm: cfsm,
            current_state,
            call_stack: Vec::new(),
            transport,
            cfsm_registry,
            step_count: 0,
            round_robin_cursor: AtomicU64::new(0),
            trace: Vec::new(),
            pending_choice: None,
            strategy,
            events,
            completed: false,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed
    }

    pub fn state(&self) -> NodeIndex {
        self.current_state
    }

    pub fn trace(&self) -> &[TraceEntry] {
        &self.trace
    }

    pub fn select_transition(&mut self, index: usize) {
        self.pending_choice = Some(index);
    }

    /// Advances the simulator by exactly one unit, per the Rule [RETURN] /
    /// enabled-transition / Rule [CALL] sequence in §4.4.1.
    pub async fn step(&mut self) -> StepOutcome {
        tracing::debug!(role = %self.role, step = self.step_count, state = ?self.current_state, "step start");
        self.events.emit(Event::StepStart { role: self.role.clone(), step: self.step_count }).await;

        if self.current_cfsm.is_terminal(self.current_state) {
            if let Some(frame) = self.call_stack.pop() {
                let protocol_name = frame.protocol_name.clone();
                self.current_cfsm = frame.parent_cfsm;
                self.current_state = frame.return_state;
                self.events.emit(Event::StepOut { role: self.role.clone(), protocol: protocol_name }).await;
                return StepOutcome { success: true, action: None, blocked: None };
            }
            self.completed = true;
            self.events.emit(Event::Complete { role: self.role.clone() }).await;
            return StepOutcome { success: true, action: None, blocked: None };
        }

        let candidates: Vec<(NodeIndex, Action)> =
            self.current_cfsm.outgoing(self.current_state).map(|(n, a)| (n, a.clone())).collect();

        let mut enabled: Vec<(NodeIndex, Action)> = Vec::new();
        let mut has_receive = false;
        for (target, action) in &candidates {
            match action {
                Action::Receive { from, message, .. } => {
                    has_receive = true;
                    // §4.4.1 step 2(b): enabled iff the head-of-queue envelope
                    // from `from` also carries this transition's label — an
                    // external-choice state can have several `receive{from}`
                    // edges from the same sender with different labels, and
                    // sender-match alone can't tell them apart.
                    if self.transport.peek_label(from, &self.role).as_deref() == Some(message.label.as_str()) {
                        enabled.push((*target, action.clone()));
                    }
                }
                _ => enabled.push((*target, action.clone())),
            }
        }

        if enabled.is_empty() {
            if has_receive {
                self.events.emit(Event::Blocked { role: self.role.clone() }).await;
                return StepOutcome { success: false, action: None, blocked: Some(StepBlocked::MessageNotReady) };
            }
            self.completed = true;
            self.events.emit(Event::Complete { role: self.role.clone() }).await;
            return StepOutcome { success: true, action: None, blocked: None };
        }

        let chosen_index = if enabled.len() > 1 && self.strategy == SelectionStrategy::Manual {
            match self.pending_choice.take() {
                Some(i) => i,
                None => {
                    let options: Vec<usize> = (0..enabled.len()).collect();
                    self.events
                        .emit(Event::ChoiceRequired { role: self.role.clone(), options: options.clone() })
                        .await;
                    return StepOutcome { success: false, action: None, blocked: Some(StepBlocked::ChoiceRequired(options)) };
                }
            }
        } else {
            self.select_index(enabled.len())
        };

        let (target, action) = enabled[chosen_index.min(enabled.len() - 1)].clone();
        self.fire(target, action.clone()).await;
        tracing::trace!(role = %self.role, step = self.step_count, action = %action, "step end");
        StepOutcome { success: true, action: Some(action), blocked: None }
    }

    fn select_index(&self, count: usize) -> usize {
        match self.strategy {
            SelectionStrategy::First | SelectionStrategy::Manual => 0,
            SelectionStrategy::RoundRobin => (self.round_robin_cursor.fetch_add(1, Ordering::Relaxed) as usize) % count,
            SelectionStrategy::Random => (self.step_count as usize).wrapping_mul(2654435761) % count,
        }
    }

    async fn fire(&mut self, target: NodeIndex, action: Action) {
        let from_state = self.current_state;
        self.events.emit(Event::from_action(&self.role, &action)).await;

        match &action {
            Action::Send { to, message, .. } => {
                for receiver in to {
                    let envelope = Envelope {
                        id: Uuid::new_v4(),
                        from: self.role.clone(),
                        to: receiver.clone(),
                        message: message.clone(),
                        timestamp: time::OffsetDateTime::now_utc(),
                    };
                    let _ = self.transport.send(envelope).await;
                }
                self.current_state = target;
            }
            Action::Receive { from, message, .. } => {
                let received = self.transport.try_receive(from, &self.role).await;
                debug_assert!(
                    received.as_ref().is_some_and(|e| e.message.label == message.label),
                    "dequeued envelope does not carry the label this transition was enabled for"
                );
                self.current_state = target;
            }
            Action::SubprotocolCall { protocol, role_mapping, .. } => {
                // `role_mapping` is formal(sub-protocol) -> actual(this run). Find
                // which formal role this participant plays, fetch that role's
                // pre-projected machine, then substitute every formal role in it
                // for the actuals bound at this call site — otherwise the called
                // machine would address its peers by their sub-protocol-local
                // names, which nobody in this run answers to.
                let formal_role = role_mapping.iter().find(|(_, actual)| **actual == self.role).map(|(f, _)| f.clone());
                let sub_cfsm = formal_role
                    .as_ref()
                    .and_then(|formal| self.cfsm_registry.get(protocol).and_then(|by_role| by_role.get(formal)))
                    .map(|cfsm| cfsm.substitute_roles(role_mapping));

                if let Some(sub_cfsm) = sub_cfsm {
                    let sub_cfsm = Arc::new(sub_cfsm);
                    self.call_stack.push(Frame {
                        parent_cfsm: self.current_cfsm.clone(),
                        return_state: target,
                        protocol_name: protocol.clone(),
                    });
                    self.current_state = sub_cfsm.initial().expect("sub-protocol CFSM has an initial state");
                    self.current_cfsm = sub_cfsm;
                    self.events.emit(Event::StepInto { role: self.role.clone(), protocol: protocol.clone() }).await;
                } else {
                    self.current_state = target;
                }
            }
            Action::Tau | Action::Choice { .. } | Action::Create { .. } | Action::Invite { .. } | Action::UpdateMarker => {
                self.current_state = target;
            }
        }

        self.trace.push(TraceEntry { step: self.step_count, from_state, to_state: self.current_state, action: action.to_string() });
        self.step_count += 1;
        self.events.emit(Event::StepEnd { role: self.role.clone(), step: self.step_count }).await;
    }
}

/// Legacy path for tests without a transport (§4.4.1 `deliverMessage`):
/// enqueues directly, bypassing whatever sender would normally have sent
/// it. Exists because a CFSM simulator's correctness can be tested in
/// isolation from its peers.
pub async fn deliver_message(transport: &dyn Transport, envelope: Envelope) -> Result<(), RuntimeError> {
    transport.send(envelope).await
}
