//! The two coordination modes of §4.4.3: a deterministic single-task
//! scheduler for verification-equivalence tests, and a concurrent
//! task-per-role runtime for realistic execution.

use super::events::{EventSink, NoOpSink};
use super::simulator::{CfsmRegistry, CfsmSimulator, SelectionStrategy};
use super::transport::{InMemoryTransport, Transport};
use crate::ast::Role;
use crate::cfsm::Cfsm;
use crate::error::RuntimeError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// How roles are picked each tick in scheduled mode (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingPolicy {
    RoundRobin,
    Fair,
    Random,
}

pub struct ScheduledConfig {
    pub scheduling: SchedulingPolicy,
    pub max_steps: u64,
    pub record_trace: bool,
}

impl Default for ScheduledConfig {
    fn default() -> Self {
        ScheduledConfig { scheduling: SchedulingPolicy::RoundRobin, max_steps: 10_000, record_trace: true }
    }
}

/// The result of a scheduled run (§4.4 Mode A).
#[derive(Debug)]
pub struct RunResult {
    pub success: bool,
    pub global_steps: u64,
    pub error: Option<RuntimeError>,
}

/// Cooperative, single-task scheduling: exactly one simulator advances per
/// tick, in the order the configured policy picks. Deterministic for a
/// fixed policy and zero transport delay (§5).
pub struct DistributedSimulator {
    simulators: HashMap<Role, CfsmSimulator>,
    transport: Arc<dyn Transport>,
    config: ScheduledConfig,
    cursor: usize,
    blocked: std::collections::HashSet<Role>,
}

impl DistributedSimulator {
    pub fn new(cfsms: HashMap<Role, Arc<Cfsm>>, registry: Arc<CfsmRegistry>, config: ScheduledConfig) -> Self {
        let transport: Arc<dyn Transport> = Arc::new(InMemoryTransport::new());
        let events: Arc<dyn EventSink> = Arc::new(NoOpSink);
        let simulators = cfsms
            .into_iter()
            .map(|(role, cfsm)| {
                let sim = CfsmSimulator::new(
                    role.clone(),
                    cfsm,
                    transport.clone(),
                    registry.clone(),
                    SelectionStrategy::First,
                    events.clone(),
                );
                (role, sim)
            })
            .collect();
        DistributedSimulator { simulators, transport, config, cursor: 0, blocked: std::collections::HashSet::new() }
    }

    /// `allBlockedAndAnyUnfinishedAndNoInflightMessages` (§4.4.3): every
    /// role still running must have failed its most recent `step()`, at
    /// least one role must be unfinished, and no message may be in flight
    /// (a pending message means some role could still make progress once
    /// scheduled).
    pub async fn run(&mut self) -> RunResult {
        let mut global_steps: u64 = 0;

        loop {
            if global_steps >= self.config.max_steps {
                return RunResult { success: false, global_steps, error: Some(RuntimeError::MaxStepsExceeded(self.config.max_steps as usize)) };
            }

            let roles: Vec<Role> = self.simulators.keys().cloned().collect();
            let enabled_roles: Vec<Role> = roles.iter().filter(|r| !self.simulators[*r].is_complete()).cloned().collect();

            if enabled_roles.is_empty() {
                return RunResult { success: true, global_steps, error: None };
            }

            let picked = self.pick_role(&enabled_roles);
            let outcome = self.simulators.get_mut(&picked).unwrap().step().await;
            global_steps += 1;

            if outcome.success {
                self.blocked.remove(&picked);
            } else {
                self.blocked.insert(picked.clone());
            }

            let all_blocked = enabled_roles.iter().all(|r| self.blocked.contains(r));
            if all_blocked && self.transport.total_pending() == 0 {
                let blocked_roles: Vec<String> = enabled_roles.iter().map(Role::to_string).collect();
                return RunResult {
                    success: false,
                    global_steps,
                    error: Some(RuntimeError::Deadlock { roles: blocked_roles }),
                };
            }
        }
    }

    fn pick_role(&mut self, enabled: &[Role]) -> Role {
        match self.config.scheduling {
            SchedulingPolicy::RoundRobin | SchedulingPolicy::Fair => {
                self.cursor = (self.cursor + 1) % enabled.len().max(1);
                enabled[self.cursor % enabled.len()].clone()
            }
            SchedulingPolicy::Random => {
                self.cursor = self.cursor.wrapping_mul(2654435761).wrapping_add(1);
                enabled[self.cursor % enabled.len()].clone()
            }
        }
    }
}

/// Concurrent task-per-role execution (§4.4 Mode B): each role runs its own
/// `step()` loop independently; a watcher polls for the
/// `allBlockedAndAnyUnfinishedAndNoInflightMessages` deadlock condition
/// (§4.4.3).
pub struct DistributedRuntime {
    cfsms: HashMap<Role, Arc<Cfsm>>,
    registry: Arc<CfsmRegistry>,
    transport: Arc<dyn Transport>,
    events: Arc<dyn EventSink>,
    poll_interval: Duration,
}

impl DistributedRuntime {
    pub fn new(cfsms: HashMap<Role, Arc<Cfsm>>, registry: Arc<CfsmRegistry>) -> Self {
        DistributedRuntime {
            cfsms,
            registry,
            transport: Arc::new(InMemoryTransport::new()),
            events: Arc::new(NoOpSink),
            poll_interval: Duration::from_millis(10),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Runs every role's simulator to completion or until deadlock/timeout.
    pub async fn run(&self, timeout: Option<Duration>) -> RunResult {
        let completed = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let total = self.cfsms.len();
        let blocked = Arc::new(std::sync::Mutex::new(std::collections::HashSet::<Role>::new()));
        let finished = Arc::new(std::sync::Mutex::new(std::collections::HashSet::<Role>::new()));

        let mut handles = Vec::new();
        for (role, cfsm) in &self.cfsms {
            let role = role.clone();
            let cfsm = cfsm.clone();
            let transport = self.transport.clone();
            let registry = self.registry.clone();
            let events = self.events.clone();
            let completed = completed.clone();
            let blocked = blocked.clone();
            let finished = finished.clone();

            handles.push(tokio::spawn(async move {
                let mut sim = CfsmSimulator::new(role.clone(), cfsm, transport, registry, SelectionStrategy::First, events);
                loop {
                    if sim.is_complete() {
                        finished.lock().unwrap().insert(role.clone());
                        completed.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        break;
                    }
                    let outcome = sim.step().await;
                    if outcome.success {
                        blocked.lock().unwrap().remove(&role);
                    } else {
                        blocked.lock().unwrap().insert(role.clone());
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }));
        }

        let transport = self.transport.clone();
        let poll_interval = self.poll_interval;
        let watcher_blocked = blocked.clone();
        let watcher_finished = finished.clone();
        let watcher = tokio::spawn(async move {
            loop {
                tokio::time::sleep(poll_interval).await;
                let blocked_count = watcher_blocked.lock().unwrap().len();
                let finished_count = watcher_finished.lock().unwrap().len();
                if finished_count == total {
                    return Ok(());
                }
                if blocked_count + finished_count == total && finished_count < total && transport.total_pending() == 0 {
                    return Err(RuntimeError::Deadlock {
                        roles: watcher_blocked.lock().unwrap().iter().map(Role::to_string).collect(),
                    });
                }
            }
        });

        let run_future = async {
            for handle in handles {
                let _ = handle.await;
            }
        };

        let watch_result = if let Some(timeout) = timeout {
            match tokio::time::timeout(timeout, async {
                tokio::select! {
                    _ = run_future => Ok(()),
                    res = watcher => res.unwrap_or(Ok(())),
                }
            })
            .await
            {
                Ok(r) => r,
                Err(_) => Err(RuntimeError::TimedOut(timeout)),
            }
        } else {
            tokio::select! {
                _ = run_future => Ok(()),
                res = watcher => res.unwrap_or(Ok(())),
            }
        };

        match watch_result {
            Ok(()) => RunResult { success: true, global_steps: 0, error: None },
            Err(e) => RunResult { success: false, global_steps: 0, error: Some(e) },
        }
    }
}
