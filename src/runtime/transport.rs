//! The pluggable transport (§4.4.2): a per-directed-pair FIFO, grounded in
//! the teacher's `InMemoryHandler` (`Arc<Mutex<HashMap<(R,R), ...>>>` keyed
//! by sender/receiver pairs) but exposing peek/count operations the
//! coordinator's deadlock detection needs.

use crate::ast::{Message, Role};
use crate::error::RuntimeError;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use uuid::Uuid;

/// A message in flight, carrying the metadata §3 requires for FIFO
/// verification and tracing (`id`, `timestamp`) alongside the structured
/// payload.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub id: Uuid,
    pub from: Role,
    pub to: Role,
    pub message: Message,
    pub timestamp: time::OffsetDateTime,
}

/// How long the transport waits before making a queued message visible to
/// `receive` (§3 "Transport data model").
#[derive(Debug, Clone, Copy)]
pub enum DeliveryDelay {
    None,
    FixedMillis(u64),
    UniformRangeMillis(u64, u64),
}

impl Default for DeliveryDelay {
    fn default() -> Self {
        DeliveryDelay::None
    }
}

/// The transport interface the simulator core depends on (§4.4.2). Kept as
/// a trait object so tests can swap in a transport that drops or reorders
/// messages without touching the simulator.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, envelope: Envelope) -> Result<(), RuntimeError>;

    /// Non-blocking: takes the head of the `(from, to)` queue if present.
    async fn try_receive(&self, from: &Role, to: &Role) -> Option<Envelope>;

    /// Non-destructive count for the `(from, to)` queue.
    fn pending_for(&self, from: &Role, to: &Role) -> usize;

    /// Non-destructive peek at the message label of the `(from, to)` queue's
    /// head, if any. A `receive{from, label}` transition is only enabled
    /// when this matches its expected label (§4.4.1 step 2(b)) — matching
    /// sender alone is not enough to discriminate an external choice with
    /// several same-sender, different-label branches.
    fn peek_label(&self, from: &Role, to: &Role) -> Option<String>;

    /// Total messages in flight across every pair — used by deadlock
    /// detection (§4.4.3).
    fn total_pending(&self) -> usize;
}

/// The reference transport: one FIFO per ordered role pair, guarded by a
/// single coarse lock (the teacher's `InMemoryHandler` makes the same
/// simplicity/contention tradeoff — the external contract only promises
/// FIFO-per-pair and atomic enqueue/dequeue, not fine-grained locking).
#[derive(Default)]
pub struct InMemoryTransport {
    queues: Mutex<HashMap<(Role, Role), VecDeque<Envelope>>>,
    delay: DeliveryDelay,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        InMemoryTransport { queues: Mutex::new(HashMap::new()), delay: DeliveryDelay::None }
    }

    pub fn with_delay(delay: DeliveryDelay) -> Self {
        InMemoryTransport { queues: Mutex::new(HashMap::new()), delay }
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn send(&self, envelope: Envelope) -> Result<(), RuntimeError> {
        match self.delay {
            DeliveryDelay::None => {}
            DeliveryDelay::FixedMillis(ms) => tokio::time::sleep(std::time::Duration::from_millis(ms)).await,
            DeliveryDelay::UniformRangeMillis(lo, hi) => {
                let ms = if hi > lo { lo + (envelope.id.as_u128() as u64) % (hi - lo) } else { lo };
                tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
            }
        }
        let key = (envelope.from.clone(), envelope.to.clone());
        self.queues
            .lock()
            .map_err(|_| RuntimeError::TransportFailure("queue lock poisoned".into()))?
            .entry(key)
            .or_default()
            .push_back(envelope);
        Ok(())
    }

    async fn try_receive(&self, from: &Role, to: &Role) -> Option<Envelope> {
        let mut queues = self.queues.lock().ok()?;
        queues.get_mut(&(from.clone(), to.clone()))?.pop_front()
    }

    fn pending_for(&self, from: &Role, to: &Role) -> usize {
        self.queues.lock().map(|q| q.get(&(from.clone(), to.clone())).map_or(0, VecDeque::len)).unwrap_or(0)
    }

    fn peek_label(&self, from: &Role, to: &Role) -> Option<String> {
        self.queues.lock().ok()?.get(&(from.clone(), to.clone()))?.front().map(|e| e.message.label.clone())
    }

    fn total_pending(&self) -> usize {
        self.queues.lock().map(|q| q.values().map(VecDeque::len).sum()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(from: &str, to: &str, label: &str) -> Envelope {
        Envelope {
            id: Uuid::new_v4(),
            from: Role::new(from),
            to: Role::new(to),
            message: Message::new(label),
            timestamp: time::OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[tokio::test]
    async fn fifo_per_pair_is_preserved() {
        let transport = InMemoryTransport::new();
        transport.send(envelope("A", "B", "m1")).await.unwrap();
        transport.send(envelope("A", "B", "m2")).await.unwrap();

        let first = transport.try_receive(&Role::new("A"), &Role::new("B")).await.unwrap();
        let second = transport.try_receive(&Role::new("A"), &Role::new("B")).await.unwrap();
        assert_eq!(first.message.label, "m1");
        assert_eq!(second.message.label, "m2");
    }

    #[tokio::test]
    async fn total_pending_counts_across_pairs() {
        let transport = InMemoryTransport::new();
        transport.send(envelope("A", "B", "m1")).await.unwrap();
        transport.send(envelope("C", "D", "m2")).await.unwrap();
        assert_eq!(transport.total_pending(), 2);
    }
}
