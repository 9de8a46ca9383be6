//! Process-local broker for tests and single-process development.
//!
//! Mirrors the AMQP behaviour the client depends on: durable queues are
//! declared idempotently, messages sent to an undeclared queue through the
//! default exchange are dropped, and severing the connection closes every
//! channel handed out so far.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use super::{BrokerChannel, BrokerConnector};
use crate::error::BrokerError;

#[derive(Default)]
struct BrokerState {
    queues: BTreeMap<String, Vec<Vec<u8>>>,
    declarations: usize,
    connections: usize,
    unroutable: usize,
    pending_connect_failures: u32,
    failing_queues: HashSet<String>,
    /// Bumped by [`InMemoryBroker::sever`]; older channels become closed.
    generation: u64,
}

/// In-memory broker. Cheap to clone; clones share the same queues.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Names of all declared queues, sorted.
    pub fn queue_names(&self) -> Vec<String> {
        self.lock().queues.keys().cloned().collect()
    }

    pub fn has_queue(&self, name: &str) -> bool {
        self.lock().queues.contains_key(name)
    }

    /// Raw message bodies currently sitting in `queue`.
    pub fn messages(&self, queue: &str) -> Vec<Vec<u8>> {
        self.lock().queues.get(queue).cloned().unwrap_or_default()
    }

    /// Decode every message in `queue` as JSON.
    pub fn decoded<T: DeserializeOwned>(&self, queue: &str) -> Result<Vec<T>, serde_json::Error> {
        self.messages(queue)
            .iter()
            .map(|body| serde_json::from_slice(body))
            .collect()
    }

    pub fn message_count(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, Vec::len)
    }

    /// Messages across every queue.
    pub fn total_messages(&self) -> usize {
        self.lock().queues.values().map(Vec::len).sum()
    }

    /// Messages dropped because their queue was never declared.
    pub fn unroutable(&self) -> usize {
        self.lock().unroutable
    }

    /// Number of successful `declare_queue` calls, including repeats.
    pub fn declarations(&self) -> usize {
        self.lock().declarations
    }

    /// Number of connections opened so far.
    pub fn connections(&self) -> usize {
        self.lock().connections
    }

    /// Make the next `count` connection attempts fail.
    pub fn fail_next_connects(&self, count: u32) {
        self.lock().pending_connect_failures = count;
    }

    /// Refuse every declaration of `queue`.
    pub fn fail_declarations_for(&self, queue: &str) {
        self.lock().failing_queues.insert(queue.to_string());
    }

    /// Simulate a dropped connection: every channel opened so far closes.
    pub fn sever(&self) {
        self.lock().generation += 1;
    }
}

#[async_trait]
impl BrokerConnector for InMemoryBroker {
    async fn connect(&self) -> Result<Box<dyn BrokerChannel>, BrokerError> {
        let mut state = self.lock();
        if state.pending_connect_failures > 0 {
            state.pending_connect_failures -= 1;
            return Err(BrokerError::Connection(
                "in-memory broker refused the connection".into(),
            ));
        }
        state.connections += 1;
        Ok(Box::new(InMemoryChannel {
            broker: self.clone(),
            generation: state.generation,
            open: AtomicBool::new(true),
        }))
    }

    fn describe(&self) -> String {
        "in-memory".to_string()
    }
}

struct InMemoryChannel {
    broker: InMemoryBroker,
    generation: u64,
    open: AtomicBool,
}

impl InMemoryChannel {
    fn open_state(&self) -> Option<MutexGuard<'_, BrokerState>> {
        let state = self.broker.lock();
        (self.open.load(Ordering::SeqCst) && state.generation == self.generation).then_some(state)
    }
}

#[async_trait]
impl BrokerChannel for InMemoryChannel {
    async fn declare_queue(&self, name: &str) -> Result<(), BrokerError> {
        let Some(mut state) = self.open_state() else {
            return Err(BrokerError::Topology {
                queue: name.to_string(),
                reason: "channel closed".into(),
            });
        };
        if state.failing_queues.contains(name) {
            return Err(BrokerError::Topology {
                queue: name.to_string(),
                reason: "declaration refused".into(),
            });
        }
        state.queues.entry(name.to_string()).or_default();
        state.declarations += 1;
        Ok(())
    }

    async fn send(&self, queue: &str, body: Vec<u8>) -> Result<(), BrokerError> {
        let Some(mut state) = self.open_state() else {
            return Err(BrokerError::Publish("channel closed".into()));
        };
        match state.queues.get_mut(queue) {
            Some(messages) => messages.push(body),
            None => state.unroutable += 1,
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open_state().is_some()
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}
