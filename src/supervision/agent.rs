//! Agents and the supervisor that owns them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, info};

use super::{lock, Signal};

/// A long-lived component with a cooperative shutdown protocol.
///
/// - `ready`: fired once the agent is initialized
/// - `stopping`: fired when shutdown has been requested
/// - `stopped`: fired once the agent has released its resources
/// - `completed`: fired last; nothing of the agent is running anymore
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    fn ready(&self) -> &Signal;

    fn completed(&self) -> &Signal;

    fn stopping(&self) -> &Signal;

    fn stopped(&self) -> &Signal;

    /// Request shutdown and wait for completion.
    async fn stop(&self, reason: &str);
}

/// The four signals every agent exposes, bundled.
#[derive(Debug, Clone, Default)]
pub struct AgentLifecycle {
    pub ready: Signal,
    pub completed: Signal,
    pub stopping: Signal,
    pub stopped: Signal,
}

impl AgentLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire `stopped` then `completed`.
    pub fn finish(&self) {
        self.stopping.fire();
        self.stopped.fire();
        self.completed.fire();
    }
}

/// An agent owning child agents.
///
/// Children are removed as soon as they complete. Stopping the supervisor
/// stops every remaining child in parallel.
pub struct Supervisor {
    name: String,
    lifecycle: AgentLifecycle,
    children: Arc<Mutex<HashMap<u64, Arc<dyn Agent>>>>,
    next_id: AtomicU64,
}

impl Supervisor {
    pub fn new(name: impl Into<String>) -> Self {
        let lifecycle = AgentLifecycle::new();
        lifecycle.ready.fire();
        Self {
            name: name.into(),
            lifecycle,
            children: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Take ownership of `agent` until it completes.
    pub fn add(&self, agent: Arc<dyn Agent>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(supervisor = %self.name, child = %agent.name(), "Adding child agent");
        lock(&self.children).insert(id, agent.clone());

        let children = self.children.clone();
        tokio::spawn(async move {
            agent.completed().wait().await;
            if lock(&children).remove(&id).is_some() {
                debug!(child = %agent.name(), "Child agent completed, removed");
            }
        });
    }

    pub fn child_count(&self) -> usize {
        lock(&self.children).len()
    }
}

#[async_trait]
impl Agent for Supervisor {
    fn name(&self) -> &str {
        &self.name
    }

    fn ready(&self) -> &Signal {
        &self.lifecycle.ready
    }

    fn completed(&self) -> &Signal {
        &self.lifecycle.completed
    }

    fn stopping(&self) -> &Signal {
        &self.lifecycle.stopping
    }

    fn stopped(&self) -> &Signal {
        &self.lifecycle.stopped
    }

    async fn stop(&self, reason: &str) {
        self.lifecycle.stopping.fire();
        let children: Vec<_> = lock(&self.children).values().cloned().collect();
        info!(
            supervisor = %self.name,
            children = children.len(),
            reason = %reason,
            "Stopping supervisor"
        );
        join_all(children.iter().map(|child| child.stop(reason))).await;
        lock(&self.children).clear();
        self.lifecycle.finish();
    }
}
