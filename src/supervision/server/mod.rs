//! Restart policy for long-running request servers.
//!
//! A [`ServerSupervisor`] runs each registered [`RequestServer`] on its own
//! task. When a server fails, the [`DirectiveMap`] picks what happens next;
//! `Restart` goes through the configured [`RestartStrategy`], a restart
//! budget per time window, exponential backoff and a circuit breaker.
//!
//! All per-server state lives in a single control task. Servers only report
//! their exit; they never touch supervisor state.

use std::collections::{HashMap, VecDeque};
use std::error::Error as StdError;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

use super::{lock, Agent, AgentLifecycle, Signal};
use crate::utils::retry::RetryConfig;

/// Failure returned by a server run.
pub type ServerFailure = Box<dyn StdError + Send + Sync>;

/// A long-running request loop.
#[async_trait]
pub trait RequestServer: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Serve until `stopping` fires (return `Ok`) or a failure occurs.
    async fn run(&self, stopping: Signal) -> Result<(), ServerFailure>;
}

/// Reported in place of a server run that panicked.
#[derive(Debug, thiserror::Error)]
#[error("Server '{server}' panicked")]
pub struct ServerPanicked {
    pub server: String,
}

// ============================================================================
// Policy
// ============================================================================

/// What to do with a failed server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Run the server again at once, without touching health or budgets.
    Resume,
    /// Restart under the configured strategy, budget and circuit breaker.
    Restart,
    /// Stop this server for good.
    Stop,
    /// Stop every server and the supervisor itself.
    Escalate,
}

/// Which servers restart along with a failed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartStrategy {
    /// Only the failed server.
    #[default]
    OneForOne,
    /// Every supervised server.
    OneForAll,
    /// The failed server and every server registered after it.
    RestForOne,
}

fn is_error<E: StdError + 'static>(error: &(dyn StdError + 'static)) -> bool {
    error.is::<E>()
}

/// Maps error types to directives.
///
/// The failure and each error of its `source()` chain are checked in turn;
/// the first error matching a rule decides. Rules are tried in insertion
/// order.
pub struct DirectiveMap {
    rules: Vec<(fn(&(dyn StdError + 'static)) -> bool, Directive)>,
    default: Directive,
}

impl DirectiveMap {
    pub fn new(default: Directive) -> Self {
        Self {
            rules: Vec::new(),
            default,
        }
    }

    pub fn on<E: StdError + 'static>(mut self, directive: Directive) -> Self {
        self.rules.push((is_error::<E>, directive));
        self
    }

    pub fn directive_for(&self, failure: &(dyn StdError + 'static)) -> Directive {
        std::iter::successors(Some(failure), |&e| e.source())
            .find_map(|cause| {
                self.rules
                    .iter()
                    .find(|(matches, _)| matches(cause))
                    .map(|(_, directive)| *directive)
            })
            .unwrap_or(self.default)
    }
}

impl Default for DirectiveMap {
    fn default() -> Self {
        Self::new(Directive::Restart)
    }
}

/// Supervisor policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub strategy: RestartStrategy,
    /// Restarts allowed per server within `restart_window_ms`.
    pub max_restarts: u32,
    pub restart_window_ms: u64,
    pub backoff_min_ms: u64,
    pub backoff_max_ms: u64,
    /// Consecutive failures after which a server is `Unhealthy`.
    pub unhealthy_threshold: u32,
    /// Consecutive failures after which the circuit opens.
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_reset_ms: u64,
    /// Uptime after a restart that makes a server `Healthy` again.
    pub stable_period_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            strategy: RestartStrategy::OneForOne,
            max_restarts: 10,
            restart_window_ms: 60_000,
            backoff_min_ms: 100,
            backoff_max_ms: 10_000,
            unhealthy_threshold: 3,
            circuit_breaker_threshold: 5,
            circuit_breaker_reset_ms: 30_000,
            stable_period_ms: 30_000,
        }
    }
}

impl SupervisorConfig {
    pub fn restart_window(&self) -> Duration {
        Duration::from_millis(self.restart_window_ms)
    }

    pub fn circuit_breaker_reset(&self) -> Duration {
        Duration::from_millis(self.circuit_breaker_reset_ms)
    }

    pub fn stable_period(&self) -> Duration {
        Duration::from_millis(self.stable_period_ms)
    }

    /// Delay before the restart following `consecutive_failures` failures.
    pub fn restart_delay(&self, consecutive_failures: u32) -> Duration {
        RetryConfig {
            base_delay_ms: self.backoff_min_ms,
            max_delay_ms: self.backoff_max_ms,
            max_retries: self.max_restarts,
            jitter: 0.0,
        }
        .delay_for_attempt(consecutive_failures.saturating_sub(1))
    }
}

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Health {
    Healthy,
    Degraded,
    Unhealthy,
    CircuitOpen,
    Stopped,
}

impl Health {
    pub fn as_str(&self) -> &'static str {
        match self {
            Health::Healthy => "healthy",
            Health::Degraded => "degraded",
            Health::Unhealthy => "unhealthy",
            Health::CircuitOpen => "circuit_open",
            Health::Stopped => "stopped",
        }
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broadcast on every health transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthChanged {
    pub server: String,
    pub from: Health,
    pub to: Health,
}

const EVENT_CAPACITY: usize = 256;

// ============================================================================
// Supervisor
// ============================================================================

/// Supervises a set of request servers.
pub struct ServerSupervisor {
    name: String,
    config: SupervisorConfig,
    directives: Mutex<Option<DirectiveMap>>,
    servers: Mutex<Vec<Arc<dyn RequestServer>>>,
    lifecycle: AgentLifecycle,
    events: broadcast::Sender<HealthChanged>,
    health: Arc<Mutex<HashMap<String, Health>>>,
    escalation: Arc<Mutex<Option<String>>>,
    control: Mutex<Option<JoinHandle<()>>>,
}

impl ServerSupervisor {
    pub fn new(name: impl Into<String>, config: SupervisorConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            name: name.into(),
            config,
            directives: Mutex::new(Some(DirectiveMap::default())),
            servers: Mutex::new(Vec::new()),
            lifecycle: AgentLifecycle::new(),
            events,
            health: Arc::new(Mutex::new(HashMap::new())),
            escalation: Arc::new(Mutex::new(None)),
            control: Mutex::new(None),
        }
    }

    pub fn with_directives(self, directives: DirectiveMap) -> Self {
        *lock(&self.directives) = Some(directives);
        self
    }

    /// Register a server. Registration order matters for `RestForOne`.
    pub fn add_server(&self, server: Arc<dyn RequestServer>) {
        lock(&self.health).insert(server.name().to_string(), Health::Healthy);
        lock(&self.servers).push(server);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HealthChanged> {
        self.events.subscribe()
    }

    pub fn health(&self, server: &str) -> Option<Health> {
        lock(&self.health).get(server).copied()
    }

    /// Description of the failure that escalated, if any.
    pub fn escalation(&self) -> Option<String> {
        lock(&self.escalation).clone()
    }

    /// Start every registered server. Calling it twice is a no-op.
    pub fn start(&self) {
        let Some(directives) = lock(&self.directives).take() else {
            return;
        };
        let servers = std::mem::take(&mut *lock(&self.servers));
        info!(supervisor = %self.name, servers = servers.len(), "Starting server supervisor");

        let (exits_tx, exits_rx) = mpsc::unbounded_channel();
        let mut control = Control {
            supervisor: self.name.clone(),
            config: self.config.clone(),
            directives,
            slots: servers.into_iter().map(Slot::new).collect(),
            next_run: 0,
            draining: Vec::new(),
            exits_tx,
            exits_rx,
            events: self.events.clone(),
            health: self.health.clone(),
            escalation: self.escalation.clone(),
            escalated: false,
            lifecycle: self.lifecycle.clone(),
        };
        let handle = tokio::spawn(async move {
            for index in 0..control.slots.len() {
                control.spawn(index);
            }
            control.lifecycle.ready.fire();
            control.run().await;
        });
        *lock(&self.control) = Some(handle);
    }
}

#[async_trait]
impl Agent for ServerSupervisor {
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
        info!(supervisor = %self.name, reason = %reason, "Stopping server supervisor");
        self.lifecycle.stopping.fire();
        let control = lock(&self.control).take();
        match control {
            Some(handle) => {
                if let Err(e) = handle.await {
                    error!(supervisor = %self.name, error = %e, "Supervisor control task failed");
                }
                self.lifecycle.finish();
            }
            None => self.lifecycle.finish(),
        }
    }
}

// ============================================================================
// Control loop
// ============================================================================

struct Exit {
    index: usize,
    run_id: u64,
    result: Result<(), ServerFailure>,
}

struct Running {
    run_id: u64,
    stopping: Signal,
    handle: JoinHandle<()>,
}

struct Slot {
    server: Arc<dyn RequestServer>,
    health: Health,
    running: Option<Running>,
    consecutive_failures: u32,
    restarts: VecDeque<Instant>,
    restart_at: Option<Instant>,
    circuit_reset_at: Option<Instant>,
    stable_at: Option<Instant>,
}

impl Slot {
    fn new(server: Arc<dyn RequestServer>) -> Self {
        Self {
            server,
            health: Health::Healthy,
            running: None,
            consecutive_failures: 0,
            restarts: VecDeque::new(),
            restart_at: None,
            circuit_reset_at: None,
            stable_at: None,
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        [self.restart_at, self.circuit_reset_at, self.stable_at]
            .into_iter()
            .flatten()
            .min()
    }
}

enum Event {
    Stop,
    Exit(Exit),
    Deadline,
}

struct Control {
    supervisor: String,
    config: SupervisorConfig,
    directives: DirectiveMap,
    slots: Vec<Slot>,
    next_run: u64,
    draining: Vec<JoinHandle<()>>,
    exits_tx: mpsc::UnboundedSender<Exit>,
    exits_rx: mpsc::UnboundedReceiver<Exit>,
    events: broadcast::Sender<HealthChanged>,
    health: Arc<Mutex<HashMap<String, Health>>>,
    escalation: Arc<Mutex<Option<String>>>,
    escalated: bool,
    lifecycle: AgentLifecycle,
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl Control {
    async fn run(mut self) {
        let stopping = self.lifecycle.stopping.clone();
        loop {
            let deadline = self.slots.iter().filter_map(Slot::next_deadline).min();
            let event = tokio::select! {
                _ = stopping.wait() => Event::Stop,
                exit = self.exits_rx.recv() => match exit {
                    Some(exit) => Event::Exit(exit),
                    None => Event::Stop,
                },
                _ = sleep_until(deadline) => Event::Deadline,
            };

            match event {
                Event::Stop => break,
                Event::Exit(exit) => self.on_exit(exit),
                Event::Deadline => self.on_deadline(Instant::now()),
            }

            if self.escalated || self.slots.iter().all(|s| s.health == Health::Stopped) {
                break;
            }
        }
        self.shutdown().await;
    }

    fn spawn(&mut self, index: usize) {
        self.next_run += 1;
        let run_id = self.next_run;
        let stopping = Signal::new();
        let server = self.slots[index].server.clone();
        let exits = self.exits_tx.clone();
        let signal = stopping.clone();

        let handle = tokio::spawn(async move {
            let result = match AssertUnwindSafe(server.run(signal)).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(Box::new(ServerPanicked {
                    server: server.name().to_string(),
                }) as ServerFailure),
            };
            let _ = exits.send(Exit {
                index,
                run_id,
                result,
            });
        });

        self.slots[index].running = Some(Running {
            run_id,
            stopping,
            handle,
        });
    }

    /// Signal a running server to stop; its exit report will be ignored.
    fn retire(&mut self, index: usize) {
        if let Some(running) = self.slots[index].running.take() {
            running.stopping.fire();
            self.draining.push(running.handle);
        }
    }

    fn set_health(&mut self, index: usize, to: Health) {
        let slot = &mut self.slots[index];
        let from = slot.health;
        if from == to {
            return;
        }
        slot.health = to;
        let server = slot.server.name().to_string();

        match to {
            Health::Healthy => info!(server = %server, %from, %to, "Server health changed"),
            Health::Degraded | Health::Unhealthy => {
                warn!(server = %server, %from, %to, "Server health changed")
            }
            Health::CircuitOpen | Health::Stopped => {
                error!(server = %server, %from, %to, "Server health changed")
            }
        }

        lock(&self.health).insert(server.clone(), to);
        // No subscribers is fine.
        let _ = self.events.send(HealthChanged { server, from, to });
    }

    fn on_exit(&mut self, exit: Exit) {
        let Some(slot) = self.slots.get_mut(exit.index) else {
            return;
        };
        match &slot.running {
            Some(running) if running.run_id == exit.run_id => {}
            _ => return,
        }
        slot.running = None;

        match exit.result {
            Ok(()) => {
                info!(server = %slot.server.name(), "Server exited");
                self.set_health(exit.index, Health::Stopped);
            }
            Err(failure) => self.on_failure(exit.index, failure),
        }
    }

    fn on_failure(&mut self, index: usize, failure: ServerFailure) {
        let directive = self.directives.directive_for(failure.as_ref());
        let server = self.slots[index].server.name().to_string();
        warn!(server = %server, error = %failure, ?directive, "Server failed");

        match directive {
            Directive::Resume => self.spawn(index),
            Directive::Stop => self.set_health(index, Health::Stopped),
            Directive::Escalate => {
                error!(server = %server, error = %failure, "Server failure escalated");
                *lock(&self.escalation) = Some(format!("{}: {}", server, failure));
                self.escalated = true;
            }
            Directive::Restart => self.restart(index, Instant::now()),
        }
    }

    fn restart(&mut self, index: usize, now: Instant) {
        let window = self.config.restart_window();
        let max_restarts = self.config.max_restarts as usize;

        let slot = &mut self.slots[index];
        slot.consecutive_failures += 1;
        slot.stable_at = None;
        while slot
            .restarts
            .front()
            .is_some_and(|at| now.duration_since(*at) > window)
        {
            slot.restarts.pop_front();
        }
        let failures = slot.consecutive_failures;

        if slot.restarts.len() >= max_restarts {
            error!(
                server = %slot.server.name(),
                max_restarts,
                window_ms = window.as_millis() as u64,
                "Restart budget exhausted"
            );
            self.set_health(index, Health::Stopped);
            return;
        }

        if failures >= self.config.circuit_breaker_threshold {
            slot.circuit_reset_at = Some(now + self.config.circuit_breaker_reset());
            self.set_health(index, Health::CircuitOpen);
            return;
        }

        slot.restarts.push_back(now);
        let health = if failures >= self.config.unhealthy_threshold {
            Health::Unhealthy
        } else {
            Health::Degraded
        };
        self.set_health(index, health);

        let restart_at = now + self.config.restart_delay(failures);
        let siblings: Vec<usize> = match self.config.strategy {
            RestartStrategy::OneForOne => Vec::new(),
            RestartStrategy::OneForAll => (0..self.slots.len()).filter(|&i| i != index).collect(),
            RestartStrategy::RestForOne => (index + 1..self.slots.len()).collect(),
        };
        for sibling in siblings {
            if self.slots[sibling].running.is_some() {
                self.retire(sibling);
                self.slots[sibling].restart_at = Some(restart_at);
            }
        }
        self.slots[index].restart_at = Some(restart_at);
    }

    fn on_deadline(&mut self, now: Instant) {
        let stable_period = self.config.stable_period();
        for index in 0..self.slots.len() {
            if self.slots[index].circuit_reset_at.is_some_and(|at| at <= now) {
                let slot = &mut self.slots[index];
                slot.circuit_reset_at = None;
                slot.consecutive_failures = 0;
                info!(server = %slot.server.name(), "Circuit breaker reset");
                self.set_health(index, Health::Degraded);
                self.slots[index].restart_at = Some(now);
            }

            if self.slots[index].restart_at.is_some_and(|at| at <= now) {
                self.slots[index].restart_at = None;
                if self.slots[index].health != Health::Stopped {
                    info!(server = %self.slots[index].server.name(), "Restarting server");
                    self.spawn(index);
                    if self.slots[index].health != Health::Healthy {
                        self.slots[index].stable_at = Some(now + stable_period);
                    }
                }
            }

            if self.slots[index].stable_at.is_some_and(|at| at <= now) {
                self.slots[index].stable_at = None;
                if self.slots[index].running.is_some() {
                    self.slots[index].consecutive_failures = 0;
                    self.set_health(index, Health::Healthy);
                }
            }
        }
    }

    async fn shutdown(mut self) {
        for index in 0..self.slots.len() {
            self.retire(index);
        }
        let handles = std::mem::take(&mut self.draining);
        for result in join_all(handles).await {
            if let Err(e) = result {
                error!(supervisor = %self.supervisor, error = %e, "Server task failed");
            }
        }
        for index in 0..self.slots.len() {
            self.slots[index].restart_at = None;
            self.set_health(index, Health::Stopped);
        }
        info!(supervisor = %self.supervisor, "Server supervisor stopped");
        self.lifecycle.finish();
    }
}
