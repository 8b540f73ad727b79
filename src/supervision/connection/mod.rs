//! Single-flight connection management.
//!
//! [`ConnectionContextSupervisor`] hands out one shared connection. The first
//! caller that finds no live connection starts a creation attempt; callers
//! arriving while it is in flight await the same attempt. A cached
//! connection is reused until it reports itself disconnected.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tracing::{error, info, warn};

use super::{lock, Agent, AgentLifecycle, Signal};
use crate::utils::retry::RetryConfig;

/// Classification of a connection failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionErrorKind {
    Refused,
    Unreachable,
    Timeout,
    Authentication,
    Configuration,
    Closed,
}

impl fmt::Display for ConnectionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Refused => "refused",
            Self::Unreachable => "unreachable",
            Self::Timeout => "timeout",
            Self::Authentication => "authentication",
            Self::Configuration => "configuration",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Connection failed ({kind}): {message}")]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
}

impl ConnectionError {
    pub fn new(kind: ConnectionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// A live connection or channel.
pub trait ConnectionContext: Send + Sync + 'static {
    fn is_connected(&self) -> bool;
}

/// Transport-specific connection creation.
#[async_trait]
pub trait ConnectionContextFactory: Send + Sync + 'static {
    type Context: ConnectionContext;

    async fn create(&self) -> Result<Self::Context, ConnectionError>;
}

type PendingConnection<C> = Shared<BoxFuture<'static, Result<Arc<C>, ConnectionError>>>;

enum State<C> {
    Idle,
    Pending {
        generation: u64,
        attempt: PendingConnection<C>,
    },
    Connected(Arc<C>),
    Closed,
}

struct Inner<C> {
    state: State<C>,
    generation: u64,
}

/// Hands out one shared connection, creating it at most once at a time.
pub struct ConnectionContextSupervisor<F: ConnectionContextFactory> {
    name: String,
    factory: Arc<F>,
    retry: RetryConfig,
    non_retryable: Arc<HashSet<ConnectionErrorKind>>,
    inner: Mutex<Inner<F::Context>>,
    lifecycle: AgentLifecycle,
}

impl<F: ConnectionContextFactory> ConnectionContextSupervisor<F> {
    pub fn new(name: impl Into<String>, factory: F, retry: RetryConfig) -> Self {
        Self {
            name: name.into(),
            factory: Arc::new(factory),
            retry,
            non_retryable: Arc::new(
                [
                    ConnectionErrorKind::Authentication,
                    ConnectionErrorKind::Configuration,
                ]
                .into_iter()
                .collect(),
            ),
            inner: Mutex::new(Inner {
                state: State::Idle,
                generation: 0,
            }),
            lifecycle: AgentLifecycle::new(),
        }
    }

    /// Replace the set of failure kinds that abort creation without retrying.
    pub fn with_non_retryable(
        mut self,
        kinds: impl IntoIterator<Item = ConnectionErrorKind>,
    ) -> Self {
        self.non_retryable = Arc::new(kinds.into_iter().collect());
        self
    }

    /// The current connection, creating one if there is none alive.
    pub async fn get_connection(&self) -> Result<Arc<F::Context>, ConnectionError> {
        let (generation, attempt) = {
            let mut inner = lock(&self.inner);
            match &inner.state {
                State::Closed => {
                    return Err(ConnectionError::new(
                        ConnectionErrorKind::Closed,
                        format!("{} is stopped", self.name),
                    ))
                }
                State::Connected(context) if context.is_connected() => {
                    return Ok(context.clone())
                }
                State::Pending {
                    generation,
                    attempt,
                } => (*generation, attempt.clone()),
                State::Idle | State::Connected(_) => {
                    inner.generation += 1;
                    let generation = inner.generation;
                    let attempt = connect_with_retry(
                        self.name.clone(),
                        self.factory.clone(),
                        self.retry.clone(),
                        self.non_retryable.clone(),
                    )
                    .boxed()
                    .shared();
                    inner.state = State::Pending {
                        generation,
                        attempt: attempt.clone(),
                    };
                    (generation, attempt)
                }
            }
        };

        let result = attempt.await;

        let mut inner = lock(&self.inner);
        let current = matches!(
            &inner.state,
            State::Pending { generation: g, .. } if *g == generation
        );
        if current {
            inner.state = match &result {
                Ok(context) => State::Connected(context.clone()),
                Err(_) => State::Idle,
            };
            if result.is_ok() {
                self.lifecycle.ready.fire();
            }
        }
        result
    }
}

/// Create a connection, retrying with capped exponential backoff.
async fn connect_with_retry<F: ConnectionContextFactory>(
    name: String,
    factory: Arc<F>,
    retry: RetryConfig,
    non_retryable: Arc<HashSet<ConnectionErrorKind>>,
) -> Result<Arc<F::Context>, ConnectionError> {
    use backon::BackoffBuilder;

    let backoff = retry.backoff().build();
    let mut last_error = None;

    for (attempt, delay) in std::iter::once(Duration::ZERO).chain(backoff).enumerate() {
        if attempt > 0 {
            tokio::time::sleep(delay).await;
        }

        match factory.create().await {
            Ok(context) => {
                info!(connection = %name, attempt = attempt + 1, "Connection established");
                return Ok(Arc::new(context));
            }
            Err(e) if non_retryable.contains(&e.kind) => {
                error!(connection = %name, error = %e, "Connection failed, not retryable");
                return Err(e);
            }
            Err(e) if !retry.should_retry(attempt as u32) => {
                last_error = Some(e);
                break;
            }
            Err(e) => {
                warn!(
                    connection = %name,
                    attempt = attempt + 1,
                    max_retries = retry.max_retries,
                    error = %e,
                    "Connection attempt failed, retrying..."
                );
                last_error = Some(e);
            }
        }
    }

    error!(connection = %name, "Connection retries exhausted");
    Err(last_error.unwrap_or_else(|| {
        ConnectionError::new(ConnectionErrorKind::Closed, "no connection attempt made")
    }))
}

#[async_trait]
impl<F: ConnectionContextFactory> Agent for ConnectionContextSupervisor<F> {
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
        lock(&self.inner).state = State::Closed;
        info!(connection = %self.name, reason = %reason, "Connection supervisor stopped");
        self.lifecycle.finish();
    }
}
