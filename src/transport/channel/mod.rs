//! In-process broker binding.
//!
//! A [`ChannelBroker`] keeps one request queue per tag. Requests and replies
//! travel as JSON envelopes, the same bytes a network binding would carry.
//!
//! - [`ChannelRequestClient`]: publishes requests for one tag and pumps the
//!   replies of its private reply queue into a [`PendingRequests`] table
//! - [`ChannelRequestServer`]: consumes a tag's queue under supervision,
//!   runs the receive pipeline and replies

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{PendingRequests, Result, TransportError};
use crate::handler::{ClientRequestHandler, QueryHandler};
use crate::pipeline::{ReceiveContext, ReceiveNext, ReceivedPipelineBehavior};
use crate::supervision::{
    lock, ConnectionContext, ConnectionContextFactory, ConnectionContextSupervisor,
    ConnectionError, ConnectionErrorKind, RequestServer, ServerFailure, Signal,
};
use crate::utils::retry::RetryConfig;
use crate::wire::{Request, RequestEnvelope, Response, ResponseEnvelope, WireError};

struct Delivery {
    payload: String,
    reply_to: mpsc::UnboundedSender<String>,
}

// ============================================================================
// Broker
// ============================================================================

#[derive(Default)]
struct BrokerState {
    queues: Mutex<HashMap<String, mpsc::UnboundedSender<Delivery>>>,
    offline: AtomicBool,
    published: AtomicU64,
}

/// Routes requests to the consumer of their tag's queue.
#[derive(Clone, Default)]
pub struct ChannelBroker {
    state: Arc<BrokerState>,
}

impl ChannelBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn publish(&self, tag: &str, delivery: Delivery) -> Result<()> {
        if self.state.offline.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected("broker offline".to_string()));
        }
        let queues = lock(&self.state.queues);
        let queue = queues
            .get(tag)
            .ok_or_else(|| TransportError::Disconnected(format!("no consumer for '{}'", tag)))?;
        queue
            .send(delivery)
            .map_err(|_| TransportError::Disconnected(format!("queue '{}' closed", tag)))?;
        self.state.published.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Become the consumer of `tag`'s queue, replacing any previous one.
    fn consume(
        &self,
        tag: &str,
    ) -> std::result::Result<mpsc::UnboundedReceiver<Delivery>, ConnectionError> {
        if self.state.offline.load(Ordering::SeqCst) {
            return Err(ConnectionError::new(
                ConnectionErrorKind::Refused,
                "broker offline",
            ));
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        lock(&self.state.queues).insert(tag.to_string(), sender);
        Ok(receiver)
    }

    /// Take the broker down or bring it back. Going offline closes every
    /// queue, so consumers observe a disconnect.
    pub fn set_online(&self, online: bool) {
        self.state.offline.store(!online, Ordering::SeqCst);
        if !online {
            lock(&self.state.queues).clear();
            warn!("Channel broker offline");
        } else {
            info!("Channel broker online");
        }
    }

    /// Requests accepted so far.
    pub fn published(&self) -> u64 {
        self.state.published.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Client
// ============================================================================

/// Sends requests for one tag and awaits their correlated replies.
pub struct ChannelRequestClient {
    broker: ChannelBroker,
    tag: String,
    timeout: Duration,
    pending: Arc<PendingRequests>,
    reply_to: mpsc::UnboundedSender<String>,
    pump: JoinHandle<()>,
}

impl ChannelRequestClient {
    /// Must be called within a tokio runtime; the reply pump is spawned here.
    pub fn new(broker: &ChannelBroker, tag: impl Into<String>, timeout: Duration) -> Self {
        let (reply_to, mut replies) = mpsc::unbounded_channel::<String>();
        let pending = Arc::new(PendingRequests::new());

        let table = pending.clone();
        let pump = tokio::spawn(async move {
            while let Some(payload) = replies.recv().await {
                match serde_json::from_str::<ResponseEnvelope>(&payload) {
                    Ok(envelope) => {
                        table.complete(envelope.correlation_id, envelope.response);
                    }
                    Err(e) => warn!(error = %e, "Dropping malformed reply"),
                }
            }
        });

        Self {
            broker: broker.clone(),
            tag: tag.into(),
            timeout,
            pending,
            reply_to,
            pump,
        }
    }

    /// Requests still awaiting a reply.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }
}

impl Drop for ChannelRequestClient {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

#[async_trait]
impl ClientRequestHandler for ChannelRequestClient {
    async fn send(&self, request: Request) -> Result<Response> {
        let (correlation_id, receiver) = self.pending.register();
        let envelope = RequestEnvelope {
            correlation_id,
            tag: self.tag.clone(),
            request,
        };

        let published = serde_json::to_string(&envelope)
            .map_err(|source| {
                TransportError::from(WireError::Encode {
                    what: "request envelope",
                    source,
                })
            })
            .and_then(|payload| {
                self.broker.publish(
                    &self.tag,
                    Delivery {
                        payload,
                        reply_to: self.reply_to.clone(),
                    },
                )
            });
        if let Err(e) = published {
            self.pending.remove(&correlation_id);
            return Err(e);
        }

        debug!(tag = %self.tag, %correlation_id, "Request published");
        self.pending
            .wait(correlation_id, receiver, self.timeout, None)
            .await
    }
}

// ============================================================================
// Server
// ============================================================================

/// A consumer of one tag's queue.
pub struct ChannelConsumer {
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<Delivery>>,
    closed: AtomicBool,
}

impl ConnectionContext for ChannelConsumer {
    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}

/// Creates [`ChannelConsumer`]s for one tag.
pub struct ChannelConsumerFactory {
    broker: ChannelBroker,
    tag: String,
}

#[async_trait]
impl ConnectionContextFactory for ChannelConsumerFactory {
    type Context = ChannelConsumer;

    async fn create(&self) -> std::result::Result<ChannelConsumer, ConnectionError> {
        let receiver = self.broker.consume(&self.tag)?;
        Ok(ChannelConsumer {
            receiver: tokio::sync::Mutex::new(receiver),
            closed: AtomicBool::new(false),
        })
    }
}

/// Answers one tag's requests with a [`QueryHandler`].
pub struct ChannelRequestServer {
    name: String,
    tag: String,
    connections: Arc<ConnectionContextSupervisor<ChannelConsumerFactory>>,
    handler: Arc<dyn QueryHandler>,
    behaviors: Arc<[Arc<dyn ReceivedPipelineBehavior>]>,
    in_flight: Arc<Semaphore>,
}

impl ChannelRequestServer {
    pub fn new(
        broker: &ChannelBroker,
        tag: impl Into<String>,
        handler: Arc<dyn QueryHandler>,
        retry: RetryConfig,
        max_concurrency: usize,
    ) -> Self {
        let tag = tag.into();
        let name = format!("channel-server-{}", tag);
        let factory = ChannelConsumerFactory {
            broker: broker.clone(),
            tag: tag.clone(),
        };
        Self {
            connections: Arc::new(ConnectionContextSupervisor::new(
                format!("channel-consumer-{}", tag),
                factory,
                retry,
            )),
            name,
            tag,
            handler,
            behaviors: Arc::from(Vec::new()),
            in_flight: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    pub fn with_behaviors(mut self, behaviors: Vec<Arc<dyn ReceivedPipelineBehavior>>) -> Self {
        self.behaviors = Arc::from(behaviors);
        self
    }

    /// The consumer's connection supervisor, for adding to an agent tree.
    pub fn connections(&self) -> Arc<ConnectionContextSupervisor<ChannelConsumerFactory>> {
        self.connections.clone()
    }
}

#[async_trait]
impl RequestServer for ChannelRequestServer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, stopping: Signal) -> std::result::Result<(), ServerFailure> {
        let consumer = tokio::select! {
            _ = stopping.wait() => return Ok(()),
            connection = self.connections.get_connection() => connection?,
        };
        let mut receiver = consumer.receiver.lock().await;
        info!(server = %self.name, tag = %self.tag, "Consuming requests");

        loop {
            let delivery = tokio::select! {
                _ = stopping.wait() => return Ok(()),
                delivery = receiver.recv() => delivery,
            };
            let Some(delivery) = delivery else {
                consumer.closed.store(true, Ordering::SeqCst);
                return Err(Box::new(TransportError::Disconnected(format!(
                    "queue '{}' closed",
                    self.tag
                ))));
            };

            let permit = self.in_flight.clone().acquire_owned().await?;
            let handler = self.handler.clone();
            let behaviors = self.behaviors.clone();
            tokio::spawn(async move {
                let _permit = permit;
                dispatch(delivery, handler.as_ref(), &behaviors).await;
            });
        }
    }
}

async fn dispatch(
    delivery: Delivery,
    handler: &dyn QueryHandler,
    behaviors: &[Arc<dyn ReceivedPipelineBehavior>],
) {
    let envelope: RequestEnvelope = match serde_json::from_str(&delivery.payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "Dropping malformed request");
            return;
        }
    };
    let correlation_id = envelope.correlation_id;

    let response = ReceiveNext::new(behaviors, handler)
        .run(ReceiveContext {
            tag: envelope.tag,
            correlation_id,
            request: envelope.request,
        })
        .await;

    let reply = ResponseEnvelope {
        correlation_id,
        response,
    };
    match serde_json::to_string(&reply) {
        Ok(payload) => {
            if delivery.reply_to.send(payload).is_err() {
                debug!(%correlation_id, "Requester gone, reply dropped");
            }
        }
        Err(e) => error!(%correlation_id, error = %e, "Failed to encode reply"),
    }
}
