//! Transport plumbing shared by request/reply bindings.
//!
//! - [`TransportError`]: failures of an outbound call
//! - [`PendingRequests`]: correlation id to waiter table for asynchronous replies
//! - [`channel`]: an in-process broker binding
//! - [`local`]: a direct binding without a broker

pub mod channel;
pub mod local;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

use crate::supervision::{lock, ConnectionError, Signal};
use crate::wire::{Response, WireError};

/// Failures of an outbound call.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No reply within the request timeout.
    #[error("Request timed out after {}ms", .after.as_millis())]
    Timeout { after: Duration },

    /// The caller gave up on the request.
    #[error("Request cancelled by caller")]
    Cancelled,

    #[error("Transport disconnected: {0}")]
    Disconnected(String),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Wire(#[from] WireError),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Waiters for replies, keyed by correlation id.
///
/// An entry lives from [`register`](Self::register) until its reply arrives,
/// its wait times out, or the waiting future is dropped.
#[derive(Debug, Default)]
pub struct PendingRequests {
    waiters: Mutex<HashMap<Uuid, oneshot::Sender<Response>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a correlation id and the receiver its reply will arrive on.
    pub fn register(&self) -> (Uuid, oneshot::Receiver<Response>) {
        let correlation_id = Uuid::new_v4();
        let (sender, receiver) = oneshot::channel();
        lock(&self.waiters).insert(correlation_id, sender);
        (correlation_id, receiver)
    }

    /// Hand a reply to its waiter. Returns false for unknown or expired ids.
    pub fn complete(&self, correlation_id: Uuid, response: Response) -> bool {
        let waiter = lock(&self.waiters).remove(&correlation_id);
        match waiter {
            Some(sender) => sender.send(response).is_ok(),
            None => {
                debug!(%correlation_id, "Reply for unknown or expired request");
                false
            }
        }
    }

    pub fn remove(&self, correlation_id: &Uuid) {
        lock(&self.waiters).remove(correlation_id);
    }

    pub fn len(&self) -> usize {
        lock(&self.waiters).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for the reply to `correlation_id`.
    ///
    /// Times out with [`TransportError::Timeout`], or fails with
    /// [`TransportError::Cancelled`] once `cancel` fires. Either way, and when
    /// the returned future is dropped early, the entry is removed.
    pub async fn wait(
        &self,
        correlation_id: Uuid,
        receiver: oneshot::Receiver<Response>,
        timeout: Duration,
        cancel: Option<&Signal>,
    ) -> Result<Response> {
        let _entry = EntryGuard {
            pending: self,
            correlation_id,
        };

        let cancelled = async {
            match cancel {
                Some(signal) => signal.wait().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            reply = receiver => reply.map_err(|_| {
                TransportError::Disconnected("reply channel closed".to_string())
            }),
            _ = tokio::time::sleep(timeout) => Err(TransportError::Timeout { after: timeout }),
            _ = cancelled => Err(TransportError::Cancelled),
        }
    }
}

struct EntryGuard<'a> {
    pending: &'a PendingRequests,
    correlation_id: Uuid,
}

impl Drop for EntryGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.correlation_id);
    }
}
