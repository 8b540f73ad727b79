//! Ordered middleware around outbound calls and inbound queries.
//!
//! A behavior receives the call context and a `next` continuation. It may
//! delegate with `next.run(context)`, alter the context first, or return a
//! response of its own without delegating.

mod behaviors;

pub use behaviors::{TracingReceiveBehavior, TracingSendBehavior};

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;
use uuid::Uuid;

use crate::handler::{ClientRequestHandler, Query, QueryError, QueryHandler};
use crate::model::TagId;
use crate::transport::TransportError;
use crate::wire::{Fault, Request, Response};

// ============================================================================
// Send side
// ============================================================================

/// One batched outbound call.
#[derive(Debug, Clone)]
pub struct SendContext {
    pub tag: TagId,
    /// Dependency order of the fields this call resolves.
    pub order: usize,
    pub request: Request,
}

#[async_trait]
pub trait SendPipelineBehavior: Send + Sync {
    async fn handle(
        &self,
        context: SendContext,
        next: SendNext<'_>,
    ) -> Result<Response, TransportError>;
}

/// The rest of a send pipeline.
pub struct SendNext<'a> {
    behaviors: &'a [Arc<dyn SendPipelineBehavior>],
    handler: &'a dyn ClientRequestHandler,
}

impl<'a> SendNext<'a> {
    pub fn new(
        behaviors: &'a [Arc<dyn SendPipelineBehavior>],
        handler: &'a dyn ClientRequestHandler,
    ) -> Self {
        Self { behaviors, handler }
    }

    pub async fn run(self, context: SendContext) -> Result<Response, TransportError> {
        match self.behaviors.split_first() {
            Some((behavior, rest)) => {
                behavior
                    .handle(context, SendNext::new(rest, self.handler))
                    .await
            }
            None => self.handler.send(context.request).await,
        }
    }
}

// ============================================================================
// Receive side
// ============================================================================

/// One inbound request.
#[derive(Debug, Clone)]
pub struct ReceiveContext {
    pub tag: String,
    pub correlation_id: Uuid,
    pub request: Request,
}

#[async_trait]
pub trait ReceivedPipelineBehavior: Send + Sync {
    async fn handle(&self, context: ReceiveContext, next: ReceiveNext<'_>) -> Response;
}

/// The rest of a receive pipeline.
pub struct ReceiveNext<'a> {
    behaviors: &'a [Arc<dyn ReceivedPipelineBehavior>],
    handler: &'a dyn QueryHandler,
}

impl<'a> ReceiveNext<'a> {
    pub fn new(
        behaviors: &'a [Arc<dyn ReceivedPipelineBehavior>],
        handler: &'a dyn QueryHandler,
    ) -> Self {
        Self { behaviors, handler }
    }

    pub async fn run(self, context: ReceiveContext) -> Response {
        match self.behaviors.split_first() {
            Some((behavior, rest)) => {
                behavior
                    .handle(context, ReceiveNext::new(rest, self.handler))
                    .await
            }
            None => answer(self.handler, context).await,
        }
    }
}

/// Run the query handler and wrap its outcome in a [`Response`].
async fn answer(handler: &dyn QueryHandler, context: ReceiveContext) -> Response {
    let outcome = match Query::from_request(&context.tag, &context.request) {
        Ok(query) => handler.query(&query).await,
        Err(e) => Err(QueryError::from(e)),
    };

    match outcome {
        Ok(items) => Response::success(items),
        Err(e) => {
            warn!(
                tag = %context.tag,
                correlation_id = %context.correlation_id,
                error = %e,
                "Query failed"
            );
            Response::failure(Fault::from_error(
                &e,
                Some(context.correlation_id),
                &context.tag,
            ))
        }
    }
}
