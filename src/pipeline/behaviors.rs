//! Built-in behaviors.

use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info_span, warn, Instrument};

use super::{
    ReceiveContext, ReceiveNext, ReceivedPipelineBehavior, SendContext, SendNext,
    SendPipelineBehavior,
};
use crate::transport::TransportError;
use crate::wire::Response;

/// Wraps each outbound call in a span and logs its latency.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSendBehavior;

#[async_trait]
impl SendPipelineBehavior for TracingSendBehavior {
    async fn handle(
        &self,
        context: SendContext,
        next: SendNext<'_>,
    ) -> Result<Response, TransportError> {
        let span = info_span!(
            "distmap.send",
            tag = %context.tag,
            order = context.order,
            ids = context.request.selector_ids.len()
        );
        let start = Instant::now();

        let result = next.run(context).instrument(span.clone()).await;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        span.in_scope(|| match &result {
            Ok(response) => debug!(
                elapsed_ms,
                success = response.is_success,
                "Remote call completed"
            ),
            Err(e) => warn!(elapsed_ms, error = %e, "Remote call failed"),
        });
        result
    }
}

/// Wraps each inbound query in a span and logs its latency.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReceiveBehavior;

#[async_trait]
impl ReceivedPipelineBehavior for TracingReceiveBehavior {
    async fn handle(&self, context: ReceiveContext, next: ReceiveNext<'_>) -> Response {
        let span = info_span!(
            "distmap.receive",
            tag = %context.tag,
            correlation_id = %context.correlation_id
        );
        let start = Instant::now();

        let response = next.run(context).instrument(span.clone()).await;

        span.in_scope(|| {
            debug!(
                elapsed_ms = start.elapsed().as_millis() as u64,
                success = response.is_success,
                "Query answered"
            )
        });
        response
    }
}
