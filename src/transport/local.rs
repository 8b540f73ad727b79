//! In-process binding: requests go straight through a receive pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use super::Result;
use crate::handler::{ClientRequestHandler, QueryHandler};
use crate::pipeline::{ReceiveContext, ReceiveNext, ReceivedPipelineBehavior};
use crate::wire::{Request, Response};

/// Answers requests for one tag from a local [`QueryHandler`].
pub struct LocalRequestHandler {
    tag: String,
    query: Arc<dyn QueryHandler>,
    behaviors: Vec<Arc<dyn ReceivedPipelineBehavior>>,
}

impl LocalRequestHandler {
    pub fn new(tag: impl Into<String>, query: Arc<dyn QueryHandler>) -> Self {
        Self {
            tag: tag.into(),
            query,
            behaviors: Vec::new(),
        }
    }

    pub fn with_behaviors(mut self, behaviors: Vec<Arc<dyn ReceivedPipelineBehavior>>) -> Self {
        self.behaviors = behaviors;
        self
    }
}

#[async_trait]
impl ClientRequestHandler for LocalRequestHandler {
    async fn send(&self, request: Request) -> Result<Response> {
        Ok(ReceiveNext::new(&self.behaviors, self.query.as_ref())
            .run(ReceiveContext {
                tag: self.tag.clone(),
                correlation_id: Uuid::new_v4(),
                request,
            })
            .await)
    }
}
