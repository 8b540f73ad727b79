//! Collaborator seams at both ends of a remote resolution.
//!
//! - [`ClientRequestHandler`]: sends one batched [`Request`] for a tag and
//!   returns its [`Response`]. One implementation per transport.
//! - [`QueryHandler`]: answers a [`Query`] from a local store. One
//!   implementation per storage backend.

use async_trait::async_trait;

use crate::compiler::CompileError;
use crate::transport::TransportError;
use crate::wire::{DataResponse, Request, Response, WireError};

/// Outbound side: carries a request to the service owning a tag.
#[async_trait]
pub trait ClientRequestHandler: Send + Sync {
    async fn send(&self, request: Request) -> Result<Response, TransportError>;
}

/// A request as seen by the owning service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    /// Name of the resolution tag, which doubles as the collection name.
    pub tag: String,
    pub selector_ids: Vec<String>,
    pub expressions: Vec<String>,
}

impl Query {
    pub fn from_request(tag: impl Into<String>, request: &Request) -> Result<Self, WireError> {
        Ok(Self {
            tag: tag.into(),
            selector_ids: request.selector_ids.clone(),
            expressions: request.expression_list()?,
        })
    }
}

/// Failures answering a query.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("Unknown collection '{0}'")]
    UnknownCollection(String),

    #[error("Invalid expression: {0}")]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Inbound side: evaluates expressions against local data.
#[async_trait]
pub trait QueryHandler: Send + Sync {
    async fn query(&self, query: &Query) -> Result<Vec<DataResponse>, QueryError>;
}
