//! In-memory document collections answering queries.
//!
//! Collections are keyed by tag name. Expressions run through either
//! compiler backend; an expression that fails to evaluate against one
//! document yields `null` for that document.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::document_id;
use crate::compiler::document::evaluate;
use crate::compiler::{Accessor, AccessorCompiler, DocumentCompiler, EvaluationError};
use crate::expression::ExpressionCache;
use crate::handler::{Query, QueryError, QueryHandler};
use crate::wire::{DataResponse, ValueResponse};

/// Which compiler evaluates expressions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueryBackend {
    #[default]
    Accessor,
    Document,
}

enum Projection {
    Accessor(Accessor),
    Document(Value),
}

impl Projection {
    fn apply(&self, document: &Value) -> Result<Value, EvaluationError> {
        match self {
            Projection::Accessor(accessor) => accessor.evaluate(document),
            Projection::Document(expression) => evaluate(expression, document),
        }
    }
}

/// JSON documents grouped into collections.
pub struct MemoryStore {
    backend: QueryBackend,
    collections: RwLock<HashMap<String, Vec<Value>>>,
    accessors: AccessorCompiler,
    documents: DocumentCompiler,
    queries: AtomicU64,
}

impl MemoryStore {
    pub fn new(backend: QueryBackend) -> Self {
        let expressions = Arc::new(ExpressionCache::new());
        Self {
            backend,
            collections: RwLock::new(HashMap::new()),
            accessors: AccessorCompiler::with_cache(expressions.clone()),
            documents: DocumentCompiler::with_cache(expressions),
            queries: AtomicU64::new(0),
        }
    }

    pub fn backend(&self) -> QueryBackend {
        self.backend
    }

    /// Add a document to `collection`, creating the collection if needed.
    pub fn insert(&self, collection: &str, document: Value) {
        self.collections
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(collection.to_string())
            .or_default()
            .push(document);
    }

    pub fn with_documents(
        self,
        collection: &str,
        documents: impl IntoIterator<Item = Value>,
    ) -> Self {
        for document in documents {
            self.insert(collection, document);
        }
        self
    }

    /// Queries answered so far.
    pub fn queries(&self) -> u64 {
        self.queries.load(Ordering::SeqCst)
    }

    fn compile(&self, expression: &str) -> Result<Projection, QueryError> {
        Ok(match self.backend {
            QueryBackend::Accessor => Projection::Accessor(self.accessors.compile_str(expression)?),
            QueryBackend::Document => Projection::Document(self.documents.compile_str(expression)?),
        })
    }
}

#[async_trait]
impl QueryHandler for MemoryStore {
    async fn query(&self, query: &Query) -> Result<Vec<DataResponse>, QueryError> {
        self.queries.fetch_add(1, Ordering::SeqCst);

        let projections = query
            .expressions
            .iter()
            .map(|expression| Ok((expression, self.compile(expression)?)))
            .collect::<Result<Vec<_>, QueryError>>()?;

        let collections = self.collections.read().unwrap_or_else(|e| e.into_inner());
        let documents = collections
            .get(&query.tag)
            .ok_or_else(|| QueryError::UnknownCollection(query.tag.clone()))?;

        let mut items = Vec::new();
        for id in &query.selector_ids {
            let Some(document) = documents
                .iter()
                .find(|d| document_id(d).as_deref() == Some(id.as_str()))
            else {
                debug!(collection = %query.tag, id = %id, "No document for selector id");
                continue;
            };

            let values = projections
                .iter()
                .map(|(expression, projection)| {
                    let value = projection.apply(document).unwrap_or_else(|e| {
                        debug!(expression = %expression, error = %e, "Evaluation failed, yielding null");
                        Value::Null
                    });
                    ValueResponse::new(expression.as_str(), &value)
                })
                .collect();
            items.push(DataResponse {
                id: id.clone(),
                values,
            });
        }
        Ok(items)
    }
}
