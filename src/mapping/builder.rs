//! Mapper construction with eager validation.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use super::{DistributedMapper, MappingConfig, MappingError, Result};
use crate::handler::ClientRequestHandler;
use crate::model::{self, Model, ResolutionTag, TagId, TypeModel, TypeModelRegistry};
use crate::pipeline::SendPipelineBehavior;

type ModelCheck = fn(&TypeModelRegistry) -> model::Result<Arc<TypeModel>>;

fn type_model_of<M: Model>(registry: &TypeModelRegistry) -> model::Result<Arc<TypeModel>> {
    registry.of::<M>()
}

/// Builds a [`DistributedMapper`].
///
/// `build` fails on a tag registered twice, and on any model passed to
/// [`expect_model`](Self::expect_model) that is malformed or uses a tag
/// without a handler.
#[derive(Default)]
pub struct MapperBuilder {
    handlers: HashMap<TagId, Arc<dyn ClientRequestHandler>>,
    duplicates: Vec<&'static str>,
    behaviors: Vec<Arc<dyn SendPipelineBehavior>>,
    models: Vec<ModelCheck>,
    registry: Option<Arc<TypeModelRegistry>>,
    config: MappingConfig,
}

impl MapperBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route requests for tag `T` through `handler`.
    pub fn handler<T: ResolutionTag>(mut self, handler: Arc<dyn ClientRequestHandler>) -> Self {
        let tag = TagId::of::<T>();
        if self.handlers.insert(tag, handler).is_some() {
            self.duplicates.push(tag.name());
        }
        self
    }

    /// Append a send behavior. Behaviors run in registration order.
    pub fn behavior(mut self, behavior: Arc<dyn SendPipelineBehavior>) -> Self {
        self.behaviors.push(behavior);
        self
    }

    /// Validate `M` when building.
    pub fn expect_model<M: Model>(mut self) -> Self {
        self.models.push(type_model_of::<M>);
        self
    }

    /// Share a type model cache with other mappers.
    pub fn registry(mut self, registry: Arc<TypeModelRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Default parameters used by [`DistributedMapper::map`].
    pub fn config(mut self, config: MappingConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<DistributedMapper> {
        if let Some(&tag) = self.duplicates.first() {
            return Err(MappingError::DuplicateHandler(tag));
        }

        let registry = self.registry.unwrap_or_default();
        for check in &self.models {
            let model = check(&registry)?;
            for (_, field, chain) in model.resolvable() {
                for step in chain.steps() {
                    if !self.handlers.contains_key(&step.tag) {
                        return Err(MappingError::UnresolvedTag {
                            tag: step.tag.name(),
                            model: model.name(),
                            field: field.name(),
                        });
                    }
                }
            }
        }

        info!(
            handlers = self.handlers.len(),
            behaviors = self.behaviors.len(),
            models = self.models.len(),
            "Distributed mapper built"
        );
        Ok(DistributedMapper::new(
            self.handlers,
            self.behaviors,
            registry,
            self.config,
        ))
    }
}
