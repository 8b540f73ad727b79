//! The mapping passes.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde_json::Value;
use tracing::{debug, info, info_span, warn, Instrument};

use super::discovery::{discover, node, node_mut, Discovered, Path};
use super::{MapReport, MapperBuilder, MappingConfig, MappingError, Result};
use crate::compiler::value::type_name;
use crate::handler::ClientRequestHandler;
use crate::model::{DynModel, TagId, TypeModelRegistry};
use crate::pipeline::{SendContext, SendNext, SendPipelineBehavior};
use crate::supervision::Signal;
use crate::transport::TransportError;
use crate::wire::{selector_text, DataResponse, Request};

/// A resolved value's destination.
struct Write {
    path: Path,
    field_index: usize,
    id: String,
    expression: String,
    spawns: bool,
}

/// One batched request and the fields it resolves.
struct Call {
    tag: TagId,
    handler: Arc<dyn ClientRequestHandler>,
    order: usize,
    request: Request,
    writes: Vec<Write>,
}

/// Resolves tagged fields of model graphs through registered handlers.
pub struct DistributedMapper {
    handlers: HashMap<TagId, Arc<dyn ClientRequestHandler>>,
    behaviors: Vec<Arc<dyn SendPipelineBehavior>>,
    registry: Arc<TypeModelRegistry>,
    config: MappingConfig,
}

/// String form of a selector id; `None` for null.
fn selector_id(value: &Value) -> std::result::Result<Option<String>, &'static str> {
    match value {
        Value::Null => Ok(None),
        other => selector_text(other).map(Some).ok_or_else(|| type_name(other)),
    }
}

impl DistributedMapper {
    pub(super) fn new(
        handlers: HashMap<TagId, Arc<dyn ClientRequestHandler>>,
        behaviors: Vec<Arc<dyn SendPipelineBehavior>>,
        registry: Arc<TypeModelRegistry>,
        config: MappingConfig,
    ) -> Self {
        Self {
            handlers,
            behaviors,
            registry,
            config,
        }
    }

    pub fn builder() -> MapperBuilder {
        MapperBuilder::new()
    }

    pub fn config(&self) -> &MappingConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TypeModelRegistry> {
        &self.registry
    }

    /// [`map_data`](Self::map_data) with the built-in parameters and no
    /// cancellation.
    pub async fn map(&self, root: &mut dyn DynModel) -> Result<MapReport> {
        self.map_data(root, &self.config, &Signal::new()).await
    }

    /// Resolve every tagged field reachable from `root`.
    pub async fn map_data(
        &self,
        root: &mut dyn DynModel,
        parameters: &MappingConfig,
        cancel: &Signal,
    ) -> Result<MapReport> {
        let mut report = MapReport::default();
        let mut batch: Vec<Path> = vec![Vec::new()];

        // The root pass always runs.
        let limit = parameters.max_spawn_depth.max(1);
        while !batch.is_empty() {
            if report.passes >= limit {
                let exceeded = MappingError::SpawnLimitExceeded {
                    limit,
                    pending: batch.len(),
                };
                if parameters.fail_on_spawn_limit {
                    return Err(exceeded);
                }
                warn!(error = %exceeded, "Stopping at spawn depth");
                break;
            }

            report.passes += 1;
            let span = info_span!("distmap.pass", pass = report.passes, models = batch.len());
            batch = self
                .run_pass(root, &batch, parameters, cancel, &mut report)
                .instrument(span)
                .await?;
        }

        info!(
            model = root.model_name(),
            passes = report.passes,
            calls = report.calls,
            fields_resolved = report.fields_resolved,
            failures = report.failures.len(),
            "Mapping complete"
        );
        Ok(report)
    }

    /// One pass over the models at `batch`. Returns the models written by
    /// this pass.
    async fn run_pass(
        &self,
        root: &mut dyn DynModel,
        batch: &[Path],
        parameters: &MappingConfig,
        cancel: &Signal,
        report: &mut MapReport,
    ) -> Result<Vec<Path>> {
        let discovered = discover(&self.registry, &*root, batch)?;
        debug!(fields = discovered.len(), "Discovered tagged fields");

        let mut groups: BTreeMap<usize, Vec<(TagId, Vec<Discovered>)>> = BTreeMap::new();
        for field in discovered {
            let group = groups.entry(field.order).or_default();
            match group.iter_mut().find(|(tag, _)| *tag == field.tag) {
                Some((_, fields)) => fields.push(field),
                None => group.push((field.tag, vec![field])),
            }
        }

        let mut next = Vec::new();
        for (order, tags) in groups {
            if cancel.is_fired() {
                return Err(MappingError::Cancelled);
            }

            let calls = self.prepare(&*root, order, tags, parameters, report)?;
            if calls.is_empty() {
                continue;
            }
            report.calls += calls.len();

            let mut sends = Vec::with_capacity(calls.len());
            for call in calls {
                sends.push(self.dispatch(call, parameters, cancel));
            }
            let outcomes: Vec<(Call, Result<Vec<DataResponse>>)> = stream::iter(sends)
                .buffer_unordered(parameters.max_concurrency.max(1))
                .collect()
                .await;

            for (call, outcome) in outcomes {
                self.merge(root, call, outcome, parameters, report, &mut next)?;
            }
        }
        Ok(next)
    }

    /// Record a failure, or return it in strict mode.
    fn fail(
        &self,
        error: MappingError,
        parameters: &MappingConfig,
        report: &mut MapReport,
    ) -> Result<()> {
        if parameters.strict {
            return Err(error);
        }
        warn!(error = %error, "Resolution failed, field left unset");
        report.failures.push(error);
        Ok(())
    }

    /// Build one deduplicated request per tag of an order group.
    fn prepare(
        &self,
        root: &dyn DynModel,
        order: usize,
        tags: Vec<(TagId, Vec<Discovered>)>,
        parameters: &MappingConfig,
        report: &mut MapReport,
    ) -> Result<Vec<Call>> {
        let mut calls = Vec::new();

        for (tag, fields) in tags {
            let Some(handler) = self.handlers.get(&tag) else {
                let first = &fields[0];
                self.fail(
                    MappingError::UnresolvedTag {
                        tag: tag.name(),
                        model: first.model,
                        field: first.field,
                    },
                    parameters,
                    report,
                )?;
                continue;
            };

            let mut ids = Vec::new();
            let mut seen_ids = HashSet::new();
            let mut expressions = Vec::new();
            let mut seen_expressions = HashSet::new();
            let mut writes = Vec::new();

            for field in fields {
                let Some(owner) = node(&self.registry, root, &field.path)? else {
                    continue;
                };
                let model = self.registry.get(owner)?;
                let value = match model.fields()[field.source_index].read(owner) {
                    Ok(value) => value,
                    Err(e) => {
                        self.fail(e.into(), parameters, report)?;
                        continue;
                    }
                };

                let id = match selector_id(&value) {
                    Ok(Some(id)) => id,
                    Ok(None) => {
                        debug!(model = field.model, field = field.field, "Selector id is null, skipping");
                        continue;
                    }
                    Err(found) => {
                        self.fail(
                            MappingError::UnsupportedSelectorType {
                                model: field.model,
                                field: model.fields()[field.source_index].name(),
                                found,
                            },
                            parameters,
                            report,
                        )?;
                        continue;
                    }
                };

                if seen_ids.insert(id.clone()) {
                    ids.push(id.clone());
                }
                if seen_expressions.insert(field.expression.clone()) {
                    expressions.push(field.expression.clone());
                }
                writes.push(Write {
                    path: field.path,
                    field_index: field.field_index,
                    id,
                    expression: field.expression,
                    spawns: field.spawns,
                });
            }

            if writes.is_empty() {
                continue;
            }
            calls.push(Call {
                tag,
                handler: handler.clone(),
                order,
                request: Request::new(ids, &expressions)?,
                writes,
            });
        }
        Ok(calls)
    }

    async fn dispatch(
        &self,
        call: Call,
        parameters: &MappingConfig,
        cancel: &Signal,
    ) -> (Call, Result<Vec<DataResponse>>) {
        let outcome = self.call(&call, parameters, cancel).await;
        (call, outcome)
    }

    /// Send one call through the pipeline, bounded by timeout and cancel.
    async fn call(
        &self,
        call: &Call,
        parameters: &MappingConfig,
        cancel: &Signal,
    ) -> Result<Vec<DataResponse>> {
        let tag = call.tag.name();
        let timeout = parameters.request_timeout();
        let span = info_span!(
            "distmap.batch",
            tag,
            order = call.order,
            ids = call.request.selector_ids.len()
        );

        let send = SendNext::new(&self.behaviors, call.handler.as_ref()).run(SendContext {
            tag: call.tag,
            order: call.order,
            request: call.request.clone(),
        });
        let outcome = async {
            tokio::select! {
                _ = cancel.wait() => Err(TransportError::Cancelled),
                sent = tokio::time::timeout(timeout, send) => {
                    sent.unwrap_or(Err(TransportError::Timeout { after: timeout }))
                }
            }
        }
        .instrument(span)
        .await;

        match outcome {
            Ok(response) => response
                .into_result()
                .map_err(|source| MappingError::Remote { tag, source }),
            Err(TransportError::Cancelled) => Err(MappingError::Cancelled),
            Err(source) => Err(MappingError::Transport { tag, source }),
        }
    }

    /// Write a call's values onto their fields.
    fn merge(
        &self,
        root: &mut dyn DynModel,
        call: Call,
        outcome: Result<Vec<DataResponse>>,
        parameters: &MappingConfig,
        report: &mut MapReport,
        next: &mut Vec<Path>,
    ) -> Result<()> {
        let items = match outcome {
            Ok(items) => items,
            Err(MappingError::Cancelled) => return Err(MappingError::Cancelled),
            Err(e) => return self.fail(e, parameters, report),
        };

        let mut values: HashMap<String, HashMap<String, Value>> = HashMap::new();
        for item in items {
            let entity = values.entry(item.id).or_default();
            for value in item.values {
                match value.decode() {
                    Ok(decoded) => {
                        entity.insert(value.expression, decoded);
                    }
                    Err(e) => self.fail(e.into(), parameters, report)?,
                }
            }
        }

        for write in call.writes {
            let Some(value) = values
                .get(&write.id)
                .and_then(|entity| entity.get(&write.expression))
            else {
                debug!(
                    tag = %call.tag,
                    id = %write.id,
                    expression = %write.expression,
                    "No value returned"
                );
                continue;
            };

            let Some(owner) = node_mut(&self.registry, &mut *root, &write.path)? else {
                continue;
            };
            let model = self.registry.get(&*owner)?;
            match model.fields()[write.field_index].write(owner, value.clone()) {
                Ok(()) => {
                    report.fields_resolved += 1;
                    if write.spawns && !value.is_null() {
                        let mut child = write.path;
                        child.push((write.field_index, 0));
                        next.push(child);
                    }
                }
                Err(e) => self.fail(e.into(), parameters, report)?,
            }
        }
        Ok(())
    }
}
