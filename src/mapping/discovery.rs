//! Locating tagged fields in an object graph.
//!
//! Models are addressed by paths from the root: each hop is a field index
//! plus a child index. Paths stay valid while values are written, so
//! discovery can borrow the graph immutably and the merge step can later
//! borrow it mutably one model at a time.

use crate::model::{DynModel, FieldKind, ModelError, TagId, TypeModelRegistry};

/// Hops from the root: `(field index, child index)`.
pub(super) type Path = Vec<(usize, usize)>;

/// A tagged field found during discovery.
#[derive(Debug, Clone)]
pub(super) struct Discovered {
    pub path: Path,
    pub model: &'static str,
    pub field: &'static str,
    pub field_index: usize,
    pub source_index: usize,
    pub order: usize,
    pub tag: TagId,
    pub expression: String,
    /// Writing this field produces a model for the next pass.
    pub spawns: bool,
}

pub(super) fn node<'a>(
    registry: &TypeModelRegistry,
    root: &'a dyn DynModel,
    path: &[(usize, usize)],
) -> Result<Option<&'a dyn DynModel>, ModelError> {
    let mut current = root;
    for &(field, child) in path {
        let model = registry.get(current)?;
        match model.fields().get(field).and_then(|f| f.child(current, child)) {
            Some(next) => current = next,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

pub(super) fn node_mut<'a>(
    registry: &TypeModelRegistry,
    root: &'a mut dyn DynModel,
    path: &[(usize, usize)],
) -> Result<Option<&'a mut dyn DynModel>, ModelError> {
    let mut current = root;
    for &(field, child) in path {
        let model = registry.get(&*current)?;
        let Some(accessor) = model.fields().get(field) else {
            return Ok(None);
        };
        match accessor.child_mut(current, child) {
            Some(next) => current = next,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

/// Tagged fields of every model reachable from the models at `batch`.
pub(super) fn discover(
    registry: &TypeModelRegistry,
    root: &dyn DynModel,
    batch: &[Path],
) -> Result<Vec<Discovered>, ModelError> {
    let mut found = Vec::new();
    for start in batch {
        if let Some(model) = node(registry, root, start)? {
            let mut path = start.clone();
            walk(registry, model, &mut path, &mut found)?;
        }
    }
    Ok(found)
}

fn walk(
    registry: &TypeModelRegistry,
    current: &dyn DynModel,
    path: &mut Path,
    found: &mut Vec<Discovered>,
) -> Result<(), ModelError> {
    let model = registry.get(current)?;

    for (index, field, chain) in model.resolvable() {
        let head = chain.head();
        let source_index = model
            .field_index(head.source)
            .ok_or(ModelError::UnknownField {
                model: model.name(),
                field: field.name(),
                required: head.source,
            })?;
        found.push(Discovered {
            path: path.clone(),
            model: model.name(),
            field: field.name(),
            field_index: index,
            source_index,
            order: chain.order(),
            tag: head.tag,
            expression: head.expression.clone(),
            spawns: matches!(field.kind(), FieldKind::ResolvedModel(_)),
        });
    }

    for (index, field) in model.fields().iter().enumerate() {
        for child_index in 0..field.child_count(current) {
            if let Some(child) = field.child(current, child_index) {
                path.push((index, child_index));
                walk(registry, child, path, found)?;
                path.pop();
            }
        }
    }
    Ok(())
}
