//! Per-type models and their process-wide cache.

use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use tracing::debug;

use super::graph::build_chain;
use super::{short_type_name, DependencyChain, DynModel, FieldAccessor, Model, ModelError, ModelSchema, Result};

/// Accessors and dependency graph of one model type. Immutable once built.
#[derive(Debug)]
pub struct TypeModel {
    name: &'static str,
    fields: Vec<FieldAccessor>,
    chains: HashMap<&'static str, DependencyChain>,
}

impl TypeModel {
    pub fn build<T: Model>() -> Result<Self> {
        let name = short_type_name::<T>();
        let mut schema = ModelSchema::<T>::new();
        T::describe(&mut schema);
        let fields = schema.into_fields();

        let mut seen = HashSet::new();
        for field in &fields {
            if !seen.insert(field.name()) {
                return Err(ModelError::DuplicateField {
                    model: name,
                    field: field.name(),
                });
            }
        }

        let mut chains = HashMap::new();
        for field in &fields {
            if let Some(chain) = build_chain(name, &fields, field)? {
                chains.insert(field.name(), chain);
            }
        }

        Ok(Self {
            name,
            fields,
            chains,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn fields(&self) -> &[FieldAccessor] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldAccessor> {
        self.fields.iter().find(|f| f.name() == name)
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name() == name)
    }

    pub fn chain(&self, field: &str) -> Option<&DependencyChain> {
        self.chains.get(field)
    }

    /// Resolution order of a tagged field.
    pub fn order(&self, field: &str) -> Option<usize> {
        self.chain(field).map(DependencyChain::order)
    }

    /// Tagged fields with their chains, in declaration order.
    pub fn resolvable(&self) -> impl Iterator<Item = (usize, &FieldAccessor, &DependencyChain)> {
        self.fields
            .iter()
            .enumerate()
            .filter_map(|(i, f)| self.chains.get(f.name()).map(|c| (i, f, c)))
    }
}

/// Cache of [`TypeModel`]s keyed by type.
///
/// Two threads building the same type concurrently both build it and the
/// first insert wins; construction is a pure function of the type.
#[derive(Debug, Default)]
pub struct TypeModelRegistry {
    models: RwLock<HashMap<TypeId, Arc<TypeModel>>>,
}

impl TypeModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of<T: Model>(&self) -> Result<Arc<TypeModel>> {
        self.lookup(TypeId::of::<T>(), TypeModel::build::<T>)
    }

    /// Type model of a type-erased instance.
    pub fn get(&self, model: &dyn DynModel) -> Result<Arc<TypeModel>> {
        self.lookup(model.as_any().type_id(), || model.build_type_model())
    }

    pub fn len(&self) -> usize {
        self.models.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup<F>(&self, type_id: TypeId, build: F) -> Result<Arc<TypeModel>>
    where
        F: FnOnce() -> Result<TypeModel>,
    {
        if let Some(found) = self
            .models
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&type_id)
        {
            return Ok(found.clone());
        }

        let built = Arc::new(build()?);
        debug!(
            model = built.name(),
            fields = built.fields().len(),
            resolvable = built.chains.len(),
            "Built type model"
        );
        let mut models = self.models.write().unwrap_or_else(|e| e.into_inner());
        Ok(models.entry(type_id).or_insert(built).clone())
    }
}
