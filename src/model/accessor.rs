//! Type-erased field accessors.
//!
//! Each declared field becomes a set of closures over `dyn Any` that
//! downcast to the owning type once and then go through plain function
//! pointers, so no per-call reflection happens after the type model is built.

use std::any::Any;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::{short_type_name, DynModel, Model, ModelError, ResolveTag, Result};

type ReadFn = Box<dyn Fn(&dyn Any) -> Result<Value> + Send + Sync>;
type WriteFn = Box<dyn Fn(&mut dyn Any, Value) -> Result<()> + Send + Sync>;
type CountFn = Box<dyn Fn(&dyn Any) -> usize + Send + Sync>;
type ChildFn = Box<dyn for<'a> Fn(&'a dyn Any, usize) -> Option<&'a dyn DynModel> + Send + Sync>;
type ChildMutFn =
    Box<dyn for<'a> Fn(&'a mut dyn Any, usize) -> Option<&'a mut dyn DynModel> + Send + Sync>;

/// What a declared field takes part in.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Plain,
    Resolved(ResolveTag),
    ResolvedModel(ResolveTag),
    Nested,
    Collection,
}

struct Children {
    count: CountFn,
    get: ChildFn,
    get_mut: ChildMutFn,
}

/// Compiled get/set access to one field of a model type.
pub struct FieldAccessor {
    name: &'static str,
    kind: FieldKind,
    read: Option<ReadFn>,
    write: Option<WriteFn>,
    children: Option<Children>,
}

impl fmt::Debug for FieldAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldAccessor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

impl FieldAccessor {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    /// The resolution tag, for remotely resolved fields.
    pub fn tag(&self) -> Option<&ResolveTag> {
        match &self.kind {
            FieldKind::Resolved(tag) | FieldKind::ResolvedModel(tag) => Some(tag),
            _ => None,
        }
    }

    pub fn is_readable(&self) -> bool {
        self.read.is_some()
    }

    /// Current value serialized to JSON.
    pub fn read(&self, owner: &dyn DynModel) -> Result<Value> {
        match &self.read {
            Some(read) => read(owner.as_any()),
            None => Err(ModelError::UnreadableField {
                model: owner.model_name(),
                field: self.name,
            }),
        }
    }

    /// Deserialize `value` into the field. A `null` the field cannot hold
    /// leaves it untouched.
    pub fn write(&self, owner: &mut dyn DynModel, value: Value) -> Result<()> {
        match &self.write {
            Some(write) => write(owner.as_any_mut(), value),
            None => Err(ModelError::Deserialize {
                field: self.name,
                message: "field is not resolvable".to_string(),
            }),
        }
    }

    pub fn child_count(&self, owner: &dyn DynModel) -> usize {
        self.children
            .as_ref()
            .map_or(0, |children| (children.count)(owner.as_any()))
    }

    pub fn child<'a>(&self, owner: &'a dyn DynModel, index: usize) -> Option<&'a dyn DynModel> {
        let children = self.children.as_ref()?;
        (children.get)(owner.as_any(), index)
    }

    pub fn child_mut<'a>(
        &self,
        owner: &'a mut dyn DynModel,
        index: usize,
    ) -> Option<&'a mut dyn DynModel> {
        let children = self.children.as_ref()?;
        (children.get_mut)(owner.as_any_mut(), index)
    }
}

// ============================================================================
// Construction
// ============================================================================

fn child_fn<C>(f: C) -> ChildFn
where
    C: for<'a> Fn(&'a dyn Any, usize) -> Option<&'a dyn DynModel> + Send + Sync + 'static,
{
    Box::new(f)
}

fn child_mut_fn<C>(f: C) -> ChildMutFn
where
    C: for<'a> Fn(&'a mut dyn Any, usize) -> Option<&'a mut dyn DynModel>
        + Send
        + Sync
        + 'static,
{
    Box::new(f)
}

fn wrong_owner<T>() -> ModelError {
    ModelError::WrongOwner {
        model: short_type_name::<T>(),
    }
}

fn reader<T, F>(name: &'static str, get: fn(&T) -> &F) -> ReadFn
where
    T: Model,
    F: Serialize + 'static,
{
    Box::new(move |any: &dyn Any| {
        let owner = any.downcast_ref::<T>().ok_or_else(wrong_owner::<T>)?;
        serde_json::to_value(get(owner)).map_err(|e| ModelError::Serialize {
            field: name,
            message: e.to_string(),
        })
    })
}

fn decode<F: DeserializeOwned>(name: &'static str, value: Value) -> Result<Option<F>> {
    let was_null = value.is_null();
    match serde_json::from_value::<F>(value) {
        Ok(decoded) => Ok(Some(decoded)),
        Err(_) if was_null => Ok(None),
        Err(e) => Err(ModelError::Deserialize {
            field: name,
            message: e.to_string(),
        }),
    }
}

fn optional_children<T, F>(
    get: fn(&T) -> Option<&F>,
    get_mut: fn(&mut T) -> Option<&mut F>,
) -> Children
where
    T: Model,
    F: Model,
{
    Children {
        count: Box::new(move |any: &dyn Any| {
            any.downcast_ref::<T>()
                .and_then(get)
                .map_or(0, |_| 1)
        }),
        get: child_fn(move |any, index| {
            if index != 0 {
                return None;
            }
            let child = get(any.downcast_ref::<T>()?)?;
            Some(child as &dyn DynModel)
        }),
        get_mut: child_mut_fn(move |any, index| {
            if index != 0 {
                return None;
            }
            let child = get_mut(any.downcast_mut::<T>()?)?;
            Some(child as &mut dyn DynModel)
        }),
    }
}

pub(super) fn plain<T, F>(name: &'static str, get: fn(&T) -> &F) -> FieldAccessor
where
    T: Model,
    F: Serialize + 'static,
{
    FieldAccessor {
        name,
        kind: FieldKind::Plain,
        read: Some(reader(name, get)),
        write: None,
        children: None,
    }
}

pub(super) fn resolved<T, F>(
    name: &'static str,
    get: fn(&T) -> &F,
    get_mut: fn(&mut T) -> &mut F,
    tag: ResolveTag,
) -> FieldAccessor
where
    T: Model,
    F: Serialize + DeserializeOwned + 'static,
{
    FieldAccessor {
        name,
        kind: FieldKind::Resolved(tag),
        read: Some(reader(name, get)),
        write: Some(Box::new(move |any: &mut dyn Any, value: Value| {
            let owner = any.downcast_mut::<T>().ok_or_else(wrong_owner::<T>)?;
            if let Some(decoded) = decode::<F>(name, value)? {
                *get_mut(owner) = decoded;
            }
            Ok(())
        })),
        children: None,
    }
}

pub(super) fn resolved_model<T, F>(
    name: &'static str,
    get: fn(&T) -> Option<&F>,
    get_mut: fn(&mut T) -> Option<&mut F>,
    set: fn(&mut T, F),
    tag: ResolveTag,
) -> FieldAccessor
where
    T: Model,
    F: Model + DeserializeOwned,
{
    FieldAccessor {
        name,
        kind: FieldKind::ResolvedModel(tag),
        read: None,
        write: Some(Box::new(move |any: &mut dyn Any, value: Value| {
            let owner = any.downcast_mut::<T>().ok_or_else(wrong_owner::<T>)?;
            if let Some(decoded) = decode::<F>(name, value)? {
                set(owner, decoded);
            }
            Ok(())
        })),
        children: Some(optional_children(get, get_mut)),
    }
}

pub(super) fn nested<T, F>(
    name: &'static str,
    get: fn(&T) -> Option<&F>,
    get_mut: fn(&mut T) -> Option<&mut F>,
) -> FieldAccessor
where
    T: Model,
    F: Model,
{
    FieldAccessor {
        name,
        kind: FieldKind::Nested,
        read: None,
        write: None,
        children: Some(optional_children(get, get_mut)),
    }
}

pub(super) fn collection<T, F>(
    name: &'static str,
    get: fn(&T) -> &[F],
    get_mut: fn(&mut T) -> &mut [F],
) -> FieldAccessor
where
    T: Model,
    F: Model,
{
    FieldAccessor {
        name,
        kind: FieldKind::Collection,
        read: None,
        write: None,
        children: Some(Children {
            count: Box::new(move |any: &dyn Any| {
                any.downcast_ref::<T>().map_or(0, |owner| get(owner).len())
            }),
            get: child_fn(move |any, index| {
                let item = get(any.downcast_ref::<T>()?).get(index)?;
                Some(item as &dyn DynModel)
            }),
            get_mut: child_mut_fn(move |any, index| {
                let item = get_mut(any.downcast_mut::<T>()?).get_mut(index)?;
                Some(item as &mut dyn DynModel)
            }),
        }),
    }
}
