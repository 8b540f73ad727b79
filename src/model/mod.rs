//! Resolvable model description.
//!
//! A model type declares its fields once through [`Model::describe`]. The
//! declaration is turned into a [`TypeModel`]: type-erased accessors per
//! field plus the dependency graph of its resolution tags. Type models are
//! built on first use and cached in a [`TypeModelRegistry`].
//!
//! ```ignore
//! struct UserTag;
//! impl ResolutionTag for UserTag {
//!     const NAME: &'static str = "User";
//! }
//!
//! impl Model for Member {
//!     fn describe(schema: &mut ModelSchema<Self>) {
//!         schema
//!             .field("UserId", |m| &m.user_id)
//!             .resolve(
//!                 "UserName",
//!                 |m| &m.user_name,
//!                 |m| &mut m.user_name,
//!                 ResolveTag::of::<UserTag>("UserId").expression("Name"),
//!             );
//!     }
//! }
//! ```

mod accessor;
mod graph;
mod registry;

pub use accessor::{FieldAccessor, FieldKind};
pub use graph::{DependencyChain, DependencyStep};
pub use registry::{TypeModel, TypeModelRegistry};

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

// ============================================================================
// Errors
// ============================================================================

/// Errors describing or accessing a model.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("{model}.{field} requires unknown field '{required}'")]
    UnknownField {
        model: &'static str,
        field: &'static str,
        required: &'static str,
    },

    #[error("{model} declares field '{field}' twice")]
    DuplicateField {
        model: &'static str,
        field: &'static str,
    },

    #[error("{model}.{field} has a cyclic dependency: {}", .chain.join(" -> "))]
    CyclicDependency {
        model: &'static str,
        field: &'static str,
        chain: Vec<&'static str>,
    },

    #[error("{model}.{field} cannot be used as a selector source")]
    UnreadableField {
        model: &'static str,
        field: &'static str,
    },

    #[error("Accessor for {model} applied to another type")]
    WrongOwner { model: &'static str },

    #[error("Failed to read {field}: {message}")]
    Serialize { field: &'static str, message: String },

    #[error("Failed to write {field}: {message}")]
    Deserialize { field: &'static str, message: String },
}

pub type Result<T> = std::result::Result<T, ModelError>;

// ============================================================================
// Resolution tags
// ============================================================================

/// Marker type naming a remote entity kind (`User`, `Country`, ...).
///
/// Handlers are registered per tag type, and the tag's name addresses the
/// remote collection.
pub trait ResolutionTag: 'static {
    const NAME: &'static str;
}

/// Runtime identity of a [`ResolutionTag`] type.
#[derive(Clone, Copy)]
pub struct TagId {
    name: &'static str,
    type_id: TypeId,
}

impl TagId {
    pub fn of<T: ResolutionTag>() -> Self {
        Self {
            name: T::NAME,
            type_id: TypeId::of::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TagId {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for TagId {}

impl Hash for TagId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TagId({})", self.name)
    }
}

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Declares that a field is resolved remotely: the tag names the remote
/// entity, `required` the sibling field holding its selector id.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveTag {
    pub tag: TagId,
    pub required: &'static str,
    pub expression: Option<String>,
}

impl ResolveTag {
    pub fn of<T: ResolutionTag>(required: &'static str) -> Self {
        Self {
            tag: TagId::of::<T>(),
            required,
            expression: None,
        }
    }

    /// Projection evaluated remotely. Defaults to the target field's name.
    pub fn expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }
}

// ============================================================================
// Models
// ============================================================================

/// A type whose fields take part in distributed resolution.
pub trait Model: Send + Sync + 'static {
    fn describe(schema: &mut ModelSchema<Self>)
    where
        Self: Sized;
}

/// Object-safe view of a [`Model`].
pub trait DynModel: Any + Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn model_name(&self) -> &'static str;
    fn build_type_model(&self) -> Result<TypeModel>;
}

impl<T: Model> DynModel for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn model_name(&self) -> &'static str {
        short_type_name::<T>()
    }

    fn build_type_model(&self) -> Result<TypeModel> {
        TypeModel::build::<T>()
    }
}

pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

/// Field declarations collected by [`Model::describe`].
pub struct ModelSchema<T> {
    fields: Vec<FieldAccessor>,
    _owner: PhantomData<fn() -> T>,
}

impl<T: Model> ModelSchema<T> {
    pub(crate) fn new() -> Self {
        Self {
            fields: Vec::new(),
            _owner: PhantomData,
        }
    }

    pub(crate) fn into_fields(self) -> Vec<FieldAccessor> {
        self.fields
    }

    /// A plain readable field, typically a selector id.
    pub fn field<F>(&mut self, name: &'static str, get: fn(&T) -> &F) -> &mut Self
    where
        F: Serialize + 'static,
    {
        self.fields.push(accessor::plain::<T, F>(name, get));
        self
    }

    /// A field written from a remote value.
    pub fn resolve<F>(
        &mut self,
        name: &'static str,
        get: fn(&T) -> &F,
        get_mut: fn(&mut T) -> &mut F,
        tag: ResolveTag,
    ) -> &mut Self
    where
        F: Serialize + DeserializeOwned + 'static,
    {
        self.fields
            .push(accessor::resolved::<T, F>(name, get, get_mut, tag));
        self
    }

    /// A field written with a remote model, which is itself resolved in the
    /// next pass.
    pub fn resolve_model<F>(
        &mut self,
        name: &'static str,
        get: fn(&T) -> Option<&F>,
        get_mut: fn(&mut T) -> Option<&mut F>,
        set: fn(&mut T, F),
        tag: ResolveTag,
    ) -> &mut Self
    where
        F: Model + DeserializeOwned,
    {
        self.fields.push(accessor::resolved_model::<T, F>(
            name, get, get_mut, set, tag,
        ));
        self
    }

    /// A child model walked during discovery.
    pub fn nested<F>(
        &mut self,
        name: &'static str,
        get: fn(&T) -> Option<&F>,
        get_mut: fn(&mut T) -> Option<&mut F>,
    ) -> &mut Self
    where
        F: Model,
    {
        self.fields
            .push(accessor::nested::<T, F>(name, get, get_mut));
        self
    }

    /// A collection of child models walked during discovery.
    pub fn collection<F>(
        &mut self,
        name: &'static str,
        get: fn(&T) -> &[F],
        get_mut: fn(&mut T) -> &mut [F],
    ) -> &mut Self
    where
        F: Model,
    {
        self.fields
            .push(accessor::collection::<T, F>(name, get, get_mut));
        self
    }
}
