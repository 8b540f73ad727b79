//! Distributed mapping.
//!
//! [`DistributedMapper::map_data`] resolves every tagged field reachable from
//! a root model:
//!
//! 1. discover tagged fields through the cached type models
//! 2. group them by dependency order, then by resolution tag
//! 3. per order group, send one batched request per tag, concurrently
//! 4. write the returned values back before the next order group starts
//! 5. repeat on models written by this pass, up to the spawn depth
//!
//! Failures of single calls are recorded in the [`MapReport`] and leave their
//! fields unset, unless the mapping runs in strict mode.

mod builder;
mod discovery;
mod mapper;

pub use builder::MapperBuilder;
pub use mapper::DistributedMapper;

use std::time::Duration;

use serde::Deserialize;

use crate::model::ModelError;
use crate::transport::TransportError;
use crate::wire::{RemoteError, WireError};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("No handler registered for tag '{tag}' ({model}.{field})")]
    UnresolvedTag {
        tag: &'static str,
        model: &'static str,
        field: &'static str,
    },

    #[error("Handler for tag '{0}' registered twice")]
    DuplicateHandler(&'static str),

    #[error("Selector id {model}.{field} is a {found}; expected a string or number")]
    UnsupportedSelectorType {
        model: &'static str,
        field: &'static str,
        found: &'static str,
    },

    #[error("Spawn depth {limit} exhausted with {pending} models left unresolved")]
    SpawnLimitExceeded { limit: usize, pending: usize },

    #[error("Call for tag '{tag}' failed: {source}")]
    Transport {
        tag: &'static str,
        #[source]
        source: TransportError,
    },

    #[error("Tag '{tag}' failed remotely: {source}")]
    Remote {
        tag: &'static str,
        #[source]
        source: RemoteError,
    },

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("Mapping cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, MappingError>;

// ============================================================================
// Parameters
// ============================================================================

/// Parameters of a mapping run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    /// Passes allowed per run, the root pass included. Values below 1 are
    /// treated as 1.
    pub max_spawn_depth: usize,
    pub request_timeout_ms: u64,
    /// Batched calls in flight at once within an order group.
    pub max_concurrency: usize,
    /// Propagate resolution failures instead of recording them.
    pub strict: bool,
    /// Fail when models are still pending after the last allowed pass.
    pub fail_on_spawn_limit: bool,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            max_spawn_depth: 8,
            request_timeout_ms: 30_000,
            max_concurrency: 16,
            strict: false,
            fail_on_spawn_limit: false,
        }
    }
}

impl MappingConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Outcome of a mapping run.
#[derive(Debug, Default)]
pub struct MapReport {
    pub passes: usize,
    /// Batched requests sent.
    pub calls: usize,
    pub fields_resolved: usize,
    /// Failures that left fields unset. Always empty in strict mode.
    pub failures: Vec<MappingError>,
}

#[cfg(test)]
mod tests;
