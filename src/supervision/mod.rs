//! Resilience supervision.
//!
//! This module contains:
//! - [`Signal`]: one-shot latch used for readiness and shutdown
//! - [`Agent`] / [`Supervisor`]: lifecycle protocol and a parent that owns children
//! - [`ConnectionContextSupervisor`]: single-flight connection creation with retry
//! - [`ServerSupervisor`]: restart strategies, restart budget and circuit breaker

pub mod agent;
pub mod connection;
pub mod server;
pub mod signal;

pub use agent::{Agent, AgentLifecycle, Supervisor};
pub use connection::{
    ConnectionContext, ConnectionContextFactory, ConnectionContextSupervisor, ConnectionError,
    ConnectionErrorKind,
};
pub use server::{
    Directive, DirectiveMap, Health, HealthChanged, RequestServer, RestartStrategy,
    ServerFailure, ServerPanicked, ServerSupervisor, SupervisorConfig,
};
pub use signal::Signal;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a std mutex, recovering the data of a poisoned one.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests;
