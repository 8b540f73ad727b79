//! Shared utilities.
//!
//! - `bootstrap`: tracing initialization
//! - `retry`: backoff policy shared by connection supervision and restarts

pub mod bootstrap;
pub mod retry;
