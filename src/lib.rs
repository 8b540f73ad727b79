//! distmap - declarative remote field resolution
//!
//! Models declare which of their fields are resolved by other services.
//! A [`mapping::DistributedMapper`] discovers those fields, batches them by
//! dependency order and resolution tag, and writes the returned values back.
//! Remote services answer with projection expressions compiled from a small
//! expression language.
//!
//! - [`expression`]: tokenizer, parser and AST of the expression language
//! - [`compiler`]: accessor and document backends for parsed expressions
//! - [`model`]: type models and dependency graphs of resolvable fields
//! - [`mapping`]: the distributed mapping orchestrator
//! - [`pipeline`], [`handler`], [`wire`]: request/response plumbing
//! - [`transport`], [`storage`]: in-process transports and a reference store
//! - [`supervision`]: connection and server supervision

pub mod compiler;
pub mod config;
pub mod expression;
pub mod handler;
pub mod mapping;
pub mod model;
pub mod pipeline;
pub mod storage;
pub mod supervision;
pub mod transport;
pub mod utils;
pub mod wire;
