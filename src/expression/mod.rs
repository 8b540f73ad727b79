//! Projection expression language.
//!
//! This module contains:
//! - `tokenizer`: text to tokens
//! - `parser`: tokens to an immutable [`Expr`] tree
//! - `ast`: node catalog and the [`Visitor`] backend interface
//! - `functions`: the `:function` catalog
//! - [`ExpressionCache`]: parsed trees shared by expression text

pub mod ast;
pub mod error;
pub mod functions;
pub mod parser;
pub mod token;
pub mod tokenizer;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

pub use ast::*;
pub use error::{SyntaxError, SyntaxErrorKind};
pub use parser::parse;
pub use token::{Token, TokenKind};
pub use tokenizer::tokenize;

/// Parsed expressions keyed by their source text.
///
/// Reads take a shared lock; a miss parses outside the lock and inserts.
/// Two threads missing on the same text both parse, and the first insert
/// wins, which is harmless since parsing is pure.
#[derive(Debug, Default)]
pub struct ExpressionCache {
    entries: RwLock<HashMap<String, Arc<Expr>>>,
}

impl ExpressionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached tree for `expression`, parsing it on first use.
    pub fn get_or_parse(&self, expression: &str) -> Result<Arc<Expr>, SyntaxError> {
        if let Some(found) = self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(expression)
        {
            return Ok(found.clone());
        }

        let parsed = Arc::new(parse(expression)?);
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        Ok(entries
            .entry(expression.to_string())
            .or_insert(parsed)
            .clone())
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
