//! Expression compilers.
//!
//! Each backend implements [`crate::expression::Visitor`] once:
//! - [`AccessorCompiler`]: in-memory closures `&Value -> Value`
//! - [`DocumentCompiler`]: document-store aggregation expressions, with
//!   [`document::evaluate`] as a reference interpreter for them

pub mod accessor;
pub mod document;
pub mod value;

pub use accessor::{Accessor, AccessorCompiler};
pub use document::{DocumentCompiler, DocumentContext};

use crate::expression::SyntaxError;

/// Failure turning an expression into an executable projection.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CompileError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    #[error("Unsupported construct: {0}")]
    Unsupported(String),
}

/// Failure evaluating a compiled projection against data.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvaluationError {
    #[error("Expected {expected} but found {found} in {context}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
        context: String,
    },

    #[error("Cannot read '{property}' of null")]
    NullReference { property: String },

    #[error("Invalid date '{0}'")]
    InvalidDate(String),

    #[error("Unsupported operator '{0}'")]
    UnsupportedOperator(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unknown variable '{0}'")]
    UnknownVariable(String),
}
