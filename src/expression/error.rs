//! Lexical and syntax errors raised while reading an expression.

/// A tokenizer or parser failure.
///
/// The `position` is a 0-based character offset into `expression`. The
/// rendered message always names what was expected, what was found and
/// where, so build-time tooling can surface it verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} at position {position} in expression '{expression}'")]
pub struct SyntaxError {
    /// Full expression text being processed.
    pub expression: String,
    /// Human-readable description of the failure.
    pub message: String,
    /// Character offset of the offending token.
    pub position: usize,
    /// Failure category.
    pub kind: SyntaxErrorKind,
}

/// Categories of syntax failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntaxErrorKind {
    /// Character the tokenizer does not recognize (including lone `&`/`|`).
    UnexpectedCharacter,
    /// String literal without its closing quote.
    UnterminatedString,
    /// Token that does not fit the grammar at this point.
    UnexpectedToken,
    /// Missing `]`, `)` or `}`.
    UnbalancedBracket,
    /// Missing `.` before a navigation segment or projection.
    MissingDot,
    /// Computed projection member without `as <alias>`.
    MissingAlias,
    /// Function name not in the catalog.
    UnknownFunction,
    /// Function called with too few or too many arguments.
    InvalidArguments,
}

impl SyntaxError {
    pub(crate) fn new(
        expression: &str,
        kind: SyntaxErrorKind,
        message: impl Into<String>,
        position: usize,
    ) -> Self {
        Self {
            expression: expression.to_string(),
            message: message.into(),
            position,
            kind,
        }
    }
}

/// Result type for tokenizing and parsing.
pub type Result<T> = std::result::Result<T, SyntaxError>;
