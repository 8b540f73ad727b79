//! Lexical units produced by the tokenizer.

use std::fmt;

/// Kind of a token, carrying literal payloads where relevant.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Identifier(String),
    String(String),
    Number(f64),
    Boolean(bool),
    Null,

    // Comparison
    Equal,
    NotEqual,
    Greater,
    Less,
    GreaterEqual,
    LessEqual,

    // Logical
    And,
    Or,
    Not,

    // Punctuation
    Dot,
    Colon,
    Comma,
    Question,
    Coalesce,

    // Brackets
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,

    // Keywords
    Asc,
    Desc,
    As,
    Contains,
    StartsWith,
    EndsWith,

    Eof,
}

impl TokenKind {
    /// Keyword lookup for bare words. Returns `None` for plain identifiers.
    pub(crate) fn keyword(word: &str) -> Option<Self> {
        let kind = match word {
            "true" => Self::Boolean(true),
            "false" => Self::Boolean(false),
            "null" => Self::Null,
            "and" => Self::And,
            "or" => Self::Or,
            "not" => Self::Not,
            "asc" => Self::Asc,
            "desc" => Self::Desc,
            "as" => Self::As,
            "contains" => Self::Contains,
            "startswith" => Self::StartsWith,
            "endswith" => Self::EndsWith,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identifier(name) => write!(f, "identifier '{}'", name),
            Self::String(value) => write!(f, "string '{}'", value),
            Self::Number(value) => write!(f, "number {}", value),
            Self::Boolean(value) => write!(f, "'{}'", value),
            Self::Null => f.write_str("'null'"),
            Self::Equal => f.write_str("'='"),
            Self::NotEqual => f.write_str("'!='"),
            Self::Greater => f.write_str("'>'"),
            Self::Less => f.write_str("'<'"),
            Self::GreaterEqual => f.write_str("'>='"),
            Self::LessEqual => f.write_str("'<='"),
            Self::And => f.write_str("'&&'"),
            Self::Or => f.write_str("'||'"),
            Self::Not => f.write_str("'!'"),
            Self::Dot => f.write_str("'.'"),
            Self::Colon => f.write_str("':'"),
            Self::Comma => f.write_str("','"),
            Self::Question => f.write_str("'?'"),
            Self::Coalesce => f.write_str("'??'"),
            Self::LeftParen => f.write_str("'('"),
            Self::RightParen => f.write_str("')'"),
            Self::LeftBracket => f.write_str("'['"),
            Self::RightBracket => f.write_str("']'"),
            Self::LeftBrace => f.write_str("'{'"),
            Self::RightBrace => f.write_str("'}'"),
            Self::Asc => f.write_str("'asc'"),
            Self::Desc => f.write_str("'desc'"),
            Self::As => f.write_str("'as'"),
            Self::Contains => f.write_str("'contains'"),
            Self::StartsWith => f.write_str("'startswith'"),
            Self::EndsWith => f.write_str("'endswith'"),
            Self::Eof => f.write_str("end of expression"),
        }
    }
}

/// A token with its source text and character position.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Raw source text of the token (empty for `Eof`).
    pub text: String,
    /// 0-based character offset of the first character.
    pub position: usize,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, position: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            position,
        }
    }

    pub fn is(&self, kind: &TokenKind) -> bool {
        &self.kind == kind
    }
}
