//! Single-pass scanner turning expression text into tokens.
//!
//! Tokenizing is pure: every call owns its own cursor, so different
//! expressions can be tokenized concurrently.

use super::error::{Result, SyntaxError, SyntaxErrorKind};
use super::token::{Token, TokenKind};

/// Tokenize `expression` into a vector ending with an `Eof` token.
pub fn tokenize(expression: &str) -> Result<Vec<Token>> {
    Scanner::new(expression).run()
}

struct Scanner<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
    tokens: Vec<Token>,
}

impl<'a> Scanner<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.chars().collect(),
            pos: 0,
            tokens: Vec::new(),
        }
    }

    fn run(mut self) -> Result<Vec<Token>> {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos += 1;
                continue;
            }

            let start = self.pos;
            match c {
                '.' => self.single(TokenKind::Dot, start),
                ':' => self.single(TokenKind::Colon, start),
                ',' => self.single(TokenKind::Comma, start),
                '(' => self.single(TokenKind::LeftParen, start),
                ')' => self.single(TokenKind::RightParen, start),
                '[' => self.single(TokenKind::LeftBracket, start),
                ']' => self.single(TokenKind::RightBracket, start),
                '{' => self.single(TokenKind::LeftBrace, start),
                '}' => self.single(TokenKind::RightBrace, start),
                '=' => {
                    // `==` is accepted as an alias of `=`.
                    if self.peek_at(1) == Some('=') {
                        self.double(TokenKind::Equal, start);
                    } else {
                        self.single(TokenKind::Equal, start);
                    }
                }
                '!' => self.one_or_two('=', TokenKind::NotEqual, TokenKind::Not, start),
                '>' => self.one_or_two('=', TokenKind::GreaterEqual, TokenKind::Greater, start),
                '<' => self.one_or_two('=', TokenKind::LessEqual, TokenKind::Less, start),
                '?' => self.one_or_two('?', TokenKind::Coalesce, TokenKind::Question, start),
                '&' => self.paired('&', TokenKind::And, start)?,
                '|' => self.paired('|', TokenKind::Or, start)?,
                '\'' | '"' => self.string(c, start)?,
                '-' if self.peek_at(1).is_some_and(|n| n.is_ascii_digit()) => {
                    self.pos += 1;
                    self.number(start)?;
                }
                c if c.is_ascii_digit() => self.number(start)?,
                c if c.is_alphabetic() || c == '_' => self.word(start),
                other => {
                    return Err(self.error(
                        SyntaxErrorKind::UnexpectedCharacter,
                        format!("Unexpected character '{}'", other),
                        start,
                    ))
                }
            }
        }

        let end = self.chars.len();
        self.tokens.push(Token::new(TokenKind::Eof, "", end));
        Ok(self.tokens)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn text(&self, start: usize) -> String {
        self.chars[start..self.pos].iter().collect()
    }

    fn single(&mut self, kind: TokenKind, start: usize) {
        self.pos += 1;
        let text = self.text(start);
        self.tokens.push(Token::new(kind, text, start));
    }

    fn double(&mut self, kind: TokenKind, start: usize) {
        self.pos += 2;
        let text = self.text(start);
        self.tokens.push(Token::new(kind, text, start));
    }

    fn one_or_two(&mut self, next: char, two: TokenKind, one: TokenKind, start: usize) {
        if self.peek_at(1) == Some(next) {
            self.double(two, start);
        } else {
            self.single(one, start);
        }
    }

    fn paired(&mut self, symbol: char, kind: TokenKind, start: usize) -> Result<()> {
        if self.peek_at(1) == Some(symbol) {
            self.double(kind, start);
            Ok(())
        } else {
            Err(self.error(
                SyntaxErrorKind::UnexpectedCharacter,
                format!("Unexpected character '{0}', expected '{0}{0}'", symbol),
                start,
            ))
        }
    }

    fn string(&mut self, quote: char, start: usize) -> Result<()> {
        self.pos += 1;
        let mut value = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(self.error(
                    SyntaxErrorKind::UnterminatedString,
                    format!("Unterminated string, expected closing {}", quote),
                    start,
                ));
            };
            self.pos += 1;
            match c {
                c if c == quote => break,
                '\\' => {
                    let Some(escaped) = self.peek() else {
                        return Err(self.error(
                            SyntaxErrorKind::UnterminatedString,
                            format!("Unterminated string, expected closing {}", quote),
                            start,
                        ));
                    };
                    self.pos += 1;
                    value.push(match escaped {
                        'n' => '\n',
                        'r' => '\r',
                        't' => '\t',
                        '\\' => '\\',
                        '\'' => '\'',
                        '"' => '"',
                        other => {
                            return Err(self.error(
                                SyntaxErrorKind::UnexpectedCharacter,
                                format!("Unknown escape sequence '\\{}'", other),
                                self.pos - 2,
                            ))
                        }
                    });
                }
                other => value.push(other),
            }
        }
        let text = self.text(start);
        self.tokens.push(Token::new(TokenKind::String(value), text, start));
        Ok(())
    }

    fn number(&mut self, start: usize) -> Result<()> {
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        let text = self.text(start);
        let value: f64 = text.parse().map_err(|_| {
            self.error(
                SyntaxErrorKind::UnexpectedCharacter,
                format!("Invalid number '{}'", text),
                start,
            )
        })?;
        self.tokens.push(Token::new(TokenKind::Number(value), text, start));
        Ok(())
    }

    fn word(&mut self, start: usize) {
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_')
        {
            self.pos += 1;
        }
        let text = self.text(start);
        let kind = TokenKind::keyword(&text).unwrap_or_else(|| TokenKind::Identifier(text.clone()));
        self.tokens.push(Token::new(kind, text, start));
    }

    fn error(&self, kind: SyntaxErrorKind, message: String, position: usize) -> SyntaxError {
        SyntaxError::new(self.source, kind, message, position)
    }
}

#[cfg(test)]
mod tests;
