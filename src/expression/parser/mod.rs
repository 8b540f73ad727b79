//! Recursive-descent parser producing [`Expr`] trees.
//!
//! Precedence, lowest first:
//!
//! ```text
//! ternary     := coalesce ('?' expression ':' ternary)?
//! coalesce    := or ('??' coalesce)?
//! or          := and (('||' | 'or') and)*
//! and         := unary (('&&' | 'and') unary)*
//! unary       := ('!' | 'not') unary | comparison
//! comparison  := postfix (cmp postfix)?
//! postfix     := primary ('.' ident | '.' '{' members '}' | '(' expr ')'
//!                         | '[' indexer ']' | ':' func ('(' args ')')?)*
//! primary     := literal | ident '?'? | '(' expression ')' | '{' members '}'
//! ```

use super::ast::{
    AggregationNode, BinaryConditionNode, BooleanFunctionNode, CoalesceNode, ComparisonOp, Expr,
    FilterNode, FunctionNode, GroupByNode, GroupElementsNode, IndexerNode, Literal,
    LogicalConditionNode, LogicalOp, NavigationNode, NotNode, ProjectionMember, ProjectionNode,
    PropertyNode, RootProjectionNode, SortDirection, TernaryNode,
};
use super::error::{Result, SyntaxError, SyntaxErrorKind};
use super::functions::{self, FunctionKind};
use super::token::{Token, TokenKind};
use super::tokenizer::tokenize;
use std::collections::HashSet;

/// Parse an expression string into its syntax tree.
pub fn parse(expression: &str) -> Result<Expr> {
    let tokens = tokenize(expression)?;
    let mut parser = Parser {
        source: expression,
        tokens,
        pos: 0,
        ternary_depth: 0,
        calls: Vec::new(),
        separators: HashSet::new(),
    };
    let expr = parser.expression()?;
    parser.expect_end()?;
    Ok(expr)
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    /// Number of enclosing ternary true-branches; a `:` that does not start
    /// a known function closes the innermost one.
    ternary_depth: usize,
    /// Token indices of `:` read as function calls inside a true-branch.
    calls: Vec<usize>,
    /// Token indices of `:` that must close a ternary.
    separators: HashSet<usize>,
}

impl<'a> Parser<'a> {
    // ------------------------------------------------------------------
    // Cursor helpers
    // ------------------------------------------------------------------

    fn current(&self) -> &Token {
        // The tokenizer always terminates the stream with Eof.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self, offset: usize) -> &TokenKind {
        let index = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[index].kind
    }

    fn previous(&self) -> Option<&Token> {
        self.pos.checked_sub(1).and_then(|i| self.tokens.get(i))
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.current().is(kind)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, kind: SyntaxErrorKind, message: impl Into<String>, position: usize) -> SyntaxError {
        SyntaxError::new(self.source, kind, message, position)
    }

    fn expected(&self, what: &str, kind: SyntaxErrorKind) -> SyntaxError {
        let found = self.current();
        self.error(
            kind,
            format!("Expected {} but found {}", what, found.kind),
            found.position,
        )
    }

    fn expect_closer(&mut self, closer: TokenKind, symbol: &str) -> Result<()> {
        if self.eat(&closer) {
            Ok(())
        } else {
            Err(self.expected(&format!("'{}'", symbol), SyntaxErrorKind::UnbalancedBracket))
        }
    }

    fn expect_end(&self) -> Result<()> {
        if self.check(&TokenKind::Eof) {
            return Ok(());
        }
        match self.current().kind {
            TokenKind::RightParen | TokenKind::RightBracket | TokenKind::RightBrace => {
                let token = self.current();
                Err(self.error(
                    SyntaxErrorKind::UnbalancedBracket,
                    format!("Unexpected closing {} without matching opener", token.kind),
                    token.position,
                ))
            }
            _ => Err(self.expected("end of expression", SyntaxErrorKind::UnexpectedToken)),
        }
    }

    /// Run `f` with ternary tracking suspended (inside brackets a `:` can
    /// only be a function call).
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let saved = std::mem::replace(&mut self.ternary_depth, 0);
        let result = f(self);
        self.ternary_depth = saved;
        result
    }

    // ------------------------------------------------------------------
    // Operators
    // ------------------------------------------------------------------

    fn expression(&mut self) -> Result<Expr> {
        self.ternary()
    }

    fn ternary(&mut self) -> Result<Expr> {
        let condition = self.coalesce()?;
        if !self.eat(&TokenKind::Question) {
            return Ok(condition);
        }

        self.ternary_depth += 1;
        let when_true = self.when_true();
        self.ternary_depth -= 1;
        let when_true = when_true?;

        if !self.eat(&TokenKind::Colon) {
            return Err(self.expected(
                "':' in conditional expression",
                SyntaxErrorKind::UnexpectedToken,
            ));
        }
        let when_false = self.ternary()?;

        Ok(Expr::Ternary(TernaryNode {
            condition: Box::new(condition),
            when_true: Box::new(when_true),
            when_false: Box::new(when_false),
        }))
    }

    /// Parse a true-branch, reading `:name` as a function call first. While
    /// that leaves no `:` to close the ternary, the last such call is read as
    /// the separator instead, so `Flag ? Max : Min` yields two properties.
    fn when_true(&mut self) -> Result<Expr> {
        let start = self.pos;
        let mark = self.calls.len();
        let first = self.expression();
        let first_end = self.pos;
        let mut attempt = first.clone();
        let mut blocked = Vec::new();

        loop {
            if attempt.is_ok() && self.check(&TokenKind::Colon) {
                break;
            }
            let candidate = self.calls[mark..]
                .iter()
                .rev()
                .find(|pos| !self.separators.contains(*pos))
                .copied();
            let Some(candidate) = candidate else {
                self.pos = first_end;
                attempt = first;
                break;
            };
            self.separators.insert(candidate);
            blocked.push(candidate);
            self.calls.truncate(mark);
            self.pos = start;
            attempt = self.expression();
        }

        for pos in blocked {
            self.separators.remove(&pos);
        }
        attempt
    }

    fn coalesce(&mut self) -> Result<Expr> {
        let left = self.or()?;
        if self.eat(&TokenKind::Coalesce) {
            let right = self.coalesce()?;
            return Ok(Expr::Coalesce(CoalesceNode {
                left: Box::new(left),
                right: Box::new(right),
            }));
        }
        Ok(left)
    }

    fn or(&mut self) -> Result<Expr> {
        let mut left = self.and()?;
        while self.eat(&TokenKind::Or) {
            let right = self.and()?;
            left = Expr::LogicalCondition(LogicalConditionNode {
                op: LogicalOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            });
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr> {
        let mut left = self.unary()?;
        while self.eat(&TokenKind::And) {
            let right = self.unary()?;
            left = Expr::LogicalCondition(LogicalConditionNode {
                op: LogicalOp::And,
                left: Box::new(left),
                right: Box::new(right),
            });
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat(&TokenKind::Not) {
            let operand = self.unary()?;
            return Ok(Expr::Not(NotNode {
                operand: Box::new(operand),
            }));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr> {
        let left = self.postfix()?;
        let op = match self.current().kind {
            TokenKind::Equal => ComparisonOp::Equal,
            TokenKind::NotEqual => ComparisonOp::NotEqual,
            TokenKind::Greater => ComparisonOp::Greater,
            TokenKind::GreaterEqual => ComparisonOp::GreaterEqual,
            TokenKind::Less => ComparisonOp::Less,
            TokenKind::LessEqual => ComparisonOp::LessEqual,
            TokenKind::Contains => ComparisonOp::Contains,
            TokenKind::StartsWith => ComparisonOp::StartsWith,
            TokenKind::EndsWith => ComparisonOp::EndsWith,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.postfix()?;
        Ok(Expr::BinaryCondition(BinaryConditionNode {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }))
    }

    // ------------------------------------------------------------------
    // Postfix chain
    // ------------------------------------------------------------------

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;

        loop {
            match self.current().kind.clone() {
                TokenKind::Dot => {
                    self.advance();
                    expr = self.after_dot(expr)?;
                }
                TokenKind::LeftParen => {
                    self.advance();
                    let predicate = self.nested(|p| p.expression())?;
                    self.expect_closer(TokenKind::RightParen, ")")?;
                    expr = Expr::Filter(FilterNode {
                        source: Box::new(expr),
                        predicate: Box::new(predicate),
                    });
                }
                TokenKind::LeftBracket => {
                    self.advance();
                    expr = self.nested(|p| p.indexer(expr))?;
                }
                TokenKind::Colon => match self.function(expr)? {
                    Step::Continue(next) => expr = next,
                    Step::Stop(done) => return Ok(done),
                },
                TokenKind::LeftBrace => {
                    let position = self.current().position;
                    return Err(self.error(
                        SyntaxErrorKind::MissingDot,
                        "Expected '.' before '{' to start a projection",
                        position,
                    ));
                }
                TokenKind::Identifier(name) => {
                    let follows_closer = self.previous().is_some_and(|t| {
                        matches!(t.kind, TokenKind::RightBracket | TokenKind::RightParen)
                    });
                    if !follows_closer {
                        return Ok(expr);
                    }
                    let position = self.current().position;
                    return Err(self.error(
                        SyntaxErrorKind::MissingDot,
                        format!("Expected '.' before identifier '{}'", name),
                        position,
                    ));
                }
                _ => return Ok(expr),
            }
        }
    }

    fn after_dot(&mut self, source: Expr) -> Result<Expr> {
        match self.current().kind.clone() {
            TokenKind::Identifier(name) => {
                self.advance();
                let segment = PropertyNode {
                    name,
                    null_safe: self.null_safe_marker(),
                };
                Ok(match source {
                    Expr::Navigation(mut nav) => {
                        nav.segments.push(segment);
                        Expr::Navigation(nav)
                    }
                    other => Expr::Navigation(NavigationNode {
                        source: Box::new(other),
                        segments: vec![segment],
                    }),
                })
            }
            TokenKind::LeftBrace => {
                self.advance();
                let members = self.nested(|p| p.members())?;
                Ok(Expr::Projection(ProjectionNode {
                    source: Box::new(source),
                    members,
                }))
            }
            _ => Err(self.expected(
                "property name or '{' after '.'",
                SyntaxErrorKind::UnexpectedToken,
            )),
        }
    }

    /// Consume a `?` that marks null-safe access rather than a ternary.
    ///
    /// It is null-safe unless the next token could begin an expression.
    fn null_safe_marker(&mut self) -> bool {
        if !self.check(&TokenKind::Question) {
            return false;
        }
        let starts_expression = matches!(
            self.peek_kind(1),
            TokenKind::Identifier(_)
                | TokenKind::String(_)
                | TokenKind::Number(_)
                | TokenKind::Boolean(_)
                | TokenKind::Null
                | TokenKind::LeftParen
                | TokenKind::LeftBrace
                | TokenKind::Not
        );
        if starts_expression {
            return false;
        }
        self.advance();
        true
    }

    fn indexer(&mut self, source: Expr) -> Result<Expr> {
        let mut numbers = Vec::new();
        while let TokenKind::Number(value) = self.current().kind {
            let token = self.advance();
            if value.fract() != 0.0 {
                return Err(self.error(
                    SyntaxErrorKind::UnexpectedToken,
                    format!("Expected integer in indexer but found {}", token.kind),
                    token.position,
                ));
            }
            if numbers.len() == 2 {
                return Err(self.error(
                    SyntaxErrorKind::UnexpectedToken,
                    format!(
                        "Expected ordering or ']' after skip and take but found {}",
                        token.kind
                    ),
                    token.position,
                ));
            }
            numbers.push((value as i64, token.position));
        }

        if let &[(skip, pos), (take, _)] = numbers.as_slice() {
            if skip < 0 || take < 0 {
                return Err(self.error(
                    SyntaxErrorKind::UnexpectedToken,
                    "Skip and take must not be negative",
                    pos,
                ));
            }
        }

        let mut direction = match self.current().kind {
            TokenKind::Asc => Some(SortDirection::Asc),
            TokenKind::Desc => Some(SortDirection::Desc),
            _ => None,
        };
        if direction.is_some() {
            self.advance();
        }

        let mut order_by = None;
        if let TokenKind::Identifier(first) = self.current().kind.clone() {
            self.advance();
            let mut path = first;
            while self.check(&TokenKind::Dot) {
                self.advance();
                match self.current().kind.clone() {
                    TokenKind::Identifier(next) => {
                        self.advance();
                        path.push('.');
                        path.push_str(&next);
                    }
                    _ => {
                        return Err(
                            self.expected("property name after '.'", SyntaxErrorKind::UnexpectedToken)
                        )
                    }
                }
            }
            direction.get_or_insert(SortDirection::Asc);
            order_by = Some(path);
        }

        if numbers.is_empty() && direction.is_none() {
            return Err(self.expected(
                "index, slice or ordering in indexer",
                SyntaxErrorKind::UnexpectedToken,
            ));
        }

        self.expect_closer(TokenKind::RightBracket, "]")?;

        Ok(Expr::Indexer(IndexerNode {
            source: Box::new(source),
            skip: numbers.first().map(|(n, _)| *n),
            take: numbers.get(1).map(|(n, _)| *n),
            direction,
            order_by,
        }))
    }

    fn function(&mut self, source: Expr) -> Result<Step> {
        let name_position = self.tokens[(self.pos + 1).min(self.tokens.len() - 1)].position;
        let TokenKind::Identifier(name) = self.peek_kind(1).clone() else {
            if self.ternary_depth > 0 {
                return Ok(Step::Stop(source));
            }
            self.advance();
            return Err(self.expected("function name after ':'", SyntaxErrorKind::UnexpectedToken));
        };

        if self.ternary_depth > 0 && self.separators.contains(&self.pos) {
            return Ok(Step::Stop(source));
        }

        let Some(spec) = functions::lookup(&name) else {
            if self.ternary_depth > 0 {
                return Ok(Step::Stop(source));
            }
            return Err(self.error(
                SyntaxErrorKind::UnknownFunction,
                format!("Unknown function '{}'", name),
                name_position,
            ));
        };

        if self.ternary_depth > 0 {
            self.calls.push(self.pos);
        }
        self.advance();
        let name_token = self.advance();

        let mut args = Vec::new();
        if self.eat(&TokenKind::LeftParen) {
            args = self.nested(|p| {
                let mut args = Vec::new();
                if !p.check(&TokenKind::RightParen) {
                    args.push(p.expression()?);
                    while p.eat(&TokenKind::Comma) {
                        args.push(p.expression()?);
                    }
                }
                Ok(args)
            })?;
            self.expect_closer(TokenKind::RightParen, ")")?;
        }

        if !spec.accepts(args.len()) {
            return Err(self.error(
                SyntaxErrorKind::InvalidArguments,
                format!(
                    "Function '{}' expects {} argument(s) but got {}",
                    spec.name,
                    spec.arity(),
                    args.len()
                ),
                name_token.position,
            ));
        }

        let mut args = args.into_iter();
        let expr = match spec.kind {
            FunctionKind::Scalar(function) => Expr::Function(FunctionNode {
                source: Box::new(source),
                function,
                args: args.collect(),
            }),
            FunctionKind::Aggregate(kind) => match source {
                Expr::GroupBy(group) => Expr::GroupElements(GroupElementsNode {
                    group,
                    kind,
                    selector: args.next().map(Box::new),
                }),
                other => Expr::Aggregation(AggregationNode {
                    source: Box::new(other),
                    kind,
                    selector: args.next().map(Box::new),
                }),
            },
            FunctionKind::Boolean(kind) => Expr::BooleanFunction(BooleanFunctionNode {
                source: Box::new(source),
                kind,
                predicate: args.next().map(Box::new),
            }),
            FunctionKind::GroupBy => match args.next() {
                Some(key) => Expr::GroupBy(GroupByNode {
                    source: Box::new(source),
                    key: Box::new(key),
                }),
                None => {
                    return Err(self.error(
                        SyntaxErrorKind::InvalidArguments,
                        "Function 'groupBy' requires a key argument",
                        name_token.position,
                    ))
                }
            },
        };
        Ok(Step::Continue(expr))
    }

    // ------------------------------------------------------------------
    // Primaries
    // ------------------------------------------------------------------

    fn primary(&mut self) -> Result<Expr> {
        let token = self.current().clone();
        match token.kind {
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(Expr::Property(PropertyNode {
                    name,
                    null_safe: self.null_safe_marker(),
                }))
            }
            TokenKind::String(value) => {
                self.advance();
                Ok(Expr::Literal(Literal::String(value)))
            }
            TokenKind::Number(value) => {
                self.advance();
                Ok(Expr::Literal(Literal::Number(value)))
            }
            TokenKind::Boolean(value) => {
                self.advance();
                Ok(Expr::Literal(Literal::Boolean(value)))
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expr::Literal(Literal::Null))
            }
            TokenKind::LeftParen => {
                self.advance();
                let inner = self.nested(|p| p.expression())?;
                self.expect_closer(TokenKind::RightParen, ")")?;
                Ok(inner)
            }
            TokenKind::LeftBrace => {
                self.advance();
                let members = self.nested(|p| p.members())?;
                Ok(Expr::RootProjection(RootProjectionNode { members }))
            }
            _ => Err(self.expected("expression", SyntaxErrorKind::UnexpectedToken)),
        }
    }

    /// Projection members up to and including the closing `}`.
    fn members(&mut self) -> Result<Vec<ProjectionMember>> {
        let mut members = Vec::new();
        if self.eat(&TokenKind::RightBrace) {
            return Ok(members);
        }

        loop {
            let start = self.current().position;
            let expr = self.expression()?;
            let alias = if self.eat(&TokenKind::As) {
                match self.current().kind.clone() {
                    TokenKind::Identifier(alias) => {
                        self.advance();
                        Some(alias)
                    }
                    _ => {
                        return Err(
                            self.expected("alias after 'as'", SyntaxErrorKind::MissingAlias)
                        )
                    }
                }
            } else {
                None
            };

            let member = ProjectionMember { expr, alias };
            if member.output_name().is_none() {
                return Err(self.error(
                    SyntaxErrorKind::MissingAlias,
                    "Computed projection member requires 'as <alias>'",
                    start,
                ));
            }
            members.push(member);

            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }

        self.expect_closer(TokenKind::RightBrace, "}")?;
        Ok(members)
    }
}

enum Step {
    Continue(Expr),
    Stop(Expr),
}

#[cfg(test)]
mod tests;
