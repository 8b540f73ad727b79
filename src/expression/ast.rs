//! Typed, immutable syntax tree for projection expressions.
//!
//! Every construct is a variant of [`Expr`]. Backends compile the tree by
//! implementing [`Visitor`] once; [`Expr::accept`] is the single dispatcher,
//! so a new backend never touches the node types or the parser.

use std::fmt;

/// Sort direction inside an indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Comparison operators of a [`BinaryConditionNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Equal,
    NotEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    Contains,
    StartsWith,
    EndsWith,
}

/// Boolean combinators of a [`LogicalConditionNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// Collection reductions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKind {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

/// Existential checks over a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BooleanKind {
    Any,
    All,
}

/// Scalar string, math and date functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarFunction {
    Upper,
    Lower,
    Trim,
    Length,
    Substring,
    Concat,
    Replace,
    Round,
    Floor,
    Ceil,
    Abs,
    Year,
    Month,
    Day,
}

/// Constant value.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Number(f64),
    Boolean(bool),
    Null,
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "'{}'", s),
            Self::Number(n) => write!(f, "{}", n),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Null => f.write_str("null"),
        }
    }
}

/// Field read relative to the current context, e.g. `Name` or `User?`.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyNode {
    pub name: String,
    pub null_safe: bool,
}

impl PropertyNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            null_safe: false,
        }
    }

    pub fn null_safe(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            null_safe: true,
        }
    }
}

/// `source.A.B.C`: successive field reads on the value of `source`.
#[derive(Debug, Clone, PartialEq)]
pub struct NavigationNode {
    pub source: Box<Expr>,
    pub segments: Vec<PropertyNode>,
}

/// `source(predicate)`: keep the elements of a collection matching `predicate`.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterNode {
    pub source: Box<Expr>,
    pub predicate: Box<Expr>,
}

/// `source[skip take dir OrderBy]`.
///
/// A single number (`take` absent) selects one element, `-1` being the last.
/// Two numbers select a slice. No number keeps the whole (ordered) collection.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexerNode {
    pub source: Box<Expr>,
    pub skip: Option<i64>,
    pub take: Option<i64>,
    pub direction: Option<SortDirection>,
    pub order_by: Option<String>,
}

impl IndexerNode {
    /// True when the indexer selects a single element.
    pub fn is_single(&self) -> bool {
        self.skip.is_some() && self.take.is_none()
    }
}

/// One member of a projection, optionally aliased.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionMember {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl ProjectionMember {
    /// Output key: the alias, or the last property name of the member.
    pub fn output_name(&self) -> Option<&str> {
        self.alias.as_deref().or_else(|| self.expr.natural_name())
    }
}

/// `source.{A, B as C}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionNode {
    pub source: Box<Expr>,
    pub members: Vec<ProjectionMember>,
}

/// `{A, B.C as D, (expr) as E}` evaluated against the root context.
#[derive(Debug, Clone, PartialEq)]
pub struct RootProjectionNode {
    pub members: Vec<ProjectionMember>,
}

/// `source:func(args)` for scalar functions.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionNode {
    pub source: Box<Expr>,
    pub function: ScalarFunction,
    pub args: Vec<Expr>,
}

/// `source:sum(selector)` and friends.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationNode {
    pub source: Box<Expr>,
    pub kind: AggregateKind,
    pub selector: Option<Box<Expr>>,
}

/// `source:any(predicate)` / `source:all(predicate)`.
#[derive(Debug, Clone, PartialEq)]
pub struct BooleanFunctionNode {
    pub source: Box<Expr>,
    pub kind: BooleanKind,
    pub predicate: Option<Box<Expr>>,
}

/// `left op right`.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryConditionNode {
    pub left: Box<Expr>,
    pub op: ComparisonOp,
    pub right: Box<Expr>,
}

/// `left && right`, `left || right`.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalConditionNode {
    pub op: LogicalOp,
    pub left: Box<Expr>,
    pub right: Box<Expr>,
}

/// `!operand`.
#[derive(Debug, Clone, PartialEq)]
pub struct NotNode {
    pub operand: Box<Expr>,
}

/// `left ?? right`.
#[derive(Debug, Clone, PartialEq)]
pub struct CoalesceNode {
    pub left: Box<Expr>,
    pub right: Box<Expr>,
}

/// `condition ? when_true : when_false`.
#[derive(Debug, Clone, PartialEq)]
pub struct TernaryNode {
    pub condition: Box<Expr>,
    pub when_true: Box<Expr>,
    pub when_false: Box<Expr>,
}

/// `source:groupBy(key)`, producing `[{Key, Items}]` in first-seen key order.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupByNode {
    pub source: Box<Expr>,
    pub key: Box<Expr>,
}

/// An aggregation applied per group: `source:groupBy(key):sum(x)`,
/// producing `[{Key, Value}]`.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupElementsNode {
    pub group: GroupByNode,
    pub kind: AggregateKind,
    pub selector: Option<Box<Expr>>,
}

/// A parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Property(PropertyNode),
    Navigation(NavigationNode),
    Filter(FilterNode),
    Indexer(IndexerNode),
    Projection(ProjectionNode),
    RootProjection(RootProjectionNode),
    Function(FunctionNode),
    Aggregation(AggregationNode),
    BooleanFunction(BooleanFunctionNode),
    BinaryCondition(BinaryConditionNode),
    LogicalCondition(LogicalConditionNode),
    Not(NotNode),
    Coalesce(CoalesceNode),
    Ternary(TernaryNode),
    GroupBy(GroupByNode),
    GroupElements(GroupElementsNode),
    Literal(Literal),
}

impl Expr {
    /// Double dispatch into a backend.
    pub fn accept<V, C>(&self, visitor: &V, context: &C) -> V::Output
    where
        V: Visitor<C> + ?Sized,
    {
        match self {
            Self::Property(n) => visitor.visit_property(n, context),
            Self::Navigation(n) => visitor.visit_navigation(n, context),
            Self::Filter(n) => visitor.visit_filter(n, context),
            Self::Indexer(n) => visitor.visit_indexer(n, context),
            Self::Projection(n) => visitor.visit_projection(n, context),
            Self::RootProjection(n) => visitor.visit_root_projection(n, context),
            Self::Function(n) => visitor.visit_function(n, context),
            Self::Aggregation(n) => visitor.visit_aggregation(n, context),
            Self::BooleanFunction(n) => visitor.visit_boolean_function(n, context),
            Self::BinaryCondition(n) => visitor.visit_binary_condition(n, context),
            Self::LogicalCondition(n) => visitor.visit_logical_condition(n, context),
            Self::Not(n) => visitor.visit_not(n, context),
            Self::Coalesce(n) => visitor.visit_coalesce(n, context),
            Self::Ternary(n) => visitor.visit_ternary(n, context),
            Self::GroupBy(n) => visitor.visit_group_by(n, context),
            Self::GroupElements(n) => visitor.visit_group_elements(n, context),
            Self::Literal(n) => visitor.visit_literal(n, context),
        }
    }

    /// Name a projection member gets when it has no alias.
    pub fn natural_name(&self) -> Option<&str> {
        match self {
            Self::Property(p) => Some(&p.name),
            Self::Navigation(n) => n.segments.last().map(|s| s.name.as_str()),
            _ => None,
        }
    }

    pub fn property(name: impl Into<String>) -> Self {
        Self::Property(PropertyNode::new(name))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::Literal(Literal::String(value.into()))
    }

    pub fn number(value: f64) -> Self {
        Self::Literal(Literal::Number(value))
    }
}

/// A compilation backend over [`Expr`].
///
/// `C` is the backend's traversal context (e.g. the variable naming the
/// current element for document queries).
pub trait Visitor<C> {
    type Output;

    fn visit_property(&self, node: &PropertyNode, context: &C) -> Self::Output;
    fn visit_navigation(&self, node: &NavigationNode, context: &C) -> Self::Output;
    fn visit_filter(&self, node: &FilterNode, context: &C) -> Self::Output;
    fn visit_indexer(&self, node: &IndexerNode, context: &C) -> Self::Output;
    fn visit_projection(&self, node: &ProjectionNode, context: &C) -> Self::Output;
    fn visit_root_projection(&self, node: &RootProjectionNode, context: &C) -> Self::Output;
    fn visit_function(&self, node: &FunctionNode, context: &C) -> Self::Output;
    fn visit_aggregation(&self, node: &AggregationNode, context: &C) -> Self::Output;
    fn visit_boolean_function(&self, node: &BooleanFunctionNode, context: &C) -> Self::Output;
    fn visit_binary_condition(&self, node: &BinaryConditionNode, context: &C) -> Self::Output;
    fn visit_logical_condition(&self, node: &LogicalConditionNode, context: &C) -> Self::Output;
    fn visit_not(&self, node: &NotNode, context: &C) -> Self::Output;
    fn visit_coalesce(&self, node: &CoalesceNode, context: &C) -> Self::Output;
    fn visit_ternary(&self, node: &TernaryNode, context: &C) -> Self::Output;
    fn visit_group_by(&self, node: &GroupByNode, context: &C) -> Self::Output;
    fn visit_group_elements(&self, node: &GroupElementsNode, context: &C) -> Self::Output;
    fn visit_literal(&self, node: &Literal, context: &C) -> Self::Output;
}
