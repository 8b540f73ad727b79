//! In-memory accessor compiler.
//!
//! Turns an [`Expr`] into an [`Accessor`]: a composed closure evaluating the
//! projection against a JSON model. Compiled accessors are cached by
//! expression text and can be shared freely across threads.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde_json::{Map, Value};

use super::value::{self, DatePart};
use super::{CompileError, EvaluationError};
use crate::expression::{
    AggregateKind, AggregationNode, BinaryConditionNode, BooleanFunctionNode, BooleanKind,
    CoalesceNode, ComparisonOp, Expr, ExpressionCache, FilterNode, FunctionNode, GroupByNode,
    GroupElementsNode, IndexerNode, Literal, LogicalConditionNode, LogicalOp, NavigationNode,
    NotNode, ProjectionMember, ProjectionNode, PropertyNode, RootProjectionNode, ScalarFunction,
    TernaryNode, Visitor,
};

type AccessorFn = dyn Fn(&Value) -> Result<Value, EvaluationError> + Send + Sync;

/// A compiled projection `Model -> Value`.
#[derive(Clone)]
pub struct Accessor(Arc<AccessorFn>);

impl Accessor {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, EvaluationError> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn evaluate(&self, model: &Value) -> Result<Value, EvaluationError> {
        (self.0)(model)
    }
}

impl fmt::Debug for Accessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Accessor")
    }
}

type Compiled = Result<Accessor, CompileError>;

/// Compiles expressions into [`Accessor`]s, caching by expression text.
#[derive(Debug, Default)]
pub struct AccessorCompiler {
    expressions: Arc<ExpressionCache>,
    compiled: RwLock<HashMap<String, Accessor>>,
}

impl AccessorCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share an expression cache with other compilers.
    pub fn with_cache(expressions: Arc<ExpressionCache>) -> Self {
        Self {
            expressions,
            compiled: RwLock::new(HashMap::new()),
        }
    }

    /// Compile an already-parsed tree. Not cached.
    pub fn compile(&self, expr: &Expr) -> Compiled {
        expr.accept(self, &())
    }

    /// Parse (cached), compile (cached) and return the accessor for `expression`.
    pub fn compile_str(&self, expression: &str) -> Compiled {
        if let Some(found) = self
            .compiled
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(expression)
        {
            return Ok(found.clone());
        }

        let tree = self.expressions.get_or_parse(expression)?;
        let accessor = self.compile(&tree)?;
        let mut compiled = self.compiled.write().unwrap_or_else(|e| e.into_inner());
        Ok(compiled
            .entry(expression.to_string())
            .or_insert(accessor)
            .clone())
    }

    fn members(&self, members: &[ProjectionMember]) -> Result<Vec<(String, Accessor)>, CompileError> {
        members
            .iter()
            .map(|member| {
                let name = member
                    .output_name()
                    .ok_or_else(|| CompileError::Unsupported("projection member without name".into()))?
                    .to_string();
                Ok((name, self.compile(&member.expr)?))
            })
            .collect()
    }

    fn optional(&self, expr: Option<&Expr>) -> Result<Option<Accessor>, CompileError> {
        expr.map(|e| self.compile(e)).transpose()
    }
}

fn project(members: &[(String, Accessor)], model: &Value) -> Result<Value, EvaluationError> {
    let mut out = Map::new();
    for (name, accessor) in members {
        out.insert(name.clone(), accessor.evaluate(model)?);
    }
    Ok(Value::Object(out))
}

/// Read one navigation segment, mapping over arrays.
fn step(current: &Value, name: &str) -> Value {
    match current {
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| value::field(item, name).clone())
                .collect(),
        ),
        other => value::field(other, name).clone(),
    }
}

fn reduce(
    kind: AggregateKind,
    selector: Option<&Accessor>,
    items: &[Value],
) -> Result<Value, EvaluationError> {
    let Some(selector) = selector else {
        return Ok(value::aggregate(kind, items));
    };
    let selected = items
        .iter()
        .map(|item| selector.evaluate(item))
        .collect::<Result<Vec<_>, _>>()?;
    if kind == AggregateKind::Count {
        return Ok(Value::from(
            selected.iter().filter(|v| value::truthy(v)).count() as u64,
        ));
    }
    Ok(value::aggregate(kind, &selected))
}

fn string_arg<'a>(value: &'a Value, function: &str) -> Result<Option<&'a str>, EvaluationError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        other => Err(EvaluationError::TypeMismatch {
            expected: "string",
            found: value::type_name(other),
            context: function.to_string(),
        }),
    }
}

fn number_arg(value: &Value, function: &str) -> Result<Option<f64>, EvaluationError> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_f64()),
        other => Err(EvaluationError::TypeMismatch {
            expected: "number",
            found: value::type_name(other),
            context: function.to_string(),
        }),
    }
}

fn apply_scalar(
    function: ScalarFunction,
    input: &Value,
    args: &[Value],
) -> Result<Value, EvaluationError> {
    use ScalarFunction::*;

    let text = |name| string_arg(input, name);
    let num = |name| number_arg(input, name);
    let int_arg = |index: usize, name: &str| -> Result<Option<i64>, EvaluationError> {
        Ok(args
            .get(index)
            .map(|v| number_arg(v, name))
            .transpose()?
            .flatten()
            .map(|f| f as i64))
    };

    Ok(match function {
        Upper => text("upper")?.map_or(Value::Null, |s| Value::from(s.to_uppercase())),
        Lower => text("lower")?.map_or(Value::Null, |s| Value::from(s.to_lowercase())),
        Trim => text("trim")?.map_or(Value::Null, |s| Value::from(s.trim())),
        Length => match input {
            Value::Null => Value::Null,
            Value::Array(items) => Value::from(items.len() as u64),
            other => Value::from(
                string_arg(other, "length")?
                    .map_or(0, |s| s.chars().count()) as u64,
            ),
        },
        Substring => {
            let Some(s) = text("substring")? else {
                return Ok(Value::Null);
            };
            let start = int_arg(0, "substring")?.unwrap_or(0).max(0) as usize;
            let chars = s.chars().skip(start);
            match int_arg(1, "substring")? {
                Some(len) => Value::from(chars.take(len.max(0) as usize).collect::<String>()),
                None => Value::from(chars.collect::<String>()),
            }
        }
        Concat => {
            let mut out = String::new();
            for part in std::iter::once(input).chain(args.iter()) {
                match string_arg(part, "concat")? {
                    Some(s) => out.push_str(s),
                    None => return Ok(Value::Null),
                }
            }
            Value::from(out)
        }
        Replace => {
            let Some(s) = text("replace")? else {
                return Ok(Value::Null);
            };
            let find = args.first().map(|v| string_arg(v, "replace")).transpose()?.flatten();
            let with = args.get(1).map(|v| string_arg(v, "replace")).transpose()?.flatten();
            match (find, with) {
                (Some(find), Some(with)) if !find.is_empty() => Value::from(s.replace(find, with)),
                (Some(_), Some(_)) => Value::from(s),
                _ => Value::Null,
            }
        }
        Round => {
            let digits = int_arg(0, "round")?.unwrap_or(0) as i32;
            num("round")?.map_or(Value::Null, |n| value::number(value::round(n, digits)))
        }
        Floor => num("floor")?.map_or(Value::Null, |n| value::number(n.floor())),
        Ceil => num("ceil")?.map_or(Value::Null, |n| value::number(n.ceil())),
        Abs => num("abs")?.map_or(Value::Null, |n| value::number(n.abs())),
        Year => value::date_part(input, DatePart::Year)?,
        Month => value::date_part(input, DatePart::Month)?,
        Day => value::date_part(input, DatePart::Day)?,
    })
}

fn compare(op: ComparisonOp, left: &Value, right: &Value) -> bool {
    use std::cmp::Ordering;

    match op {
        ComparisonOp::Equal => value::equals(left, right),
        ComparisonOp::NotEqual => !value::equals(left, right),
        ComparisonOp::Greater => value::compare(left, right) == Ordering::Greater,
        ComparisonOp::GreaterEqual => value::compare(left, right) != Ordering::Less,
        ComparisonOp::Less => value::compare(left, right) == Ordering::Less,
        ComparisonOp::LessEqual => value::compare(left, right) != Ordering::Greater,
        ComparisonOp::Contains => match (left, right) {
            (Value::String(s), Value::String(sub)) => s.contains(sub.as_str()),
            (Value::Array(items), needle) => items.iter().any(|i| value::equals(i, needle)),
            _ => false,
        },
        ComparisonOp::StartsWith => match (left, right) {
            (Value::String(s), Value::String(prefix)) => s.starts_with(prefix.as_str()),
            _ => false,
        },
        ComparisonOp::EndsWith => match (left, right) {
            (Value::String(s), Value::String(suffix)) => s.ends_with(suffix.as_str()),
            _ => false,
        },
    }
}

impl Visitor<()> for AccessorCompiler {
    type Output = Compiled;

    fn visit_property(&self, node: &PropertyNode, _: &()) -> Compiled {
        let name = node.name.clone();
        Ok(Accessor::new(move |model| Ok(value::field(model, &name).clone())))
    }

    fn visit_navigation(&self, node: &NavigationNode, _: &()) -> Compiled {
        let source = self.compile(&node.source)?;
        let (source_name, source_safe) = match node.source.as_ref() {
            Expr::Property(p) => (p.name.clone(), p.null_safe),
            _ => (String::new(), true),
        };
        let segments = node.segments.clone();

        Ok(Accessor::new(move |model| {
            let mut current = source.evaluate(model)?;
            let mut last = (source_name.as_str(), source_safe);
            for segment in &segments {
                if current.is_null() {
                    let (name, null_safe) = last;
                    if null_safe {
                        return Ok(Value::Null);
                    }
                    return Err(EvaluationError::NullReference {
                        property: name.to_string(),
                    });
                }
                current = step(&current, &segment.name);
                last = (segment.name.as_str(), segment.null_safe);
            }
            Ok(current)
        }))
    }

    fn visit_filter(&self, node: &FilterNode, _: &()) -> Compiled {
        let source = self.compile(&node.source)?;
        let predicate = self.compile(&node.predicate)?;
        Ok(Accessor::new(move |model| {
            let collection = source.evaluate(model)?;
            let Some(items) = value::array(&collection, "filter")? else {
                return Ok(Value::Null);
            };
            let mut kept = Vec::new();
            for item in items {
                if value::truthy(&predicate.evaluate(item)?) {
                    kept.push(item.clone());
                }
            }
            Ok(Value::Array(kept))
        }))
    }

    fn visit_indexer(&self, node: &IndexerNode, _: &()) -> Compiled {
        let source = self.compile(&node.source)?;
        let (skip, take, direction) = (node.skip, node.take, node.direction);
        let order_by = node.order_by.clone();
        Ok(Accessor::new(move |model| {
            let collection = source.evaluate(model)?;
            let Some(items) = value::array(&collection, "indexer")? else {
                return Ok(Value::Null);
            };
            let mut items = items.clone();
            if let Some(direction) = direction {
                value::sort(&mut items, order_by.as_deref(), direction);
            }
            Ok(match (skip, take) {
                (Some(index), None) => value::element_at(&items, index),
                (Some(skip), Some(take)) => value::slice(&items, skip, take),
                _ => Value::Array(items),
            })
        }))
    }

    fn visit_projection(&self, node: &ProjectionNode, _: &()) -> Compiled {
        let source = self.compile(&node.source)?;
        let members = self.members(&node.members)?;
        Ok(Accessor::new(move |model| {
            match source.evaluate(model)? {
                Value::Null => Ok(Value::Null),
                Value::Array(items) => items
                    .iter()
                    .map(|item| project(&members, item))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array),
                object @ Value::Object(_) => project(&members, &object),
                other => Err(EvaluationError::TypeMismatch {
                    expected: "object or array",
                    found: value::type_name(&other),
                    context: "projection".to_string(),
                }),
            }
        }))
    }

    fn visit_root_projection(&self, node: &RootProjectionNode, _: &()) -> Compiled {
        let members = self.members(&node.members)?;
        Ok(Accessor::new(move |model| project(&members, model)))
    }

    fn visit_function(&self, node: &FunctionNode, _: &()) -> Compiled {
        let source = self.compile(&node.source)?;
        let args = node
            .args
            .iter()
            .map(|a| self.compile(a))
            .collect::<Result<Vec<_>, _>>()?;
        let function = node.function;
        Ok(Accessor::new(move |model| {
            let input = source.evaluate(model)?;
            let args = args
                .iter()
                .map(|a| a.evaluate(model))
                .collect::<Result<Vec<_>, _>>()?;
            apply_scalar(function, &input, &args)
        }))
    }

    fn visit_aggregation(&self, node: &AggregationNode, _: &()) -> Compiled {
        let source = self.compile(&node.source)?;
        let selector = self.optional(node.selector.as_deref())?;
        let kind = node.kind;
        Ok(Accessor::new(move |model| {
            let collection = source.evaluate(model)?;
            let items = value::array(&collection, "aggregation")?
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            reduce(kind, selector.as_ref(), items)
        }))
    }

    fn visit_boolean_function(&self, node: &BooleanFunctionNode, _: &()) -> Compiled {
        let source = self.compile(&node.source)?;
        let predicate = self.optional(node.predicate.as_deref())?;
        let kind = node.kind;
        Ok(Accessor::new(move |model| {
            let collection = source.evaluate(model)?;
            let items = value::array(&collection, "boolean function")?
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let Some(predicate) = &predicate else {
                return Ok(Value::Bool(!items.is_empty()));
            };
            let mut results = items.iter().map(|item| predicate.evaluate(item));
            let outcome = match kind {
                BooleanKind::Any => {
                    let mut found = false;
                    for result in results.by_ref() {
                        if value::truthy(&result?) {
                            found = true;
                            break;
                        }
                    }
                    found
                }
                BooleanKind::All => {
                    let mut all = true;
                    for result in results.by_ref() {
                        if !value::truthy(&result?) {
                            all = false;
                            break;
                        }
                    }
                    all
                }
            };
            Ok(Value::Bool(outcome))
        }))
    }

    fn visit_binary_condition(&self, node: &BinaryConditionNode, _: &()) -> Compiled {
        let left = self.compile(&node.left)?;
        let right = self.compile(&node.right)?;
        let op = node.op;
        Ok(Accessor::new(move |model| {
            let l = left.evaluate(model)?;
            let r = right.evaluate(model)?;
            Ok(Value::Bool(compare(op, &l, &r)))
        }))
    }

    fn visit_logical_condition(&self, node: &LogicalConditionNode, _: &()) -> Compiled {
        let left = self.compile(&node.left)?;
        let right = self.compile(&node.right)?;
        let op = node.op;
        Ok(Accessor::new(move |model| {
            let l = value::truthy(&left.evaluate(model)?);
            let outcome = match op {
                LogicalOp::And => l && value::truthy(&right.evaluate(model)?),
                LogicalOp::Or => l || value::truthy(&right.evaluate(model)?),
            };
            Ok(Value::Bool(outcome))
        }))
    }

    fn visit_not(&self, node: &NotNode, _: &()) -> Compiled {
        let operand = self.compile(&node.operand)?;
        Ok(Accessor::new(move |model| {
            Ok(Value::Bool(!value::truthy(&operand.evaluate(model)?)))
        }))
    }

    fn visit_coalesce(&self, node: &CoalesceNode, _: &()) -> Compiled {
        let left = self.compile(&node.left)?;
        let right = self.compile(&node.right)?;
        Ok(Accessor::new(move |model| match left.evaluate(model)? {
            Value::Null => right.evaluate(model),
            found => Ok(found),
        }))
    }

    fn visit_ternary(&self, node: &TernaryNode, _: &()) -> Compiled {
        let condition = self.compile(&node.condition)?;
        let when_true = self.compile(&node.when_true)?;
        let when_false = self.compile(&node.when_false)?;
        Ok(Accessor::new(move |model| {
            if value::truthy(&condition.evaluate(model)?) {
                when_true.evaluate(model)
            } else {
                when_false.evaluate(model)
            }
        }))
    }

    fn visit_group_by(&self, node: &GroupByNode, _: &()) -> Compiled {
        let source = self.compile(&node.source)?;
        let key = self.compile(&node.key)?;
        Ok(Accessor::new(move |model| {
            let collection = source.evaluate(model)?;
            match value::array(&collection, "groupBy")? {
                Some(items) => value::group(items, |item| key.evaluate(item)),
                None => Ok(Value::Null),
            }
        }))
    }

    fn visit_group_elements(&self, node: &GroupElementsNode, context: &()) -> Compiled {
        let groups = self.visit_group_by(&node.group, context)?;
        let selector = self.optional(node.selector.as_deref())?;
        let kind = node.kind;
        Ok(Accessor::new(move |model| {
            let Value::Array(groups) = groups.evaluate(model)? else {
                return Ok(Value::Null);
            };
            let mut out = Vec::with_capacity(groups.len());
            for group in groups {
                let items = value::field(&group, "Items")
                    .as_array()
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
                let mut entry = Map::new();
                entry.insert("Key".to_string(), value::field(&group, "Key").clone());
                entry.insert("Value".to_string(), reduce(kind, selector.as_ref(), items)?);
                out.push(Value::Object(entry));
            }
            Ok(Value::Array(out))
        }))
    }

    fn visit_literal(&self, node: &Literal, _: &()) -> Compiled {
        let constant = match node {
            Literal::String(s) => Value::from(s.clone()),
            Literal::Number(n) => value::number(*n),
            Literal::Boolean(b) => Value::Bool(*b),
            Literal::Null => Value::Null,
        };
        Ok(Accessor::new(move |_| Ok(constant.clone())))
    }
}
