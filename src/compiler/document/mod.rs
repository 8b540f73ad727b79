//! Document-store query compiler.
//!
//! Emits aggregation-pipeline expressions (`$getField`, `$filter`, `$map`,
//! `$sortArray` and friends) that a document store evaluates server side.
//! [`evaluate`] interprets the same operator subset against a JSON document
//! so the output can be checked without a database.

mod evaluate;

pub use evaluate::evaluate;

use std::sync::Arc;

use serde_json::{json, Map, Value};

use super::CompileError;
use crate::expression::{
    AggregateKind, AggregationNode, BinaryConditionNode, BooleanFunctionNode, BooleanKind,
    CoalesceNode, ComparisonOp, Expr, ExpressionCache, FilterNode, FunctionNode, GroupByNode,
    GroupElementsNode, IndexerNode, Literal, LogicalConditionNode, LogicalOp, NavigationNode,
    NotNode, ProjectionMember, ProjectionNode, PropertyNode, RootProjectionNode, ScalarFunction,
    SortDirection, TernaryNode, Visitor,
};

type Compiled = Result<Value, CompileError>;

/// Variable naming the value expressions are evaluated against.
///
/// `depth` grows with every scope introduced so nested `$map`/`$filter`/`$let`
/// bindings get distinct names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentContext {
    current: String,
    depth: usize,
}

impl Default for DocumentContext {
    fn default() -> Self {
        Self::root()
    }
}

impl DocumentContext {
    /// The document being projected.
    pub fn root() -> Self {
        Self {
            current: "$$CURRENT".to_string(),
            depth: 0,
        }
    }

    pub fn current(&self) -> Value {
        Value::from(self.current.clone())
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// A fresh element variable and the context evaluating against it.
    fn element(&self) -> (String, Self) {
        let name = format!("e{}", self.depth);
        let child = Self {
            current: format!("$${}", name),
            depth: self.depth + 1,
        };
        (name, child)
    }

    /// A fresh `$let` variable; the current element is unchanged.
    fn binding(&self) -> (String, Value, Self) {
        let name = format!("v{}", self.depth);
        let reference = Value::from(format!("$${}", name));
        let child = Self {
            current: self.current.clone(),
            depth: self.depth + 1,
        };
        (name, reference, child)
    }
}

fn get_field(name: &str, input: Value) -> Value {
    json!({"$getField": {"field": name, "input": input}})
}

/// Bind `value` once and build the body over the bound reference.
fn let_in<F>(context: &DocumentContext, value: Value, body: F) -> Compiled
where
    F: FnOnce(Value, &DocumentContext) -> Compiled,
{
    let (name, reference, inner) = context.binding();
    let mut vars = Map::new();
    vars.insert(name, value);
    Ok(json!({"$let": {"vars": vars, "in": body(reference, &inner)?}}))
}

/// `null` stays `null`, anything else goes through `f`.
fn null_guard<F>(context: &DocumentContext, value: Value, f: F) -> Compiled
where
    F: FnOnce(Value) -> Value,
{
    let_in(context, value, |v, _| {
        Ok(json!({"$cond": [{"$eq": [v.clone(), null]}, null, f(v)]}))
    })
}

fn empty_if_null(value: Value) -> Value {
    json!({"$ifNull": [value, []]})
}

fn is_string(value: &Value) -> Value {
    json!({"$eq": [{"$type": value}, "string"]})
}

/// Compiles expressions to aggregation-pipeline documents.
#[derive(Debug, Default)]
pub struct DocumentCompiler {
    expressions: Arc<ExpressionCache>,
}

impl DocumentCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache(expressions: Arc<ExpressionCache>) -> Self {
        Self { expressions }
    }

    /// Compile against the root document.
    pub fn compile(&self, expr: &Expr) -> Compiled {
        self.compile_in(expr, &DocumentContext::root())
    }

    pub fn compile_in(&self, expr: &Expr, context: &DocumentContext) -> Compiled {
        expr.accept(self, context)
    }

    pub fn compile_str(&self, expression: &str) -> Compiled {
        let tree = self.expressions.get_or_parse(expression)?;
        self.compile(&tree)
    }

    /// A `$project` stage exposing the expression as `field`.
    pub fn project_stage(&self, expression: &str, field: &str) -> Compiled {
        let mut projection = Map::new();
        projection.insert("_id".to_string(), Value::from(0));
        projection.insert(field.to_string(), self.compile_str(expression)?);
        Ok(json!({ "$project": projection }))
    }

    fn object(&self, members: &[ProjectionMember], context: &DocumentContext) -> Compiled {
        let mut out = Map::new();
        for member in members {
            let name = member
                .output_name()
                .ok_or_else(|| CompileError::Unsupported("projection member without name".into()))?;
            out.insert(name.to_string(), self.compile_in(&member.expr, context)?);
        }
        Ok(Value::Object(out))
    }

    /// Evaluate `expr` once per element of `items`, bound as the current value.
    fn map_elements(&self, items: Value, expr: &Expr, context: &DocumentContext) -> Compiled {
        let (name, element) = context.element();
        Ok(json!({"$map": {"input": items, "as": name, "in": self.compile_in(expr, &element)?}}))
    }

    fn filter_elements(&self, items: Value, predicate: &Expr, context: &DocumentContext) -> Compiled {
        let (name, element) = context.element();
        Ok(json!({
            "$filter": {"input": items, "as": name, "cond": self.compile_in(predicate, &element)?}
        }))
    }

    fn reduce(
        &self,
        kind: AggregateKind,
        selector: Option<&Expr>,
        items: Value,
        context: &DocumentContext,
    ) -> Compiled {
        let items = empty_if_null(items);
        Ok(match (kind, selector) {
            (AggregateKind::Count, None) => json!({ "$size": items }),
            (AggregateKind::Count, Some(predicate)) => {
                json!({ "$size": self.filter_elements(items, predicate, context)? })
            }
            (kind, selector) => {
                let values = match selector {
                    Some(selector) => self.map_elements(items, selector, context)?,
                    None => items,
                };
                let op = match kind {
                    AggregateKind::Sum => "$sum",
                    AggregateKind::Avg => "$avg",
                    AggregateKind::Min => "$min",
                    _ => "$max",
                };
                let mut out = Map::new();
                out.insert(op.to_string(), values);
                Value::Object(out)
            }
        })
    }

    fn group(&self, node: &GroupByNode, context: &DocumentContext) -> Compiled {
        let source = self.compile_in(&node.source, context)?;
        let_in(context, source, |items, inner| {
            let key_of_this = self.compile_in(
                &node.key,
                &DocumentContext {
                    current: "$$this".to_string(),
                    depth: inner.depth + 1,
                },
            )?;
            let keys = json!({"$reduce": {
                "input": items.clone(),
                "initialValue": [],
                "in": {"$cond": [
                    {"$in": [key_of_this.clone(), "$$value"]},
                    "$$value",
                    {"$concatArrays": ["$$value", [key_of_this]]}
                ]}
            }});

            let (key_name, key_scope) = inner.element();
            let (item_name, item_scope) = key_scope.element();
            let key_of_item = self.compile_in(&node.key, &item_scope)?;
            let groups = json!({"$map": {
                "input": keys,
                "as": key_name,
                "in": {
                    "Key": key_scope.current(),
                    "Items": {"$filter": {
                        "input": items.clone(),
                        "as": item_name,
                        "cond": {"$eq": [key_of_item, key_scope.current()]}
                    }}
                }
            }});
            Ok(json!({"$cond": [{"$eq": [items, null]}, null, groups]}))
        })
    }
}

impl Visitor<DocumentContext> for DocumentCompiler {
    type Output = Compiled;

    fn visit_property(&self, node: &PropertyNode, context: &DocumentContext) -> Compiled {
        Ok(get_field(&node.name, context.current()))
    }

    fn visit_navigation(&self, node: &NavigationNode, context: &DocumentContext) -> Compiled {
        let mut current = self.compile_in(&node.source, context)?;
        for segment in &node.segments {
            current = let_in(context, current, |v, inner| {
                let (name, element) = inner.element();
                Ok(json!({"$cond": [
                    {"$isArray": [v.clone()]},
                    {"$map": {
                        "input": v.clone(),
                        "as": name,
                        "in": get_field(&segment.name, element.current())
                    }},
                    get_field(&segment.name, v)
                ]}))
            })?;
        }
        Ok(current)
    }

    fn visit_filter(&self, node: &FilterNode, context: &DocumentContext) -> Compiled {
        let source = self.compile_in(&node.source, context)?;
        self.filter_elements(source, &node.predicate, context)
    }

    fn visit_indexer(&self, node: &IndexerNode, context: &DocumentContext) -> Compiled {
        let mut items = self.compile_in(&node.source, context)?;
        if let Some(direction) = node.direction {
            let order = match direction {
                SortDirection::Asc => 1,
                SortDirection::Desc => -1,
            };
            let sort_by = match &node.order_by {
                Some(path) => {
                    let mut keys = Map::new();
                    keys.insert(path.clone(), Value::from(order));
                    Value::Object(keys)
                }
                None => Value::from(order),
            };
            items = json!({"$sortArray": {"input": items, "sortBy": sort_by}});
        }
        Ok(match (node.skip, node.take) {
            (Some(index), None) => json!({"$arrayElemAt": [items, index]}),
            (Some(skip), Some(take)) => json!({"$slice": [items, skip, take]}),
            _ => items,
        })
    }

    fn visit_projection(&self, node: &ProjectionNode, context: &DocumentContext) -> Compiled {
        let source = self.compile_in(&node.source, context)?;
        let_in(context, source, |v, inner| {
            let (name, element) = inner.element();
            let per_element = self.object(&node.members, &element)?;
            let single = self.object(
                &node.members,
                &DocumentContext {
                    current: v.as_str().unwrap_or_default().to_string(),
                    depth: inner.depth + 1,
                },
            )?;
            Ok(json!({"$cond": [
                {"$isArray": [v.clone()]},
                {"$map": {"input": v.clone(), "as": name, "in": per_element}},
                {"$cond": [{"$eq": [v, null]}, null, single]}
            ]}))
        })
    }

    fn visit_root_projection(&self, node: &RootProjectionNode, context: &DocumentContext) -> Compiled {
        self.object(&node.members, context)
    }

    fn visit_function(&self, node: &FunctionNode, context: &DocumentContext) -> Compiled {
        use ScalarFunction::*;

        let source = self.compile_in(&node.source, context)?;
        let args = node
            .args
            .iter()
            .map(|a| self.compile_in(a, context))
            .collect::<Result<Vec<_>, _>>()?;
        let arg = |i: usize| args.get(i).cloned();

        match node.function {
            Upper => null_guard(context, source, |v| json!({ "$toUpper": v })),
            Lower => null_guard(context, source, |v| json!({ "$toLower": v })),
            Trim => null_guard(context, source, |v| json!({"$trim": {"input": v}})),
            Length => null_guard(context, source, |v| {
                json!({"$cond": [{"$isArray": [v.clone()]}, {"$size": v.clone()}, {"$strLenCP": v}]})
            }),
            Substring => null_guard(context, source, |v| {
                let start = arg(0).unwrap_or(json!(0));
                let length = arg(1).unwrap_or_else(|| json!({ "$strLenCP": v.clone() }));
                json!({"$substrCP": [v, start, length]})
            }),
            Concat => {
                let mut parts = vec![source];
                parts.extend(args.iter().cloned());
                Ok(json!({ "$concat": parts }))
            }
            Replace => null_guard(context, source, |v| {
                json!({"$replaceAll": {
                    "input": v,
                    "find": arg(0).unwrap_or(Value::Null),
                    "replacement": arg(1).unwrap_or(Value::Null)
                }})
            }),
            Round => Ok(json!({"$round": [source, arg(0).unwrap_or(json!(0))]})),
            Floor => Ok(json!({ "$floor": source })),
            Ceil => Ok(json!({ "$ceil": source })),
            Abs => Ok(json!({ "$abs": source })),
            Year => Ok(json!({"$year": {"$dateFromString": {"dateString": source}}})),
            Month => Ok(json!({"$month": {"$dateFromString": {"dateString": source}}})),
            Day => Ok(json!({"$dayOfMonth": {"$dateFromString": {"dateString": source}}})),
        }
    }

    fn visit_aggregation(&self, node: &AggregationNode, context: &DocumentContext) -> Compiled {
        let source = self.compile_in(&node.source, context)?;
        self.reduce(node.kind, node.selector.as_deref(), source, context)
    }

    fn visit_boolean_function(&self, node: &BooleanFunctionNode, context: &DocumentContext) -> Compiled {
        let items = empty_if_null(self.compile_in(&node.source, context)?);
        let Some(predicate) = node.predicate.as_deref() else {
            return Ok(json!({"$gt": [{ "$size": items }, 0]}));
        };
        let results = self.map_elements(items, predicate, context)?;
        Ok(match node.kind {
            BooleanKind::Any => json!({ "$anyElementTrue": [results] }),
            BooleanKind::All => json!({ "$allElementsTrue": [results] }),
        })
    }

    fn visit_binary_condition(&self, node: &BinaryConditionNode, context: &DocumentContext) -> Compiled {
        let left = self.compile_in(&node.left, context)?;
        let right = self.compile_in(&node.right, context)?;
        let simple = |op: &str| -> Compiled {
            let mut out = Map::new();
            out.insert(op.to_string(), json!([left.clone(), right.clone()]));
            Ok(Value::Object(out))
        };

        match node.op {
            ComparisonOp::Equal => simple("$eq"),
            ComparisonOp::NotEqual => simple("$ne"),
            ComparisonOp::Greater => simple("$gt"),
            ComparisonOp::GreaterEqual => simple("$gte"),
            ComparisonOp::Less => simple("$lt"),
            ComparisonOp::LessEqual => simple("$lte"),
            op => let_in(context, left.clone(), |l, inner| {
                let_in(inner, right.clone(), |r, _| {
                    let strings = json!({"$and": [is_string(&l), is_string(&r)]});
                    let text = match op {
                        ComparisonOp::Contains => {
                            json!({"$gte": [{"$indexOfCP": [l.clone(), r.clone()]}, 0]})
                        }
                        ComparisonOp::StartsWith => {
                            json!({"$eq": [{"$indexOfCP": [l.clone(), r.clone()]}, 0]})
                        }
                        _ => json!({"$and": [
                            {"$gte": [{"$strLenCP": l.clone()}, {"$strLenCP": r.clone()}]},
                            {"$eq": [
                                {"$substrCP": [
                                    l.clone(),
                                    {"$subtract": [{"$strLenCP": l.clone()}, {"$strLenCP": r.clone()}]},
                                    {"$strLenCP": r.clone()}
                                ]},
                                r.clone()
                            ]}
                        ]}),
                    };
                    let text = json!({"$cond": [strings, text, false]});
                    Ok(if op == ComparisonOp::Contains {
                        json!({"$cond": [{"$isArray": [l.clone()]}, {"$in": [r, l]}, text]})
                    } else {
                        text
                    })
                })
            }),
        }
    }

    fn visit_logical_condition(&self, node: &LogicalConditionNode, context: &DocumentContext) -> Compiled {
        let left = self.compile_in(&node.left, context)?;
        let right = self.compile_in(&node.right, context)?;
        Ok(match node.op {
            LogicalOp::And => json!({ "$and": [left, right] }),
            LogicalOp::Or => json!({ "$or": [left, right] }),
        })
    }

    fn visit_not(&self, node: &NotNode, context: &DocumentContext) -> Compiled {
        Ok(json!({ "$not": [self.compile_in(&node.operand, context)?] }))
    }

    fn visit_coalesce(&self, node: &CoalesceNode, context: &DocumentContext) -> Compiled {
        Ok(json!({"$ifNull": [
            self.compile_in(&node.left, context)?,
            self.compile_in(&node.right, context)?
        ]}))
    }

    fn visit_ternary(&self, node: &TernaryNode, context: &DocumentContext) -> Compiled {
        Ok(json!({"$cond": [
            self.compile_in(&node.condition, context)?,
            self.compile_in(&node.when_true, context)?,
            self.compile_in(&node.when_false, context)?
        ]}))
    }

    fn visit_group_by(&self, node: &GroupByNode, context: &DocumentContext) -> Compiled {
        self.group(node, context)
    }

    fn visit_group_elements(&self, node: &GroupElementsNode, context: &DocumentContext) -> Compiled {
        let groups = self.group(&node.group, context)?;
        let (name, group) = context.element();
        let value = self.reduce(
            node.kind,
            node.selector.as_deref(),
            get_field("Items", group.current()),
            &group,
        )?;
        Ok(json!({"$map": {
            "input": groups,
            "as": name,
            "in": {"Key": get_field("Key", group.current()), "Value": value}
        }}))
    }

    fn visit_literal(&self, node: &Literal, _: &DocumentContext) -> Compiled {
        Ok(match node {
            Literal::String(s) => json!({ "$literal": s }),
            Literal::Number(n) => super::value::number(*n),
            Literal::Boolean(b) => Value::Bool(*b),
            Literal::Null => Value::Null,
        })
    }
}
