//! Reference interpreter for the aggregation operators the document
//! compiler emits.

use serde_json::{Map, Value};

use crate::compiler::value::{self, DatePart};
use crate::compiler::EvaluationError;
use crate::expression::{AggregateKind, SortDirection};

type Eval = Result<Value, EvaluationError>;

/// Evaluate an aggregation expression with `$$CURRENT` and `$$ROOT` bound
/// to `document`.
pub fn evaluate(expression: &Value, document: &Value) -> Eval {
    let mut scope = Scope {
        vars: vec![
            ("ROOT".to_string(), document.clone()),
            ("CURRENT".to_string(), document.clone()),
        ],
    };
    scope.eval(expression)
}

struct Scope {
    vars: Vec<(String, Value)>,
}

fn operand_list(operand: &Value) -> Vec<&Value> {
    match operand {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

fn arg<'a>(args: &'a Value, index: usize) -> &'a Value {
    match args {
        Value::Array(items) => items.get(index).unwrap_or(&Value::Null),
        other if index == 0 => other,
        _ => &Value::Null,
    }
}

fn named<'a>(spec: &'a Value, name: &str) -> &'a Value {
    value::field(spec, name)
}

fn text(value: &Value, op: &str) -> Result<Option<String>, EvaluationError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        other => Err(EvaluationError::TypeMismatch {
            expected: "string",
            found: value::type_name(other),
            context: op.to_string(),
        }),
    }
}

fn integer(value: &Value, op: &str) -> Result<i64, EvaluationError> {
    value
        .as_f64()
        .map(|f| f as i64)
        .ok_or_else(|| EvaluationError::InvalidArgument(format!("{} expects a number", op)))
}

fn bson_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "long",
        Value::Number(_) => "double",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn numeric<F>(value: Value, f: F) -> Value
where
    F: FnOnce(f64) -> f64,
{
    match value.as_f64() {
        Some(n) => value::number(f(n)),
        None => Value::Null,
    }
}

impl Scope {
    fn lookup(&self, name: &str) -> Eval {
        self.vars
            .iter()
            .rev()
            .find(|(var, _)| var == name)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| EvaluationError::UnknownVariable(name.to_string()))
    }

    fn with<T>(&mut self, bindings: Vec<(String, Value)>, f: impl FnOnce(&mut Self) -> T) -> T {
        let count = bindings.len();
        self.vars.extend(bindings);
        let result = f(self);
        self.vars.truncate(self.vars.len() - count);
        result
    }

    fn eval(&mut self, expression: &Value) -> Eval {
        match expression {
            Value::String(s) if s.starts_with("$$") => {
                let reference = &s[2..];
                let (name, path) = match reference.split_once('.') {
                    Some((name, path)) => (name, Some(path)),
                    None => (reference, None),
                };
                let bound = self.lookup(name)?;
                Ok(match path {
                    Some(path) => value::path(&bound, path).clone(),
                    None => bound,
                })
            }
            Value::String(s) if s.starts_with('$') => {
                let current = self.lookup("CURRENT")?;
                Ok(value::path(&current, &s[1..]).clone())
            }
            Value::Array(items) => items
                .iter()
                .map(|item| self.eval(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => match map.iter().next() {
                Some((op, operand)) if map.len() == 1 && op.starts_with('$') => {
                    self.operator(op, operand)
                }
                _ => {
                    let mut out = Map::new();
                    for (key, value) in map {
                        out.insert(key.clone(), self.eval(value)?);
                    }
                    Ok(Value::Object(out))
                }
            },
            literal => Ok(literal.clone()),
        }
    }

    fn eval_arg(&mut self, args: &Value, index: usize) -> Eval {
        self.eval(arg(args, index))
    }

    fn eval_pair(&mut self, args: &Value) -> Result<(Value, Value), EvaluationError> {
        Ok((self.eval_arg(args, 0)?, self.eval_arg(args, 1)?))
    }

    /// Evaluate `body` once per element of `input`, with the element bound as `as`.
    fn per_element<F>(&mut self, spec: &Value, body_key: &str, mut f: F) -> Result<Option<Vec<Value>>, EvaluationError>
    where
        F: FnMut(Value, Value) -> Option<Value>,
    {
        let input = self.eval(named(spec, "input"))?;
        let Some(items) = value::array(&input, body_key)? else {
            return Ok(None);
        };
        let name = named(spec, "as").as_str().unwrap_or("this").to_string();
        let body = named(spec, body_key);
        let mut out = Vec::new();
        for item in items {
            let result = self.with(vec![(name.clone(), item.clone())], |scope| scope.eval(body))?;
            if let Some(kept) = f(item.clone(), result) {
                out.push(kept);
            }
        }
        Ok(Some(out))
    }

    fn aggregate(&mut self, kind: AggregateKind, operand: &Value) -> Eval {
        let values = match operand {
            Value::Array(args) => args
                .iter()
                .map(|a| self.eval(a))
                .collect::<Result<Vec<_>, _>>()?,
            single => match self.eval(single)? {
                Value::Array(items) => items,
                other => vec![other],
            },
        };
        Ok(value::aggregate(kind, &values))
    }

    fn operator(&mut self, op: &str, operand: &Value) -> Eval {
        match op {
            "$literal" => Ok(operand.clone()),
            "$getField" => {
                let input = self.eval(named(operand, "input"))?;
                let field = named(operand, "field").as_str().unwrap_or_default();
                Ok(value::field(&input, field).clone())
            }
            "$let" => {
                let mut bindings = Vec::new();
                if let Value::Object(vars) = named(operand, "vars") {
                    for (name, expression) in vars {
                        bindings.push((name.clone(), self.eval(expression)?));
                    }
                }
                let body = named(operand, "in");
                self.with(bindings, |scope| scope.eval(body))
            }
            "$cond" => {
                let (condition, then, otherwise) = match operand {
                    Value::Object(_) => (
                        named(operand, "if"),
                        named(operand, "then"),
                        named(operand, "else"),
                    ),
                    args => (arg(args, 0), arg(args, 1), arg(args, 2)),
                };
                if value::truthy(&self.eval(condition)?) {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            "$ifNull" => {
                for candidate in operand_list(operand) {
                    let found = self.eval(candidate)?;
                    if !found.is_null() {
                        return Ok(found);
                    }
                }
                Ok(Value::Null)
            }
            "$type" => Ok(Value::from(bson_type(&self.eval_arg(operand, 0)?))),
            "$isArray" => Ok(Value::Bool(self.eval_arg(operand, 0)?.is_array())),

            // Arrays
            "$map" => Ok(self
                .per_element(operand, "in", |_, mapped| Some(mapped))?
                .map_or(Value::Null, Value::Array)),
            "$filter" => Ok(self
                .per_element(operand, "cond", |item, keep| value::truthy(&keep).then_some(item))?
                .map_or(Value::Null, Value::Array)),
            "$reduce" => {
                let input = self.eval(named(operand, "input"))?;
                let Some(items) = value::array(&input, "$reduce")? else {
                    return Ok(Value::Null);
                };
                let mut accumulator = self.eval(named(operand, "initialValue"))?;
                let body = named(operand, "in");
                for item in items {
                    let bindings = vec![
                        ("this".to_string(), item.clone()),
                        ("value".to_string(), accumulator),
                    ];
                    accumulator = self.with(bindings, |scope| scope.eval(body))?;
                }
                Ok(accumulator)
            }
            "$sortArray" => {
                let input = self.eval(named(operand, "input"))?;
                let Some(items) = value::array(&input, "$sortArray")? else {
                    return Ok(Value::Null);
                };
                let mut items = items.clone();
                let direction = |order: &Value| {
                    if order.as_i64() == Some(-1) {
                        SortDirection::Desc
                    } else {
                        SortDirection::Asc
                    }
                };
                match named(operand, "sortBy") {
                    Value::Object(keys) => {
                        for (path, order) in keys.iter().rev() {
                            value::sort(&mut items, Some(path), direction(order));
                        }
                    }
                    order => value::sort(&mut items, None, direction(order)),
                }
                Ok(Value::Array(items))
            }
            "$arrayElemAt" => {
                let (input, index) = self.eval_pair(operand)?;
                match value::array(&input, "$arrayElemAt")? {
                    Some(items) => Ok(value::element_at(items, integer(&index, op)?)),
                    None => Ok(Value::Null),
                }
            }
            "$slice" => {
                let input = self.eval_arg(operand, 0)?;
                let Some(items) = value::array(&input, "$slice")? else {
                    return Ok(Value::Null);
                };
                let skip = integer(&self.eval_arg(operand, 1)?, op)?;
                let take = integer(&self.eval_arg(operand, 2)?, op)?;
                Ok(value::slice(items, skip, take))
            }
            "$size" => {
                let input = self.eval_arg(operand, 0)?;
                match input {
                    Value::Array(items) => Ok(Value::from(items.len() as u64)),
                    other => Err(EvaluationError::TypeMismatch {
                        expected: "array",
                        found: value::type_name(&other),
                        context: op.to_string(),
                    }),
                }
            }
            "$concatArrays" => {
                let mut out = Vec::new();
                for part in operand_list(operand) {
                    match self.eval(part)? {
                        Value::Array(items) => out.extend(items),
                        Value::Null => return Ok(Value::Null),
                        other => out.push(other),
                    }
                }
                Ok(Value::Array(out))
            }
            "$in" => {
                let (needle, haystack) = self.eval_pair(operand)?;
                let items = value::array(&haystack, "$in")?.map(Vec::as_slice).unwrap_or(&[]);
                Ok(Value::Bool(items.iter().any(|i| value::equals(i, &needle))))
            }
            "$anyElementTrue" | "$allElementsTrue" => {
                let input = self.eval_arg(operand, 0)?;
                let items = value::array(&input, op)?.map(Vec::as_slice).unwrap_or(&[]);
                Ok(Value::Bool(if op == "$anyElementTrue" {
                    items.iter().any(value::truthy)
                } else {
                    items.iter().all(value::truthy)
                }))
            }

            // Reductions
            "$sum" => self.aggregate(AggregateKind::Sum, operand),
            "$avg" => self.aggregate(AggregateKind::Avg, operand),
            "$min" => self.aggregate(AggregateKind::Min, operand),
            "$max" => self.aggregate(AggregateKind::Max, operand),

            // Comparison and logic
            "$eq" | "$ne" | "$gt" | "$gte" | "$lt" | "$lte" => {
                use std::cmp::Ordering::*;
                let (left, right) = self.eval_pair(operand)?;
                let ordering = value::compare(&left, &right);
                Ok(Value::Bool(match op {
                    "$eq" => ordering == Equal,
                    "$ne" => ordering != Equal,
                    "$gt" => ordering == Greater,
                    "$gte" => ordering != Less,
                    "$lt" => ordering == Less,
                    _ => ordering != Greater,
                }))
            }
            "$and" => {
                for clause in operand_list(operand) {
                    if !value::truthy(&self.eval(clause)?) {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            "$or" => {
                for clause in operand_list(operand) {
                    if value::truthy(&self.eval(clause)?) {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            "$not" => Ok(Value::Bool(!value::truthy(&self.eval_arg(operand, 0)?))),

            // Strings
            "$toUpper" | "$toLower" => {
                let input = self.eval_arg(operand, 0)?;
                Ok(match text(&input, op)? {
                    Some(s) if op == "$toUpper" => Value::from(s.to_uppercase()),
                    Some(s) => Value::from(s.to_lowercase()),
                    None => Value::Null,
                })
            }
            "$trim" => {
                let input = self.eval(named(operand, "input"))?;
                Ok(text(&input, op)?.map_or(Value::Null, |s| Value::from(s.trim())))
            }
            "$strLenCP" => {
                let input = self.eval_arg(operand, 0)?;
                Ok(text(&input, op)?.map_or(Value::Null, |s| Value::from(s.chars().count() as u64)))
            }
            "$substrCP" => {
                let input = self.eval_arg(operand, 0)?;
                let Some(s) = text(&input, op)? else {
                    return Ok(Value::Null);
                };
                let start = integer(&self.eval_arg(operand, 1)?, op)?.max(0) as usize;
                let length = integer(&self.eval_arg(operand, 2)?, op)?.max(0) as usize;
                Ok(Value::from(s.chars().skip(start).take(length).collect::<String>()))
            }
            "$indexOfCP" => {
                let (haystack, needle) = self.eval_pair(operand)?;
                match (haystack, needle) {
                    (Value::String(haystack), Value::String(needle)) => Ok(Value::from(
                        haystack
                            .find(needle.as_str())
                            .map_or(-1, |byte| haystack[..byte].chars().count() as i64),
                    )),
                    _ => Ok(Value::Null),
                }
            }
            "$concat" => {
                let mut out = String::new();
                for part in operand_list(operand) {
                    match text(&self.eval(part)?, op)? {
                        Some(s) => out.push_str(&s),
                        None => return Ok(Value::Null),
                    }
                }
                Ok(Value::from(out))
            }
            "$replaceAll" => {
                let input = text(&self.eval(named(operand, "input"))?, op)?;
                let find = text(&self.eval(named(operand, "find"))?, op)?;
                let replacement = text(&self.eval(named(operand, "replacement"))?, op)?;
                Ok(match (input, find, replacement) {
                    (Some(s), Some(find), Some(with)) if !find.is_empty() => {
                        Value::from(s.replace(&find, &with))
                    }
                    (Some(s), Some(_), Some(_)) => Value::from(s),
                    _ => Value::Null,
                })
            }

            // Numbers
            "$subtract" => {
                let (left, right) = self.eval_pair(operand)?;
                Ok(match (left.as_f64(), right.as_f64()) {
                    (Some(a), Some(b)) => value::number(a - b),
                    _ => Value::Null,
                })
            }
            "$round" => {
                let input = self.eval_arg(operand, 0)?;
                let digits = match self.eval_arg(operand, 1)? {
                    Value::Null => 0,
                    other => integer(&other, op)? as i32,
                };
                Ok(numeric(input, |n| value::round(n, digits)))
            }
            "$floor" => Ok(numeric(self.eval_arg(operand, 0)?, f64::floor)),
            "$ceil" => Ok(numeric(self.eval_arg(operand, 0)?, f64::ceil)),
            "$abs" => Ok(numeric(self.eval_arg(operand, 0)?, f64::abs)),

            // Dates are carried as their ISO-8601 text.
            "$dateFromString" => {
                let input = self.eval(named(operand, "dateString"))?;
                match &input {
                    Value::Null => Ok(Value::Null),
                    Value::String(s) if value::parse_date(s).is_some() => Ok(input),
                    Value::String(s) => Err(EvaluationError::InvalidDate(s.clone())),
                    other => Err(EvaluationError::TypeMismatch {
                        expected: "date string",
                        found: value::type_name(other),
                        context: op.to_string(),
                    }),
                }
            }
            "$year" => value::date_part(&self.eval_arg(operand, 0)?, DatePart::Year),
            "$month" => value::date_part(&self.eval_arg(operand, 0)?, DatePart::Month),
            "$dayOfMonth" => value::date_part(&self.eval_arg(operand, 0)?, DatePart::Day),

            unknown => Err(EvaluationError::UnsupportedOperator(unknown.to_string())),
        }
    }
}
