//! JSON value semantics shared by every backend.
//!
//! Comparison, truthiness, numeric normalization and reductions live here so
//! the in-memory compiler and the document evaluator cannot drift apart.

use std::cmp::Ordering;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use serde_json::{Map, Value};

use super::EvaluationError;
use crate::expression::{AggregateKind, SortDirection};

/// Conditional truthiness: `null`, `false` and zero are false.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => true,
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// Total order over JSON values: values of different types order by type
/// (null, number, string, object, array, boolean), values of the same type
/// by content.
pub fn compare(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            let a = a.as_f64().unwrap_or(0.0);
            let b = b.as_f64().unwrap_or(0.0);
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Array(a), Value::Array(b)) => {
            for (x, y) in a.iter().zip(b.iter()) {
                let ordering = compare(x, y);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            a.len().cmp(&b.len())
        }
        (Value::Object(a), Value::Object(b)) => {
            for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
                let ordering = ka.cmp(kb).then_with(|| compare(va, vb));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            a.len().cmp(&b.len())
        }
        _ => type_rank(left).cmp(&type_rank(right)),
    }
}

pub fn equals(left: &Value, right: &Value) -> bool {
    compare(left, right) == Ordering::Equal
}

/// Normalize a float: integral values become JSON integers.
pub fn number(value: f64) -> Value {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 9.0e15 {
        Value::from(value as i64)
    } else {
        Value::from(value)
    }
}

pub fn as_f64(value: &Value) -> Option<f64> {
    value.as_f64()
}

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Read a field from an object; anything else yields null.
pub fn field<'a>(value: &'a Value, name: &str) -> &'a Value {
    match value {
        Value::Object(map) => map.get(name).unwrap_or(&Value::Null),
        _ => &Value::Null,
    }
}

/// Read a dotted path (`Customer.Name`) through nested objects.
pub fn path<'a>(value: &'a Value, path: &str) -> &'a Value {
    path.split('.').fold(value, |current, segment| field(current, segment))
}

/// Require an array, treating `null` as absent.
pub fn array<'a>(value: &'a Value, context: &str) -> Result<Option<&'a Vec<Value>>, EvaluationError> {
    match value {
        Value::Null => Ok(None),
        Value::Array(items) => Ok(Some(items)),
        other => Err(EvaluationError::TypeMismatch {
            expected: "array",
            found: type_name(other),
            context: context.to_string(),
        }),
    }
}

/// Stable sort by an optional key path.
pub fn sort(items: &mut [Value], key: Option<&str>, direction: SortDirection) {
    items.sort_by(|a, b| {
        let ordering = match key {
            Some(key) => compare(path(a, key), path(b, key)),
            None => compare(a, b),
        };
        match direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    });
}

/// Element at a 0-based index, negative indices counting from the end.
pub fn element_at(items: &[Value], index: i64) -> Value {
    let resolved = if index < 0 {
        items.len() as i64 + index
    } else {
        index
    };
    usize::try_from(resolved)
        .ok()
        .and_then(|i| items.get(i))
        .cloned()
        .unwrap_or(Value::Null)
}

/// `items[skip..skip + take]`, clamped to bounds.
pub fn slice(items: &[Value], skip: i64, take: i64) -> Value {
    let start = usize::try_from(skip.max(0)).unwrap_or(0).min(items.len());
    let take = usize::try_from(take.max(0)).unwrap_or(0);
    let end = start.saturating_add(take).min(items.len());
    Value::Array(items[start..end].to_vec())
}

/// Reduce already-selected values. `Count` counts every value.
pub fn aggregate(kind: AggregateKind, values: &[Value]) -> Value {
    match kind {
        AggregateKind::Count => Value::from(values.len() as u64),
        AggregateKind::Sum => number(values.iter().filter_map(as_f64).sum()),
        AggregateKind::Avg => {
            let numbers: Vec<f64> = values.iter().filter_map(as_f64).collect();
            if numbers.is_empty() {
                Value::Null
            } else {
                number(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
        AggregateKind::Min => values
            .iter()
            .filter(|v| !v.is_null())
            .min_by(|a, b| compare(a, b))
            .cloned()
            .unwrap_or(Value::Null),
        AggregateKind::Max => values
            .iter()
            .filter(|v| !v.is_null())
            .max_by(|a, b| compare(a, b))
            .cloned()
            .unwrap_or(Value::Null),
    }
}

/// Group `items` by key in first-seen order, producing `[{Key, Items}]`.
pub fn group<F>(items: &[Value], mut key: F) -> Result<Value, EvaluationError>
where
    F: FnMut(&Value) -> Result<Value, EvaluationError>,
{
    let mut groups: Vec<(Value, Vec<Value>)> = Vec::new();
    for item in items {
        let k = key(item)?;
        match groups.iter_mut().find(|(existing, _)| equals(existing, &k)) {
            Some((_, members)) => members.push(item.clone()),
            None => groups.push((k, vec![item.clone()])),
        }
    }
    Ok(Value::Array(
        groups
            .into_iter()
            .map(|(k, members)| {
                let mut entry = Map::new();
                entry.insert("Key".to_string(), k);
                entry.insert("Items".to_string(), Value::Array(members));
                Value::Object(entry)
            })
            .collect(),
    ))
}

/// Parse an ISO-8601 date or date-time string.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.date_naive());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt.date());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

/// Date part extraction shared by `year`, `month` and `day`.
pub fn date_part(value: &Value, part: DatePart) -> Result<Value, EvaluationError> {
    let text = match value {
        Value::Null => return Ok(Value::Null),
        Value::String(s) => s,
        other => {
            return Err(EvaluationError::TypeMismatch {
                expected: "date string",
                found: type_name(other),
                context: part.name().to_string(),
            })
        }
    };
    let date = parse_date(text).ok_or_else(|| EvaluationError::InvalidDate(text.clone()))?;
    Ok(Value::from(match part {
        DatePart::Year => date.year() as i64,
        DatePart::Month => date.month() as i64,
        DatePart::Day => date.day() as i64,
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePart {
    Year,
    Month,
    Day,
}

impl DatePart {
    pub fn name(self) -> &'static str {
        match self {
            Self::Year => "year",
            Self::Month => "month",
            Self::Day => "day",
        }
    }
}

/// Round half away from zero to `digits` decimal places.
pub fn round(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (value * factor).round() / factor
}
