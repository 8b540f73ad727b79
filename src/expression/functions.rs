//! Catalog of functions callable with `:name(args)`.

use super::ast::{AggregateKind, BooleanKind, ScalarFunction};

/// What a catalog entry compiles to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Scalar(ScalarFunction),
    Aggregate(AggregateKind),
    Boolean(BooleanKind),
    GroupBy,
}

/// Catalog entry: canonical name, kind and accepted argument count.
#[derive(Debug, Clone, Copy)]
pub struct FunctionSpec {
    pub name: &'static str,
    pub kind: FunctionKind,
    pub min_args: usize,
    /// `None` for variadic functions.
    pub max_args: Option<usize>,
}

impl FunctionSpec {
    pub fn accepts(&self, count: usize) -> bool {
        count >= self.min_args && self.max_args.map_or(true, |max| count <= max)
    }

    /// Human-readable arity for error messages.
    pub fn arity(&self) -> String {
        match self.max_args {
            Some(max) if max == self.min_args => format!("{}", max),
            Some(max) => format!("{} to {}", self.min_args, max),
            None => format!("at least {}", self.min_args),
        }
    }
}

const fn spec(
    name: &'static str,
    kind: FunctionKind,
    min_args: usize,
    max_args: Option<usize>,
) -> FunctionSpec {
    FunctionSpec {
        name,
        kind,
        min_args,
        max_args,
    }
}

static CATALOG: &[FunctionSpec] = &[
    spec("upper", FunctionKind::Scalar(ScalarFunction::Upper), 0, Some(0)),
    spec("lower", FunctionKind::Scalar(ScalarFunction::Lower), 0, Some(0)),
    spec("trim", FunctionKind::Scalar(ScalarFunction::Trim), 0, Some(0)),
    spec("length", FunctionKind::Scalar(ScalarFunction::Length), 0, Some(0)),
    spec("substring", FunctionKind::Scalar(ScalarFunction::Substring), 1, Some(2)),
    spec("concat", FunctionKind::Scalar(ScalarFunction::Concat), 1, None),
    spec("replace", FunctionKind::Scalar(ScalarFunction::Replace), 2, Some(2)),
    spec("round", FunctionKind::Scalar(ScalarFunction::Round), 0, Some(1)),
    spec("floor", FunctionKind::Scalar(ScalarFunction::Floor), 0, Some(0)),
    spec("ceil", FunctionKind::Scalar(ScalarFunction::Ceil), 0, Some(0)),
    spec("abs", FunctionKind::Scalar(ScalarFunction::Abs), 0, Some(0)),
    spec("year", FunctionKind::Scalar(ScalarFunction::Year), 0, Some(0)),
    spec("month", FunctionKind::Scalar(ScalarFunction::Month), 0, Some(0)),
    spec("day", FunctionKind::Scalar(ScalarFunction::Day), 0, Some(0)),
    spec("count", FunctionKind::Aggregate(AggregateKind::Count), 0, Some(1)),
    spec("sum", FunctionKind::Aggregate(AggregateKind::Sum), 0, Some(1)),
    spec("avg", FunctionKind::Aggregate(AggregateKind::Avg), 0, Some(1)),
    spec("min", FunctionKind::Aggregate(AggregateKind::Min), 0, Some(1)),
    spec("max", FunctionKind::Aggregate(AggregateKind::Max), 0, Some(1)),
    spec("any", FunctionKind::Boolean(BooleanKind::Any), 0, Some(1)),
    spec("all", FunctionKind::Boolean(BooleanKind::All), 1, Some(1)),
    spec("groupBy", FunctionKind::GroupBy, 1, Some(1)),
];

/// Look up a function by name (case-insensitive).
pub fn lookup(name: &str) -> Option<&'static FunctionSpec> {
    CATALOG.iter().find(|f| f.name.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert_eq!(lookup("groupby").unwrap().kind, FunctionKind::GroupBy);
        assert_eq!(
            lookup("UPPER").unwrap().kind,
            FunctionKind::Scalar(ScalarFunction::Upper)
        );
        assert!(lookup("frobnicate").is_none());
    }

    #[test]
    fn test_arity() {
        let substring = lookup("substring").unwrap();
        assert!(!substring.accepts(0));
        assert!(substring.accepts(1));
        assert!(substring.accepts(2));
        assert!(!substring.accepts(3));
        assert_eq!(substring.arity(), "1 to 2");
        assert_eq!(lookup("concat").unwrap().arity(), "at least 1");
    }
}
