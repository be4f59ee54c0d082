use super::{Clause, Query, UserPredicate};
use crate::error::{CoreError, CoreResult};
use recollect_codec::{keypath, Keypath, Value};
use regex::{Regex, RegexBuilder};
use std::cmp::Ordering;
use std::fmt;

/// A compiled query: a conjunction of field tests.
pub struct Predicate {
    tests: Vec<(Keypath, Vec<Test>)>,
}

enum Test {
    Eq(Value),
    Order(Value, fn(Ordering) -> bool),
    Neq(Value),
    Contains(Value),
    Regex(Regex),
    Fn(UserPredicate),
    FnUnsafe(UserPredicate),
}

/// Compiles `query` into a [`Predicate`].
///
/// # Errors
///
/// Returns [`CoreError::InvalidArgument`] if a `$regex` reference is not a
/// pattern or its source does not compile.
///
/// # Example
///
/// ```rust
/// use recollect_core::{compile, Condition, Query, Value};
///
/// let predicate = compile(&Query::new().field("n", Condition::new().gt(2))).unwrap();
/// assert!(predicate.matches(&Value::object([("n", Value::from(3))])).unwrap());
/// assert!(!predicate.matches(&Value::object([("m", Value::from(3))])).unwrap());
/// ```
pub fn compile(query: &Query) -> CoreResult<Predicate> {
    let tests = query
        .fields()
        .iter()
        .map(|(path, condition)| {
            let tests = condition
                .clauses()
                .iter()
                .map(compile_clause)
                .collect::<CoreResult<_>>()?;
            Ok((Keypath::parse(path), tests))
        })
        .collect::<CoreResult<_>>()?;
    Ok(Predicate { tests })
}

fn compile_clause(clause: &Clause) -> CoreResult<Test> {
    Ok(match clause {
        Clause::Eq(v) => Test::Eq(v.clone()),
        Clause::Gt(v) => Test::Order(v.clone(), Ordering::is_gt),
        Clause::Lt(v) => Test::Order(v.clone(), Ordering::is_lt),
        Clause::Gte(v) => Test::Order(v.clone(), Ordering::is_ge),
        Clause::Lte(v) => Test::Order(v.clone(), Ordering::is_le),
        Clause::Neq(v) => Test::Neq(v.clone()),
        Clause::Contains(v) => Test::Contains(v.clone()),
        Clause::Regex(v) => {
            let pattern = v.as_pattern().ok_or_else(|| {
                CoreError::invalid_argument(format!(
                    "$regex needs a pattern, got {}",
                    v.type_name()
                ))
            })?;
            let flags = pattern.flags();
            let regex = RegexBuilder::new(pattern.source())
                .case_insensitive(flags.ignore_case)
                .multi_line(flags.multiline)
                .build()
                .map_err(|e| CoreError::invalid_argument(format!("bad pattern {pattern}: {e}")))?;
            Test::Regex(regex)
        }
        Clause::Fn(f) => Test::Fn(f.clone()),
        Clause::FnUnsafe(f) => Test::FnUnsafe(f.clone()),
    })
}

impl Predicate {
    /// The predicate that holds for every record.
    #[must_use]
    pub fn always() -> Self {
        Self { tests: Vec::new() }
    }

    /// Whether this predicate holds for every record.
    #[must_use]
    pub fn is_always(&self) -> bool {
        self.tests.is_empty()
    }

    /// Tests `record`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Predicate`] when a `$fnUnsafe` function fails.
    pub fn matches(&self, record: &Value) -> CoreResult<bool> {
        for (path, tests) in &self.tests {
            let Some(value) = keypath::get(record, path) else {
                return Ok(false);
            };
            for test in tests {
                if !test.holds(path, value)? {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Predicate")
            .field(
                "paths",
                &self.tests.iter().map(|(p, _)| p.encode()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl Test {
    fn holds(&self, path: &Keypath, value: &Value) -> CoreResult<bool> {
        Ok(match self {
            Test::Eq(reference) => value.structurally_eq(reference),
            Test::Order(reference, accept) => compare(value, reference).is_some_and(*accept),
            Test::Neq(reference) => !strictly_equal(value, reference),
            Test::Contains(reference) => contains_past_start(value, reference),
            Test::Regex(regex) => coerce_text(value).is_some_and(|text| regex.is_match(&text)),
            Test::Fn(f) => match f(value) {
                Ok(hit) => hit,
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "$fn predicate failed, treating as no match");
                    false
                }
            },
            Test::FnUnsafe(f) => f(value).map_err(|e| {
                CoreError::predicate(format!("$fnUnsafe on '{path}'"), e)
            })?,
        })
    }
}

/// Natural ordering of two scalars of the same kind.
fn compare(value: &Value, reference: &Value) -> Option<Ordering> {
    match (value, reference) {
        (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
        (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Containers never equal anything strictly, not even themselves.
fn strictly_equal(value: &Value, reference: &Value) -> bool {
    match (value, reference) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Integer(a), Value::Integer(b)) => a == b,
        (Value::Text(a), Value::Text(b)) => a == b,
        _ => false,
    }
}

fn contains_past_start(value: &Value, reference: &Value) -> bool {
    match (value, reference) {
        (Value::Text(haystack), Value::Text(needle)) if !needle.is_empty() => {
            haystack.find(needle.as_str()).is_some_and(|at| at >= 1)
        }
        _ => false,
    }
}

/// Text form of a value for pattern matching.
///
/// Maps and byte strings have none. Inside arrays, null becomes empty.
fn coerce_text(value: &Value) -> Option<String> {
    match value {
        Value::Text(s) => Some(s.clone()),
        Value::Integer(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some("null".to_string()),
        Value::Regex(p) => Some(p.to_string()),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Null => Some(String::new()),
                other => coerce_text(other),
            })
            .collect::<Option<Vec<_>>>()
            .map(|parts| parts.join(",")),
        Value::Map(_) | Value::Bytes(_) => None,
    }
}
