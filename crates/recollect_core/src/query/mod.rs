//! Query literals and their compilation into predicates.
//!
//! A [`Query`] maps field keypaths to [`Condition`]s. A condition is a
//! conjunction of [`Clause`]s, one per operator:
//!
//! | operator    | holds when                                               |
//! |-------------|----------------------------------------------------------|
//! | `$eq`       | the value is structurally equal to the reference         |
//! | `$gt` etc.  | both sides are integers, texts or booleans and compare   |
//! | `$neq`      | the value is not strictly equal to the reference         |
//! | `$contains` | the reference text occurs in the value past position 0   |
//! | `$regex`    | the pattern matches the value coerced to text            |
//! | `$fn`       | the user predicate returns `Ok(true)`                    |
//! | `$fnUnsafe` | as `$fn`, but errors reach the caller                    |
//!
//! A record matches when every queried keypath resolves and every clause on
//! it holds. Compile with [`compile`].

mod predicate;

pub use predicate::{compile, Predicate};

use crate::error::{BoxError, CoreError, CoreResult};
use recollect_codec::{Pattern, Value};
use std::fmt;
use std::sync::Arc;

/// A user-supplied test over a field value.
pub type UserPredicate = Arc<dyn Fn(&Value) -> Result<bool, BoxError> + Send + Sync>;

/// Recognized query operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// `$eq`
    Eq,
    /// `$gt`
    Gt,
    /// `$lt`
    Lt,
    /// `$gte`
    Gte,
    /// `$lte`
    Lte,
    /// `$neq`
    Neq,
    /// `$contains`
    Contains,
    /// `$regex`
    Regex,
    /// `$fn`
    Fn,
    /// `$fnUnsafe`
    FnUnsafe,
}

impl Operator {
    /// Every operator, in declaration order.
    pub const ALL: [Operator; 10] = [
        Operator::Eq,
        Operator::Gt,
        Operator::Lt,
        Operator::Gte,
        Operator::Lte,
        Operator::Neq,
        Operator::Contains,
        Operator::Regex,
        Operator::Fn,
        Operator::FnUnsafe,
    ];

    /// Looks up an operator by its `$name`.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }

    /// The `$name` of this operator.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Operator::Eq => "$eq",
            Operator::Gt => "$gt",
            Operator::Lt => "$lt",
            Operator::Gte => "$gte",
            Operator::Lte => "$lte",
            Operator::Neq => "$neq",
            Operator::Contains => "$contains",
            Operator::Regex => "$regex",
            Operator::Fn => "$fn",
            Operator::FnUnsafe => "$fnUnsafe",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One operator applied to a field value.
#[derive(Clone)]
pub enum Clause {
    /// `$eq`
    Eq(Value),
    /// `$gt`
    Gt(Value),
    /// `$lt`
    Lt(Value),
    /// `$gte`
    Gte(Value),
    /// `$lte`
    Lte(Value),
    /// `$neq`
    Neq(Value),
    /// `$contains`
    Contains(Value),
    /// `$regex`; the reference must be a [`Value::Regex`].
    Regex(Value),
    /// `$fn`
    Fn(UserPredicate),
    /// `$fnUnsafe`
    FnUnsafe(UserPredicate),
}

impl Clause {
    /// The operator of this clause.
    #[must_use]
    pub fn operator(&self) -> Operator {
        match self {
            Clause::Eq(_) => Operator::Eq,
            Clause::Gt(_) => Operator::Gt,
            Clause::Lt(_) => Operator::Lt,
            Clause::Gte(_) => Operator::Gte,
            Clause::Lte(_) => Operator::Lte,
            Clause::Neq(_) => Operator::Neq,
            Clause::Contains(_) => Operator::Contains,
            Clause::Regex(_) => Operator::Regex,
            Clause::Fn(_) => Operator::Fn,
            Clause::FnUnsafe(_) => Operator::FnUnsafe,
        }
    }

    fn from_operator(op: Operator, reference: &Value) -> CoreResult<Self> {
        let reference = reference.clone();
        Ok(match op {
            Operator::Eq => Clause::Eq(reference),
            Operator::Gt => Clause::Gt(reference),
            Operator::Lt => Clause::Lt(reference),
            Operator::Gte => Clause::Gte(reference),
            Operator::Lte => Clause::Lte(reference),
            Operator::Neq => Clause::Neq(reference),
            Operator::Contains => Clause::Contains(reference),
            Operator::Regex => Clause::Regex(reference),
            Operator::Fn | Operator::FnUnsafe => {
                return Err(CoreError::invalid_argument(format!(
                    "{op} needs a function and cannot be written as a value"
                )))
            }
        })
    }
}

impl fmt::Debug for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Clause::Eq(v)
            | Clause::Gt(v)
            | Clause::Lt(v)
            | Clause::Gte(v)
            | Clause::Lte(v)
            | Clause::Neq(v)
            | Clause::Contains(v)
            | Clause::Regex(v) => write!(f, "{}({v:?})", self.operator()),
            Clause::Fn(_) | Clause::FnUnsafe(_) => write!(f, "{}(<function>)", self.operator()),
        }
    }
}

/// The test applied to one field: a conjunction of clauses.
///
/// A condition with no clauses holds for any value that is present.
#[derive(Debug, Clone, Default)]
pub struct Condition {
    clauses: Vec<Clause>,
}

impl Condition {
    /// An empty conjunction.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A bare literal: a pattern becomes `$regex`, anything else `$eq`.
    #[must_use]
    pub fn literal(value: impl Into<Value>) -> Self {
        match value.into() {
            pattern @ Value::Regex(_) => Self::new().regex_value(pattern),
            other => Self::new().eq(other),
        }
    }

    /// Classifies a condition written as a value.
    ///
    /// A map whose keys are all operator names is an operator object; any
    /// other map, and every other value, is a [`Condition::literal`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for `$fn`/`$fnUnsafe`, which
    /// cannot be expressed as values.
    pub fn from_value(value: &Value) -> CoreResult<Self> {
        let Some(pairs) = value.as_map() else {
            return Ok(Self::literal(value.clone()));
        };
        let operators: Option<Vec<(Operator, &Value)>> = pairs
            .iter()
            .map(|(k, v)| k.as_text().and_then(Operator::from_name).map(|op| (op, v)))
            .collect();
        match operators {
            Some(operators) => {
                let clauses = operators
                    .into_iter()
                    .map(|(op, reference)| Clause::from_operator(op, reference))
                    .collect::<CoreResult<_>>()?;
                Ok(Self { clauses })
            }
            None => Ok(Self::new().eq(value.clone())),
        }
    }

    /// Adds a clause.
    #[must_use]
    pub fn clause(mut self, clause: Clause) -> Self {
        self.clauses.push(clause);
        self
    }

    /// Adds `$eq`.
    #[must_use]
    pub fn eq(self, value: impl Into<Value>) -> Self {
        self.clause(Clause::Eq(value.into()))
    }

    /// Adds `$gt`.
    #[must_use]
    pub fn gt(self, value: impl Into<Value>) -> Self {
        self.clause(Clause::Gt(value.into()))
    }

    /// Adds `$lt`.
    #[must_use]
    pub fn lt(self, value: impl Into<Value>) -> Self {
        self.clause(Clause::Lt(value.into()))
    }

    /// Adds `$gte`.
    #[must_use]
    pub fn gte(self, value: impl Into<Value>) -> Self {
        self.clause(Clause::Gte(value.into()))
    }

    /// Adds `$lte`.
    #[must_use]
    pub fn lte(self, value: impl Into<Value>) -> Self {
        self.clause(Clause::Lte(value.into()))
    }

    /// Adds `$neq`.
    #[must_use]
    pub fn neq(self, value: impl Into<Value>) -> Self {
        self.clause(Clause::Neq(value.into()))
    }

    /// Adds `$contains`.
    #[must_use]
    pub fn contains(self, value: impl Into<Value>) -> Self {
        self.clause(Clause::Contains(value.into()))
    }

    /// Adds `$regex`.
    #[must_use]
    pub fn regex(self, pattern: Pattern) -> Self {
        self.clause(Clause::Regex(Value::Regex(pattern)))
    }

    fn regex_value(self, value: Value) -> Self {
        self.clause(Clause::Regex(value))
    }

    /// Adds `$fn`. An error from `f` counts as no match.
    #[must_use]
    pub fn func<F>(self, f: F) -> Self
    where
        F: Fn(&Value) -> Result<bool, BoxError> + Send + Sync + 'static,
    {
        self.clause(Clause::Fn(Arc::new(f)))
    }

    /// Adds `$fnUnsafe`. An error from `f` fails the whole operation.
    #[must_use]
    pub fn func_unsafe<F>(self, f: F) -> Self
    where
        F: Fn(&Value) -> Result<bool, BoxError> + Send + Sync + 'static,
    {
        self.clause(Clause::FnUnsafe(Arc::new(f)))
    }

    /// The clauses, in insertion order.
    #[must_use]
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }
}

/// A mapping from field keypaths to conditions.
///
/// Keypaths are dotted strings; `\.` stands for a literal dot. Adding the
/// same keypath twice replaces the earlier condition.
///
/// # Example
///
/// ```rust
/// use recollect_core::{Condition, Query};
///
/// let query = Query::new()
///     .eq("name", "ada")
///     .field("address.zip", Condition::new().gte(10000).lt(20000))
///     .field("email", Condition::new().func(|v| Ok(v.as_text().is_some())));
/// assert_eq!(query.len(), 3);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Query {
    fields: Vec<(String, Condition)>,
}

impl Query {
    /// The empty query, matching every record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the condition on `path`.
    #[must_use]
    pub fn field(mut self, path: impl Into<String>, condition: Condition) -> Self {
        let path = path.into();
        match self.fields.iter_mut().find(|(p, _)| *p == path) {
            Some(slot) => slot.1 = condition,
            None => self.fields.push((path, condition)),
        }
        self
    }

    /// Sets a literal condition on `path`.
    #[must_use]
    pub fn eq(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.field(path, Condition::literal(value))
    }

    /// Builds a query from a map of keypath to condition value.
    ///
    /// `Null` is the empty query.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] if `value` is not a map with
    /// text keys, or a condition cannot be expressed as a value.
    pub fn from_value(value: &Value) -> CoreResult<Self> {
        if value.is_null() {
            return Ok(Self::new());
        }
        let pairs = value.as_map().ok_or_else(|| {
            CoreError::invalid_argument(format!("query must be a map, got {}", value.type_name()))
        })?;
        let mut query = Self::new();
        for (path, condition) in pairs {
            let path = path
                .as_text()
                .ok_or_else(|| CoreError::invalid_argument("query keys must be text"))?;
            query = query.field(path, Condition::from_value(condition)?);
        }
        Ok(query)
    }

    /// The (keypath, condition) pairs.
    #[must_use]
    pub fn fields(&self) -> &[(String, Condition)] {
        &self.fields
    }

    /// Number of queried keypaths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the query has no conditions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Rewrites every keypath with `f`.
    #[must_use]
    pub fn map_paths(self, mut f: impl FnMut(&str) -> String) -> Self {
        Self {
            fields: self
                .fields
                .into_iter()
                .map(|(path, condition)| (f(&path), condition))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recollect_codec::PatternFlags;

    fn ops(condition: &Condition) -> Vec<Operator> {
        condition.clauses().iter().map(Clause::operator).collect()
    }

    #[test]
    fn operator_names_roundtrip() {
        for op in Operator::ALL {
            assert_eq!(Operator::from_name(op.name()), Some(op));
        }
        assert_eq!(Operator::from_name("$nope"), None);
        assert_eq!(Operator::from_name("eq"), None);
    }

    #[test]
    fn literal_classification() {
        assert_eq!(ops(&Condition::literal("x")), vec![Operator::Eq]);
        assert_eq!(
            ops(&Condition::literal(Pattern::with_flags("a", PatternFlags::NONE))),
            vec![Operator::Regex]
        );
    }

    #[test]
    fn operator_object_becomes_conjunction() {
        let value = Value::object([("$gt", Value::from(1)), ("$lt", Value::from(5))]);
        let condition = Condition::from_value(&value).unwrap();
        let mut found = ops(&condition);
        found.sort_by_key(|op| op.name());
        assert_eq!(found, vec![Operator::Gt, Operator::Lt]);
    }

    #[test]
    fn mixed_map_is_a_literal() {
        let value = Value::object([("$gt", Value::from(1)), ("name", Value::from("a"))]);
        let condition = Condition::from_value(&value).unwrap();
        assert!(matches!(condition.clauses(), [Clause::Eq(v)] if *v == value));
    }

    #[test]
    fn empty_map_is_an_empty_conjunction() {
        let condition = Condition::from_value(&Value::empty_map()).unwrap();
        assert!(condition.clauses().is_empty());
    }

    #[test]
    fn functions_cannot_come_from_values() {
        let value = Value::object([("$fn", Value::Null)]);
        assert!(matches!(
            Condition::from_value(&value),
            Err(CoreError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn query_from_value() {
        let value = Value::object([
            ("name", Value::from("a")),
            ("age", Value::object([("$gte", Value::from(18))])),
        ]);
        let query = Query::from_value(&value).unwrap();
        assert_eq!(query.len(), 2);
        assert!(Query::from_value(&Value::Null).unwrap().is_empty());
        assert!(Query::from_value(&Value::from(3)).is_err());
    }

    #[test]
    fn repeated_path_replaces() {
        let query = Query::new().eq("a", 1).eq("a", 2);
        assert_eq!(query.len(), 1);
        assert!(matches!(
            query.fields()[0].1.clauses(),
            [Clause::Eq(Value::Integer(2))]
        ));
    }

    #[test]
    fn map_paths_rewrites_keys() {
        let query = Query::new().eq("a", 1).map_paths(|p| format!("$data.{p}"));
        assert_eq!(query.fields()[0].0, "$data.a");
    }
}
