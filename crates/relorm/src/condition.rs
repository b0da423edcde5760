//! Condition trees for WHERE / HAVING / JOIN ON clauses.
//!
//! [`Condition`] is an explicit tagged union: leaves compare a column with a
//! bound value (or embed a raw fragment), internal nodes combine children with
//! AND / OR / NOT. Values never end up in SQL text; the query builder turns
//! every one of them into a placeholder.
//!
//! ```ignore
//! use relorm::Condition;
//!
//! let c = Condition::and([
//!     Condition::eq("status", "active"),
//!     Condition::or([Condition::gt("age", 18), Condition::is_null("age")]),
//! ]);
//! ```

use crate::query::QueryExpr;
use crate::value::Value;

/// Boolean operator used when appending to an existing condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

/// A node in a condition tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// All children must hold.
    And(Vec<Condition>),
    /// At least one child must hold.
    Or(Vec<Condition>),
    /// Negation.
    Not(Box<Condition>),
    /// `column <op> value`
    Compare {
        column: String,
        op: &'static str,
        value: Value,
    },
    /// `column IS [NOT] NULL`
    Null { column: String, negated: bool },
    /// `column [NOT] IN (v1, v2, ...)`
    In {
        column: String,
        values: Vec<Value>,
        negated: bool,
    },
    /// `column [NOT] IN (SELECT ...)`
    InQuery {
        column: String,
        query: Box<QueryExpr>,
        negated: bool,
    },
    /// `column [NOT] BETWEEN from AND to`
    Between {
        column: String,
        from: Value,
        to: Value,
        negated: bool,
    },
    /// `[NOT] EXISTS (SELECT ...)`
    Exists { query: Box<QueryExpr>, negated: bool },
    /// Raw SQL fragment. `?` consumes `params` in order, `:name` refers to the
    /// enclosing query's named params.
    Raw { sql: String, params: Vec<Value> },
}

fn compare(column: impl Into<String>, op: &'static str, value: impl Into<Value>) -> Condition {
    Condition::Compare {
        column: column.into(),
        op,
        value: value.into(),
    }
}

impl Condition {
    pub fn and(items: impl IntoIterator<Item = Condition>) -> Self {
        Condition::And(items.into_iter().collect())
    }

    pub fn or(items: impl IntoIterator<Item = Condition>) -> Self {
        Condition::Or(items.into_iter().collect())
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(inner: Condition) -> Self {
        Condition::Not(Box::new(inner))
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        compare(column, "=", value)
    }

    pub fn ne(column: impl Into<String>, value: impl Into<Value>) -> Self {
        compare(column, "<>", value)
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        compare(column, ">", value)
    }

    pub fn gte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        compare(column, ">=", value)
    }

    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        compare(column, "<", value)
    }

    pub fn lte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        compare(column, "<=", value)
    }

    pub fn like(column: impl Into<String>, pattern: impl Into<Value>) -> Self {
        compare(column, "LIKE", pattern)
    }

    /// Case-insensitive LIKE
    pub fn ilike(column: impl Into<String>, pattern: impl Into<Value>) -> Self {
        compare(column, "ILIKE", pattern)
    }

    pub fn not_like(column: impl Into<String>, pattern: impl Into<Value>) -> Self {
        compare(column, "NOT LIKE", pattern)
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Condition::Null {
            column: column.into(),
            negated: false,
        }
    }

    pub fn is_not_null(column: impl Into<String>) -> Self {
        Condition::Null {
            column: column.into(),
            negated: true,
        }
    }

    /// `column IN (...)`. An empty list never matches.
    pub fn in_list<V: Into<Value>>(
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Condition::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
            negated: false,
        }
    }

    /// `column NOT IN (...)`. An empty list always matches.
    pub fn not_in<V: Into<Value>>(
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Condition::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
            negated: true,
        }
    }

    pub fn in_query(column: impl Into<String>, query: impl Into<QueryExpr>) -> Self {
        Condition::InQuery {
            column: column.into(),
            query: Box::new(query.into()),
            negated: false,
        }
    }

    pub fn not_in_query(column: impl Into<String>, query: impl Into<QueryExpr>) -> Self {
        Condition::InQuery {
            column: column.into(),
            query: Box::new(query.into()),
            negated: true,
        }
    }

    pub fn between(
        column: impl Into<String>,
        from: impl Into<Value>,
        to: impl Into<Value>,
    ) -> Self {
        Condition::Between {
            column: column.into(),
            from: from.into(),
            to: to.into(),
            negated: false,
        }
    }

    pub fn not_between(
        column: impl Into<String>,
        from: impl Into<Value>,
        to: impl Into<Value>,
    ) -> Self {
        Condition::Between {
            column: column.into(),
            from: from.into(),
            to: to.into(),
            negated: true,
        }
    }

    pub fn exists(query: impl Into<QueryExpr>) -> Self {
        Condition::Exists {
            query: Box::new(query.into()),
            negated: false,
        }
    }

    pub fn not_exists(query: impl Into<QueryExpr>) -> Self {
        Condition::Exists {
            query: Box::new(query.into()),
            negated: true,
        }
    }

    /// Raw SQL fragment without positional values.
    pub fn raw(sql: impl Into<String>) -> Self {
        Condition::Raw {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Raw SQL fragment whose `?` markers take `params` in order.
    pub fn raw_with<V: Into<Value>>(
        sql: impl Into<String>,
        params: impl IntoIterator<Item = V>,
    ) -> Self {
        Condition::Raw {
            sql: sql.into(),
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    /// AND of equalities; a `Null` value becomes `IS NULL`.
    pub fn hash<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Condition::And(
            pairs
                .into_iter()
                .map(|(k, v)| match v.into() {
                    Value::Null => Condition::is_null(k),
                    v => Condition::eq(k, v),
                })
                .collect(),
        )
    }

    /// Whether this condition renders to nothing.
    pub fn is_empty(&self) -> bool {
        match self {
            Condition::And(items) | Condition::Or(items) => items.iter().all(Condition::is_empty),
            Condition::Not(inner) => inner.is_empty(),
            Condition::Raw { sql, .. } => sql.trim().is_empty(),
            _ => false,
        }
    }

    /// Append `next` to an existing condition.
    ///
    /// The previous condition becomes the left operand and `next` the right one,
    /// so `where(a).and_where(b).or_where(c)` means `(a AND b) OR c`. Appending
    /// to a group of the same operator extends that group instead of nesting.
    pub fn combine(prev: Option<Condition>, op: BoolOp, next: Condition) -> Condition {
        let prev = match prev {
            Some(prev) if !prev.is_empty() => prev,
            _ => return next,
        };
        if next.is_empty() {
            return prev;
        }
        match (prev, op) {
            (Condition::And(mut items), BoolOp::And) => {
                items.push(next);
                Condition::And(items)
            }
            (Condition::Or(mut items), BoolOp::Or) => {
                items.push(next);
                Condition::Or(items)
            }
            (prev, BoolOp::And) => Condition::And(vec![prev, next]),
            (prev, BoolOp::Or) => Condition::Or(vec![prev, next]),
        }
    }
}

impl From<&str> for Condition {
    fn from(sql: &str) -> Self {
        Condition::raw(sql)
    }
}

impl From<String> for Condition {
    fn from(sql: String) -> Self {
        Condition::raw(sql)
    }
}

impl<K: Into<String>, V: Into<Value>, const N: usize> From<[(K, V); N]> for Condition {
    fn from(pairs: [(K, V); N]) -> Self {
        Condition::hash(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn and_then_or_wraps_the_prior_condition() {
        let a = Condition::eq("a", 1);
        let b = Condition::eq("b", 2);
        let c = Condition::eq("c", 3);
        let combined = Condition::combine(
            Some(Condition::combine(Some(a.clone()), BoolOp::And, b.clone())),
            BoolOp::Or,
            c.clone(),
        );
        assert_eq!(
            combined,
            Condition::Or(vec![Condition::And(vec![a, b]), c])
        );
    }

    #[test]
    fn same_operator_extends_group() {
        let combined = Condition::combine(
            Some(Condition::and([Condition::eq("a", 1), Condition::eq("b", 2)])),
            BoolOp::And,
            Condition::eq("c", 3),
        );
        assert!(matches!(combined, Condition::And(ref items) if items.len() == 3));
    }

    #[test]
    fn empty_sides_are_dropped() {
        let c = Condition::eq("a", 1);
        assert_eq!(Condition::combine(None, BoolOp::Or, c.clone()), c);
        assert_eq!(
            Condition::combine(Some(c.clone()), BoolOp::And, Condition::and([])),
            c
        );
        assert_eq!(
            Condition::combine(Some(Condition::raw(" ")), BoolOp::And, c.clone()),
            c
        );
    }

    #[test]
    fn hash_turns_null_into_is_null() {
        let c = Condition::hash([("a", Value::Int(1)), ("b", Value::Null)]);
        assert_eq!(
            c,
            Condition::And(vec![Condition::eq("a", 1), Condition::is_null("b")])
        );
    }
}
