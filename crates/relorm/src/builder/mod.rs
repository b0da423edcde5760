//! Compiling query ASTs and write statements into parameterized SQL.
//!
//! [`QueryBuilder`] is the dialect seam: the rest of the crate only ever sees
//! [`BuiltQuery`] values, never string-concatenated values.

mod postgres;

pub use postgres::PgQueryBuilder;

use crate::condition::Condition;
use crate::error::OrmResult;
use crate::query::QueryExpr;
use crate::value::Value;
use indexmap::IndexMap;

/// A compiled statement: SQL text plus the values for its placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

impl BuiltQuery {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// Statement without parameters.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self::new(sql, Vec::new())
    }
}

/// Dialect-specific SQL generation.
pub trait QueryBuilder: Send + Sync {
    /// Compile a SELECT (including unions and sub-queries).
    fn build(&self, query: &QueryExpr) -> OrmResult<BuiltQuery>;

    /// `INSERT INTO table (...) VALUES (...)`, optionally returning columns.
    ///
    /// An empty `values` map inserts a row of defaults.
    fn insert(
        &self,
        table: &str,
        values: &IndexMap<String, Value>,
        returning: &[String],
    ) -> OrmResult<BuiltQuery>;

    /// `UPDATE table SET ... WHERE condition`
    fn update(
        &self,
        table: &str,
        values: &IndexMap<String, Value>,
        condition: &Condition,
    ) -> OrmResult<BuiltQuery>;

    /// `UPDATE table SET col = col + delta, ... WHERE condition`
    fn update_counters(
        &self,
        table: &str,
        counters: &IndexMap<String, i64>,
        condition: &Condition,
    ) -> OrmResult<BuiltQuery>;

    /// `DELETE FROM table WHERE condition`
    fn delete(&self, table: &str, condition: &Condition) -> OrmResult<BuiltQuery>;

    /// Wrap a compiled SELECT into a boolean existence check.
    fn exists(&self, query: &BuiltQuery) -> BuiltQuery;

    /// Whether INSERT can hand back generated columns in the same statement.
    fn supports_returning(&self) -> bool;

    fn quote_table(&self, name: &str) -> OrmResult<String>;

    fn quote_column(&self, name: &str) -> OrmResult<String>;
}
