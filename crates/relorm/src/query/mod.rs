//! Fluent SELECT builder and executor.
//!
//! A [`Query`] mutates a [`QueryExpr`] and compiles it afresh on every
//! terminal call (`all`, `one`, `count`, ...), so two terminal calls on the
//! same query always reflect its state at call time.
//!
//! ```ignore
//! use relorm::{Condition, Query};
//!
//! let rows = Query::new()
//!     .select(["id", "name"])
//!     .from("users")
//!     .where_(Condition::eq("status", "active"))
//!     .and_where(Condition::gt("age", 18))
//!     .order_by("name, id DESC")
//!     .limit(20)
//!     .all(&db)
//!     .await?;
//!
//! let total = Query::new().from("users").group_by(["country"]).count(&db, "*").await?;
//! ```

mod batch;
mod expr;

pub use batch::{BatchQuery, EachQuery};
pub use expr::{
    Direction, FromItem, Join, JoinKind, OrderItem, QueryExpr, SelectExpr, SelectItem, Source,
    UnionItem, UnionPart,
};

use crate::builder::{BuiltQuery, PgQueryBuilder, QueryBuilder};
use crate::condition::{BoolOp, Condition};
use crate::connection::Connection;
use crate::db::Db;
use crate::error::{OrmError, OrmResult};
use crate::params::Params;
use crate::row::{FromRow, Row};
use crate::value::Value;
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

/// Alias given to the derived table when a query is wrapped as a sub-select.
const SUBQUERY_ALIAS: &str = "c";

/// How rows are keyed by [`Query::column_indexed`] / [`Query::all_indexed`].
#[derive(Clone)]
pub enum IndexBy {
    Column(String),
    Fn(Arc<dyn Fn(&Row) -> String + Send + Sync>),
}

impl IndexBy {
    fn key(&self, row: &Row) -> String {
        match self {
            IndexBy::Column(c) => row.get(c).map(Value::to_key_string).unwrap_or_default(),
            IndexBy::Fn(f) => f(row),
        }
    }
}

impl fmt::Debug for IndexBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexBy::Column(c) => f.debug_tuple("Column").field(c).finish(),
            IndexBy::Fn(_) => f.write_str("Fn(..)"),
        }
    }
}

/// Split `"name AS alias"` / `"expr alias"` style strings.
fn split_alias(s: &str) -> (String, Option<String>) {
    let trimmed = s.trim();
    let lower = trimmed.to_ascii_lowercase();
    if let Some(pos) = lower.rfind(" as ") {
        let alias = trimmed[pos + 4..].trim();
        if is_plain_name(alias) {
            return (trimmed[..pos].trim().to_string(), Some(alias.to_string()));
        }
    }
    (trimmed.to_string(), None)
}

fn is_plain_name(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

/// Parse a FROM/JOIN string: `table`, `table alias`, `table AS alias`, or raw SQL.
fn parse_source(s: &str) -> (Source, Option<String>) {
    let trimmed = s.trim();
    if trimmed.contains('(') {
        return (Source::Raw(trimmed.to_string()), None);
    }
    let parts: Vec<&str> = trimmed.split_whitespace().collect();
    match parts.as_slice() {
        [table] => (Source::Table((*table).to_string()), None),
        [table, alias] if is_plain_name(alias) => {
            (Source::Table((*table).to_string()), Some((*alias).to_string()))
        }
        [table, kw, alias] if kw.eq_ignore_ascii_case("as") && is_plain_name(alias) => {
            (Source::Table((*table).to_string()), Some((*alias).to_string()))
        }
        _ => (Source::Raw(trimmed.to_string()), None),
    }
}

/// Split at commas outside parentheses and quotes.
fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote = None;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

/// Parse `"a, b DESC, COALESCE(c, d) asc"` into order items.
fn parse_order(order: &str) -> Vec<OrderItem> {
    split_top_level(order)
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|item| {
            let upper = item.to_ascii_uppercase();
            if upper.ends_with(" DESC") {
                OrderItem {
                    expr: item[..item.len() - 5].trim().to_string(),
                    direction: Direction::Desc,
                }
            } else if upper.ends_with(" ASC") {
                OrderItem {
                    expr: item[..item.len() - 4].trim().to_string(),
                    direction: Direction::Asc,
                }
            } else {
                OrderItem {
                    expr: item.to_string(),
                    direction: Direction::Asc,
                }
            }
        })
        .collect()
}

fn select_item(col: String) -> SelectItem {
    let (expr, alias) = split_alias(&col);
    SelectItem {
        expr: SelectExpr::Column(expr),
        alias,
    }
}

/// Fluent query builder.
#[derive(Debug, Clone, Default)]
pub struct Query {
    expr: QueryExpr,
    index_by: Option<IndexBy>,
}

impl From<Query> for QueryExpr {
    fn from(q: Query) -> Self {
        q.expr
    }
}

impl From<QueryExpr> for Query {
    fn from(expr: QueryExpr) -> Self {
        Self {
            expr,
            index_by: None,
        }
    }
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expr(&self) -> &QueryExpr {
        &self.expr
    }

    pub fn expr_mut(&mut self) -> &mut QueryExpr {
        &mut self.expr
    }

    pub fn into_expr(self) -> QueryExpr {
        self.expr
    }

    // ==================== SELECT ====================

    /// Replace the select list. Items may carry an alias (`"price * qty AS total"`).
    pub fn select<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.expr.select = columns.into_iter().map(|c| select_item(c.into())).collect();
        self
    }

    pub fn add_select<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.expr
            .select
            .extend(columns.into_iter().map(|c| select_item(c.into())));
        self
    }

    pub fn select_as(mut self, expr: impl Into<String>, alias: impl Into<String>) -> Self {
        self.expr.select.push(SelectItem {
            expr: SelectExpr::Column(expr.into()),
            alias: Some(alias.into()),
        });
        self
    }

    /// Append a raw select expression; it may reference `:name` params.
    pub fn select_raw(mut self, sql: impl Into<String>) -> Self {
        self.expr.select.push(SelectItem {
            expr: SelectExpr::Raw(sql.into()),
            alias: None,
        });
        self
    }

    /// Append a scalar sub-query.
    pub fn select_query(mut self, query: impl Into<QueryExpr>, alias: impl Into<String>) -> Self {
        self.expr.select.push(SelectItem {
            expr: SelectExpr::Query(Box::new(query.into())),
            alias: Some(alias.into()),
        });
        self
    }

    pub fn distinct(mut self) -> Self {
        self.expr.distinct = true;
        self
    }

    // ==================== FROM / JOIN ====================

    /// Add a source: `"users"`, `"users u"`, `"users AS u"`.
    pub fn from(mut self, table: impl Into<String>) -> Self {
        let (source, alias) = parse_source(&table.into());
        self.expr.from.push(FromItem { source, alias });
        self
    }

    pub fn from_as(mut self, table: impl Into<String>, alias: impl Into<String>) -> Self {
        self.expr.from.push(FromItem {
            source: Source::Table(table.into()),
            alias: Some(alias.into()),
        });
        self
    }

    pub fn from_query(mut self, query: impl Into<QueryExpr>, alias: impl Into<String>) -> Self {
        self.expr.from.push(FromItem {
            source: Source::Query(Box::new(query.into())),
            alias: Some(alias.into()),
        });
        self
    }

    /// Add a join. Positional `params` feed `?` markers of a raw ON fragment;
    /// named ones are merged into the query's params.
    pub fn join(
        mut self,
        kind: JoinKind,
        source: impl Into<String>,
        on: impl Into<Condition>,
        params: impl Into<Params>,
    ) -> Self {
        let (source, alias) = parse_source(&source.into());
        let (positional, named) = params.into().into_parts();
        let mut on = on.into();
        match &mut on {
            Condition::Raw { params, .. } => params.extend(positional),
            _ => self.expr.params.merge(Params::positional(positional)),
        }
        self.merge_named(named);
        let on = (!on.is_empty()).then_some(on);
        self.expr.joins.push(Join {
            kind,
            source,
            alias,
            on,
        });
        self
    }

    pub fn inner_join(
        self,
        source: impl Into<String>,
        on: impl Into<Condition>,
        params: impl Into<Params>,
    ) -> Self {
        self.join(JoinKind::Inner, source, on, params)
    }

    pub fn left_join(
        self,
        source: impl Into<String>,
        on: impl Into<Condition>,
        params: impl Into<Params>,
    ) -> Self {
        self.join(JoinKind::Left, source, on, params)
    }

    pub fn right_join(
        self,
        source: impl Into<String>,
        on: impl Into<Condition>,
        params: impl Into<Params>,
    ) -> Self {
        self.join(JoinKind::Right, source, on, params)
    }

    // ==================== WHERE ====================

    /// Replace the WHERE condition.
    pub fn where_(mut self, condition: impl Into<Condition>) -> Self {
        let condition = condition.into();
        self.expr.where_ = (!condition.is_empty()).then_some(condition);
        self
    }

    /// AND a condition onto the current WHERE; behaves like `where_` when empty.
    pub fn and_where(mut self, condition: impl Into<Condition>) -> Self {
        self.expr.where_ = Some(Condition::combine(
            self.expr.where_.take(),
            BoolOp::And,
            condition.into(),
        ))
        .filter(|c| !c.is_empty());
        self
    }

    /// OR a condition onto the current WHERE: `(current) OR (condition)`.
    pub fn or_where(mut self, condition: impl Into<Condition>) -> Self {
        self.expr.where_ = Some(Condition::combine(
            self.expr.where_.take(),
            BoolOp::Or,
            condition.into(),
        ))
        .filter(|c| !c.is_empty());
        self
    }

    /// Replace the WHERE condition with a raw fragment.
    pub fn where_raw(mut self, sql: impl Into<String>, params: impl Into<Params>) -> Self {
        let (positional, named) = params.into().into_parts();
        self.merge_named(named);
        self.where_(Condition::raw_with(sql, positional))
    }

    /// AND a hash condition built from the pairs whose value is not NULL.
    pub fn filter_where<K, V>(self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let pairs: Vec<(String, Value)> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(_, v)| !v.is_null())
            .collect();
        self.and_where(Condition::hash(pairs))
    }

    pub fn eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.and_where(Condition::eq(column, value))
    }

    pub fn ne(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.and_where(Condition::ne(column, value))
    }

    pub fn gt(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.and_where(Condition::gt(column, value))
    }

    pub fn gte(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.and_where(Condition::gte(column, value))
    }

    pub fn lt(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.and_where(Condition::lt(column, value))
    }

    pub fn lte(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.and_where(Condition::lte(column, value))
    }

    pub fn like(self, column: impl Into<String>, pattern: impl Into<Value>) -> Self {
        self.and_where(Condition::like(column, pattern))
    }

    pub fn in_list<V: Into<Value>>(
        self,
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.and_where(Condition::in_list(column, values))
    }

    pub fn is_null(self, column: impl Into<String>) -> Self {
        self.and_where(Condition::is_null(column))
    }

    // ==================== GROUP / HAVING ====================

    pub fn group_by<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.expr.group_by = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn add_group_by<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.expr.group_by.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn having(mut self, condition: impl Into<Condition>) -> Self {
        let condition = condition.into();
        self.expr.having = (!condition.is_empty()).then_some(condition);
        self
    }

    pub fn and_having(mut self, condition: impl Into<Condition>) -> Self {
        self.expr.having = Some(Condition::combine(
            self.expr.having.take(),
            BoolOp::And,
            condition.into(),
        ))
        .filter(|c| !c.is_empty());
        self
    }

    pub fn or_having(mut self, condition: impl Into<Condition>) -> Self {
        self.expr.having = Some(Condition::combine(
            self.expr.having.take(),
            BoolOp::Or,
            condition.into(),
        ))
        .filter(|c| !c.is_empty());
        self
    }

    // ==================== ORDER / LIMIT ====================

    /// Replace the ordering: `"name, created_at DESC"`.
    pub fn order_by(mut self, order: &str) -> Self {
        self.expr.order_by = parse_order(order);
        self
    }

    pub fn add_order_by(mut self, expr: impl Into<String>, direction: Direction) -> Self {
        self.expr.order_by.push(OrderItem {
            expr: expr.into(),
            direction,
        });
        self
    }

    pub fn order_by_asc(self, expr: impl Into<String>) -> Self {
        self.add_order_by(expr, Direction::Asc)
    }

    pub fn order_by_desc(self, expr: impl Into<String>) -> Self {
        self.add_order_by(expr, Direction::Desc)
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.expr.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: u64) -> Self {
        self.expr.offset = Some(n);
        self
    }

    // ==================== UNION / PARAMS ====================

    pub fn union(mut self, query: impl Into<QueryExpr>, all: bool) -> Self {
        self.expr.union.push(UnionItem {
            part: UnionPart::Query(Box::new(query.into())),
            all,
        });
        self
    }

    pub fn union_raw(mut self, sql: impl Into<String>, all: bool) -> Self {
        self.expr.union.push(UnionItem {
            part: UnionPart::Raw(sql.into()),
            all,
        });
        self
    }

    /// Replace all bound params.
    pub fn params(mut self, params: impl Into<Params>) -> Self {
        self.expr.params.set(params.into());
        self
    }

    /// Merge params: positional appended, named overwritten by key.
    pub fn add_params(mut self, params: impl Into<Params>) -> Self {
        self.expr.params.merge(params.into());
        self
    }

    fn merge_named(&mut self, named: IndexMap<String, Value>) {
        if named.is_empty() {
            return;
        }
        let params = named
            .into_iter()
            .fold(Params::new(), |p, (k, v)| p.bind(k, v));
        self.expr.params.merge(params);
    }

    /// Key indexed results by a column value.
    pub fn index_by(mut self, column: impl Into<String>) -> Self {
        self.index_by = Some(IndexBy::Column(column.into()));
        self
    }

    /// Key indexed results by a computed value.
    pub fn index_by_fn(mut self, f: impl Fn(&Row) -> String + Send + Sync + 'static) -> Self {
        self.index_by = Some(IndexBy::Fn(Arc::new(f)));
        self
    }

    // ==================== Compilation ====================

    pub fn build(&self, builder: &dyn QueryBuilder) -> OrmResult<BuiltQuery> {
        builder.build(&self.expr)
    }

    /// Compile with the Postgres dialect (for inspection and tests).
    pub fn to_sql(&self) -> OrmResult<BuiltQuery> {
        self.build(&PgQueryBuilder)
    }

    /// The query computing `select` (an aggregate) over this query's rows.
    pub(crate) fn aggregate_query(&self, select: String) -> Query {
        let select = vec![SelectItem {
            expr: SelectExpr::Raw(select),
            alias: None,
        }];
        if self.expr.needs_subquery_for_aggregate() {
            let expr = QueryExpr {
                select,
                from: vec![FromItem {
                    source: Source::Query(Box::new(self.expr.clone())),
                    alias: Some(SUBQUERY_ALIAS.to_string()),
                }],
                ..QueryExpr::default()
            };
            return Query {
                expr,
                index_by: None,
            };
        }
        let mut expr = self.expr.clone();
        expr.select = select;
        expr.order_by.clear();
        expr.limit = None;
        expr.offset = None;
        Query {
            expr,
            index_by: None,
        }
    }

    /// A copy of this query restricted to one window of rows.
    ///
    /// Unions are wrapped first so the window applies to the combined result.
    pub(crate) fn window(&self, limit: u64, offset: u64) -> Query {
        let mut expr = if self.expr.union.is_empty() {
            self.expr.clone()
        } else {
            QueryExpr {
                from: vec![FromItem {
                    source: Source::Query(Box::new(self.expr.clone())),
                    alias: Some(SUBQUERY_ALIAS.to_string()),
                }],
                ..QueryExpr::default()
            }
        };
        expr.limit = Some(limit);
        expr.offset = (offset > 0).then_some(offset);
        Query {
            expr,
            index_by: self.index_by.clone(),
        }
    }

    // ==================== Terminals ====================

    /// All matching rows; empty when nothing matches.
    pub async fn all<C: Connection>(&self, db: &Db<C>) -> OrmResult<Vec<Row>> {
        let built = self.build(db.builder())?;
        db.query(&built).await
    }

    /// The first matching row, or `None`.
    pub async fn one<C: Connection>(&self, db: &Db<C>) -> OrmResult<Option<Row>> {
        let rows = if self.expr.limit.is_some_and(|l| l <= 1) {
            self.all(db).await?
        } else {
            self.window(1, self.expr.offset.unwrap_or(0)).all(db).await?
        };
        Ok(rows.into_iter().next())
    }

    /// All matching rows decoded as `T`.
    pub async fn all_as<T: FromRow, C: Connection>(&self, db: &Db<C>) -> OrmResult<Vec<T>> {
        self.all(db).await?.into_iter().map(T::from_row).collect()
    }

    /// The first matching row decoded as `T`.
    pub async fn one_as<T: FromRow, C: Connection>(&self, db: &Db<C>) -> OrmResult<Option<T>> {
        self.one(db).await?.map(T::from_row).transpose()
    }

    /// First column of the first row, or `None` when there is no row.
    pub async fn scalar<C: Connection>(&self, db: &Db<C>) -> OrmResult<Option<Value>> {
        Ok(self
            .one(db)
            .await?
            .map(|row| row.into_first().unwrap_or(Value::Null)))
    }

    /// First column of every row.
    pub async fn column<C: Connection>(&self, db: &Db<C>) -> OrmResult<Vec<Value>> {
        Ok(self
            .all(db)
            .await?
            .into_iter()
            .map(|row| row.into_first().unwrap_or(Value::Null))
            .collect())
    }

    /// First column of every row keyed by the `index_by` selector (last row wins).
    ///
    /// With an index column that is not selected, it is added to the select
    /// list after the value column.
    pub async fn column_indexed<C: Connection>(
        &self,
        db: &Db<C>,
    ) -> OrmResult<IndexMap<String, Value>> {
        let index_by = self.require_index_by()?;
        let mut query = self.clone();
        if let IndexBy::Column(col) = index_by {
            let selected = query.expr.select.iter().any(|item| {
                item.alias.as_deref() == Some(col.as_str())
                    || matches!(&item.expr, SelectExpr::Column(c) if c == col)
            });
            if !query.expr.select.is_empty() && !selected {
                query = query.add_select([col.clone()]);
            }
        }
        let mut out = IndexMap::new();
        for row in query.all(db).await? {
            let key = index_by.key(&row);
            out.insert(key, row.into_first().unwrap_or(Value::Null));
        }
        Ok(out)
    }

    /// Rows keyed by the `index_by` selector (last row wins).
    pub async fn all_indexed<C: Connection>(&self, db: &Db<C>) -> OrmResult<IndexMap<String, Row>> {
        let index_by = self.require_index_by()?;
        let mut out = IndexMap::new();
        for row in self.all(db).await? {
            out.insert(index_by.key(&row), row);
        }
        Ok(out)
    }

    fn require_index_by(&self) -> OrmResult<&IndexBy> {
        self.index_by
            .as_ref()
            .ok_or_else(|| OrmError::config("indexed results need index_by to be set"))
    }

    async fn aggregate<C: Connection>(
        &self,
        db: &Db<C>,
        function: &str,
        expr: &str,
    ) -> OrmResult<Value> {
        let select = format!("{function}({})", db.builder().quote_column(expr)?);
        let built = self.aggregate_query(select).build(db.builder())?;
        Ok(db
            .query(&built)
            .await?
            .into_iter()
            .next()
            .and_then(Row::into_first)
            .unwrap_or(Value::Null))
    }

    /// `COUNT(expr)`; pass `"*"` to count rows.
    pub async fn count<C: Connection>(&self, db: &Db<C>, expr: &str) -> OrmResult<i64> {
        Ok(self.aggregate(db, "COUNT", expr).await?.as_i64().unwrap_or(0))
    }

    /// `SUM(expr)`; NULL when there are no rows.
    pub async fn sum<C: Connection>(&self, db: &Db<C>, expr: &str) -> OrmResult<Value> {
        self.aggregate(db, "SUM", expr).await
    }

    pub async fn average<C: Connection>(&self, db: &Db<C>, expr: &str) -> OrmResult<Option<f64>> {
        Ok(self.aggregate(db, "AVG", expr).await?.as_f64())
    }

    pub async fn min<C: Connection>(&self, db: &Db<C>, expr: &str) -> OrmResult<Value> {
        self.aggregate(db, "MIN", expr).await
    }

    pub async fn max<C: Connection>(&self, db: &Db<C>, expr: &str) -> OrmResult<Value> {
        self.aggregate(db, "MAX", expr).await
    }

    /// Whether at least one row matches.
    pub async fn exists<C: Connection>(&self, db: &Db<C>) -> OrmResult<bool> {
        let built = self.build(db.builder())?;
        let wrapped = db.builder().exists(&built);
        Ok(db
            .query(&wrapped)
            .await?
            .into_iter()
            .next()
            .and_then(Row::into_first)
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }

    /// Iterate in batches of `size` rows, fetched lazily.
    pub fn batch<'a, C: Connection>(&self, db: &'a Db<C>, size: u64) -> BatchQuery<'a, C> {
        BatchQuery::new(self.clone(), db, size)
    }

    /// Iterate row by row, fetching `size` rows at a time.
    pub fn each<'a, C: Connection>(&self, db: &'a Db<C>, size: u64) -> EachQuery<'a, C> {
        EachQuery::new(self.batch(db, size))
    }
}
