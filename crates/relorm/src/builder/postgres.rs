use super::{BuiltQuery, QueryBuilder};
use crate::condition::Condition;
use crate::error::{OrmError, OrmResult};
use crate::ident::{self, Ident};
use crate::params::{ParamList, ParamScope, Params};
use crate::query::{FromItem, QueryExpr, SelectExpr, Source, UnionPart};
use crate::value::Value;
use indexmap::IndexMap;

fn placeholder(n: usize) -> String {
    format!("${n}")
}

/// Column names in write statements must be plain identifiers.
fn column_name(name: &str) -> OrmResult<String> {
    Ok(Ident::parse(name)?.to_sql())
}

fn needs_parens(c: &Condition) -> bool {
    matches!(
        c,
        Condition::And(_) | Condition::Or(_) | Condition::Raw { .. }
    )
}

/// Postgres dialect: `$n` placeholders, double-quoted identifiers,
/// `INSERT ... RETURNING`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgQueryBuilder;

impl PgQueryBuilder {
    pub fn new() -> Self {
        Self
    }

    /// `enclosing` holds the params of the queries this one is nested in.
    fn render_query<'q>(
        &self,
        q: &'q QueryExpr,
        enclosing: Vec<&'q Params>,
        out: &mut ParamList,
    ) -> OrmResult<String> {
        let mut scope = ParamScope::nested(&q.params, enclosing);
        let mut sql = String::from("SELECT ");
        if q.distinct {
            sql.push_str("DISTINCT ");
        }

        if q.select.is_empty() {
            sql.push('*');
        } else {
            for (i, item) in q.select.iter().enumerate() {
                if i > 0 {
                    sql.push_str(", ");
                }
                match &item.expr {
                    SelectExpr::Column(c) => sql.push_str(&ident::quote_column(c)?),
                    SelectExpr::Raw(raw) => {
                        sql.push_str(&scope.resolve(raw, &[], out, &placeholder)?)
                    }
                    SelectExpr::Query(sub) => {
                        sql.push('(');
                        sql.push_str(&self.render_query(sub, scope.chain(), out)?);
                        sql.push(')');
                    }
                }
                if let Some(alias) = &item.alias {
                    sql.push_str(" AS ");
                    sql.push_str(&column_name(alias)?);
                }
            }
        }

        if !q.from.is_empty() {
            sql.push_str(" FROM ");
            for (i, FromItem { source, alias }) in q.from.iter().enumerate() {
                if i > 0 {
                    sql.push_str(", ");
                }
                sql.push_str(&self.render_source(source, alias.as_deref(), &mut scope, out)?);
            }
        }

        for join in &q.joins {
            sql.push(' ');
            sql.push_str(join.kind.as_sql());
            sql.push(' ');
            sql.push_str(&self.render_source(&join.source, join.alias.as_deref(), &mut scope, out)?);
            if let Some(on) = &join.on {
                let on = self.render_condition(on, &mut scope, out)?;
                if !on.is_empty() {
                    sql.push_str(" ON ");
                    sql.push_str(&on);
                }
            }
        }

        if let Some(cond) = &q.where_ {
            let where_sql = self.render_condition(cond, &mut scope, out)?;
            if !where_sql.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&where_sql);
            }
        }

        if !q.group_by.is_empty() {
            let cols = q
                .group_by
                .iter()
                .map(|c| ident::quote_column(c))
                .collect::<OrmResult<Vec<_>>>()?;
            sql.push_str(" GROUP BY ");
            sql.push_str(&cols.join(", "));
        }

        if let Some(cond) = &q.having {
            let having = self.render_condition(cond, &mut scope, out)?;
            if !having.is_empty() {
                sql.push_str(" HAVING ");
                sql.push_str(&having);
            }
        }

        if !q.order_by.is_empty() {
            let items = q
                .order_by
                .iter()
                .map(|o| Ok(format!("{} {}", ident::quote_column(&o.expr)?, o.direction.as_sql())))
                .collect::<OrmResult<Vec<_>>>()?;
            sql.push_str(" ORDER BY ");
            sql.push_str(&items.join(", "));
        }

        if let Some(limit) = q.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = q.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }

        if !q.union.is_empty() {
            sql = format!("({sql})");
            for item in &q.union {
                let part = match &item.part {
                    UnionPart::Query(sub) => self.render_query(sub, scope.chain(), out)?,
                    UnionPart::Raw(raw) => scope.resolve(raw, &[], out, &placeholder)?,
                };
                sql.push_str(if item.all { " UNION ALL (" } else { " UNION (" });
                sql.push_str(&part);
                sql.push(')');
            }
        }

        Ok(sql)
    }

    fn render_source<'q>(
        &self,
        source: &'q Source,
        alias: Option<&str>,
        scope: &mut ParamScope<'q>,
        out: &mut ParamList,
    ) -> OrmResult<String> {
        let mut sql = match source {
            Source::Table(t) => ident::quote_table(t)?,
            Source::Raw(raw) => scope.resolve(raw, &[], out, &placeholder)?,
            Source::Query(sub) => format!("({})", self.render_query(sub, scope.chain(), out)?),
        };
        if let Some(alias) = alias {
            sql.push_str(" AS ");
            sql.push_str(&column_name(alias)?);
        }
        Ok(sql)
    }

    fn render_condition<'q>(
        &self,
        cond: &'q Condition,
        scope: &mut ParamScope<'q>,
        out: &mut ParamList,
    ) -> OrmResult<String> {
        let sql = match cond {
            Condition::And(items) | Condition::Or(items) => {
                let glue = if matches!(cond, Condition::And(_)) {
                    " AND "
                } else {
                    " OR "
                };
                let mut parts = Vec::with_capacity(items.len());
                for item in items.iter().filter(|c| !c.is_empty()) {
                    let s = self.render_condition(item, scope, out)?;
                    if !s.is_empty() {
                        parts.push((item, s));
                    }
                }
                if parts.len() == 1 {
                    return Ok(parts.remove(0).1);
                }
                parts
                    .into_iter()
                    .map(|(item, s)| if needs_parens(item) { format!("({s})") } else { s })
                    .collect::<Vec<_>>()
                    .join(glue)
            }
            Condition::Not(inner) => {
                let s = self.render_condition(inner, scope, out)?;
                if s.is_empty() { s } else { format!("NOT ({s})") }
            }
            Condition::Compare { column, op, value } => {
                let idx = out.push(value.clone());
                format!("{} {op} ${idx}", ident::quote_column(column)?)
            }
            Condition::Null { column, negated } => format!(
                "{} IS {}NULL",
                ident::quote_column(column)?,
                if *negated { "NOT " } else { "" }
            ),
            Condition::In {
                column,
                values,
                negated,
            } => {
                if values.is_empty() {
                    return Ok(if *negated { "1=1" } else { "1=0" }.to_string());
                }
                let marks = values
                    .iter()
                    .map(|v| placeholder(out.push(v.clone())))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "{} {}IN ({marks})",
                    ident::quote_column(column)?,
                    if *negated { "NOT " } else { "" }
                )
            }
            Condition::InQuery {
                column,
                query,
                negated,
            } => format!(
                "{} {}IN ({})",
                ident::quote_column(column)?,
                if *negated { "NOT " } else { "" },
                self.render_query(query, scope.chain(), out)?
            ),
            Condition::Between {
                column,
                from,
                to,
                negated,
            } => {
                let a = out.push(from.clone());
                let b = out.push(to.clone());
                format!(
                    "{} {}BETWEEN ${a} AND ${b}",
                    ident::quote_column(column)?,
                    if *negated { "NOT " } else { "" }
                )
            }
            Condition::Exists { query, negated } => format!(
                "{}EXISTS ({})",
                if *negated { "NOT " } else { "" },
                self.render_query(query, scope.chain(), out)?
            ),
            Condition::Raw { sql, params } => scope.resolve(sql, params, out, &placeholder)?,
        };
        Ok(sql)
    }

    fn render_standalone_condition(
        &self,
        cond: &Condition,
        out: &mut ParamList,
    ) -> OrmResult<String> {
        let empty = Params::new();
        let mut scope = ParamScope::new(&empty);
        self.render_condition(cond, &mut scope, out)
    }
}

impl QueryBuilder for PgQueryBuilder {
    fn build(&self, query: &QueryExpr) -> OrmResult<BuiltQuery> {
        let mut out = ParamList::new();
        let sql = self.render_query(query, Vec::new(), &mut out)?;
        Ok(BuiltQuery::new(sql, out.into_vec()))
    }

    fn insert(
        &self,
        table: &str,
        values: &IndexMap<String, Value>,
        returning: &[String],
    ) -> OrmResult<BuiltQuery> {
        let table = ident::quote_table(table)?;
        let mut out = ParamList::new();
        let mut sql = if values.is_empty() {
            format!("INSERT INTO {table} DEFAULT VALUES")
        } else {
            let mut cols = Vec::with_capacity(values.len());
            let mut marks = Vec::with_capacity(values.len());
            for (col, value) in values {
                cols.push(column_name(col)?);
                marks.push(placeholder(out.push(value.clone())));
            }
            format!(
                "INSERT INTO {table} ({}) VALUES ({})",
                cols.join(", "),
                marks.join(", ")
            )
        };
        if !returning.is_empty() {
            let cols = returning
                .iter()
                .map(|c| column_name(c))
                .collect::<OrmResult<Vec<_>>>()?;
            sql.push_str(" RETURNING ");
            sql.push_str(&cols.join(", "));
        }
        Ok(BuiltQuery::new(sql, out.into_vec()))
    }

    fn update(
        &self,
        table: &str,
        values: &IndexMap<String, Value>,
        condition: &Condition,
    ) -> OrmResult<BuiltQuery> {
        if values.is_empty() {
            return Err(OrmError::build("UPDATE requires at least one column to set"));
        }
        let mut out = ParamList::new();
        let mut sets = Vec::with_capacity(values.len());
        for (col, value) in values {
            let idx = out.push(value.clone());
            sets.push(format!("{} = ${idx}", column_name(col)?));
        }
        let mut sql = format!("UPDATE {} SET {}", ident::quote_table(table)?, sets.join(", "));
        let where_sql = self.render_standalone_condition(condition, &mut out)?;
        if !where_sql.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
        }
        Ok(BuiltQuery::new(sql, out.into_vec()))
    }

    fn update_counters(
        &self,
        table: &str,
        counters: &IndexMap<String, i64>,
        condition: &Condition,
    ) -> OrmResult<BuiltQuery> {
        if counters.is_empty() {
            return Err(OrmError::build("UPDATE requires at least one column to set"));
        }
        let mut out = ParamList::new();
        let mut sets = Vec::with_capacity(counters.len());
        for (col, delta) in counters {
            let col = column_name(col)?;
            let idx = out.push(Value::BigInt(*delta));
            sets.push(format!("{col} = {col} + ${idx}"));
        }
        let mut sql = format!("UPDATE {} SET {}", ident::quote_table(table)?, sets.join(", "));
        let where_sql = self.render_standalone_condition(condition, &mut out)?;
        if !where_sql.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
        }
        Ok(BuiltQuery::new(sql, out.into_vec()))
    }

    fn delete(&self, table: &str, condition: &Condition) -> OrmResult<BuiltQuery> {
        let mut out = ParamList::new();
        let mut sql = format!("DELETE FROM {}", ident::quote_table(table)?);
        let where_sql = self.render_standalone_condition(condition, &mut out)?;
        if !where_sql.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
        }
        Ok(BuiltQuery::new(sql, out.into_vec()))
    }

    fn exists(&self, query: &BuiltQuery) -> BuiltQuery {
        BuiltQuery::new(format!("SELECT EXISTS({})", query.sql), query.params.clone())
    }

    fn supports_returning(&self) -> bool {
        true
    }

    fn quote_table(&self, name: &str) -> OrmResult<String> {
        ident::quote_table(name)
    }

    fn quote_column(&self, name: &str) -> OrmResult<String> {
        ident::quote_column(name)
    }
}
