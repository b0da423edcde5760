use super::{ModelDef, Record};
use crate::condition::Condition;
use crate::connection::Connection;
use crate::db::Db;
use crate::error::OrmResult;
use crate::query::Query;
use crate::row::Row;
use crate::value::Value;
use std::sync::Arc;

/// A [`Query`] over one record type's table that hydrates [`Record`]s.
///
/// ```ignore
/// let rich = accounts
///     .find()
///     .where_(Condition::gt("balance", 1_000))
///     .order_by("balance DESC")
///     .all(&db)
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct RecordQuery {
    def: Arc<ModelDef>,
    query: Query,
}

impl RecordQuery {
    pub(crate) fn new(def: Arc<ModelDef>) -> Self {
        let query = Query::new().from(def.table_name());
        Self { def, query }
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn into_query(self) -> Query {
        self.query
    }

    /// Apply any [`Query`] builder method.
    pub fn filter(mut self, f: impl FnOnce(Query) -> Query) -> Self {
        self.query = f(self.query);
        self
    }

    pub fn where_(self, condition: impl Into<Condition>) -> Self {
        self.filter(|q| q.where_(condition))
    }

    pub fn and_where(self, condition: impl Into<Condition>) -> Self {
        self.filter(|q| q.and_where(condition))
    }

    pub fn or_where(self, condition: impl Into<Condition>) -> Self {
        self.filter(|q| q.or_where(condition))
    }

    pub fn eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(|q| q.eq(column, value))
    }

    pub fn order_by(self, order: &str) -> Self {
        self.filter(|q| q.order_by(order))
    }

    pub fn limit(self, n: u64) -> Self {
        self.filter(|q| q.limit(n))
    }

    pub fn offset(self, n: u64) -> Self {
        self.filter(|q| q.offset(n))
    }

    fn hydrate(&self, row: Row) -> Record {
        let mut record = self.def.instantiate(row);
        self.def.record_hooks().after_find(&mut record);
        record
    }

    pub async fn all<C: Connection>(&self, db: &Db<C>) -> OrmResult<Vec<Record>> {
        let rows = self.query.all(db).await?;
        Ok(rows.into_iter().map(|row| self.hydrate(row)).collect())
    }

    pub async fn one<C: Connection>(&self, db: &Db<C>) -> OrmResult<Option<Record>> {
        Ok(self.query.one(db).await?.map(|row| self.hydrate(row)))
    }

    pub async fn count<C: Connection>(&self, db: &Db<C>) -> OrmResult<i64> {
        self.query.count(db, "*").await
    }

    pub async fn exists<C: Connection>(&self, db: &Db<C>) -> OrmResult<bool> {
        self.query.exists(db).await
    }
}
