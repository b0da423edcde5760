use super::{Record, RecordQuery};
use crate::condition::Condition;
use crate::connection::Connection;
use crate::db::Db;
use crate::error::{OrmError, OrmResult};
use crate::row::Row;
use crate::schema::TableSchema;
use crate::validate::AttributeRule;
use crate::value::Value;
use bitflags::bitflags;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

bitflags! {
    /// Write operations a scenario runs inside its own transaction.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TxOps: u8 {
        const INSERT = 0b001;
        const UPDATE = 0b010;
        const DELETE = 0b100;
        const ALL = Self::INSERT.bits() | Self::UPDATE.bits() | Self::DELETE.bits();
    }
}

/// Lifecycle callbacks of one record type.
///
/// `before_*` callbacks veto the operation by returning `Ok(false)`; the
/// write then reports a failed result without touching the database. Errors
/// propagate like driver errors.
pub trait RecordHooks: Send + Sync {
    fn before_save(&self, _record: &mut Record, _insert: bool) -> OrmResult<bool> {
        Ok(true)
    }

    /// `changed` maps each written column to its value before the write
    /// (NULL for inserts).
    fn after_save(&self, _record: &Record, _insert: bool, _changed: &IndexMap<String, Value>) {}

    fn before_delete(&self, _record: &Record) -> OrmResult<bool> {
        Ok(true)
    }

    fn after_delete(&self, _record: &Record) {}

    fn after_find(&self, _record: &mut Record) {}
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl RecordHooks for NoHooks {}

/// Definition of a record type: its table, locking, transactional scenarios,
/// validation rules and hooks.
///
/// ```ignore
/// let accounts = ModelDef::new(
///     TableSchema::new("accounts")
///         .column("id", ColumnType::BigInt).auto_increment()
///         .column("name", ColumnType::Text)
///         .column("version", ColumnType::BigInt)
///         .primary_key(["id"]),
/// )
/// .optimistic_lock("version")
/// .transactional("default", TxOps::ALL)
/// .rule(AttributeRule::new(["name"], Rule::Required))
/// .build()?;
///
/// let mut account = accounts.new_record();
/// account.set("name", "ops")?;
/// account.save(&db, true, None).await?;
/// ```
pub struct ModelDef {
    schema: TableSchema,
    optimistic_lock: Option<String>,
    transactions: HashMap<String, TxOps>,
    rules: Vec<AttributeRule>,
    hooks: Arc<dyn RecordHooks>,
}

impl fmt::Debug for ModelDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDef")
            .field("table", &self.schema.name)
            .field("optimistic_lock", &self.optimistic_lock)
            .field("transactions", &self.transactions)
            .field("rules", &self.rules.len())
            .finish()
    }
}

impl ModelDef {
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            optimistic_lock: None,
            transactions: HashMap::new(),
            rules: Vec::new(),
            hooks: Arc::new(NoHooks),
        }
    }

    /// Column holding the row version used to detect concurrent writes.
    pub fn optimistic_lock(mut self, column: impl Into<String>) -> Self {
        self.optimistic_lock = Some(column.into());
        self
    }

    /// Run `ops` in their own transaction when the record is in `scenario`.
    pub fn transactional(mut self, scenario: impl Into<String>, ops: TxOps) -> Self {
        self.transactions.insert(scenario.into(), ops);
        self
    }

    pub fn rule(mut self, rule: AttributeRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(mut self, rules: impl IntoIterator<Item = AttributeRule>) -> Self {
        self.rules.extend(rules);
        self
    }

    pub fn hooks(mut self, hooks: impl RecordHooks + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// Check the definition and share it.
    pub fn build(self) -> OrmResult<Arc<Self>> {
        self.schema.check()?;
        if let Some(lock) = &self.optimistic_lock {
            if !self.schema.has_column(lock) {
                return Err(OrmError::config(format!(
                    "optimistic lock column {lock} is not a column of {}",
                    self.schema.name
                )));
            }
        }
        Ok(Arc::new(self))
    }

    pub fn table_name(&self) -> &str {
        &self.schema.name
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn primary_key(&self) -> &[String] {
        &self.schema.primary_key
    }

    pub fn optimistic_lock_column(&self) -> Option<&str> {
        self.optimistic_lock.as_deref()
    }

    pub fn validation_rules(&self) -> &[AttributeRule] {
        &self.rules
    }

    pub(crate) fn record_hooks(&self) -> Arc<dyn RecordHooks> {
        Arc::clone(&self.hooks)
    }

    /// Whether `op` runs in its own transaction under `scenario`.
    pub fn is_transactional(&self, scenario: &str, op: TxOps) -> bool {
        self.transactions
            .get(scenario)
            .is_some_and(|ops| ops.contains(op))
    }

    /// A new, unsaved record.
    pub fn new_record(self: &Arc<Self>) -> Record {
        Record::new(Arc::clone(self))
    }

    /// Hydrate a persisted record from a row.
    ///
    /// Values are cast per column type; columns the schema does not declare
    /// are ignored. The snapshot is the hydrated attribute set.
    pub fn instantiate(self: &Arc<Self>, row: Row) -> Record {
        let attributes: IndexMap<String, Value> = row
            .into_map()
            .into_iter()
            .filter(|(name, _)| self.schema.has_column(name))
            .map(|(name, value)| {
                let value = self.schema.cast(&name, value);
                (name, value)
            })
            .collect();
        Record::hydrated(Arc::clone(self), attributes)
    }

    pub fn find(self: &Arc<Self>) -> RecordQuery {
        RecordQuery::new(Arc::clone(self))
    }

    /// Equality condition on the primary key, values given in key order.
    pub fn pk_condition<V: Into<Value>>(
        &self,
        values: impl IntoIterator<Item = V>,
    ) -> OrmResult<Condition> {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        if values.len() != self.schema.primary_key.len() {
            return Err(OrmError::config(format!(
                "{} has a {}-column primary key, got {} values",
                self.schema.name,
                self.schema.primary_key.len(),
                values.len()
            )));
        }
        Ok(Condition::hash(
            self.schema.primary_key.iter().cloned().zip(values),
        ))
    }

    /// Load one record by primary key.
    pub async fn find_by_pk<C, V>(
        self: &Arc<Self>,
        db: &Db<C>,
        pk: impl IntoIterator<Item = V>,
    ) -> OrmResult<Option<Record>>
    where
        C: Connection,
        V: Into<Value>,
    {
        let condition = self.pk_condition(pk)?;
        self.find().where_(condition).one(db).await
    }

    /// `UPDATE` every row matching `condition`, bypassing records and hooks.
    pub async fn update_all<C: Connection>(
        &self,
        db: &Db<C>,
        values: &IndexMap<String, Value>,
        condition: impl Into<Condition>,
    ) -> OrmResult<u64> {
        let built = db
            .builder()
            .update(self.table_name(), values, &condition.into())?;
        db.execute(&built).await
    }

    /// Add signed deltas to counter columns of every row matching `condition`.
    pub async fn update_all_counters<C: Connection>(
        &self,
        db: &Db<C>,
        counters: &IndexMap<String, i64>,
        condition: impl Into<Condition>,
    ) -> OrmResult<u64> {
        let built = db
            .builder()
            .update_counters(self.table_name(), counters, &condition.into())?;
        db.execute(&built).await
    }

    /// `DELETE` every row matching `condition`; an empty condition deletes all rows.
    pub async fn delete_all<C: Connection>(
        &self,
        db: &Db<C>,
        condition: impl Into<Condition>,
    ) -> OrmResult<u64> {
        let built = db.builder().delete(self.table_name(), &condition.into())?;
        db.execute(&built).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnType;

    fn schema() -> TableSchema {
        TableSchema::new("accounts")
            .column("id", ColumnType::BigInt)
            .auto_increment()
            .column("name", ColumnType::Text)
            .column("version", ColumnType::BigInt)
            .primary_key(["id"])
    }

    #[test]
    fn scenario_masks() {
        let def = ModelDef::new(schema())
            .transactional("default", TxOps::INSERT | TxOps::DELETE)
            .transactional("admin", TxOps::ALL)
            .build()
            .unwrap();
        assert!(def.is_transactional("default", TxOps::INSERT));
        assert!(!def.is_transactional("default", TxOps::UPDATE));
        assert!(def.is_transactional("admin", TxOps::UPDATE));
        assert!(!def.is_transactional("import", TxOps::INSERT));
    }

    #[test]
    fn build_rejects_unknown_lock_column() {
        let err = ModelDef::new(schema())
            .optimistic_lock("revision")
            .build()
            .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn pk_condition_checks_arity() {
        let def = ModelDef::new(schema()).build().unwrap();
        assert_eq!(
            def.pk_condition([7_i64]).unwrap(),
            Condition::And(vec![Condition::eq("id", 7_i64)])
        );
        assert!(def.pk_condition([1_i64, 2]).unwrap_err().is_config());
    }

    #[test]
    fn instantiate_casts_and_snapshots() {
        let def = ModelDef::new(schema()).build().unwrap();
        let row = Row::from_pairs([
            ("id", Value::Int(3)),
            ("name", Value::from("ops")),
            ("extra", Value::Bool(true)),
        ]);
        let record = def.instantiate(row);
        assert_eq!(record.get("id"), Some(&Value::BigInt(3)));
        assert_eq!(record.get("extra"), None);
        assert!(!record.is_new_record());
        assert_eq!(record.old_attributes(), Some(record.attributes()));
    }
}
