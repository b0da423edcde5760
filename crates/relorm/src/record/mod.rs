//! ActiveRecord persistence.
//!
//! A [`Record`] holds the current attribute values of one row plus a
//! snapshot (`old_attributes`) of what was last read from or written to the
//! database. The snapshot drives dirty tracking: `update` writes only the
//! columns whose value differs from it, and issues no SQL at all when
//! nothing changed.
//!
//! | state     | `old_attributes`  | reached by                        |
//! |-----------|-------------------|-----------------------------------|
//! | new       | `None`            | [`ModelDef::new_record`]          |
//! | persisted | `Some(snapshot)`  | `insert`, hydration from a query  |
//! | deleted   | `None`            | `delete` (terminal)               |
//!
//! Validation failures and hook vetoes are returned as failed results
//! (`Ok(false)` / `Ok(None)`); driver errors and stale writes are `Err`.

mod model;
mod query;

pub use model::{ModelDef, NoHooks, RecordHooks, TxOps};
pub use query::RecordQuery;

use crate::condition::Condition;
use crate::connection::Connection;
use crate::db::Db;
use crate::error::{OrmError, OrmResult};
use crate::transaction::settle;
use crate::validate::{ValidationErrors, validate_attributes};
use crate::value::Value;
use indexmap::IndexMap;
use std::sync::Arc;

/// Scenario a record starts in.
pub const DEFAULT_SCENARIO: &str = "default";

fn owned_names(names: Option<&[&str]>) -> Option<Vec<String>> {
    names.map(|names| names.iter().map(|n| (*n).to_string()).collect())
}

/// One row of a table described by a [`ModelDef`].
#[derive(Debug, Clone)]
pub struct Record {
    def: Arc<ModelDef>,
    attributes: IndexMap<String, Value>,
    old_attributes: Option<IndexMap<String, Value>>,
    scenario: String,
    errors: ValidationErrors,
}

impl Record {
    pub(crate) fn new(def: Arc<ModelDef>) -> Self {
        Self {
            def,
            attributes: IndexMap::new(),
            old_attributes: None,
            scenario: DEFAULT_SCENARIO.to_string(),
            errors: ValidationErrors::default(),
        }
    }

    pub(crate) fn hydrated(def: Arc<ModelDef>, attributes: IndexMap<String, Value>) -> Self {
        Self {
            old_attributes: Some(attributes.clone()),
            attributes,
            ..Self::new(def)
        }
    }

    pub fn def(&self) -> &Arc<ModelDef> {
        &self.def
    }

    // ==================== Attributes ====================

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Set a column value, cast to the column's declared type.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> OrmResult<()> {
        if !self.def.schema().has_column(name) {
            return Err(OrmError::config(format!(
                "{} has no column named {name}",
                self.def.table_name()
            )));
        }
        let value = self.def.schema().cast(name, value.into());
        self.attributes.insert(name.to_string(), value);
        Ok(())
    }

    /// Forget a column value. An unset column is left out of inserts.
    pub fn unset(&mut self, name: &str) -> Option<Value> {
        self.attributes.shift_remove(name)
    }

    pub fn set_attributes<K, V>(&mut self, values: impl IntoIterator<Item = (K, V)>) -> OrmResult<()>
    where
        K: AsRef<str>,
        V: Into<Value>,
    {
        for (name, value) in values {
            self.set(name.as_ref(), value)?;
        }
        Ok(())
    }

    pub fn attributes(&self) -> &IndexMap<String, Value> {
        &self.attributes
    }

    pub fn old_attributes(&self) -> Option<&IndexMap<String, Value>> {
        self.old_attributes.as_ref()
    }

    pub fn old_attribute(&self, name: &str) -> Option<&Value> {
        self.old_attributes.as_ref()?.get(name)
    }

    pub fn is_new_record(&self) -> bool {
        self.old_attributes.is_none()
    }

    /// Attributes whose value differs from the snapshot, optionally limited
    /// to `names`. Every set attribute is dirty on a new record.
    pub fn dirty_attributes(&self, names: Option<&[String]>) -> IndexMap<String, Value> {
        let selected = |name: &String| names.is_none_or(|names| names.contains(name));
        self.attributes
            .iter()
            .filter(|(name, _)| selected(*name))
            .filter(|(name, value)| match &self.old_attributes {
                None => true,
                Some(old) => old.get(*name) != Some(*value),
            })
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    pub fn is_attribute_changed(&self, name: &str) -> bool {
        match &self.old_attributes {
            None => self.attributes.contains_key(name),
            Some(old) => old.get(name) != self.attributes.get(name),
        }
    }

    /// Force `name` into the next update by dropping it from the snapshot.
    pub fn mark_attribute_dirty(&mut self, name: &str) {
        if let Some(old) = &mut self.old_attributes {
            old.shift_remove(name);
        }
    }

    /// Current primary key values, NULL for unset columns.
    pub fn primary_key(&self) -> IndexMap<String, Value> {
        self.def
            .primary_key()
            .iter()
            .map(|c| (c.clone(), self.attributes.get(c).cloned().unwrap_or(Value::Null)))
            .collect()
    }

    /// Primary key values as last persisted.
    pub fn old_primary_key(&self) -> OrmResult<IndexMap<String, Value>> {
        let old = self.snapshot()?;
        Ok(self
            .def
            .primary_key()
            .iter()
            .map(|c| (c.clone(), old.get(c).cloned().unwrap_or(Value::Null)))
            .collect())
    }

    fn snapshot(&self) -> OrmResult<&IndexMap<String, Value>> {
        self.old_attributes.as_ref().ok_or_else(|| {
            OrmError::config(format!(
                "{} record is not persisted (never saved or already deleted)",
                self.def.table_name()
            ))
        })
    }

    fn key_string(key: &IndexMap<String, Value>) -> String {
        key.iter()
            .map(|(c, v)| format!("{c}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    pub fn set_scenario(&mut self, scenario: impl Into<String>) {
        self.scenario = scenario.into();
    }

    // ==================== Validation ====================

    /// Run the rules of the current scenario; errors are kept on the record.
    pub fn validate(&mut self, names: Option<&[String]>) -> bool {
        self.errors = validate_attributes(
            self.def.validation_rules(),
            &self.scenario,
            &self.attributes,
            names,
        );
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &ValidationErrors {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    // ==================== Persistence ====================

    /// Insert the record (or only `names`), merging generated key values back in.
    ///
    /// Returns `Ok(false)` when validation fails or a hook vetoes the insert.
    pub async fn insert<C: Connection>(
        &mut self,
        db: &Db<C>,
        validate: bool,
        names: Option<&[&str]>,
    ) -> OrmResult<bool> {
        let names = owned_names(names);
        if validate && !self.validate(names.as_deref()) {
            tracing::info!(
                target: "relorm.record",
                table = self.def.table_name(),
                "record not inserted due to validation errors"
            );
            return Ok(false);
        }
        if !self.def.is_transactional(&self.scenario, TxOps::INSERT) {
            return self.insert_internal(db, names.as_deref()).await;
        }
        let tx = db.begin_transaction(db.config().default_isolation).await?;
        let result = self.insert_internal(db, names.as_deref()).await;
        settle(&tx, result, |inserted| *inserted).await
    }

    async fn insert_internal<C: Connection>(
        &mut self,
        db: &Db<C>,
        names: Option<&[String]>,
    ) -> OrmResult<bool> {
        let hooks = self.def.record_hooks();
        if !hooks.before_save(self, true)? {
            return Ok(false);
        }

        let mut values = self.dirty_attributes(names);
        let generated: Vec<String> = self
            .def
            .primary_key()
            .iter()
            .filter(|c| !values.contains_key(*c))
            .cloned()
            .collect();
        let table = self.def.table_name();

        let mut returned = IndexMap::new();
        if !generated.is_empty() && db.builder().supports_returning() {
            let built = db.builder().insert(table, &values, &generated)?;
            let Some(row) = db.query(&built).await?.into_iter().next() else {
                return Ok(false);
            };
            for column in &generated {
                if let Some(v) = row.get(column) {
                    returned.insert(column.clone(), v.clone());
                }
            }
        } else {
            let built = db.builder().insert(table, &values, &[])?;
            if db.execute(&built).await? == 0 {
                return Ok(false);
            }
            let sequence = self.def.schema().sequence.clone();
            for column in &generated {
                let auto = self
                    .def
                    .schema()
                    .get_column(column)
                    .is_some_and(|c| c.auto_increment);
                if auto {
                    let id = db.connection().last_insert_id(sequence.as_deref()).await?;
                    returned.insert(column.clone(), id);
                }
            }
        }

        for (column, value) in returned {
            let value = self.def.schema().cast(&column, value);
            self.attributes.insert(column.clone(), value.clone());
            values.insert(column, value);
        }

        let changed: IndexMap<String, Value> =
            values.keys().map(|k| (k.clone(), Value::Null)).collect();
        self.old_attributes = Some(values);
        hooks.after_save(self, true, &changed);
        Ok(true)
    }

    /// Write the dirty attributes (optionally limited to `names`).
    ///
    /// `Ok(None)`: validation failed or a hook vetoed the update.
    /// `Ok(Some(0))` with no SQL issued: nothing changed.
    /// `Err(StaleObject)`: the optimistic lock did not match any row.
    pub async fn update<C: Connection>(
        &mut self,
        db: &Db<C>,
        validate: bool,
        names: Option<&[&str]>,
    ) -> OrmResult<Option<u64>> {
        let names = owned_names(names);
        if validate && !self.validate(names.as_deref()) {
            tracing::info!(
                target: "relorm.record",
                table = self.def.table_name(),
                "record not updated due to validation errors"
            );
            return Ok(None);
        }
        if !self.def.is_transactional(&self.scenario, TxOps::UPDATE) {
            return self.update_internal(db, names.as_deref()).await;
        }
        let tx = db.begin_transaction(db.config().default_isolation).await?;
        let result = self.update_internal(db, names.as_deref()).await;
        settle(&tx, result, Option::is_some).await
    }

    async fn update_internal<C: Connection>(
        &mut self,
        db: &Db<C>,
        names: Option<&[String]>,
    ) -> OrmResult<Option<u64>> {
        let old_key = self.old_primary_key()?;
        let hooks = self.def.record_hooks();
        if !hooks.before_save(self, false)? {
            return Ok(None);
        }

        let mut values = self.dirty_attributes(names);
        if values.is_empty() {
            hooks.after_save(self, false, &IndexMap::new());
            return Ok(Some(0));
        }

        let mut filter = old_key.clone();
        let mut new_lock = None;
        if let Some(lock) = self.def.optimistic_lock_column() {
            let expected = self
                .old_attribute(lock)
                .or_else(|| self.attributes.get(lock))
                .cloned()
                .unwrap_or(Value::Null);
            let next = expected.checked_add(1).ok_or_else(|| {
                OrmError::config(format!(
                    "optimistic lock column {lock} must hold an integer, found {}",
                    expected.type_name()
                ))
            })?;
            values.insert(lock.to_string(), next.clone());
            filter.insert(lock.to_string(), expected);
            new_lock = Some((lock.to_string(), next));
        }

        let table = self.def.table_name();
        let built = db
            .builder()
            .update(table, &values, &Condition::hash(filter))?;
        let rows = db.execute(&built).await?;
        if new_lock.is_some() && rows == 0 {
            let key = Self::key_string(&old_key);
            tracing::warn!(target: "relorm.record", table, key = %key, "stale object on update");
            return Err(OrmError::StaleObject {
                table: table.to_string(),
                key,
            });
        }

        if let Some((lock, next)) = new_lock {
            self.attributes.insert(lock, next);
        }
        let mut changed = IndexMap::new();
        if let Some(old) = &mut self.old_attributes {
            for (name, value) in values {
                let previous = old.insert(name.clone(), value).unwrap_or(Value::Null);
                changed.insert(name, previous);
            }
        }
        hooks.after_save(self, false, &changed);
        Ok(Some(rows))
    }

    /// Delete the row. The record becomes new again (its snapshot is cleared).
    ///
    /// `Ok(None)` when a hook vetoes the delete. Without an optimistic lock,
    /// zero affected rows still counts as success.
    pub async fn delete<C: Connection>(&mut self, db: &Db<C>) -> OrmResult<Option<u64>> {
        if !self.def.is_transactional(&self.scenario, TxOps::DELETE) {
            return self.delete_internal(db).await;
        }
        let tx = db.begin_transaction(db.config().default_isolation).await?;
        let result = self.delete_internal(db).await;
        settle(&tx, result, Option::is_some).await
    }

    async fn delete_internal<C: Connection>(&mut self, db: &Db<C>) -> OrmResult<Option<u64>> {
        let old_key = self.old_primary_key()?;
        let hooks = self.def.record_hooks();
        if !hooks.before_delete(self)? {
            return Ok(None);
        }

        let mut filter = old_key.clone();
        let lock = self.def.optimistic_lock_column();
        if let Some(lock) = lock {
            let expected = self.old_attribute(lock).cloned().unwrap_or(Value::Null);
            filter.insert(lock.to_string(), expected);
        }

        let table = self.def.table_name();
        let built = db.builder().delete(table, &Condition::hash(filter))?;
        let rows = db.execute(&built).await?;
        if lock.is_some() && rows == 0 {
            let key = Self::key_string(&old_key);
            tracing::warn!(target: "relorm.record", table, key = %key, "stale object on delete");
            return Err(OrmError::StaleObject {
                table: table.to_string(),
                key,
            });
        }

        self.old_attributes = None;
        hooks.after_delete(self);
        Ok(Some(rows))
    }

    /// Insert a new record or update a persisted one.
    pub async fn save<C: Connection>(
        &mut self,
        db: &Db<C>,
        validate: bool,
        names: Option<&[&str]>,
    ) -> OrmResult<bool> {
        if self.is_new_record() {
            self.insert(db, validate, names).await
        } else {
            Ok(self.update(db, validate, names).await?.is_some())
        }
    }

    /// Reload attributes from the database. `Ok(false)` if the row is gone.
    pub async fn refresh<C: Connection>(&mut self, db: &Db<C>) -> OrmResult<bool> {
        let key = self.primary_key();
        let Some(fresh) = self.def.find_by_pk(db, key.into_values()).await? else {
            return Ok(false);
        };
        self.attributes = fresh.attributes;
        self.old_attributes = fresh.old_attributes;
        Ok(true)
    }

    /// Add signed deltas to counter columns of this row, without validation
    /// or hooks. The record's attributes are adjusted when a row matched.
    pub async fn update_counters<C, K>(
        &mut self,
        db: &Db<C>,
        counters: impl IntoIterator<Item = (K, i64)>,
    ) -> OrmResult<bool>
    where
        C: Connection,
        K: Into<String>,
    {
        let counters: IndexMap<String, i64> =
            counters.into_iter().map(|(k, v)| (k.into(), v)).collect();
        let condition = Condition::hash(self.old_primary_key()?);
        if self
            .def
            .update_all_counters(db, &counters, condition)
            .await?
            == 0
        {
            return Ok(false);
        }
        for (name, delta) in counters {
            let current = self.attributes.get(&name).cloned().unwrap_or(Value::Null);
            let next = current.checked_add(delta).unwrap_or(current);
            if let Some(old) = &mut self.old_attributes {
                old.insert(name.clone(), next.clone());
            }
            self.attributes.insert(name, next);
        }
        Ok(true)
    }

    // ==================== Relations ====================

    fn link_condition(&self, link: &[(&str, &str)]) -> Condition {
        let mut pairs = Vec::with_capacity(link.len());
        for (child_column, own_column) in link {
            match self.attributes.get(*own_column) {
                Some(v) if !v.is_null() => pairs.push(Condition::eq(*child_column, v.clone())),
                _ => return Condition::in_list(*child_column, Vec::<Value>::new()),
            }
        }
        Condition::And(pairs)
    }

    /// Query the single related record of `def` whose `link` columns
    /// (`(their_column, our_column)` pairs) match this record.
    pub fn has_one(&self, def: &Arc<ModelDef>, link: &[(&str, &str)]) -> RecordQuery {
        def.find().where_(self.link_condition(link)).limit(1)
    }

    /// Query every related record of `def` matching `link`.
    pub fn has_many(&self, def: &Arc<ModelDef>, link: &[(&str, &str)]) -> RecordQuery {
        def.find().where_(self.link_condition(link))
    }

    /// Point `child`'s link columns at this record and save it.
    pub async fn link<C: Connection>(
        &self,
        db: &Db<C>,
        child: &mut Record,
        link: &[(&str, &str)],
    ) -> OrmResult<bool> {
        if self.is_new_record() {
            return Err(OrmError::config(format!(
                "cannot link to an unsaved {} record",
                self.def.table_name()
            )));
        }
        for (child_column, own_column) in link {
            let value = self.attributes.get(*own_column).cloned().unwrap_or(Value::Null);
            child.set(child_column, value)?;
        }
        child.save(db, false, None).await
    }
}
