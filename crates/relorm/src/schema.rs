//! Table metadata consumed by records: column order, primary key, and how to
//! cast raw driver values into attribute values.

use crate::error::{OrmError, OrmResult};
use crate::value::Value;
use chrono::{NaiveDate, NaiveDateTime};
use indexmap::IndexMap;

/// Declared column type, used to normalize hydrated values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Bool,
    SmallInt,
    Int,
    BigInt,
    Double,
    Decimal,
    Text,
    Bytes,
    Json,
    Uuid,
    Date,
    Timestamp,
    TimestampTz,
    /// Keep whatever the driver returned.
    Any,
}

impl ColumnType {
    /// Cast a driver value to this column's type.
    ///
    /// Values that cannot be converted are returned unchanged; NULL stays NULL.
    pub fn cast(self, value: Value) -> Value {
        match (self, value) {
            (_, Value::Null) => Value::Null,
            (ColumnType::Bool, v) => v.as_bool().map_or(v, Value::Bool),
            (ColumnType::SmallInt, v) => v
                .as_i64()
                .and_then(|n| i16::try_from(n).ok())
                .map_or(v, Value::SmallInt),
            (ColumnType::Int, v) => v
                .as_i64()
                .and_then(|n| i32::try_from(n).ok())
                .map_or(v, Value::Int),
            (ColumnType::BigInt, v) => v.as_i64().map_or(v, Value::BigInt),
            (ColumnType::Double, v) => v.as_f64().map_or(v, Value::Double),
            (ColumnType::Decimal, v) => v.as_decimal().map_or(v, Value::Decimal),
            (ColumnType::Text, v @ (Value::SmallInt(_) | Value::Int(_) | Value::BigInt(_) | Value::Double(_) | Value::Decimal(_) | Value::Bool(_))) => {
                Value::Text(v.to_string())
            }
            (ColumnType::Uuid, Value::Text(s)) => match uuid::Uuid::parse_str(&s) {
                Ok(u) => Value::Uuid(u),
                Err(_) => Value::Text(s),
            },
            (ColumnType::Json, Value::Text(s)) => match serde_json::from_str(&s) {
                Ok(j) => Value::Json(j),
                Err(_) => Value::Text(s),
            },
            (ColumnType::Date, Value::Text(s)) => match s.parse::<NaiveDate>() {
                Ok(d) => Value::Date(d),
                Err(_) => Value::Text(s),
            },
            (ColumnType::Timestamp, Value::TimestampTz(t)) => Value::Timestamp(t.naive_utc()),
            (ColumnType::Timestamp, Value::Text(s)) => match s.parse::<NaiveDateTime>() {
                Ok(t) => Value::Timestamp(t),
                Err(_) => Value::Text(s),
            },
            (ColumnType::TimestampTz, Value::Timestamp(t)) => Value::TimestampTz(t.and_utc()),
            (_, v) => v,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSchema {
    pub name: String,
    pub column_type: ColumnType,
    /// Filled in by the database on insert (serial / identity / sequence).
    pub auto_increment: bool,
    pub nullable: bool,
}

/// Metadata of one table.
///
/// ```ignore
/// let schema = TableSchema::new("accounts")
///     .column("id", ColumnType::BigInt).auto_increment()
///     .column("name", ColumnType::Text)
///     .column("version", ColumnType::Int)
///     .primary_key(["id"]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub name: String,
    pub columns: IndexMap<String, ColumnSchema>,
    pub primary_key: Vec<String>,
    /// Sequence consulted for generated keys when `RETURNING` is unavailable.
    pub sequence: Option<String>,
    last_column: Option<String>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: IndexMap::new(),
            primary_key: Vec::new(),
            sequence: None,
            last_column: None,
        }
    }

    /// Declare a nullable column.
    pub fn column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        let name = name.into();
        self.columns.insert(
            name.clone(),
            ColumnSchema {
                name: name.clone(),
                column_type,
                auto_increment: false,
                nullable: true,
            },
        );
        self.last_column = Some(name);
        self
    }

    /// Mark the most recently declared column as generated by the database.
    pub fn auto_increment(mut self) -> Self {
        if let Some(col) = self.last_column_mut() {
            col.auto_increment = true;
        }
        self
    }

    /// Mark the most recently declared column NOT NULL.
    pub fn not_null(mut self) -> Self {
        if let Some(col) = self.last_column_mut() {
            col.nullable = false;
        }
        self
    }

    pub fn primary_key<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn sequence(mut self, name: impl Into<String>) -> Self {
        self.sequence = Some(name.into());
        self
    }

    fn last_column_mut(&mut self) -> Option<&mut ColumnSchema> {
        let name = self.last_column.as_ref()?;
        self.columns.get_mut(name)
    }

    pub fn get_column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.get(name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Check that the schema can back a record: at least one column and a
    /// primary key made of declared columns.
    pub fn check(&self) -> OrmResult<()> {
        if self.columns.is_empty() {
            return Err(OrmError::config(format!(
                "table {} declares no columns",
                self.name
            )));
        }
        if self.primary_key.is_empty() {
            return Err(OrmError::config(format!(
                "table {} has no primary key",
                self.name
            )));
        }
        if let Some(missing) = self.primary_key.iter().find(|c| !self.has_column(c)) {
            return Err(OrmError::config(format!(
                "primary key column {missing} is not a column of {}",
                self.name
            )));
        }
        Ok(())
    }

    /// Cast a raw value for `column`; unknown columns pass through.
    pub fn cast(&self, column: &str, value: Value) -> Value {
        match self.columns.get(column) {
            Some(col) => col.column_type.cast(value),
            None => value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_tracks_last_column() {
        let schema = TableSchema::new("t")
            .column("id", ColumnType::BigInt)
            .auto_increment()
            .not_null()
            .column("name", ColumnType::Text)
            .primary_key(["id"]);
        let id = schema.get_column("id").unwrap();
        assert!(id.auto_increment && !id.nullable);
        assert!(!schema.get_column("name").unwrap().auto_increment);
        assert!(schema.check().is_ok());
        assert_eq!(schema.column_names().collect::<Vec<_>>(), ["id", "name"]);
    }

    #[test]
    fn check_requires_primary_key() {
        let schema = TableSchema::new("t").column("a", ColumnType::Int);
        assert!(schema.check().unwrap_err().is_config());
        let schema = schema.primary_key(["b"]);
        assert!(schema.check().unwrap_err().is_config());
    }

    #[test]
    fn cast_normalizes_widths() {
        assert_eq!(ColumnType::BigInt.cast(Value::Int(3)), Value::BigInt(3));
        assert_eq!(ColumnType::Int.cast(Value::Text("12".into())), Value::Int(12));
        assert_eq!(ColumnType::Decimal.cast(Value::Int(5)), Value::Decimal(5.into()));
        assert_eq!(
            ColumnType::Decimal.cast(Value::Text("1.25".into())),
            Value::Decimal(rust_decimal::Decimal::new(125, 2))
        );
        assert_eq!(
            ColumnType::Text.cast(Value::Decimal(rust_decimal::Decimal::new(125, 2))),
            Value::Text("1.25".into())
        );
        assert_eq!(ColumnType::Int.cast(Value::Null), Value::Null);
        assert_eq!(
            ColumnType::Int.cast(Value::Text("x".into())),
            Value::Text("x".into())
        );
    }
}
