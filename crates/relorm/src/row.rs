//! Result rows and row mapping traits

use crate::error::{OrmError, OrmResult};
use crate::value::Value;
use indexmap::IndexMap;
use std::sync::Arc;

/// One result row: column names (shared by every row of a result set) plus values.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    /// Create a row. `values` must line up with `columns`.
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Build a standalone row from `(column, value)` pairs.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let (columns, values): (Vec<String>, Vec<Value>) = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .unzip();
        Self::new(columns.into(), values)
    }

    /// Convert a `tokio_postgres` row, decoding every column.
    pub fn from_pg(row: &tokio_postgres::Row, columns: &Arc<[String]>) -> OrmResult<Self> {
        let values = (0..row.len())
            .map(|i| Value::from_pg_row(row, i))
            .collect::<OrmResult<Vec<_>>>()?;
        Ok(Self::new(columns.clone(), values))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value of the named column (the first one if the name repeats).
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    pub fn get_index(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Typed access to a column, returning `OrmError::Decode` on a missing
    /// column or an incompatible value.
    pub fn try_get<T: FromValue>(&self, column: &str) -> OrmResult<T> {
        let value = self
            .get(column)
            .ok_or_else(|| OrmError::decode(column, "no such column in result"))?;
        T::from_value(value).map_err(|message| OrmError::decode(column, message))
    }

    pub fn into_map(self) -> IndexMap<String, Value> {
        self.columns.iter().cloned().zip(self.values).collect()
    }

    pub(crate) fn into_first(self) -> Option<Value> {
        self.values.into_iter().next()
    }
}

/// Trait for types that can be created from a result row.
pub trait FromRow: Sized {
    /// Convert a database row into Self
    fn from_row(row: Row) -> OrmResult<Self>;
}

impl FromRow for Row {
    fn from_row(row: Row) -> OrmResult<Self> {
        Ok(row)
    }
}

impl FromRow for IndexMap<String, Value> {
    fn from_row(row: Row) -> OrmResult<Self> {
        Ok(row.into_map())
    }
}

impl FromRow for Value {
    fn from_row(row: Row) -> OrmResult<Self> {
        Ok(row.into_first().unwrap_or(Value::Null))
    }
}

macro_rules! from_row_via_first_column {
    ($($ty:ty),*) => {
        $(
            impl FromRow for $ty {
                fn from_row(row: Row) -> OrmResult<Self> {
                    let column = row.columns().first().cloned().unwrap_or_default();
                    let value = row.into_first().unwrap_or(Value::Null);
                    <$ty as FromValue>::from_value(&value)
                        .map_err(|message| OrmError::decode(column, message))
                }
            }
        )*
    };
}

from_row_via_first_column!(i64, i32, f64, bool, String);

/// Conversion from a dynamically typed [`Value`] into a Rust type.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self, String>;
}

fn mismatch(expected: &str, value: &Value) -> String {
    format!("expected {expected}, got {}", value.type_name())
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, String> {
        Ok(value.clone())
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self, String> {
        value.as_i64().ok_or_else(|| mismatch("integer", value))
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Result<Self, String> {
        let v = value.as_i64().ok_or_else(|| mismatch("integer", value))?;
        i32::try_from(v).map_err(|e| e.to_string())
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self, String> {
        value.as_f64().ok_or_else(|| mismatch("number", value))
    }
}

impl FromValue for rust_decimal::Decimal {
    fn from_value(value: &Value) -> Result<Self, String> {
        value.as_decimal().ok_or_else(|| mismatch("decimal", value))
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, String> {
        value.as_bool().ok_or_else(|| mismatch("boolean", value))
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Null | Value::Bytes(_) => Err(mismatch("text", value)),
            other => Ok(other.to_key_string()),
        }
    }
}

impl FromValue for uuid::Uuid {
    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Uuid(v) => Ok(*v),
            Value::Text(s) => uuid::Uuid::parse_str(s).map_err(|e| e.to_string()),
            other => Err(mismatch("uuid", other)),
        }
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Json(v) => Ok(v.clone()),
            other => Err(mismatch("json", other)),
        }
    }
}

impl FromValue for chrono::NaiveDateTime {
    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Timestamp(v) => Ok(*v),
            Value::TimestampTz(v) => Ok(v.naive_utc()),
            other => Err(mismatch("timestamp", other)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, String> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_and_typed_access() {
        let row = Row::from_pairs([("id", Value::BigInt(7)), ("name", Value::from("ann"))]);
        assert_eq!(row.get("name"), Some(&Value::Text("ann".into())));
        assert_eq!(row.try_get::<i64>("id").unwrap(), 7);
        assert_eq!(row.try_get::<Option<String>>("name").unwrap().as_deref(), Some("ann"));
        assert!(matches!(
            row.try_get::<bool>("name"),
            Err(OrmError::Decode { .. })
        ));
        assert!(row.try_get::<i64>("missing").is_err());
    }

    #[test]
    fn first_column_hydration() {
        let row = Row::from_pairs([("count", Value::BigInt(3))]);
        assert_eq!(i64::from_row(row.clone()).unwrap(), 3);
        assert_eq!(Value::from_row(row).unwrap(), Value::BigInt(3));
    }

    #[test]
    fn into_map_keeps_column_order() {
        let row = Row::from_pairs([("b", 1i64), ("a", 2i64)]);
        let keys: Vec<_> = row.into_map().into_keys().collect();
        assert_eq!(keys, ["b", "a"]);
    }
}
