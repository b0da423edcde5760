//! The driver contract.
//!
//! A [`Connection`] runs parameterized SQL and the transaction-control
//! statements the [`Transaction`](crate::Transaction) manager needs. The
//! transaction-control methods default to the standard SQL statements issued
//! through [`Connection::execute`], so a driver only has to supply `query` and
//! `execute`.

use crate::error::{OrmError, OrmResult};
use crate::ident::Ident;
use crate::row::Row;
use crate::transaction::IsolationLevel;
use crate::value::Value;
use std::future::Future;
use std::sync::Arc;
use tokio_postgres::types::ToSql;

fn savepoint_sql(verb: &str, name: &str) -> OrmResult<String> {
    let ident = Ident::parse(name)?;
    if ident.parts.len() != 1 {
        return Err(OrmError::build(format!("invalid savepoint name {name:?}")));
    }
    Ok(format!("{verb} {}", ident.to_sql()))
}

/// A single database session.
///
/// One connection serves one logical caller at a time; statements run in
/// call order.
pub trait Connection: Send + Sync {
    /// Run a statement that returns rows.
    fn query(
        &self,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = OrmResult<Vec<Row>>> + Send;

    /// Run a statement and return the number of affected rows.
    fn execute(&self, sql: &str, params: &[Value]) -> impl Future<Output = OrmResult<u64>> + Send;

    fn begin_transaction(&self) -> impl Future<Output = OrmResult<()>> + Send {
        async move { self.execute("BEGIN", &[]).await.map(drop) }
    }

    fn commit(&self) -> impl Future<Output = OrmResult<()>> + Send {
        async move { self.execute("COMMIT", &[]).await.map(drop) }
    }

    fn rollback(&self) -> impl Future<Output = OrmResult<()>> + Send {
        async move { self.execute("ROLLBACK", &[]).await.map(drop) }
    }

    fn supports_savepoint(&self) -> bool {
        true
    }

    fn create_savepoint(&self, name: &str) -> impl Future<Output = OrmResult<()>> + Send {
        async move {
            let sql = savepoint_sql("SAVEPOINT", name)?;
            self.execute(&sql, &[]).await.map(drop)
        }
    }

    fn release_savepoint(&self, name: &str) -> impl Future<Output = OrmResult<()>> + Send {
        async move {
            let sql = savepoint_sql("RELEASE SAVEPOINT", name)?;
            self.execute(&sql, &[]).await.map(drop)
        }
    }

    fn rollback_to_savepoint(&self, name: &str) -> impl Future<Output = OrmResult<()>> + Send {
        async move {
            let sql = savepoint_sql("ROLLBACK TO SAVEPOINT", name)?;
            self.execute(&sql, &[]).await.map(drop)
        }
    }

    /// Change the isolation level of the transaction in progress.
    fn set_transaction_isolation_level(
        &self,
        level: IsolationLevel,
    ) -> impl Future<Output = OrmResult<()>> + Send {
        async move {
            let sql = format!("SET TRANSACTION ISOLATION LEVEL {}", level.as_sql());
            self.execute(&sql, &[]).await.map(drop)
        }
    }

    /// Value generated by the most recent insert, for drivers whose builder
    /// cannot use `RETURNING`.
    fn last_insert_id(
        &self,
        sequence: Option<&str>,
    ) -> impl Future<Output = OrmResult<Value>> + Send {
        let _ = sequence;
        async move {
            Err(OrmError::Other(
                "last_insert_id is not supported by this connection".to_string(),
            ))
        }
    }
}

impl Connection for tokio_postgres::Client {
    async fn query(&self, sql: &str, params: &[Value]) -> OrmResult<Vec<Row>> {
        let refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|v| v as &(dyn ToSql + Sync)).collect();
        let rows = tokio_postgres::Client::query(self, sql, &refs)
            .await
            .map_err(OrmError::from_db_error)?;
        let Some(first) = rows.first() else {
            return Ok(Vec::new());
        };
        let columns: Arc<[String]> = first
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        rows.iter().map(|r| Row::from_pg(r, &columns)).collect()
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> OrmResult<u64> {
        let refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|v| v as &(dyn ToSql + Sync)).collect();
        tokio_postgres::Client::execute(self, sql, &refs)
            .await
            .map_err(OrmError::from_db_error)
    }

    async fn last_insert_id(&self, sequence: Option<&str>) -> OrmResult<Value> {
        let rows = match sequence {
            Some(seq) => {
                Connection::query(self, "SELECT currval(CAST($1::text AS regclass))", &[Value::from(seq)]).await?
            }
            None => Connection::query(self, "SELECT lastval()", &[]).await?,
        };
        Ok(rows
            .into_iter()
            .next()
            .and_then(|r| r.into_first())
            .unwrap_or(Value::Null))
    }
}

macro_rules! forward_connection {
    () => {
        fn query(
            &self,
            sql: &str,
            params: &[Value],
        ) -> impl Future<Output = OrmResult<Vec<Row>>> + Send {
            (**self).query(sql, params)
        }

        fn execute(&self, sql: &str, params: &[Value]) -> impl Future<Output = OrmResult<u64>> + Send {
            (**self).execute(sql, params)
        }

        fn begin_transaction(&self) -> impl Future<Output = OrmResult<()>> + Send {
            (**self).begin_transaction()
        }

        fn commit(&self) -> impl Future<Output = OrmResult<()>> + Send {
            (**self).commit()
        }

        fn rollback(&self) -> impl Future<Output = OrmResult<()>> + Send {
            (**self).rollback()
        }

        fn supports_savepoint(&self) -> bool {
            (**self).supports_savepoint()
        }

        fn create_savepoint(&self, name: &str) -> impl Future<Output = OrmResult<()>> + Send {
            (**self).create_savepoint(name)
        }

        fn release_savepoint(&self, name: &str) -> impl Future<Output = OrmResult<()>> + Send {
            (**self).release_savepoint(name)
        }

        fn rollback_to_savepoint(&self, name: &str) -> impl Future<Output = OrmResult<()>> + Send {
            (**self).rollback_to_savepoint(name)
        }

        fn set_transaction_isolation_level(
            &self,
            level: IsolationLevel,
        ) -> impl Future<Output = OrmResult<()>> + Send {
            (**self).set_transaction_isolation_level(level)
        }

        fn last_insert_id(
            &self,
            sequence: Option<&str>,
        ) -> impl Future<Output = OrmResult<Value>> + Send {
            (**self).last_insert_id(sequence)
        }
    };
}

impl<C: Connection> Connection for &C {
    forward_connection!();
}

impl<C: Connection> Connection for Arc<C> {
    forward_connection!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn savepoint_names_are_quoted_and_validated() {
        assert_eq!(
            savepoint_sql("SAVEPOINT", "LEVEL1").unwrap(),
            r#"SAVEPOINT "LEVEL1""#
        );
        assert!(savepoint_sql("SAVEPOINT", "a; COMMIT").is_err());
        assert!(savepoint_sql("SAVEPOINT", "a.b").is_err());
    }
}
