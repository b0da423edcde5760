//! Recording in-memory connection shared by the integration tests.

#![allow(dead_code)]

use relorm::{
    ColumnType, Connection, Db, DbConfig, ModelDef, OrmError, OrmResult, Row, TableSchema, TxOps,
    Value,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct State {
    log: Vec<(String, Vec<Value>)>,
    rows: VecDeque<Vec<Row>>,
    affected: VecDeque<u64>,
    failures: Vec<(String, String)>,
}

/// Records every statement and answers from scripted queues.
///
/// - `query` pops the next scripted row set (empty when none is queued).
/// - `execute` pops the next scripted affected count (1 when none is queued);
///   transaction-control statements never consume the queue.
/// - A statement starting with a registered failure prefix fails once.
pub struct MockConnection {
    state: Mutex<State>,
    savepoints: bool,
}

impl Default for MockConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnection {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            savepoints: true,
        }
    }

    pub fn without_savepoints() -> Self {
        Self {
            savepoints: false,
            ..Self::new()
        }
    }

    pub fn push_rows(&self, rows: Vec<Row>) {
        self.state.lock().unwrap().rows.push_back(rows);
    }

    pub fn push_affected(&self, n: u64) {
        self.state.lock().unwrap().affected.push_back(n);
    }

    /// Fail the next statement starting with `prefix`.
    pub fn fail_on(&self, prefix: &str, message: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .push((prefix.to_string(), message.to_string()));
    }

    pub fn statements(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .log
            .iter()
            .map(|(sql, _)| sql.clone())
            .collect()
    }

    pub fn params(&self, idx: usize) -> Vec<Value> {
        self.state.lock().unwrap().log[idx].1.clone()
    }

    pub fn clear(&self) {
        self.state.lock().unwrap().log.clear();
    }

    fn record(&self, sql: &str, params: &[Value]) -> OrmResult<()> {
        let mut state = self.state.lock().unwrap();
        state.log.push((sql.to_string(), params.to_vec()));
        if let Some(pos) = state
            .failures
            .iter()
            .position(|(prefix, _)| sql.starts_with(prefix.as_str()))
        {
            let (_, message) = state.failures.remove(pos);
            return Err(OrmError::Driver(message));
        }
        Ok(())
    }
}

fn is_control(sql: &str) -> bool {
    ["BEGIN", "COMMIT", "ROLLBACK", "SAVEPOINT", "RELEASE", "SET TRANSACTION"]
        .iter()
        .any(|p| sql.starts_with(p))
}

impl Connection for MockConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> OrmResult<Vec<Row>> {
        self.record(sql, params)?;
        Ok(self.state.lock().unwrap().rows.pop_front().unwrap_or_default())
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> OrmResult<u64> {
        self.record(sql, params)?;
        if is_control(sql) {
            return Ok(0);
        }
        Ok(self.state.lock().unwrap().affected.pop_front().unwrap_or(1))
    }

    fn supports_savepoint(&self) -> bool {
        self.savepoints
    }
}

/// Db over a fresh mock with SQL logging routed to the test writer.
pub fn db() -> Db<MockConnection> {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
    Db::with_config(MockConnection::new(), DbConfig::new().with_logging())
}

pub fn accounts_schema() -> TableSchema {
    TableSchema::new("accounts")
        .column("id", ColumnType::BigInt)
        .auto_increment()
        .column("name", ColumnType::Text)
        .column("balance", ColumnType::BigInt)
        .column("version", ColumnType::BigInt)
        .primary_key(["id"])
}

/// Accounts without locking or transactional scenarios.
pub fn accounts() -> Arc<ModelDef> {
    ModelDef::new(accounts_schema()).build().unwrap()
}

/// Accounts locked on `version` with every write transactional.
pub fn locked_accounts() -> Arc<ModelDef> {
    ModelDef::new(accounts_schema())
        .optimistic_lock("version")
        .transactional("default", TxOps::ALL)
        .build()
        .unwrap()
}

pub fn account_row(id: i64, name: &str, balance: i64, version: i64) -> Row {
    Row::from_pairs([
        ("id", Value::BigInt(id)),
        ("name", Value::from(name)),
        ("balance", Value::BigInt(balance)),
        ("version", Value::BigInt(version)),
    ])
}
