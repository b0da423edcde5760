use crate::transaction::IsolationLevel;
use std::time::Duration;

/// Configuration for a [`Db`](crate::Db) handle.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Isolation level for transactions opened by record writes when the
    /// caller does not ask for one.
    pub default_isolation: Option<IsolationLevel>,
    /// Emulate nested transactions with savepoints when the connection
    /// supports them. When off, nested begin/commit only move the level.
    pub savepoints: bool,
    /// Install a [`TracingSqlHook`](crate::TracingSqlHook) on construction.
    pub log_sql: bool,
    /// Truncation applied by the SQL log hook.
    pub max_sql_log_length: Option<usize>,
    /// Statements slower than this are logged at warn.
    pub slow_query_threshold: Option<Duration>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            default_isolation: None,
            savepoints: true,
            log_sql: false,
            max_sql_log_length: Some(200),
            slow_query_threshold: None,
        }
    }
}

impl DbConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_isolation(mut self, level: IsolationLevel) -> Self {
        self.default_isolation = Some(level);
        self
    }

    /// Turn savepoint emulation off.
    pub fn no_savepoints(mut self) -> Self {
        self.savepoints = false;
        self
    }

    /// Log every statement on the `relorm.sql` target.
    pub fn with_logging(mut self) -> Self {
        self.log_sql = true;
        self
    }

    pub fn max_sql_log_length(mut self, len: Option<usize>) -> Self {
        self.max_sql_log_length = len;
        self
    }

    pub fn slow_threshold(mut self, duration: Duration) -> Self {
        self.slow_query_threshold = Some(duration);
        self
    }
}
