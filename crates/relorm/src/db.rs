use crate::builder::{BuiltQuery, PgQueryBuilder, QueryBuilder};
use crate::config::DbConfig;
use crate::connection::Connection;
use crate::error::{OrmError, OrmResult};
use crate::monitor::{HookAction, QueryContext, QueryHook, QueryResult, TracingSqlHook};
use crate::row::Row;
use crate::transaction::{IsolationLevel, Transaction};
use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use std::time::{Duration, Instant};

/// A connection bound to a SQL dialect, hooks and its transaction state.
///
/// Everything that touches the database goes through a `Db`: queries,
/// record writes and transactions.
///
/// ```ignore
/// let (client, connection) = tokio_postgres::connect(url, NoTls).await?;
/// tokio::spawn(connection);
///
/// let db = Db::with_config(client, DbConfig::new().with_logging());
/// let rows = Query::new().from("users").all(&db).await?;
/// ```
pub struct Db<C: Connection> {
    conn: C,
    builder: Arc<dyn QueryBuilder>,
    config: DbConfig,
    hooks: Vec<Arc<dyn QueryHook>>,
    pub(crate) tx_level: AtomicU32,
}

impl<C: Connection> Db<C> {
    /// Wrap a connection using the Postgres dialect and default config.
    pub fn new(conn: C) -> Self {
        Self::with_config(conn, DbConfig::default())
    }

    pub fn with_config(conn: C, config: DbConfig) -> Self {
        let mut hooks: Vec<Arc<dyn QueryHook>> = Vec::new();
        if config.log_sql {
            hooks.push(Arc::new(
                TracingSqlHook::new().max_sql_length(config.max_sql_log_length),
            ));
        }
        Self {
            conn,
            builder: Arc::new(PgQueryBuilder::new()),
            config,
            hooks,
            tx_level: AtomicU32::new(0),
        }
    }

    /// Use another SQL dialect.
    pub fn with_builder(mut self, builder: impl QueryBuilder + 'static) -> Self {
        self.builder = Arc::new(builder);
        self
    }

    pub fn add_hook(mut self, hook: impl QueryHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    pub fn connection(&self) -> &C {
        &self.conn
    }

    pub fn builder(&self) -> &dyn QueryBuilder {
        self.builder.as_ref()
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    /// Run a compiled SELECT.
    pub async fn query(&self, query: &BuiltQuery) -> OrmResult<Vec<Row>> {
        let ctx = self.before(query)?;
        let start = Instant::now();
        let result = self.conn.query(&query.sql, &query.params).await;
        let outcome = match &result {
            Ok(rows) => QueryResult::Rows(rows.len()),
            Err(e) => QueryResult::error(e.to_string()),
        };
        self.after(&ctx, start.elapsed(), &outcome);
        result
    }

    /// Run a compiled write statement, returning the affected row count.
    pub async fn execute(&self, query: &BuiltQuery) -> OrmResult<u64> {
        let ctx = self.before(query)?;
        let start = Instant::now();
        let result = self.conn.execute(&query.sql, &query.params).await;
        let outcome = match &result {
            Ok(n) => QueryResult::Affected(*n),
            Err(e) => QueryResult::error(e.to_string()),
        };
        self.after(&ctx, start.elapsed(), &outcome);
        result
    }

    fn before(&self, query: &BuiltQuery) -> OrmResult<QueryContext> {
        let ctx = QueryContext::new(&query.sql, query.params.len());
        for hook in &self.hooks {
            if let HookAction::Abort(reason) = hook.before_query(&ctx) {
                return Err(OrmError::Aborted(reason));
            }
        }
        Ok(ctx)
    }

    fn after(&self, ctx: &QueryContext, duration: Duration, result: &QueryResult) {
        for hook in &self.hooks {
            hook.after_query(ctx, duration, result);
        }
        if let Some(threshold) = self.config.slow_query_threshold {
            if duration >= threshold {
                tracing::warn!(
                    target: "relorm.sql",
                    duration_ms = duration.as_millis() as u64,
                    query_type = ?ctx.query_type,
                    sql = %ctx.sql,
                    "slow query"
                );
            }
        }
    }

    /// The transaction handle for this connection.
    pub fn transaction(&self) -> Transaction<'_, C> {
        Transaction::new(self)
    }

    /// Begin a transaction (or a savepoint when one is already active) and
    /// return its handle.
    pub async fn begin_transaction(
        &self,
        isolation: Option<IsolationLevel>,
    ) -> OrmResult<Transaction<'_, C>> {
        let tx = self.transaction();
        tx.begin(isolation).await?;
        Ok(tx)
    }

    pub fn transaction_level(&self) -> u32 {
        self.transaction().level()
    }
}
