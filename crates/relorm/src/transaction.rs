//! Nested transactions over a single connection.
//!
//! A [`Db`] keeps one transaction level counter. The outermost
//! [`Transaction::begin`] opens a native transaction; every nested `begin`
//! creates a savepoint named after the level it was opened at (`LEVEL1`,
//! `LEVEL2`, ...). Each `commit`/`rollback` undoes exactly one `begin`, and only
//! the outermost one issues a native COMMIT or ROLLBACK.
//!
//! ```ignore
//! let tx = db.begin_transaction(None).await?;
//! db.execute(&insert_order).await?;
//!
//! let inner = db.begin_transaction(None).await?; // SAVEPOINT "LEVEL1"
//! if db.execute(&insert_note).await.is_err() {
//!     inner.rollback().await?; // ROLLBACK TO SAVEPOINT "LEVEL1"
//! } else {
//!     inner.commit().await?; // RELEASE SAVEPOINT "LEVEL1"
//! }
//! tx.commit().await?; // COMMIT
//! ```
//!
//! For commit-on-Ok / rollback-on-Err handling, use the [`transaction!`] macro.

use crate::connection::Connection;
use crate::db::Db;
use crate::error::{OrmError, OrmResult};
use std::fmt;
use std::sync::atomic::Ordering;

/// Transaction isolation levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub const fn as_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Runs the given block inside a transaction on a [`Db`](crate::Db).
///
/// - Begins via `db.begin_transaction(isolation)` (nested calls become savepoints).
/// - Commits on `Ok(_)`.
/// - Rolls back on `Err(_)`. If the rollback itself fails, the failure is
///   logged and the block's error is returned.
///
/// The block must evaluate to `relorm::OrmResult<T>`.
///
/// ```ignore
/// relorm::transaction!(&db, {
///     account.save(&db, true, None).await?;
///     ledger.insert(&db, true, None).await?;
///     Ok(())
/// })?;
///
/// relorm::transaction!(&db, Some(IsolationLevel::Serializable), { ... })?;
/// ```
#[macro_export]
macro_rules! transaction {
    ($db:expr, $body:block) => {
        $crate::transaction!($db, ::core::option::Option::None, $body)
    };
    ($db:expr, $isolation:expr, $body:block) => {{
        let __relorm_tx = ($db).begin_transaction($isolation).await?;
        let __relorm_result = async { $body }.await;
        match __relorm_result {
            Ok(value) => {
                __relorm_tx.commit().await?;
                Ok(value)
            }
            Err(error) => {
                if let Err(rollback_err) = __relorm_tx.rollback().await {
                    $crate::transaction::log_rollback_failure(&error, &rollback_err);
                }
                Err(error)
            }
        }
    }};
}

#[doc(hidden)]
pub fn log_rollback_failure(error: &OrmError, rollback_err: &OrmError) {
    tracing::error!(
        target: "relorm.tx",
        error = %error,
        rollback_error = %rollback_err,
        "rollback failed after error; returning the original error"
    );
}

fn savepoint_name(level: u32) -> String {
    format!("LEVEL{level}")
}

/// Handle to the transaction state of one [`Db`].
///
/// Cheap to copy around: all state lives in the `Db`, so every handle for the
/// same `Db` sees the same level.
pub struct Transaction<'a, C: Connection> {
    db: Option<&'a Db<C>>,
}

impl<C: Connection> Clone for Transaction<'_, C> {
    fn clone(&self) -> Self {
        Self { db: self.db }
    }
}

impl<C: Connection> fmt::Debug for Transaction<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("bound", &self.db.is_some())
            .field("level", &self.level())
            .finish()
    }
}

impl<'a, C: Connection> Transaction<'a, C> {
    pub(crate) fn new(db: &'a Db<C>) -> Self {
        Self { db: Some(db) }
    }

    /// A handle with no connection. `begin` fails with a configuration error.
    pub fn unbound() -> Self {
        Self { db: None }
    }

    fn db(&self) -> OrmResult<&'a Db<C>> {
        self.db
            .ok_or_else(|| OrmError::config("transaction is not bound to a database connection"))
    }

    /// Current nesting level; 0 means no transaction.
    pub fn level(&self) -> u32 {
        self.db
            .map_or(0, |db| db.tx_level.load(Ordering::SeqCst))
    }

    pub fn is_active(&self) -> bool {
        self.level() > 0
    }

    fn savepoints_enabled(db: &Db<C>) -> bool {
        db.config().savepoints && db.connection().supports_savepoint()
    }

    /// Begin a transaction, or a savepoint if one is already active.
    ///
    /// `isolation` only applies to the outermost transaction.
    pub async fn begin(&self, isolation: Option<IsolationLevel>) -> OrmResult<()> {
        let db = self.db()?;
        let level = db.tx_level.load(Ordering::SeqCst);
        let conn = db.connection();

        if level == 0 {
            tracing::debug!(target: "relorm.tx", isolation = ?isolation, "begin transaction");
            conn.begin_transaction().await?;
            // Postgres only accepts SET TRANSACTION after BEGIN
            if let Some(iso) = isolation {
                if let Err(err) = conn.set_transaction_isolation_level(iso).await {
                    if let Err(rollback_err) = conn.rollback().await {
                        log_rollback_failure(&err, &rollback_err);
                    }
                    return Err(err);
                }
            }
            db.tx_level.store(1, Ordering::SeqCst);
            return Ok(());
        }

        if Self::savepoints_enabled(db) {
            let name = savepoint_name(level);
            tracing::debug!(target: "relorm.tx", savepoint = %name, "set savepoint");
            conn.create_savepoint(&name).await?;
        } else {
            tracing::info!(
                target: "relorm.tx",
                level,
                "nested transaction not supported; continuing in the outer transaction"
            );
        }
        db.tx_level.store(level + 1, Ordering::SeqCst);
        Ok(())
    }

    /// Commit the innermost level.
    pub async fn commit(&self) -> OrmResult<()> {
        let db = self.db()?;
        let level = db.tx_level.load(Ordering::SeqCst);
        if level == 0 {
            return Err(OrmError::Transaction(
                "failed to commit transaction: transaction was inactive".to_string(),
            ));
        }
        let level = level - 1;
        db.tx_level.store(level, Ordering::SeqCst);
        let conn = db.connection();

        if level == 0 {
            tracing::debug!(target: "relorm.tx", "commit transaction");
            return conn.commit().await;
        }

        if Self::savepoints_enabled(db) {
            let name = savepoint_name(level);
            tracing::debug!(target: "relorm.tx", savepoint = %name, "release savepoint");
            conn.release_savepoint(&name).await
        } else {
            tracing::info!(
                target: "relorm.tx",
                level,
                "nested transaction not supported; commit deferred to the outer transaction"
            );
            Ok(())
        }
    }

    /// Roll back the innermost level. Does nothing when no transaction is active.
    pub async fn rollback(&self) -> OrmResult<()> {
        let Some(db) = self.db else {
            return Ok(());
        };
        let level = db.tx_level.load(Ordering::SeqCst);
        if level == 0 {
            return Ok(());
        }
        let level = level - 1;
        db.tx_level.store(level, Ordering::SeqCst);
        let conn = db.connection();

        if level == 0 {
            tracing::debug!(target: "relorm.tx", "roll back transaction");
            return conn.rollback().await;
        }

        if Self::savepoints_enabled(db) {
            let name = savepoint_name(level);
            tracing::debug!(target: "relorm.tx", savepoint = %name, "roll back to savepoint");
            conn.rollback_to_savepoint(&name).await
        } else {
            Err(OrmError::NestedRollbackUnsupported { level: level + 1 })
        }
    }

    /// Change the isolation level of the active transaction.
    pub async fn set_isolation_level(&self, level: IsolationLevel) -> OrmResult<()> {
        let db = self.db()?;
        if !self.is_active() {
            return Err(OrmError::Transaction(
                "failed to set isolation level: transaction was inactive".to_string(),
            ));
        }
        tracing::debug!(target: "relorm.tx", isolation = %level, "set isolation level");
        db.connection().set_transaction_isolation_level(level).await
    }
}

/// Settle a transactional unit of work.
///
/// `Ok` values accepted by `succeeded` commit, other `Ok` values roll back and
/// are returned as-is, and errors roll back with the original error returned
/// even if the rollback fails.
pub(crate) async fn settle<C, T>(
    tx: &Transaction<'_, C>,
    result: OrmResult<T>,
    succeeded: impl FnOnce(&T) -> bool,
) -> OrmResult<T>
where
    C: Connection,
{
    match result {
        Ok(value) if succeeded(&value) => {
            tx.commit().await?;
            Ok(value)
        }
        Ok(value) => {
            tx.rollback().await?;
            Ok(value)
        }
        Err(error) => {
            if let Err(rollback_err) = tx.rollback().await {
                log_rollback_failure(&error, &rollback_err);
            }
            Err(error)
        }
    }
}
