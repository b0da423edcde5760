//! # relorm
//!
//! Composable query building, ActiveRecord persistence and nested
//! transactions over parameterized SQL.
//!
//! ## Features
//!
//! - **Query builder**: a fluent [`Query`] over a query AST, compiled by a
//!   dialect [`QueryBuilder`]; values always travel as bound parameters
//! - **ActiveRecord**: [`Record`]s with dirty tracking, optimistic locking,
//!   validation rules and lifecycle hooks
//! - **Nested transactions**: reentrant `begin` emulated with savepoints
//! - **Query hooks**: time, log or veto every statement
//!
//! ## Query
//!
//! ```ignore
//! use relorm::{Condition, Db, Query};
//!
//! let db = Db::new(client);
//!
//! let active = Query::new()
//!     .from("users")
//!     .where_(Condition::eq("status", "active"))
//!     .or_where(Condition::is_null("status"))
//!     .order_by("created_at DESC")
//!     .limit(10)
//!     .all(&db)
//!     .await?;
//!
//! let per_country = Query::new()
//!     .from("users")
//!     .group_by(["country"])
//!     .count(&db, "*")
//!     .await?;
//! ```
//!
//! ## Records
//!
//! ```ignore
//! use relorm::{ColumnType, ModelDef, TableSchema, TxOps};
//!
//! let accounts = ModelDef::new(
//!     TableSchema::new("accounts")
//!         .column("id", ColumnType::BigInt).auto_increment()
//!         .column("owner", ColumnType::Text)
//!         .column("balance", ColumnType::BigInt)
//!         .column("version", ColumnType::BigInt)
//!         .primary_key(["id"]),
//! )
//! .optimistic_lock("version")
//! .transactional("default", TxOps::ALL)
//! .build()?;
//!
//! let mut account = accounts.find_by_pk(&db, [1_i64]).await?.ok_or(...)?;
//! account.set("balance", 20)?;
//! account.update(&db, true, None).await?; // Err(StaleObject) on a concurrent write
//! ```
//!
//! ## Transactions
//!
//! ```ignore
//! relorm::transaction!(&db, {
//!     from.update(&db, true, None).await?;
//!     relorm::transaction!(&db, { to.update(&db, true, None).await })?; // savepoint
//!     Ok(())
//! })?;
//! ```

pub mod builder;
pub mod condition;
pub mod config;
pub mod connection;
pub mod db;
pub mod error;
pub mod ident;
pub mod monitor;
pub mod params;
pub mod prelude;
pub mod query;
pub mod record;
pub mod row;
pub mod schema;
pub mod transaction;
pub mod validate;
pub mod value;

pub use builder::{BuiltQuery, PgQueryBuilder, QueryBuilder};
pub use condition::{BoolOp, Condition};
pub use config::DbConfig;
pub use connection::Connection;
pub use db::Db;
pub use error::{OrmError, OrmResult};
pub use ident::{Ident, IdentPart};
pub use monitor::{HookAction, QueryContext, QueryHook, QueryResult, QueryType, TracingSqlHook};
pub use params::Params;
pub use query::{BatchQuery, Direction, EachQuery, IndexBy, JoinKind, Query, QueryExpr};
pub use record::{ModelDef, NoHooks, Record, RecordHooks, RecordQuery, TxOps};
pub use row::{FromRow, FromValue, Row};
pub use schema::{ColumnSchema, ColumnType, TableSchema};
pub use transaction::{IsolationLevel, Transaction};
pub use validate::{AttributeRule, Rule, ValidationCode, ValidationError, ValidationErrors};
pub use value::Value;
