//! Convenient imports for typical `relorm` usage.
//!
//! ```ignore
//! use relorm::prelude::*;
//! ```

pub use crate::{
    Condition, Connection, Db, DbConfig, FromRow, IsolationLevel, ModelDef, OrmError, OrmResult,
    Params, Query, Record, Row, TxOps, Value,
};
pub use crate::{ColumnType, TableSchema};
pub use crate::{AttributeRule, Rule};
