//! The data held by a [`Query`](super::Query): a not-yet-compiled SELECT.

use crate::condition::Condition;
use crate::params::Params;

/// Something that can appear in the select list.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectExpr {
    /// Column name (quoted on build) or expression (passed through).
    Column(String),
    /// Raw SQL, may contain `?` / `:name`.
    Raw(String),
    /// Scalar sub-query.
    Query(Box<QueryExpr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: SelectExpr,
    pub alias: Option<String>,
}

/// A FROM or JOIN source.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    Table(String),
    Raw(String),
    Query(Box<QueryExpr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FromItem {
    pub source: Source,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

impl JoinKind {
    pub const fn as_sql(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
            JoinKind::Full => "FULL JOIN",
            JoinKind::Cross => "CROSS JOIN",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub source: Source,
    pub alias: Option<String>,
    pub on: Option<Condition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub const fn as_sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub expr: String,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UnionPart {
    Query(Box<QueryExpr>),
    Raw(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnionItem {
    pub part: UnionPart,
    pub all: bool,
}

/// Query AST. Scalars only ever live in `params` or inside condition leaves.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryExpr {
    /// Empty means `*`.
    pub select: Vec<SelectItem>,
    pub distinct: bool,
    pub from: Vec<FromItem>,
    pub joins: Vec<Join>,
    pub where_: Option<Condition>,
    pub group_by: Vec<String>,
    pub having: Option<Condition>,
    pub order_by: Vec<OrderItem>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub union: Vec<UnionItem>,
    pub params: Params,
}

impl QueryExpr {
    /// Whether replacing the select list with an aggregate would change what
    /// the query aggregates over.
    pub fn needs_subquery_for_aggregate(&self) -> bool {
        self.distinct
            || !self.group_by.is_empty()
            || self.having.as_ref().is_some_and(|h| !h.is_empty())
            || !self.union.is_empty()
    }
}
