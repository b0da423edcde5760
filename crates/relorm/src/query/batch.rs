use super::Query;
use crate::connection::Connection;
use crate::db::Db;
use crate::error::{OrmError, OrmResult};
use crate::row::Row;
use futures_core::Stream;
use std::collections::VecDeque;

/// Lazy, forward-only cursor returning pages of rows.
///
/// Pages are fetched with LIMIT/OFFSET on demand; an existing limit/offset on
/// the query bounds the whole iteration. Once exhausted (or after an error)
/// the cursor stays exhausted. Without an ORDER BY the page boundaries are
/// whatever the database returns.
pub struct BatchQuery<'a, C: Connection> {
    query: Query,
    db: &'a Db<C>,
    size: u64,
    fetched: u64,
    done: bool,
}

impl<'a, C: Connection> BatchQuery<'a, C> {
    pub(crate) fn new(query: Query, db: &'a Db<C>, size: u64) -> Self {
        Self {
            query,
            db,
            size,
            fetched: 0,
            done: false,
        }
    }

    /// Fetch the next page, or `None` once the result set is exhausted.
    pub async fn next(&mut self) -> OrmResult<Option<Vec<Row>>> {
        if self.done {
            return Ok(None);
        }
        if self.size == 0 {
            self.done = true;
            return Err(OrmError::config("batch size must be greater than zero"));
        }

        let mut page_size = self.size;
        if let Some(limit) = self.query.expr.limit {
            let remaining = limit.saturating_sub(self.fetched);
            if remaining == 0 {
                self.done = true;
                return Ok(None);
            }
            page_size = page_size.min(remaining);
        }
        let offset = self.query.expr.offset.unwrap_or(0) + self.fetched;

        let rows = match self.query.window(page_size, offset).all(self.db).await {
            Ok(rows) => rows,
            Err(err) => {
                self.done = true;
                return Err(err);
            }
        };
        self.fetched += rows.len() as u64;
        if (rows.len() as u64) < page_size {
            self.done = true;
        }
        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(rows))
    }

    pub fn into_stream(self) -> impl Stream<Item = OrmResult<Vec<Row>>> + 'a {
        futures_util::stream::try_unfold(self, |mut cursor| async move {
            Ok::<_, OrmError>(cursor.next().await?.map(|rows| (rows, cursor)))
        })
    }
}

/// Row-at-a-time view over a [`BatchQuery`].
pub struct EachQuery<'a, C: Connection> {
    batches: BatchQuery<'a, C>,
    buffer: VecDeque<Row>,
}

impl<'a, C: Connection> EachQuery<'a, C> {
    pub(crate) fn new(batches: BatchQuery<'a, C>) -> Self {
        Self {
            batches,
            buffer: VecDeque::new(),
        }
    }

    pub async fn next(&mut self) -> OrmResult<Option<Row>> {
        if self.buffer.is_empty() {
            match self.batches.next().await? {
                Some(rows) => self.buffer.extend(rows),
                None => return Ok(None),
            }
        }
        Ok(self.buffer.pop_front())
    }

    pub fn into_stream(self) -> impl Stream<Item = OrmResult<Row>> + 'a {
        futures_util::stream::try_unfold(self, |mut cursor| async move {
            Ok::<_, OrmError>(cursor.next().await?.map(|row| (row, cursor)))
        })
    }
}
