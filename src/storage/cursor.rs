//! Streaming read cursor
//!
//! Rows are fetched in keyset-paged batches: each page continues strictly after
//! the last timestamp seen, in scan order. The connection lock is held only
//! while a page is fetched, so several cursors and writers interleave freely.

use crate::storage::address::ScanPredicate;
use crate::storage::engine::lock_connection;
use crate::storage::error::StorageResult;
use crate::storage::iter::DatapointIterator;
use crate::storage::types::{Datapoint, Variant};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Lifecycle of a cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// Nothing fetched yet
    Idle,
    /// More pages may follow
    Scanning,
    /// Final page is buffered
    Exhausted,
    /// Released; `next()` returns `Ok(None)`
    Closed,
}

/// Paged scan over one stream and variant
pub struct SqliteCursor {
    conn: Arc<Mutex<Connection>>,
    variant: Variant,
    stream: String,
    predicate: ScanPredicate,
    reversed: bool,
    remaining: Option<u64>,
    page_size: usize,
    buffer: VecDeque<Datapoint>,
    last: Option<f64>,
    state: CursorState,
}

impl SqliteCursor {
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        variant: Variant,
        stream: impl Into<String>,
        predicate: ScanPredicate,
        reversed: bool,
        limit: Option<u64>,
        page_size: usize,
    ) -> Self {
        Self {
            conn,
            variant,
            stream: stream.into(),
            predicate,
            reversed,
            remaining: limit,
            page_size: page_size.max(1),
            buffer: VecDeque::new(),
            last: None,
            state: CursorState::Idle,
        }
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    fn fetch_page(&mut self) -> StorageResult<()> {
        let mut page = self.page_size as u64;
        if let Some(remaining) = self.remaining {
            page = page.min(remaining);
        }
        if page == 0 {
            self.state = CursorState::Exhausted;
            return Ok(());
        }

        let (mut conditions, predicate_values) = self.predicate.sql();
        let mut values = Vec::with_capacity(predicate_values.len() + 3);
        values.push(SqlValue::Text(self.stream.clone()));
        values.extend(predicate_values);
        if let Some(last) = self.last {
            conditions.push_str(if self.reversed {
                " AND timestamp < ?"
            } else {
                " AND timestamp > ?"
            });
            values.push(SqlValue::Real(last));
        }
        values.push(SqlValue::Integer(page as i64));

        let sql = format!(
            "SELECT timestamp, duration, {}, data FROM {} WHERE stream = ?{} ORDER BY timestamp {} LIMIT ?",
            if self.variant.has_actor() { "actor" } else { "NULL" },
            self.variant.table(),
            conditions,
            if self.reversed { "DESC" } else { "ASC" },
        );

        let rows = {
            let conn = lock_connection(&self.conn)?;
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt.query_map(params_from_iter(values), |row| {
                Ok((
                    row.get::<_, f64>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?;
            let rows: Vec<_> = rows.collect::<Result<_, _>>()?;
            rows
        };

        let fetched = rows.len() as u64;
        for (timestamp, duration, actor, data) in rows {
            self.buffer.push_back(Datapoint {
                timestamp,
                duration,
                value: serde_json::from_str(&data)?,
                actor,
            });
            self.last = Some(timestamp);
        }
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= fetched;
        }

        self.state = if fetched < page || self.remaining == Some(0) {
            CursorState::Exhausted
        } else {
            CursorState::Scanning
        };

        tracing::trace!(
            stream = %self.stream,
            variant = %self.variant,
            fetched,
            "Fetched cursor page"
        );
        Ok(())
    }
}

impl DatapointIterator for SqliteCursor {
    fn next(&mut self) -> StorageResult<Option<Datapoint>> {
        loop {
            if let Some(dp) = self.buffer.pop_front() {
                return Ok(Some(dp));
            }
            match self.state {
                CursorState::Idle | CursorState::Scanning => {
                    if let Err(e) = self.fetch_page() {
                        self.close();
                        return Err(e);
                    }
                }
                CursorState::Exhausted => {
                    self.close();
                    return Ok(None);
                }
                CursorState::Closed => return Ok(None),
            }
        }
    }

    fn close(&mut self) {
        self.buffer.clear();
        self.state = CursorState::Closed;
    }
}

impl Drop for SqliteCursor {
    fn drop(&mut self) {
        self.close();
    }
}
