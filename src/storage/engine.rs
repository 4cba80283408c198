//! Spandb Storage Engine
//!
//! The engine owns one SQLite connection and orchestrates every operation:
//! - Write path: source → validate → method-specific SQL → commit → event
//! - Read path: query → compile transform → resolve addressing → paged cursor
//!
//! Thread-safe via a `std::sync::Mutex` around the connection. Writes hold it
//! for their whole transaction; readers only while a page is fetched.

use crate::storage::address::{resolve, Query};
use crate::storage::cursor::SqliteCursor;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::events::{Event, EventSink, RemoveEvent, WriteEvent};
use crate::storage::iter::{DatapointArrayIterator, DatapointIterator, Limited};
use crate::storage::schema;
use crate::storage::types::{now_seconds, Datapoint, Variant, WriteMethod, WriteSummary};
use crate::transform::{compile, FunctionRegistry, TransformIterator};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

thread_local! {
    /// Connections this thread is draining a write source through
    static WRITING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Lock a shared connection
///
/// A thread that is draining a write source through `conn` already holds it,
/// so re-entry from that source is refused instead of deadlocking.
pub(crate) fn lock_connection(
    conn: &Arc<Mutex<Connection>>,
) -> StorageResult<MutexGuard<'_, Connection>> {
    let key = Arc::as_ptr(conn) as usize;
    if WRITING.with(|writing| writing.borrow().contains(&key)) {
        return Err(StorageError::Lock(
            "connection is held by a write on this thread".to_string(),
        ));
    }
    conn.lock().map_err(|e| StorageError::Lock(e.to_string()))
}

/// Marks a connection as being written through by this thread until dropped
struct WriteScope(usize);

impl WriteScope {
    fn enter(conn: &Arc<Mutex<Connection>>) -> Self {
        let key = Arc::as_ptr(conn) as usize;
        WRITING.with(|writing| writing.borrow_mut().push(key));
        Self(key)
    }
}

impl Drop for WriteScope {
    fn drop(&mut self) {
        WRITING.with(|writing| {
            let mut writing = writing.borrow_mut();
            if let Some(pos) = writing.iter().rposition(|key| *key == self.0) {
                writing.remove(pos);
            }
        });
    }
}

/// SQLite `synchronous` setting
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SynchronousMode {
    Off,
    #[default]
    Normal,
    Full,
}

impl SynchronousMode {
    fn as_pragma(&self) -> &'static str {
        match self {
            SynchronousMode::Off => "OFF",
            SynchronousMode::Normal => "NORMAL",
            SynchronousMode::Full => "FULL",
        }
    }
}

/// Configuration for the storage engine
#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    /// Database file; `None` keeps everything in memory
    pub path: Option<PathBuf>,
    /// Rows fetched per cursor page (default: 1000)
    pub page_size: usize,
    /// How long to wait on a locked database in milliseconds (default: 5000)
    pub busy_timeout_ms: u64,
    /// Durability of commits
    pub synchronous: SynchronousMode,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            page_size: 1000,
            busy_timeout_ms: 5000,
            synchronous: SynchronousMode::Normal,
        }
    }
}

impl StorageConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn busy_timeout_ms(mut self, ms: u64) -> Self {
        self.busy_timeout_ms = ms;
        self
    }

    pub fn synchronous(mut self, mode: SynchronousMode) -> Self {
        self.synchronous = mode;
        self
    }
}

/// The interval time-series storage engine
#[derive(Clone)]
pub struct StorageEngine {
    /// Configuration
    config: StorageConfig,
    /// Shared connection (std::sync::Mutex because rusqlite::Connection is !Sync)
    conn: Arc<Mutex<Connection>>,
    /// Functions available to read transforms
    functions: Arc<FunctionRegistry>,
    /// Receives committed changes
    sink: Option<Arc<dyn EventSink>>,
}

impl StorageEngine {
    /// Open (or create) a database and bring its schema up to date
    pub fn open(config: StorageConfig) -> StorageResult<Self> {
        let mut conn = match &config.path {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                Connection::open_with_flags(
                    path,
                    OpenFlags::SQLITE_OPEN_READ_WRITE
                        | OpenFlags::SQLITE_OPEN_CREATE
                        | OpenFlags::SQLITE_OPEN_NO_MUTEX,
                )?
            }
            None => Connection::open_in_memory()?,
        };

        if config.path.is_some() {
            let mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            tracing::debug!("SQLite journal mode: {}", mode);
        }
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.pragma_update(None, "synchronous", config.synchronous.as_pragma())?;
        conn.busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))?;

        schema::migrate(&mut conn)?;

        match &config.path {
            Some(path) => tracing::info!("Opened interval store at {:?}", path),
            None => tracing::info!("Opened in-memory interval store"),
        }

        Ok(Self {
            config,
            conn: Arc::new(Mutex::new(conn)),
            functions: Arc::new(FunctionRegistry::with_builtins()),
            sink: None,
        })
    }

    /// Replace the functions available to transforms
    pub fn with_functions(mut self, functions: FunctionRegistry) -> Self {
        self.functions = Arc::new(functions);
        self
    }

    /// Deliver committed changes to `sink`
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        lock_connection(&self.conn)
    }

    // ------------------------------------------------------------------
    // Stream directory
    // ------------------------------------------------------------------

    /// Register a stream, generating a UUID when no id is given
    pub fn register_stream(&self, id: Option<&str>) -> StorageResult<String> {
        let id = match id {
            Some(id) if id.trim().is_empty() => {
                return Err(StorageError::Validation(
                    "stream id must not be empty".to_string(),
                ))
            }
            Some(id) => id.to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO streams (id, created_at) VALUES (?1, ?2)",
            params![id, now_seconds()],
        )
        .map_err(|e| match StorageError::from(e) {
            StorageError::Conflict(_) => {
                StorageError::Conflict(format!("stream '{}' already exists", id))
            }
            other => other,
        })?;

        tracing::debug!(stream = %id, "Registered stream");
        Ok(id)
    }

    /// Delete a stream together with all of its datapoints and actions
    pub fn drop_stream(&self, id: &str) -> StorageResult<()> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM streams WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(StorageError::StreamNotFound(id.to_string()));
        }
        tracing::debug!(stream = %id, "Dropped stream");
        Ok(())
    }

    pub fn stream_exists(&self, id: &str) -> StorageResult<bool> {
        let conn = self.lock()?;
        stream_exists(&conn, id)
    }

    /// All stream ids, in creation order
    pub fn list_streams(&self) -> StorageResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached("SELECT id FROM streams ORDER BY created_at, id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    // ------------------------------------------------------------------
    // Datapoints
    // ------------------------------------------------------------------

    /// Drain `source` into a stream inside one transaction
    ///
    /// Any source, validation or storage error rolls back the whole write.
    /// The source is closed in every case. The connection is held until the
    /// write finishes, so a source that reads from this engine fails with
    /// `StorageError::Lock`; collect such reads first.
    pub fn write<S: DatapointIterator>(
        &self,
        stream: &str,
        variant: Variant,
        mut source: S,
        method: WriteMethod,
    ) -> StorageResult<WriteSummary> {
        let result = self.lock().and_then(|mut conn| {
            let _scope = WriteScope::enter(&self.conn);
            write_rows(&mut conn, stream, variant, &mut source, method)
        });
        source.close();

        let summary = match result {
            Ok(summary) => summary,
            Err(e) => {
                tracing::debug!(stream, %variant, %method, error = %e, "Write rolled back");
                return Err(e);
            }
        };

        tracing::debug!(
            stream,
            %variant,
            %method,
            count = summary.count,
            "Wrote datapoints"
        );

        if summary.count > 0 {
            self.notify(Event::Write(WriteEvent {
                stream: stream.to_string(),
                variant,
                t1: summary.start,
                t2: summary.end,
                count: summary.count,
                dp: summary.last.clone(),
            }));
        }

        Ok(summary)
    }

    /// Record an action by `actor` at the current time
    pub fn act(
        &self,
        stream: &str,
        value: impl Into<serde_json::Value>,
        actor: impl Into<String>,
    ) -> StorageResult<WriteSummary> {
        let dp = Datapoint::now(value).actor(actor);
        self.write(
            stream,
            Variant::Actions,
            DatapointArrayIterator::new(vec![dp]),
            WriteMethod::Append,
        )
    }

    /// Lazily stream the datapoints a query addresses
    ///
    /// The transform is compiled before touching storage, so a malformed
    /// transform fails even when the stream does not exist.
    pub fn read(&self, query: &Query) -> StorageResult<Box<dyn DatapointIterator>> {
        let addressing = query.addressing()?;
        let pipeline = query
            .transform
            .as_deref()
            .map(|source| compile(source, &self.functions))
            .transpose()?;

        let predicate = {
            let conn = self.lock()?;
            ensure_stream(&conn, &query.stream)?;
            resolve(&conn, query.variant, &query.stream, addressing)?
        };

        tracing::debug!(
            stream = %query.stream,
            variant = %query.variant,
            ?predicate,
            reversed = query.is_reversed(),
            limit = ?query.limit,
            transform = ?query.transform,
            "Reading datapoints"
        );

        // A point matches at most one row, so ordering and limit do not apply
        let (reversed, limit) = if predicate.is_point() {
            (false, None)
        } else {
            (query.is_reversed(), query.limit)
        };

        // With a transform the limit counts transformed output, not scanned rows
        let scan_limit = if pipeline.is_some() { None } else { limit };
        let cursor = SqliteCursor::new(
            self.conn.clone(),
            query.variant,
            query.stream.clone(),
            predicate,
            reversed,
            scan_limit,
            self.config.page_size,
        );

        Ok(match (pipeline, limit) {
            (None, _) => Box::new(cursor),
            (Some(pipeline), None) => Box::new(TransformIterator::new(cursor, pipeline)),
            (Some(pipeline), Some(limit)) => Box::new(Limited::new(
                TransformIterator::new(cursor, pipeline),
                limit,
            )),
        })
    }

    /// Read everything a query addresses into a vector
    pub fn read_all(&self, query: &Query) -> StorageResult<Vec<Datapoint>> {
        let mut it = self.read(query)?;
        it.drain()
    }

    /// Delete the datapoints a query addresses, returning how many were removed
    pub fn remove(&self, query: &Query) -> StorageResult<usize> {
        query.validate_for_removal()?;
        let addressing = query.addressing()?;

        let removed = {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            ensure_stream(&tx, &query.stream)?;

            let predicate = resolve(&tx, query.variant, &query.stream, addressing)?;
            let (conditions, predicate_values) = predicate.sql();
            let mut values = vec![SqlValue::Text(query.stream.clone())];
            values.extend(predicate_values);

            let sql = format!(
                "DELETE FROM {} WHERE stream = ?{}",
                query.variant.table(),
                conditions
            );
            let removed = tx.execute(&sql, params_from_iter(values))?;
            tx.commit()?;
            removed
        };

        tracing::debug!(
            stream = %query.stream,
            variant = %query.variant,
            removed,
            "Removed datapoints"
        );

        if removed > 0 {
            self.notify(Event::Remove(RemoveEvent {
                stream: query.stream.clone(),
                variant: query.variant,
                query: query.clone(),
                removed,
            }));
        }

        Ok(removed)
    }

    /// Number of datapoints in one variant of a stream
    pub fn length(&self, stream: &str, variant: Variant) -> StorageResult<u64> {
        let conn = self.lock()?;
        ensure_stream(&conn, stream)?;
        let sql = format!("SELECT COUNT(*) FROM {} WHERE stream = ?1", variant.table());
        let count: i64 = conn.query_row(&sql, params![stream], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn notify(&self, event: Event) {
        let Some(sink) = &self.sink else {
            return;
        };
        if let Err(e) = sink.fire(&event) {
            tracing::warn!(
                event = %event.kind(),
                stream = event.stream(),
                "Event sink failed: {:#}",
                e
            );
        }
    }
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("config", &self.config)
            .field("functions", &self.functions)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

fn stream_exists(conn: &Connection, id: &str) -> StorageResult<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM streams WHERE id = ?1)",
        params![id],
        |row| row.get(0),
    )?;
    Ok(exists)
}

fn ensure_stream(conn: &Connection, id: &str) -> StorageResult<()> {
    if stream_exists(conn, id)? {
        Ok(())
    } else {
        Err(StorageError::StreamNotFound(id.to_string()))
    }
}

fn write_rows<S: DatapointIterator + ?Sized>(
    conn: &mut Connection,
    stream: &str,
    variant: Variant,
    source: &mut S,
    method: WriteMethod,
) -> StorageResult<WriteSummary> {
    let tx = conn.transaction()?;
    ensure_stream(&tx, stream)?;

    let table = variant.table();
    let verb = match method {
        WriteMethod::Update => "INSERT OR REPLACE",
        WriteMethod::Insert | WriteMethod::Append => "INSERT",
    };
    let insert_sql = if variant.has_actor() {
        format!(
            "{} INTO {} (stream, timestamp, duration, data, actor) VALUES (?1, ?2, ?3, ?4, ?5)",
            verb, table
        )
    } else {
        format!(
            "{} INTO {} (stream, timestamp, duration, data) VALUES (?1, ?2, ?3, ?4)",
            verb, table
        )
    };
    let delete_covered_sql = format!(
        "DELETE FROM {} WHERE stream = ?1 AND timestamp > ?2 AND timestamp < ?3",
        table
    );
    let straddling_sql = format!(
        "SELECT timestamp FROM {} \
         WHERE stream = ?1 AND timestamp < ?2 AND timestamp + duration > ?2",
        table
    );
    let shrink_sql = format!(
        "UPDATE {} SET duration = ?3 WHERE stream = ?1 AND timestamp = ?2",
        table
    );

    // The baseline is taken once; rows of this batch do not advance it
    let baseline: f64 = if method == WriteMethod::Append {
        let sql = format!(
            "SELECT COALESCE(MAX(timestamp + duration), 0) FROM {} WHERE stream = ?1",
            table
        );
        tx.query_row(&sql, params![stream], |row| row.get(0))?
    } else {
        0.0
    };

    let mut summary = WriteSummary::default();
    {
        let mut insert = tx.prepare_cached(&insert_sql)?;
        let mut delete_covered = tx.prepare_cached(&delete_covered_sql)?;
        let mut straddling = tx.prepare_cached(&straddling_sql)?;
        let mut shrink = tx.prepare_cached(&shrink_sql)?;

        while let Some(mut dp) = source.next()? {
            dp.validate()?;
            if !variant.has_actor() {
                dp.actor = None;
            }

            match method {
                WriteMethod::Insert => {}
                WriteMethod::Append => {
                    if dp.timestamp < baseline {
                        return Err(StorageError::Conflict(
                            "datapoint older than existing data".to_string(),
                        ));
                    }
                }
                WriteMethod::Update => {
                    if dp.duration > 0.0 {
                        delete_covered.execute(params![stream, dp.timestamp, dp.end()])?;
                    }
                    let starts: Vec<f64> = straddling
                        .query_map(params![stream, dp.timestamp], |row| row.get(0))?
                        .collect::<Result<_, _>>()?;
                    for start in starts {
                        let duration = truncated_duration(start, dp.timestamp);
                        shrink.execute(params![stream, start, duration])?;
                    }
                }
            }

            let data = serde_json::to_string(&dp.value)?;
            if variant.has_actor() {
                insert.execute(params![stream, dp.timestamp, dp.duration, data, dp.actor])?;
            } else {
                insert.execute(params![stream, dp.timestamp, dp.duration, data])?;
            }

            summary.record(&dp);
        }
    }

    tx.commit()?;
    Ok(summary)
}

/// Longest duration for a row at `start` whose end does not pass `cut`
///
/// `cut - start` alone can round so that `start + duration > cut`, which the
/// overlap triggers would reject.
fn truncated_duration(start: f64, cut: f64) -> f64 {
    let mut duration = cut - start;
    while duration > 0.0 && start + duration > cut {
        duration = f64::from_bits(duration.to_bits() - 1);
    }
    duration
}
