//! SQLite schema for the interval store
//!
//! One table per variant, keyed by `(stream, timestamp)`. Overlap triggers on
//! INSERT and UPDATE reject any row whose `[timestamp, timestamp + duration)`
//! intersects another row of the same stream. Rows sharing a timestamp are left
//! to the primary key, so `INSERT OR REPLACE` can swap a row in place.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::Variant;
use rusqlite::Connection;

/// Version stored in `PRAGMA user_version`
pub const SCHEMA_VERSION: i64 = 1;

/// Message raised by the overlap triggers
pub const OVERLAP_MESSAGE: &str = "datapoint time range conflicts with existing data";

const STREAMS_DDL: &str = "
CREATE TABLE IF NOT EXISTS streams (
    id TEXT PRIMARY KEY NOT NULL,
    created_at REAL NOT NULL
);
";

/// DDL for one variant table, its end-time index and overlap triggers
fn variant_ddl(variant: Variant) -> String {
    let table = variant.table();
    let actor_column = if variant.has_actor() {
        "actor TEXT DEFAULT NULL,"
    } else {
        ""
    };

    format!(
        "
CREATE TABLE IF NOT EXISTS {table} (
    stream TEXT NOT NULL,
    timestamp REAL NOT NULL,
    duration REAL NOT NULL DEFAULT 0,
    {actor_column}
    data TEXT NOT NULL,

    PRIMARY KEY (stream, timestamp),
    CONSTRAINT valid_duration CHECK (duration >= 0),
    CONSTRAINT valid_data CHECK (json_valid(data)),
    CONSTRAINT stream_fk
        FOREIGN KEY (stream)
        REFERENCES streams(id)
        ON UPDATE CASCADE
        ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS {table}_end ON {table}(stream, timestamp + duration);

CREATE TRIGGER IF NOT EXISTS {table}_overlap_insert
    BEFORE INSERT ON {table} FOR EACH ROW
    WHEN EXISTS (
        SELECT 1 FROM {table}
        WHERE stream = NEW.stream
          AND timestamp <> NEW.timestamp
          AND timestamp + duration > NEW.timestamp
          AND NEW.timestamp + NEW.duration > timestamp
    )
    BEGIN
        SELECT RAISE(ABORT, '{OVERLAP_MESSAGE}');
    END;

CREATE TRIGGER IF NOT EXISTS {table}_overlap_update
    BEFORE UPDATE OF timestamp, duration ON {table} FOR EACH ROW
    WHEN EXISTS (
        SELECT 1 FROM {table}
        WHERE stream = NEW.stream
          AND timestamp <> OLD.timestamp
          AND timestamp <> NEW.timestamp
          AND timestamp + duration > NEW.timestamp
          AND NEW.timestamp + NEW.duration > timestamp
    )
    BEGIN
        SELECT RAISE(ABORT, '{OVERLAP_MESSAGE}');
    END;
"
    )
}

/// Create or verify the schema
///
/// A fresh database gets every table and trigger inside one transaction.
/// A database written by a newer version is refused.
pub fn migrate(conn: &mut Connection) -> StorageResult<()> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if version == SCHEMA_VERSION {
        return Ok(());
    }
    if version > SCHEMA_VERSION {
        return Err(StorageError::Validation(format!(
            "database schema version {} is newer than supported version {}",
            version, SCHEMA_VERSION
        )));
    }

    let tx = conn.transaction()?;
    tx.execute_batch(STREAMS_DDL)?;
    tx.execute_batch(&variant_ddl(Variant::Data))?;
    tx.execute_batch(&variant_ddl(Variant::Actions))?;
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tx.commit()?;

    tracing::info!("Created interval store schema v{}", SCHEMA_VERSION);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;

    fn setup() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", true).unwrap();
        migrate(&mut conn).unwrap();
        conn.execute("INSERT INTO streams VALUES ('s', 0)", []).unwrap();
        conn
    }

    fn insert(conn: &Connection, t: f64, d: f64) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO datapoints (stream, timestamp, duration, data) VALUES ('s', ?1, ?2, '1')",
            params![t, d],
        )
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let mut conn = setup();
        migrate(&mut conn).unwrap();
        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_newer_schema_refused() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
            .unwrap();
        assert!(matches!(
            migrate(&mut conn),
            Err(StorageError::Validation(_))
        ));
    }

    #[test]
    fn test_overlap_trigger_rejects_insert() {
        let conn = setup();
        insert(&conn, 10.0, 5.0).unwrap();

        // Starts inside an existing interval
        let err: StorageError = insert(&conn, 12.0, 0.0).unwrap_err().into();
        assert!(err.is_conflict());
        // Covers an existing interval's start
        let err: StorageError = insert(&conn, 8.0, 3.0).unwrap_err().into();
        assert!(err.is_conflict());
        // Duplicate timestamp hits the primary key
        let err: StorageError = insert(&conn, 10.0, 0.0).unwrap_err().into();
        assert!(err.is_conflict());

        // Adjacent intervals are fine
        insert(&conn, 15.0, 1.0).unwrap();
        insert(&conn, 8.0, 2.0).unwrap();
    }

    #[test]
    fn test_overlap_trigger_rejects_growing_update() {
        let conn = setup();
        insert(&conn, 10.0, 1.0).unwrap();
        insert(&conn, 12.0, 1.0).unwrap();

        let err: StorageError = conn
            .execute(
                "UPDATE datapoints SET duration = 5 WHERE stream = 's' AND timestamp = 10",
                [],
            )
            .unwrap_err()
            .into();
        assert!(err.is_conflict());

        // Shrinking is always allowed
        conn.execute(
            "UPDATE datapoints SET duration = 0.5 WHERE stream = 's' AND timestamp = 10",
            [],
        )
        .unwrap();
    }

    #[test]
    fn test_variants_are_independent() {
        let conn = setup();
        insert(&conn, 10.0, 5.0).unwrap();
        conn.execute(
            "INSERT INTO actions (stream, timestamp, duration, actor, data) VALUES ('s', 12, 0, 'bob', '1')",
            [],
        )
        .unwrap();
    }

    #[test]
    fn test_stream_delete_cascades() {
        let conn = setup();
        insert(&conn, 1.0, 0.0).unwrap();
        conn.execute("DELETE FROM streams WHERE id = 's'", []).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM datapoints", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_invalid_json_rejected() {
        let conn = setup();
        let err: StorageError = conn
            .execute(
                "INSERT INTO datapoints (stream, timestamp, duration, data) VALUES ('s', 1, 0, '{bad')",
                [],
            )
            .unwrap_err()
            .into();
        assert!(err.is_conflict());
    }
}
