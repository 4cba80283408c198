//! Query addressing
//!
//! A [`Query`] names exactly one addressing mode: a single timestamp, a single
//! index, a timestamp range or an index range. Resolving it against the store
//! turns indexes into concrete timestamps and yields a [`ScanPredicate`].
//!
//! # Index semantics
//!
//! ```text
//!  i =  0  -> earliest timestamp        i = -1  -> latest timestamp
//!  i >  0  -> i-th row from the start   i < -1  -> counted from the end
//!  past the end    -> max(t + d) + 1
//!  before the start -> min(t) - 1
//! ```
//!
//! The sentinels make out-of-range indexes produce empty scans instead of errors.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::time::TimeResolver;
use crate::storage::types::Variant;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

/// A read or delete request against one stream
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Query {
    /// Stream to address
    pub stream: String,
    /// Interval set to address
    #[serde(default)]
    pub variant: Variant,
    /// Single timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<f64>,
    /// Single index
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub i: Option<i64>,
    /// Range start timestamp (inclusive)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t1: Option<f64>,
    /// Range end timestamp (exclusive)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t2: Option<f64>,
    /// Range start index (inclusive)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub i1: Option<i64>,
    /// Range end index (exclusive)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub i2: Option<i64>,
    /// Return newest first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reversed: Option<bool>,
    /// Maximum number of datapoints to return
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    /// Transform pipeline applied while streaming
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,
}

impl Query {
    /// Start a query against the data variant of a stream
    pub fn new(stream: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            ..Default::default()
        }
    }

    /// Every datapoint of the stream, from the earliest onwards
    pub fn all(stream: impl Into<String>) -> Self {
        Self::new(stream).from_index(0)
    }

    /// Address the actions variant instead of data
    pub fn actions(mut self) -> Self {
        self.variant = Variant::Actions;
        self
    }

    pub fn variant(mut self, variant: Variant) -> Self {
        self.variant = variant;
        self
    }

    pub fn at(mut self, t: f64) -> Self {
        self.t = Some(t);
        self
    }

    pub fn index(mut self, i: i64) -> Self {
        self.i = Some(i);
        self
    }

    /// Timestamps in `[t1, t2)`
    pub fn time_range(mut self, t1: f64, t2: f64) -> Self {
        self.t1 = Some(t1);
        self.t2 = Some(t2);
        self
    }

    pub fn since(mut self, t1: f64) -> Self {
        self.t1 = Some(t1);
        self
    }

    pub fn before(mut self, t2: f64) -> Self {
        self.t2 = Some(t2);
        self
    }

    /// Rows from index `i1` up to but excluding index `i2`
    pub fn index_range(mut self, i1: i64, i2: i64) -> Self {
        self.i1 = Some(i1);
        self.i2 = Some(i2);
        self
    }

    pub fn from_index(mut self, i1: i64) -> Self {
        self.i1 = Some(i1);
        self
    }

    pub fn to_index(mut self, i2: i64) -> Self {
        self.i2 = Some(i2);
        self
    }

    pub fn reversed(mut self) -> Self {
        self.reversed = Some(true);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn transform(mut self, transform: impl Into<String>) -> Self {
        self.transform = Some(transform.into());
        self
    }

    pub fn is_reversed(&self) -> bool {
        self.reversed.unwrap_or(false)
    }

    /// Determine the single addressing mode this query uses
    pub fn addressing(&self) -> StorageResult<Addressing> {
        for t in [self.t, self.t1, self.t2].into_iter().flatten() {
            if t.is_nan() {
                return Err(StorageError::Validation(
                    "query timestamps must be numbers".to_string(),
                ));
            }
        }

        let time_range = self.t1.is_some() || self.t2.is_some();
        let index_range = self.i1.is_some() || self.i2.is_some();
        let modes = [self.t.is_some(), self.i.is_some(), time_range, index_range]
            .iter()
            .filter(|set| **set)
            .count();

        match modes {
            0 => Err(StorageError::Validation(
                "query must set one of t, i, t1/t2 or i1/i2".to_string(),
            )),
            1 => Ok(if let Some(t) = self.t {
                Addressing::Timestamp(t)
            } else if let Some(i) = self.i {
                Addressing::Index(i)
            } else if time_range {
                Addressing::TimeRange {
                    start: self.t1,
                    end: self.t2,
                }
            } else {
                Addressing::IndexRange {
                    start: self.i1,
                    end: self.i2,
                }
            }),
            _ => Err(StorageError::Validation(
                "cannot combine timestamp, index and range addressing in one query".to_string(),
            )),
        }
    }

    /// Reject the read-only options when the query drives a removal
    pub fn validate_for_removal(&self) -> StorageResult<()> {
        if self.reversed.is_some() || self.limit.is_some() || self.transform.is_some() {
            return Err(StorageError::Validation(
                "reversed, limit and transform are not supported when removing data".to_string(),
            ));
        }
        Ok(())
    }
}

/// Query with time expressions still in text form
///
/// Fields mirror [`Query`]; `t`, `t1` and `t2` accept anything the
/// [`TimeResolver`] understands (`"now-1d"`, RFC 3339, plain seconds).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueryParams {
    pub stream: String,
    #[serde(default)]
    pub variant: Variant,
    pub t: Option<String>,
    pub i: Option<i64>,
    pub t1: Option<String>,
    pub t2: Option<String>,
    pub i1: Option<i64>,
    pub i2: Option<i64>,
    pub reversed: Option<bool>,
    pub limit: Option<u64>,
    pub transform: Option<String>,
}

impl QueryParams {
    /// Resolve time expressions into a [`Query`]
    pub fn resolve(&self, resolver: &dyn TimeResolver) -> StorageResult<Query> {
        let resolve = |expr: &Option<String>| -> StorageResult<Option<f64>> {
            expr.as_deref().map(|e| resolver.resolve(e)).transpose()
        };

        Ok(Query {
            stream: self.stream.clone(),
            variant: self.variant,
            t: resolve(&self.t)?,
            i: self.i,
            t1: resolve(&self.t1)?,
            t2: resolve(&self.t2)?,
            i1: self.i1,
            i2: self.i2,
            reversed: self.reversed,
            limit: self.limit,
            transform: self.transform.clone(),
        })
    }
}

/// The addressing mode of a query
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Addressing {
    Timestamp(f64),
    Index(i64),
    TimeRange { start: Option<f64>, end: Option<f64> },
    IndexRange { start: Option<i64>, end: Option<i64> },
}

/// Concrete row filter over timestamps
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScanPredicate {
    /// Matches nothing (index addressing on an empty stream)
    Empty,
    /// `timestamp = t`
    Exact(f64),
    /// `lower <= timestamp < upper`, either side optional
    Range {
        lower: Option<f64>,
        upper: Option<f64>,
    },
}

impl ScanPredicate {
    /// SQL conditions (each prefixed with ` AND `) and their parameters
    pub fn sql(&self) -> (String, Vec<SqlValue>) {
        match *self {
            ScanPredicate::Empty => (" AND 0".to_string(), Vec::new()),
            ScanPredicate::Exact(t) => (" AND timestamp = ?".to_string(), vec![SqlValue::Real(t)]),
            ScanPredicate::Range { lower, upper } => {
                let mut sql = String::new();
                let mut values = Vec::new();
                if let Some(lower) = lower {
                    sql.push_str(" AND timestamp >= ?");
                    values.push(SqlValue::Real(lower));
                }
                if let Some(upper) = upper {
                    sql.push_str(" AND timestamp < ?");
                    values.push(SqlValue::Real(upper));
                }
                (sql, values)
            }
        }
    }

    /// True when the predicate can only ever match a single row
    pub fn is_point(&self) -> bool {
        matches!(self, ScanPredicate::Exact(_))
    }
}

/// Resolve an addressing mode against the rows currently stored
pub fn resolve(
    conn: &Connection,
    variant: Variant,
    stream: &str,
    addressing: Addressing,
) -> StorageResult<ScanPredicate> {
    let predicate = match addressing {
        Addressing::Timestamp(t) => ScanPredicate::Exact(t),
        Addressing::Index(i) => match index_timestamp(conn, variant, stream, i)? {
            Some(t) => ScanPredicate::Exact(t),
            None => ScanPredicate::Empty,
        },
        Addressing::TimeRange { start, end } => ScanPredicate::Range {
            lower: start,
            upper: end,
        },
        Addressing::IndexRange { start, end } => {
            let lower = match start {
                Some(i) => match index_timestamp(conn, variant, stream, i)? {
                    Some(t) => Some(t),
                    None => return Ok(ScanPredicate::Empty),
                },
                None => None,
            };
            let upper = match end {
                Some(i) => match index_timestamp(conn, variant, stream, i)? {
                    Some(t) => Some(t),
                    None => return Ok(ScanPredicate::Empty),
                },
                None => None,
            };
            ScanPredicate::Range { lower, upper }
        }
    };

    tracing::trace!(stream, %variant, ?addressing, ?predicate, "Resolved query addressing");
    Ok(predicate)
}

/// Timestamp for a fuzzy index, or `None` if the stream has no rows
pub fn index_timestamp(
    conn: &Connection,
    variant: Variant,
    stream: &str,
    index: i64,
) -> StorageResult<Option<f64>> {
    let table = variant.table();

    let aggregate = |expr: &str| -> StorageResult<Option<f64>> {
        let sql = format!("SELECT {} FROM {} WHERE stream = ?1", expr, table);
        Ok(conn.query_row(&sql, params![stream], |row| row.get(0))?)
    };

    match index {
        0 => aggregate("MIN(timestamp)"),
        -1 => aggregate("MAX(timestamp)"),
        i if i > 0 => {
            let sql = format!(
                "SELECT timestamp FROM {} WHERE stream = ?1 ORDER BY timestamp ASC LIMIT 1 OFFSET ?2",
                table
            );
            let found: Option<f64> = conn
                .query_row(&sql, params![stream, i], |row| row.get(0))
                .optional()?;
            match found {
                Some(t) => Ok(Some(t)),
                None => aggregate("MAX(timestamp + duration) + 1"),
            }
        }
        i => {
            let sql = format!(
                "SELECT timestamp FROM {} WHERE stream = ?1 ORDER BY timestamp DESC LIMIT 1 OFFSET ?2",
                table
            );
            let found: Option<f64> = conn
                .query_row(&sql, params![stream, -(i + 1)], |row| row.get(0))
                .optional()?;
            match found {
                Some(t) => Ok(Some(t)),
                None => aggregate("MIN(timestamp) - 1"),
            }
        }
    }
}
