//! Spandb Storage Engine
//!
//! This module provides the interval time-series storage:
//!
//! - **types**: Core data structures (Datapoint, Variant, WriteMethod)
//! - **iter**: The pull-based `DatapointIterator` contract
//! - **address**: Query addressing and fuzzy index resolution
//! - **time**: Time expressions (`now-7d`, RFC 3339) for text queries
//! - **schema**: SQLite tables and overlap triggers
//! - **cursor**: Keyset-paged streaming reads
//! - **events**: Notifications fired after committed changes
//! - **engine**: Main storage engine orchestrating all components
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//!   Source → Validate → insert | append | update → Commit → EventSink
//!
//! Read Path:
//!   Query → Compile transform → Resolve addressing → Cursor → Transform → Caller
//! ```
//!
//! # Example
//!
//! ```rust
//! use spandb::storage::*;
//! use serde_json::json;
//!
//! # fn main() -> Result<(), StorageError> {
//! let engine = StorageEngine::open(StorageConfig::in_memory())?;
//! let stream = engine.register_stream(None)?;
//!
//! let points = vec![
//!     Datapoint::new(10.0, json!({"x": 1})).duration(5.0),
//!     Datapoint::new(20.0, json!({"x": 5})),
//! ];
//! engine.write(&stream, Variant::Data, DatapointArrayIterator::new(points), WriteMethod::Update)?;
//!
//! let mut it = engine.read(&Query::all(&stream).transform("if($[x] > 3)"))?;
//! while let Some(dp) = it.next()? {
//!     assert_eq!(dp.timestamp, 20.0);
//! }
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod events;
pub mod iter;
pub mod schema;
pub mod time;
pub mod types;

// Re-export commonly used types
pub use address::{Addressing, Query, QueryParams, ScanPredicate};
pub use cursor::{CursorState, SqliteCursor};
pub use engine::{StorageConfig, StorageEngine, SynchronousMode};
pub use error::{StorageError, StorageResult};
pub use events::{Event, EventKind, EventSink, LogSink, RemoveEvent, WriteEvent};
pub use iter::{DatapointArrayIterator, DatapointIterator, Datapoints, Limited};
pub use time::{DefaultTimeResolver, TimeResolver};
pub use types::{Datapoint, Variant, WriteMethod, WriteSummary};
