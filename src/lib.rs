//! # Spandb
//!
//! Embeddable interval time-series storage for telemetry: per-stream sequences
//! of datapoints that each occupy a span of time, with a small expression
//! language for filtering and reshaping results while they stream.
//!
//! ## Features
//!
//! - **Non-overlapping intervals**: enforced by the write path and by storage triggers
//! - **Write policies**: `insert`, `append` and `update` (truncate and replace)
//! - **Fuzzy addressing**: by timestamp, index or range, with graceful out-of-range behavior
//! - **Streaming transforms**: compiled once, evaluated lazily per datapoint
//!
//! ## Modules
//!
//! - [`storage`]: Storage engine, addressing and streaming cursors
//! - [`transform`]: Transform language compiler and executor
//! - [`config`]: File and environment configuration
//!
//! ## Quick Start
//!
//! ```rust
//! use spandb::storage::*;
//!
//! # fn main() -> Result<(), StorageError> {
//! let engine = StorageEngine::open(StorageConfig::in_memory())?;
//! engine.register_stream(Some("thermostat"))?;
//!
//! engine.write(
//!     "thermostat",
//!     Variant::Data,
//!     DatapointArrayIterator::new(vec![Datapoint::new(5.0, "A")]),
//!     WriteMethod::Insert,
//! )?;
//!
//! let points = engine.read_all(&Query::new("thermostat").at(5.0))?;
//! assert_eq!(points[0].value, "A");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod storage;
pub mod transform;

// Re-export top-level types for convenience
pub use storage::{
    Datapoint, DatapointIterator, Query, StorageConfig, StorageEngine, StorageError,
    StorageResult, Variant, WriteMethod, WriteSummary,
};

pub use transform::{compile, FunctionRegistry, Pipeline, TransformError, TransformResult};

pub use config::{Config, ConfigError, LoggingConfig, StorageSettings};
