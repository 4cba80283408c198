//! Core data types for the spandb storage engine
//!
//! This module defines the fundamental types used throughout the storage layer:
//! - `Datapoint`: A single value occupying an interval of time
//! - `Variant`: Which of a stream's two interval sets a datapoint lives in
//! - `WriteMethod` and `WriteSummary`: Write conflict policy and its outcome

use crate::storage::error::{StorageError, StorageResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// A single time-series datapoint
///
/// On the wire a datapoint is `{"t": 12.5, "d": 3.0, "v": ..., "a": "actor"}`,
/// where `d` defaults to 0 and `a` is only present for actions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Datapoint {
    /// Unix timestamp in seconds
    #[serde(rename = "t")]
    pub timestamp: f64,
    /// Duration in seconds (>= 0)
    #[serde(rename = "d", default, skip_serializing_if = "is_zero")]
    pub duration: f64,
    /// Arbitrary JSON document
    #[serde(rename = "v", default)]
    pub value: Value,
    /// Who performed the action (actions variant only)
    #[serde(rename = "a", default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
}

fn is_zero(d: &f64) -> bool {
    *d == 0.0
}

impl Datapoint {
    /// Create an instantaneous datapoint at the given timestamp
    pub fn new(timestamp: f64, value: impl Into<Value>) -> Self {
        Self {
            timestamp,
            duration: 0.0,
            value: value.into(),
            actor: None,
        }
    }

    /// Create a datapoint stamped with the current time
    pub fn now(value: impl Into<Value>) -> Self {
        Self::new(now_seconds(), value)
    }

    /// Builder method: set duration
    pub fn duration(mut self, duration: f64) -> Self {
        self.duration = duration;
        self
    }

    /// Builder method: set actor
    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Copy of this datapoint carrying a different value
    pub fn with_value(&self, value: Value) -> Self {
        Self {
            timestamp: self.timestamp,
            duration: self.duration,
            value,
            actor: self.actor.clone(),
        }
    }

    /// End of the occupied interval
    pub fn end(&self) -> f64 {
        self.timestamp + self.duration
    }

    /// Reject timestamps and durations that cannot be stored
    pub fn validate(&self) -> StorageResult<()> {
        if !self.timestamp.is_finite() {
            return Err(StorageError::Validation(format!(
                "datapoint timestamp must be finite, got {}",
                self.timestamp
            )));
        }
        if !self.duration.is_finite() || self.duration < 0.0 {
            return Err(StorageError::Validation(format!(
                "datapoint duration must be a finite non-negative number, got {}",
                self.duration
            )));
        }
        Ok(())
    }
}

/// Current wall-clock time as fractional Unix seconds
pub fn now_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Which interval set of a stream a datapoint belongs to
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// Regular measurements
    #[default]
    Data,
    /// Actions performed on the stream, carrying an actor
    Actions,
}

impl Variant {
    /// Backing table for this variant
    pub fn table(&self) -> &'static str {
        match self {
            Variant::Data => "datapoints",
            Variant::Actions => "actions",
        }
    }

    pub fn has_actor(&self) -> bool {
        matches!(self, Variant::Actions)
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Variant::Data => write!(f, "data"),
            Variant::Actions => write!(f, "actions"),
        }
    }
}

impl FromStr for Variant {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "data" => Ok(Variant::Data),
            "actions" => Ok(Variant::Actions),
            other => Err(StorageError::Validation(format!("unknown variant '{}'", other))),
        }
    }
}

/// Conflict policy applied when writing datapoints
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WriteMethod {
    /// Plain insert: any overlap or duplicate timestamp aborts the write
    Insert,
    /// Only accept datapoints at or after the end of existing data
    Append,
    /// Replace, truncate or delete existing rows to make room
    #[default]
    Update,
}

impl std::fmt::Display for WriteMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteMethod::Insert => write!(f, "insert"),
            WriteMethod::Append => write!(f, "append"),
            WriteMethod::Update => write!(f, "update"),
        }
    }
}

impl FromStr for WriteMethod {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "insert" => Ok(WriteMethod::Insert),
            "append" => Ok(WriteMethod::Append),
            "update" => Ok(WriteMethod::Update),
            other => Err(StorageError::Validation(format!(
                "unrecognized write method '{}'",
                other
            ))),
        }
    }
}

/// Outcome of a successful write
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WriteSummary {
    /// Last datapoint written
    pub last: Option<Datapoint>,
    /// Timestamp of the first datapoint written
    pub start: f64,
    /// Running max of `timestamp + duration`
    pub end: f64,
    /// Number of datapoints written
    pub count: u64,
}

impl WriteSummary {
    /// Fold one more written datapoint into the summary
    pub(crate) fn record(&mut self, dp: &Datapoint) {
        if self.count == 0 {
            self.start = dp.timestamp;
            self.end = dp.end();
        } else {
            self.end = self.end.max(dp.end());
        }
        self.count += 1;
        self.last = Some(dp.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_format() {
        let dp: Datapoint = serde_json::from_str(r#"{"t": 5, "v": "A"}"#).unwrap();
        assert_eq!(dp.timestamp, 5.0);
        assert_eq!(dp.duration, 0.0);
        assert_eq!(dp.value, json!("A"));
        assert!(dp.actor.is_none());

        let dp = Datapoint::new(1.5, json!({"x": 1})).duration(2.0).actor("alice");
        let encoded = serde_json::to_value(&dp).unwrap();
        assert_eq!(encoded, json!({"t": 1.5, "d": 2.0, "v": {"x": 1}, "a": "alice"}));

        // Zero durations and missing actors are omitted
        let encoded = serde_json::to_value(Datapoint::new(3.0, 7)).unwrap();
        assert_eq!(encoded, json!({"t": 3.0, "v": 7}));
    }

    #[test]
    fn test_validate() {
        assert!(Datapoint::new(1.0, 1).validate().is_ok());
        assert!(Datapoint::new(1.0, 1).duration(-1.0).validate().is_err());
        assert!(Datapoint::new(f64::NAN, 1).validate().is_err());
        assert!(Datapoint::new(1.0, 1).duration(f64::INFINITY).validate().is_err());
    }

    #[test]
    fn test_method_and_variant_parsing() {
        assert_eq!("append".parse::<WriteMethod>().unwrap(), WriteMethod::Append);
        assert_eq!("UPDATE".parse::<WriteMethod>().unwrap(), WriteMethod::Update);
        assert!("upsert".parse::<WriteMethod>().is_err());
        assert_eq!(WriteMethod::default(), WriteMethod::Update);

        assert_eq!("actions".parse::<Variant>().unwrap(), Variant::Actions);
        assert_eq!(Variant::Data.table(), "datapoints");
        assert_eq!(Variant::Actions.to_string(), "actions");
    }

    #[test]
    fn test_write_summary_tracks_span() {
        let mut summary = WriteSummary::default();
        summary.record(&Datapoint::new(10.0, 1).duration(5.0));
        summary.record(&Datapoint::new(11.0, 2));
        summary.record(&Datapoint::new(12.0, 3).duration(1.0));

        assert_eq!(summary.count, 3);
        assert_eq!(summary.start, 10.0);
        assert_eq!(summary.end, 15.0);
        assert_eq!(summary.last.unwrap().value, json!(3));
    }
}
