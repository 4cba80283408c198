//! Change notifications
//!
//! The engine hands an [`Event`] to its [`EventSink`] after a write or removal
//! commits. Delivery is fire-and-forget: a failing sink is logged and the
//! committed change stands.

use crate::storage::address::Query;
use crate::storage::types::{Datapoint, Variant};
use serde::Serialize;

/// Event names as seen by subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    DataWrite,
    ActionsWrite,
    DataDelete,
    ActionsDelete,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::DataWrite => "timeseries_data_write",
            EventKind::ActionsWrite => "timeseries_actions_write",
            EventKind::DataDelete => "timeseries_data_delete",
            EventKind::ActionsDelete => "timeseries_actions_delete",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A committed, non-empty write
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteEvent {
    pub stream: String,
    pub variant: Variant,
    /// Timestamp of the first datapoint written
    pub t1: f64,
    /// Largest end time written
    pub t2: f64,
    pub count: u64,
    /// Last datapoint written
    pub dp: Option<Datapoint>,
}

/// A committed removal
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoveEvent {
    pub stream: String,
    pub variant: Variant,
    /// The query that selected the removed rows
    pub query: Query,
    pub removed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Event {
    Write(WriteEvent),
    Remove(RemoveEvent),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Write(e) => match e.variant {
                Variant::Data => EventKind::DataWrite,
                Variant::Actions => EventKind::ActionsWrite,
            },
            Event::Remove(e) => match e.variant {
                Variant::Data => EventKind::DataDelete,
                Variant::Actions => EventKind::ActionsDelete,
            },
        }
    }

    pub fn stream(&self) -> &str {
        match self {
            Event::Write(e) => &e.stream,
            Event::Remove(e) => &e.stream,
        }
    }
}

/// Receives committed changes
///
/// Errors are opaque to the engine; it only logs them.
pub trait EventSink: Send + Sync {
    fn fire(&self, event: &Event) -> anyhow::Result<()>;
}

/// Emits every event as a `tracing` record
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn fire(&self, event: &Event) -> anyhow::Result<()> {
        match event {
            Event::Write(e) => tracing::info!(
                event = %event.kind(),
                stream = %e.stream,
                t1 = e.t1,
                t2 = e.t2,
                count = e.count,
                "Datapoints written"
            ),
            Event::Remove(e) => tracing::info!(
                event = %event.kind(),
                stream = %e.stream,
                removed = e.removed,
                "Datapoints removed"
            ),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        let write = Event::Write(WriteEvent {
            stream: "s".to_string(),
            variant: Variant::Actions,
            t1: 1.0,
            t2: 2.0,
            count: 1,
            dp: None,
        });
        assert_eq!(write.kind().as_str(), "timeseries_actions_write");
        assert_eq!(write.stream(), "s");

        let remove = Event::Remove(RemoveEvent {
            stream: "s".to_string(),
            variant: Variant::Data,
            query: Query::all("s"),
            removed: 3,
        });
        assert_eq!(remove.kind().to_string(), "timeseries_data_delete");
    }

    #[test]
    fn test_log_sink_never_fails() {
        let event = Event::Write(WriteEvent {
            stream: "s".to_string(),
            variant: Variant::Data,
            t1: 0.0,
            t2: 0.0,
            count: 1,
            dp: Some(Datapoint::new(0.0, 1)),
        });
        assert!(LogSink.fire(&event).is_ok());
    }
}
