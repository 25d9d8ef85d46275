//! Append-only audit event log
//!
//! Every notable engine transition is appended as one JSON line
//! `{"timestamp", "event", "payload"}`, stamped with the engine clock. The log is write-only from the engine's
//! point of view; a failed append is logged and never aborts the operation.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

/// One audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamEvent {
    pub timestamp: String,
    pub event: String,
    pub payload: Value,
}

impl TeamEvent {
    pub fn new<S: Into<String>>(event: S, payload: Value, at: DateTime<Utc>) -> Self {
        let payload = match payload {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        Self {
            timestamp: at.to_rfc3339_opts(SecondsFormat::Secs, false),
            event: event.into(),
            payload,
        }
    }
}

/// Destination for audit events
pub trait EventSink: Send + Sync {
    /// Record `event` as having happened at `at`
    fn emit(&self, event: &str, payload: Value, at: DateTime<Utc>);
}

/// NDJSON file sink
#[derive(Debug)]
pub struct JsonlEventLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlEventLog {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, record: &TeamEvent) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())
    }
}

impl EventSink for JsonlEventLog {
    fn emit(&self, event: &str, payload: Value, at: DateTime<Utc>) {
        let record = TeamEvent::new(event, payload, at);
        if let Err(e) = self.append(&record) {
            warn!(
                event = event,
                path = %self.path.display(),
                error = %e,
                "Failed to append audit event"
            );
        }
    }
}

/// Sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: &str, _payload: Value, _at: DateTime<Utc>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use tempfile::TempDir;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_events_are_appended_as_json_lines() {
        let dir = TempDir::new().unwrap();
        let log = JsonlEventLog::new(dir.path().join("nested").join("events.jsonl"));

        log.emit("task_enqueued", json!({"task_id": "TASK-0001"}), at());
        log.emit("team_resumed", Value::Null, at() + chrono::Duration::minutes(5));

        let raw = fs::read_to_string(log.path()).unwrap();
        let rows: Vec<TeamEvent> = raw
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].event, "task_enqueued");
        assert_eq!(rows[0].payload["task_id"], json!("TASK-0001"));
        assert_eq!(rows[1].payload, json!({}));
        assert_eq!(rows[0].timestamp, "2025-03-01T12:00:00+00:00");
        assert_eq!(rows[1].timestamp, "2025-03-01T12:05:00+00:00");
    }

    #[test]
    fn test_unwritable_log_does_not_panic() {
        let dir = TempDir::new().unwrap();
        // A directory where the file should be makes every append fail.
        let target = dir.path().join("events.jsonl");
        fs::create_dir_all(&target).unwrap();

        let log = JsonlEventLog::new(&target);
        log.emit("task_failed", json!({}), at());
    }
}
