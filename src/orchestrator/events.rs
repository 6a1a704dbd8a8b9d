//! Per-run JSONL event stream.
//!
//! Every event is `{type, timestamp (ISO 8601), data}`, one per line. The
//! sink is a plain append-only file; the Step Interpreter depends only on
//! the [`EventSink`] trait so it stays decoupled from the orchestrator the
//! same way [`crate::auth::StepExecutor`] decouples recovery from it.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use serde_json::Value;

use crate::error::{EngineError, EngineResult};

pub trait EventSink: Send + Sync {
    fn emit(&self, event_type: &str, data: Value);
}

/// Appends one JSON object per line to `events.jsonl`.
pub struct JsonlEventSink {
    file: Mutex<File>,
}

impl JsonlEventSink {
    pub fn create(path: &Path) -> EngineResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| EngineError::Operational(format!("failed to open events sink at {}: {}", path.display(), e)))?;
        Ok(Self { file: Mutex::new(file) })
    }
}

impl EventSink for JsonlEventSink {
    fn emit(&self, event_type: &str, data: Value) {
        let line = serde_json::json!({
            "type": event_type,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "data": data,
        });
        let Ok(mut file) = self.file.lock() else { return };
        if let Ok(serialized) = serde_json::to_string(&line) {
            let _ = writeln!(file, "{}", serialized);
        }
    }
}

/// No-op sink for callers that don't want a persisted event stream.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event_type: &str, _data: Value) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn emits_one_json_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let sink = JsonlEventSink::create(&path).unwrap();
        sink.emit("run_started", serde_json::json!({"packId": "p1"}));
        sink.emit("run_finished", serde_json::json!({"stepsExecuted": 3}));

        let mut contents = String::new();
        File::open(&path).unwrap().read_to_string(&mut contents).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["type"], "run_started");
        assert_eq!(first["data"]["packId"], "p1");
    }
}
