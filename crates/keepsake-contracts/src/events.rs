use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

#[derive(Debug)]
enum EventSink {
    File(PathBuf),
    Memory,
    Disabled,
}

#[derive(Debug)]
struct SinkInner {
    sink: EventSink,
    // Serializes appends; holds the buffered events for the memory sink.
    buffer: Mutex<Vec<Value>>,
}

/// Structured run log, one compact JSON object per event.
///
/// Every event carries `type`, `run_id` and `ts`; payload keys are merged last and win. Clones
/// share the sink, so worker threads can log through their own handle.
#[derive(Debug, Clone)]
pub struct EventLog {
    inner: Arc<SinkInner>,
    run_id: String,
}

impl EventLog {
    pub fn to_file(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self::with_sink(EventSink::File(path.into()), run_id.into())
    }

    pub fn in_memory(run_id: impl Into<String>) -> Self {
        Self::with_sink(EventSink::Memory, run_id.into())
    }

    pub fn disabled() -> Self {
        Self::with_sink(EventSink::Disabled, String::new())
    }

    fn with_sink(sink: EventSink, run_id: String) -> Self {
        Self {
            inner: Arc::new(SinkInner {
                sink,
                buffer: Mutex::new(Vec::new()),
            }),
            run_id,
        }
    }

    /// Same sink, new run id.
    pub fn for_run(&self, run_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            run_id: run_id.into(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.inner.sink {
            EventSink::File(path) => Some(path.as_path()),
            EventSink::Memory | EventSink::Disabled => None,
        }
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert("run_id".to_string(), Value::String(self.run_id.clone()));
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        event.extend(payload);
        let event = Value::Object(event);

        let mut buffer = self
            .inner
            .buffer
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        match &self.inner.sink {
            EventSink::File(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let mut line = serde_json::to_string(&event)?;
                line.push('\n');
                let mut file = OpenOptions::new().create(true).append(true).open(path)?;
                file.write_all(line.as_bytes())?;
            }
            EventSink::Memory => buffer.push(event.clone()),
            EventSink::Disabled => {}
        }
        Ok(event)
    }

    /// Events held by an in-memory log, oldest first. Empty for other sinks.
    pub fn snapshot(&self) -> Vec<Value> {
        self.inner
            .buffer
            .lock()
            .map(|buffer| buffer.clone())
            .unwrap_or_default()
    }

    /// `type` of every buffered event, in order.
    pub fn event_types(&self) -> Vec<String> {
        self.snapshot()
            .iter()
            .filter_map(|event| event.get("type").and_then(Value::as_str))
            .map(str::to_string)
            .collect()
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;
    use serde_json::{json, Value};

    use super::*;

    #[test]
    fn file_sink_appends_compact_lines() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("events.jsonl");
        let log = EventLog::to_file(&path, "run-1");

        let mut payload = EventPayload::new();
        payload.insert("completed".to_string(), json!(3));
        let emitted = log.emit("progress", payload)?;
        log.emit("generation_finished", EventPayload::new())?;

        let content = fs::read_to_string(&path)?;
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: Value = serde_json::from_str(lines[0])?;
        assert_eq!(first, emitted);
        assert_eq!(first["type"], json!("progress"));
        assert_eq!(first["run_id"], json!("run-1"));
        assert_eq!(first["completed"], json!(3));
        DateTime::parse_from_rfc3339(first["ts"].as_str().unwrap_or(""))?;
        assert_eq!(log.path(), Some(path.as_path()));
        assert!(log.snapshot().is_empty());
        Ok(())
    }

    #[test]
    fn memory_sink_is_shared_between_runs() -> anyhow::Result<()> {
        let log = EventLog::in_memory("run-a");
        let next = log.for_run("run-b");
        log.emit("run_started", EventPayload::new())?;
        next.emit("run_reset", EventPayload::new())?;

        let events = log.snapshot();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["run_id"], json!("run-a"));
        assert_eq!(events[1]["run_id"], json!("run-b"));
        assert_eq!(next.event_types(), vec!["run_started", "run_reset"]);
        Ok(())
    }

    #[test]
    fn payload_overrides_defaults() -> anyhow::Result<()> {
        let log = EventLog::in_memory("run-1");
        let mut payload = EventPayload::new();
        payload.insert("run_id".to_string(), json!("other"));
        let emitted = log.emit("progress", payload)?;
        assert_eq!(emitted["run_id"], json!("other"));
        Ok(())
    }

    #[test]
    fn disabled_sink_still_returns_the_event() -> anyhow::Result<()> {
        let log = EventLog::disabled();
        let emitted = log.emit("progress", EventPayload::new())?;
        assert_eq!(emitted["type"], json!("progress"));
        assert!(log.snapshot().is_empty());
        assert!(log.path().is_none());
        Ok(())
    }
}
