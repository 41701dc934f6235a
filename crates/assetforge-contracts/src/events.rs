use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};

use crate::runs::summary::now_utc_iso;

pub type EventPayload = Map<String, Value>;

/// Receiver for structured pipeline events.
///
/// Emitting never fails from the caller's point of view: a sink that cannot
/// record an event reports the problem through `tracing` and moves on.
pub trait EventSink: Send + Sync {
    fn emit(&self, event_type: &str, payload: EventPayload);
}

/// Append-only writer for `events.jsonl`.
///
/// - default fields are `type`, `run_id`, `ts`
/// - caller payload is merged last and can override defaults
/// - one compact JSON object per line
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    run_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                run_id: run_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn write_event(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let event = build_event(event_type, Some(&self.inner.run_id), payload);

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&event)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(event))
    }
}

impl EventSink for EventWriter {
    fn emit(&self, event_type: &str, payload: EventPayload) {
        if let Err(err) = self.write_event(event_type, payload) {
            tracing::warn!(
                path = %self.inner.path.display(),
                "failed to record {event_type} event: {err:#}"
            );
        }
    }
}

/// Logs every event through `tracing` at debug level, with the payload as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event_type: &str, payload: EventPayload) {
        let rendered = serde_json::to_string(&payload).unwrap_or_default();
        tracing::debug!(target: "assetforge::events", event = event_type, "{rendered}");
    }
}

/// Keeps events in memory. Used by tests to assert on what the pipeline did.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Value>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Value> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn of_type(&self, event_type: &str) -> Vec<Value> {
        self.events()
            .into_iter()
            .filter(|event| event.get("type").and_then(Value::as_str) == Some(event_type))
            .collect()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event_type: &str, payload: EventPayload) {
        let event = build_event(event_type, None, payload);
        if let Ok(mut events) = self.events.lock() {
            events.push(Value::Object(event));
        }
    }
}

/// Forwards each event to every wrapped sink, in order.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event_type: &str, payload: EventPayload) {
        for sink in &self.sinks {
            sink.emit(event_type, payload.clone());
        }
    }
}

fn build_event(event_type: &str, run_id: Option<&str>, payload: EventPayload) -> EventPayload {
    let mut event = Map::new();
    event.insert("type".to_string(), Value::String(event_type.to_string()));
    if let Some(run_id) = run_id {
        event.insert("run_id".to_string(), Value::String(run_id.to_string()));
    }
    event.insert("ts".to_string(), Value::String(now_utc_iso()));
    for (key, value) in payload {
        event.insert(key, value);
    }
    event
}
