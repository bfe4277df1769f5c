//! Structured events and the bounded per-source queue they travel in.
//!
//! Every task and component owns an [`EventQueue`]. Producers push into it
//! without blocking; the message bus drains it on its own schedule.
//! When a queue is full the oldest event is dropped.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Fatal => "fatal",
        }
    }

    /// Parse a severity name. Accepts a few common aliases.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "debug" | "trace" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            "fatal" | "critical" => Some(Self::Fatal),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured record emitted by a task or component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub message: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    /// Name of the emitting task or component.
    pub source: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Free-form payload (task id, exit code, file path, ...).
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Event {
    pub fn new(source: &str, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity,
            timestamp: Utc::now(),
            source: source.to_string(),
            tags: Vec::new(),
            data: serde_json::Value::Null,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Look up a named field for filtering. Known fields first, then keys of `data`.
    pub fn field(&self, name: &str) -> Option<serde_json::Value> {
        match name {
            "message" => Some(serde_json::Value::String(self.message.clone())),
            "severity" => Some(serde_json::Value::String(self.severity.to_string())),
            "source" => Some(serde_json::Value::String(self.source.clone())),
            "timestamp" => Some(serde_json::Value::String(self.timestamp.to_rfc3339())),
            "tags" => Some(serde_json::Value::from(self.tags.clone())),
            other => self.data.get(other).filter(|v| !v.is_null()).cloned(),
        }
    }
}

#[derive(Debug)]
struct QueueInner {
    events: VecDeque<Event>,
    dropped: u64,
}

/// Bounded, cloneable, thread-safe event queue. Clones share the same buffer.
#[derive(Debug, Clone)]
pub struct EventQueue {
    source: Arc<str>,
    capacity: usize,
    inner: Arc<Mutex<QueueInner>>,
}

impl EventQueue {
    pub fn new(source: &str, capacity: usize) -> Self {
        Self {
            source: Arc::from(source),
            capacity: capacity.max(1),
            inner: Arc::new(Mutex::new(QueueInner {
                events: VecDeque::new(),
                dropped: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Push an event, evicting the oldest one when full.
    pub fn push(&self, event: Event) {
        let mut inner = self.lock();
        while inner.events.len() >= self.capacity {
            inner.events.pop_front();
            inner.dropped += 1;
        }
        inner.events.push_back(event);
    }

    /// Convenience: build and push an event stamped with this queue's source.
    pub fn emit(&self, severity: Severity, message: impl Into<String>) {
        self.push(Event::new(&self.source, severity, message));
    }

    /// Take every queued event, oldest first.
    pub fn drain(&self) -> Vec<Event> {
        self.lock().events.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of events evicted because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drops_oldest_on_overflow() {
        let q = EventQueue::new("t", 3);
        for i in 0..5 {
            q.emit(Severity::Info, format!("msg {i}"));
        }
        assert_eq!(q.len(), 3);
        assert_eq!(q.dropped(), 2);
        let events = q.drain();
        assert_eq!(events[0].message, "msg 2");
        assert_eq!(events[2].message, "msg 4");
        assert!(q.is_empty());
    }

    #[test]
    fn test_clones_share_buffer() {
        let q = EventQueue::new("shared", 10);
        let q2 = q.clone();
        q2.emit(Severity::Warn, "hello");
        assert_eq!(q.len(), 1);
        assert_eq!(q.drain()[0].source, "shared");
    }

    #[test]
    fn test_severity_order_and_parse() {
        assert!(Severity::Fatal > Severity::Error);
        assert!(Severity::Debug < Severity::Info);
        assert_eq!(Severity::parse("WARNING"), Some(Severity::Warn));
        assert_eq!(Severity::parse("nope"), None);
    }

    #[test]
    fn test_event_field_lookup() {
        let ev = Event::new("vault", Severity::Error, "boom")
            .with_tags(["task", "error"])
            .with_data(serde_json::json!({"task_id": 4, "empty": null}));
        assert_eq!(ev.field("severity").unwrap(), "error");
        assert_eq!(ev.field("task_id").unwrap(), 4);
        assert!(ev.field("empty").is_none());
        assert!(ev.field("missing").is_none());
    }
}
