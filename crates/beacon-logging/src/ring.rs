//! In-memory diagnostic ring buffer fed by a `tracing` layer.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

/// Default number of entries kept by a [`DiagnosticRing`].
pub const DEFAULT_DIAGNOSTIC_CAPACITY: usize = 50;

/// Bounded FIFO of free-form trace lines. The oldest entry is evicted first.
pub struct DiagnosticRing {
    entries: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl DiagnosticRing {
    /// Create a ring holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append an entry, evicting the oldest one when full.
    pub fn push(&self, entry: impl Into<String>) {
        let mut entries = self.entries.lock();
        while entries.len() >= self.capacity {
            let _ = entries.pop_front();
        }
        entries.push_back(entry.into());
    }

    /// Remove and return every entry, oldest first.
    pub fn drain(&self) -> Vec<String> {
        self.entries.lock().drain(..).collect()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the ring is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Maximum number of stored entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for DiagnosticRing {
    fn default() -> Self {
        Self::new(DEFAULT_DIAGNOSTIC_CAPACITY)
    }
}

/// `tracing` layer that renders each event as one line into a [`DiagnosticRing`].
pub struct DiagnosticLayer {
    ring: Arc<DiagnosticRing>,
}

impl DiagnosticLayer {
    /// Create a layer writing into `ring`.
    pub fn new(ring: Arc<DiagnosticRing>) -> Self {
        Self { ring }
    }
}

/// Collects the message and the remaining fields of one event.
struct FieldVisitor {
    message: Option<String>,
    fields: serde_json::Map<String, serde_json::Value>,
}

impl FieldVisitor {
    fn new() -> Self {
        Self {
            message: None,
            fields: serde_json::Map::new(),
        }
    }

    fn render(self, level: &tracing::Level, target: &str) -> String {
        let mut line = format!(
            "{} {level} {target}: {}",
            Utc::now().format("%H:%M:%S%.3f"),
            self.message.unwrap_or_default()
        );
        for (key, value) in self.fields {
            match value {
                serde_json::Value::String(s) => line.push_str(&format!(" {key}={s}")),
                other => line.push_str(&format!(" {key}={other}")),
            }
        }
        line
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let val = format!("{value:?}");
        if field.name() == "message" {
            self.message = Some(val);
        } else {
            let _ = self
                .fields
                .insert(field.name().to_string(), serde_json::Value::String(val));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            let _ = self.fields.insert(
                field.name().to_string(),
                serde_json::Value::String(value.to_string()),
            );
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        let _ = self
            .fields
            .insert(field.name().to_string(), serde_json::Value::Number(value.into()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        let _ = self
            .fields
            .insert(field.name().to_string(), serde_json::Value::Number(value.into()));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        let _ = self
            .fields
            .insert(field.name().to_string(), serde_json::Value::Bool(value));
    }
}

impl<S> Layer<S> for DiagnosticLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::new();
        event.record(&mut visitor);
        let metadata = event.metadata();
        self.ring
            .push(visitor.render(metadata.level(), metadata.target()));
    }
}
