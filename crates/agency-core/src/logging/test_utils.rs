//! In-memory log capture for assertions.
//!
//! [`capture_logs`] installs a subscriber as the *thread* default, so tests
//! running in parallel do not see each other's events. Async tests must use
//! the current-thread runtime (the `#[tokio::test]` default) for events from
//! spawned tasks to be captured.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::level_filters::LevelFilter;
use tracing::subscriber::DefaultGuard;
use tracing::{Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

/// One captured `tracing` event.
#[derive(Clone, Debug)]
pub struct LogRecord {
    /// Event level.
    pub level: Level,
    /// Module target.
    pub target: String,
    /// Rendered `message` field.
    pub message: String,
    /// Remaining fields, rendered to strings, in recording order.
    pub fields: Vec<(String, String)>,
}

impl LogRecord {
    /// Look up a structured field by name.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Shared handle to the captured records.
#[derive(Clone, Default)]
pub struct CapturedLogs {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl CapturedLogs {
    /// Copy of everything captured so far.
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// Any event whose message contains `needle`.
    pub fn has_message(&self, needle: &str) -> bool {
        self.records.lock().iter().any(|r| r.message.contains(needle))
    }

    /// Any event at `level` whose message contains `needle`.
    pub fn has_event(&self, level: Level, needle: &str) -> bool {
        self.find(level, needle).is_some()
    }

    /// First event at `level` whose message contains `needle`.
    pub fn find(&self, level: Level, needle: &str) -> Option<LogRecord> {
        self.records
            .lock()
            .iter()
            .find(|r| r.level == level && r.message.contains(needle))
            .cloned()
    }

    /// Number of events at `level`.
    pub fn count_at_level(&self, level: Level) -> usize {
        self.records.lock().iter().filter(|r| r.level == level).count()
    }

    /// Drop everything captured so far.
    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

struct CaptureLayer {
    logs: CapturedLogs,
}

#[derive(Default)]
struct RecordVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl RecordVisitor {
    fn push(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = value;
        } else {
            self.fields.push((field.name().to_owned(), value));
        }
    }
}

impl Visit for RecordVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.push(field, format!("{value:?}"));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(field, value.to_owned());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.push(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.push(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.push(field, value.to_string());
    }
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);

        let meta = event.metadata();
        self.logs.records.lock().push(LogRecord {
            level: *meta.level(),
            target: meta.target().to_owned(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

/// Start capturing every event on the current thread.
///
/// Capture stops when the returned guard is dropped.
pub fn capture_logs() -> (CapturedLogs, DefaultGuard) {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::registry()
        .with(CaptureLayer { logs: logs.clone() })
        .with(LevelFilter::TRACE);

    let guard = subscriber.set_default();
    (logs, guard)
}
