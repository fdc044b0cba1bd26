use std::collections::VecDeque;
use std::fmt::{self, Write as _};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use serde::Serialize;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::models::wire;

pub const DEFAULT_RECENT_CAPACITY: usize = 1000;

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct LogLine {
    #[serde(serialize_with = "wire::timestamp")]
    pub timestamp: SystemTime,
    pub level: String,
    pub target: String,
    pub message: String,
}

/// Bounded in-memory tail of formatted events, served by `logs.get`.
///
/// Cloning shares the buffer; install one clone as a subscriber layer and
/// hand another to the control plane.
#[derive(Clone)]
pub struct RecentLogs {
    capacity: usize,
    lines: Arc<Mutex<VecDeque<(Level, LogLine)>>>,
}

impl RecentLogs {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(4096)))),
        }
    }

    pub fn push(&self, level: Level, line: LogLine) {
        let mut lines = self.lines();
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back((level, line));
    }

    /// Newest `limit` lines at or above `min_level`, oldest first.
    pub fn snapshot(&self, limit: usize, min_level: Option<Level>) -> Vec<LogLine> {
        let lines = self.lines();
        let mut selected: Vec<LogLine> = lines
            .iter()
            .rev()
            .filter(|(level, _)| min_level.is_none_or(|min| *level <= min))
            .take(limit)
            .map(|(_, line)| line.clone())
            .collect();
        selected.reverse();
        selected
    }

    fn lines(&self) -> MutexGuard<'_, VecDeque<(Level, LogLine)>> {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for RecentLogs {
    fn default() -> Self {
        Self::new(DEFAULT_RECENT_CAPACITY)
    }
}

impl<S: Subscriber> Layer<S> for RecentLogs {
    fn on_event(&self, event: &Event<'_>, _context: Context<'_, S>) {
        let metadata = event.metadata();
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        self.push(
            *metadata.level(),
            LogLine {
                timestamp: SystemTime::now(),
                level: metadata.level().as_str().to_ascii_lowercase(),
                target: metadata.target().to_string(),
                message: visitor.finish(),
            },
        );
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        match (self.message.is_empty(), self.fields.is_empty()) {
            (_, true) => self.message,
            (true, false) => self.fields,
            (false, false) => format!("{} {}", self.message, self.fields),
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            self.append(field, format_args!("{value}"));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            self.append(field, format_args!("{value:?}"));
        }
    }
}

impl MessageVisitor {
    fn append(&mut self, field: &Field, value: fmt::Arguments<'_>) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{}={value}", field.name());
    }
}

/// Parses `trace|debug|info|warn|error`, case-insensitive.
pub fn parse_level(raw: &str) -> Option<Level> {
    raw.trim().parse::<Level>().ok()
}

#[cfg(test)]
mod tests {
    use tracing::Level;
    use tracing_subscriber::layer::SubscriberExt;

    use super::{RecentLogs, parse_level};

    #[test]
    fn captures_events_with_fields() {
        let logs = RecentLogs::new(10);
        let subscriber = tracing_subscriber::registry().with(logs.clone());
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(task_id = 7, "task completed");
            tracing::debug!("noise");
        });

        let lines = logs.snapshot(10, None);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].message, "task completed task_id=7");
        assert_eq!(lines[0].level, "info");

        let filtered = logs.snapshot(10, Some(Level::INFO));
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn ring_buffer_drops_oldest() {
        let logs = RecentLogs::new(2);
        let subscriber = tracing_subscriber::registry().with(logs.clone());
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!("one");
            tracing::warn!("two");
            tracing::warn!("three");
        });
        let messages: Vec<String> = logs
            .snapshot(10, None)
            .into_iter()
            .map(|line| line.message)
            .collect();
        assert_eq!(messages, vec!["two".to_string(), "three".to_string()]);
        assert_eq!(logs.snapshot(1, None).len(), 1);
    }

    #[test]
    fn parses_levels() {
        assert_eq!(parse_level("WARN"), Some(Level::WARN));
        assert_eq!(parse_level("bogus"), None);
    }
}
