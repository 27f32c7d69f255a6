//! Event sinks receiving repository notifications.

use std::sync::{Mutex, PoisonError};

use tracing::{debug, error, info};

use crate::error::OrmError;

/// Fire-and-forget notifications emitted by a repository.
pub trait EventSink: Send + Sync {
    /// Informational message.
    fn message(&self, text: &str);
    /// A failure that was reported instead of returned.
    fn error(&self, error: &OrmError);
    /// Rows processed so far by a batch.
    fn progress(&self, count: usize);
    /// Rows affected by a statement.
    fn rows_affected(&self, count: u64);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn message(&self, text: &str) {
        info!("{text}");
    }

    fn error(&self, err: &OrmError) {
        error!(error = %err, "repository operation failed");
    }

    fn progress(&self, count: usize) {
        debug!(count, "batch progress");
    }

    fn rows_affected(&self, count: u64) {
        debug!(count, "rows affected");
    }
}

/// A recorded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// See [`EventSink::message`].
    Message(String),
    /// See [`EventSink::error`], rendered with `Display`.
    Error(String),
    /// See [`EventSink::progress`].
    Progress(usize),
    /// See [`EventSink::rows_affected`].
    RowsAffected(u64),
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: Event) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    /// Snapshot of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Recorded error messages.
    #[must_use]
    pub fn errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Error(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Forgets every event.
    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl EventSink for MemorySink {
    fn message(&self, text: &str) {
        self.push(Event::Message(text.to_string()));
    }

    fn error(&self, err: &OrmError) {
        self.push(Event::Error(err.to_string()));
    }

    fn progress(&self, count: usize) {
        self.push(Event::Progress(count));
    }

    fn rows_affected(&self, count: u64) {
        self.push(Event::RowsAffected(count));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_records_in_order() {
        let sink = MemorySink::new();
        sink.message("start");
        sink.progress(1);
        sink.error(&OrmError::Configuration(String::from("boom")));
        sink.rows_affected(2);

        assert_eq!(
            sink.events(),
            vec![
                Event::Message(String::from("start")),
                Event::Progress(1),
                Event::Error(String::from("configuration error: boom")),
                Event::RowsAffected(2),
            ]
        );
        assert_eq!(sink.errors().len(), 1);
        sink.clear();
        assert!(sink.events().is_empty());
    }
}
