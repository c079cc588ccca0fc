//! Durable record of every device exchange.
//!
//! The core only needs [`LogSink::record`]. Implementations serialize their
//! own writes and must be safe to call from every worker at once.

pub mod sqlite;

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use sqlite::SqliteLogSink;

/// One attempted exchange, successful or not
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub device: String,
    pub command: String,
    pub result: Option<String>,
    pub error: Option<String>,
}

impl LogEntry {
    pub fn new(
        device: impl Into<String>,
        command: impl Into<String>,
        result: Option<String>,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            device: device.into(),
            command: command.into(),
            result,
            error,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LogSinkError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid timestamp in log row: {0}")]
    Timestamp(#[from] chrono::ParseError),

    #[error("Log sink lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, LogSinkError>;

pub trait LogSink: Send + Sync {
    fn record(&self, entry: &LogEntry) -> Result<()>;
}

/// Keeps entries in memory; used for dry runs and tests
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().map(|guard| guard.clone()).unwrap_or_default()
    }

    pub fn entries_for_device(&self, device: &str) -> Vec<LogEntry> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.device == device)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LogSink for MemoryLogSink {
    fn record(&self, entry: &LogEntry) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| LogSinkError::Poisoned)?
            .push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_filters_by_device() {
        let sink = MemoryLogSink::new();
        sink.record(&LogEntry::new("Weighing", "S", Some("1.182 g".into()), None)).unwrap();
        sink.record(&LogEntry::new("XRF", "P", None, Some("no response".into()))).unwrap();

        assert_eq!(sink.len(), 2);
        let xrf = sink.entries_for_device("XRF");
        assert_eq!(xrf.len(), 1);
        assert_eq!(xrf[0].error.as_deref(), Some("no response"));
    }
}
