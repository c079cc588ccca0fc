use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use super::{LogEntry, LogSink, LogSinkError, Result};

/// SQLite-backed attempt log, one row per exchange
pub struct SqliteLogSink {
    conn: Mutex<Connection>,
}

impl SqliteLogSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        log::info!("Attempt log opened at {}", path.as_ref().display());
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                device TEXT NOT NULL,
                command TEXT NOT NULL,
                result TEXT,
                error TEXT
            )",
            [],
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| LogSinkError::Poisoned)
    }

    /// All entries, newest first
    pub fn all_entries(&self) -> Result<Vec<LogEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT timestamp, device, command, result, error FROM logs ORDER BY id DESC",
        )?;
        let rows = stmt.query_map([], row_to_raw)?;
        collect_entries(rows)
    }

    /// Entries for one device, newest first
    pub fn entries_for_device(&self, device: &str) -> Result<Vec<LogEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT timestamp, device, command, result, error FROM logs WHERE device = ?1 ORDER BY id DESC",
        )?;
        let rows = stmt.query_map(params![device], row_to_raw)?;
        collect_entries(rows)
    }

    pub fn delete_all(&self) -> Result<usize> {
        Ok(self.lock()?.execute("DELETE FROM logs", [])?)
    }

    pub fn delete_for_device(&self, device: &str) -> Result<usize> {
        Ok(self
            .lock()?
            .execute("DELETE FROM logs WHERE device = ?1", params![device])?)
    }

    /// Every entry as a JSON array, newest first
    pub fn export_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.all_entries()?)?)
    }
}

impl LogSink for SqliteLogSink {
    fn record(&self, entry: &LogEntry) -> Result<()> {
        self.lock()?.execute(
            "INSERT INTO logs (timestamp, device, command, result, error) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.timestamp.to_rfc3339(),
                entry.device,
                entry.command,
                entry.result,
                entry.error
            ],
        )?;
        Ok(())
    }
}

type RawRow = (String, String, String, Option<String>, Option<String>);

fn row_to_raw(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn collect_entries<I>(rows: I) -> Result<Vec<LogEntry>>
where
    I: Iterator<Item = rusqlite::Result<RawRow>>,
{
    let mut entries = Vec::new();
    for row in rows {
        let (timestamp, device, command, result, error) = row?;
        entries.push(LogEntry {
            timestamp: DateTime::parse_from_rfc3339(&timestamp)?.with_timezone(&Utc),
            device,
            command,
            result,
            error,
        });
    }
    Ok(entries)
}
