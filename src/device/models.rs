use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name, port and line speed of one instrument; fixed for the worker's lifetime
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    pub name: String,
    pub port: String,
    pub baud_rate: u32,
}

impl DeviceIdentity {
    pub fn new(name: impl Into<String>, port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            name: name.into(),
            port: port.into(),
            baud_rate,
        }
    }
}

/// Device connection state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}

/// The three requests an instrument understands
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Liveness check
    Probe,
    /// Fresh instrument reading
    Measure,
    /// Last reading stored on the instrument
    Snapshot,
}

impl Command {
    /// Token written on the wire, newline excluded
    pub fn wire(&self) -> &'static str {
        match self {
            Command::Probe => "B",
            Command::Measure => "S",
            Command::Snapshot => "P",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire())
    }
}

/// Normalized outcome of a Measure or Snapshot exchange
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Reading {
    Weight { value: f64, unit: String },
    /// Text that did not match the weight grammar
    Raw(String),
    /// Decoded snapshot object
    Structured(serde_json::Value),
    /// `raw` keeps undecodable device output for diagnosis
    Error {
        message: String,
        raw: Option<String>,
    },
}

impl Reading {
    pub fn error(message: impl Into<String>) -> Self {
        Reading::Error {
            message: message.into(),
            raw: None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reading::Error { .. })
    }

    /// Text stored in the attempt log for a successful exchange
    pub fn log_text(&self) -> Option<String> {
        match self {
            Reading::Weight { value, unit } => Some(format!("{} {}", value, unit)),
            Reading::Raw(text) => Some(text.clone()),
            Reading::Structured(value) => Some(value.to_string()),
            Reading::Error { .. } => None,
        }
    }

    /// Error text stored in the attempt log for a failed exchange
    pub fn log_error(&self) -> Option<String> {
        match self {
            Reading::Error { message, raw: Some(raw) } => Some(format!("{}: {}", message, raw)),
            Reading::Error { message, raw: None } => Some(message.clone()),
            _ => None,
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::Weight { value, unit } => write!(f, "{} {}", value, unit),
            Reading::Raw(text) => write!(f, "{}", text),
            Reading::Structured(value) => write!(f, "{}", value),
            Reading::Error { message, .. } => write!(f, "error: {}", message),
        }
    }
}

/// Immutable per-device snapshot; the owning worker replaces it wholesale
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObservableState {
    pub status: ConnectionState,
    /// True only while the port is open and the latest probe got an answer
    pub available: bool,
    pub last_result: Option<Reading>,
    pub last_error: Option<String>,
    pub last_command: Option<Command>,
    pub updated_at: DateTime<Utc>,
    /// Completed probes
    pub probe_seq: u64,
    /// Completed Measure/Snapshot exchanges
    pub result_seq: u64,
    /// Completed queued commands of any kind; heartbeat probes are not counted
    pub command_seq: u64,
}

impl ObservableState {
    pub fn new() -> Self {
        Self {
            status: ConnectionState::Disconnected,
            available: false,
            last_result: None,
            last_error: None,
            last_command: None,
            updated_at: Utc::now(),
            probe_seq: 0,
            result_seq: 0,
            command_seq: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.status, ConnectionState::Connected)
    }

    pub fn with_status(&self, status: ConnectionState) -> Self {
        let mut next = self.clone();
        next.status = status;
        next.updated_at = Utc::now();
        next
    }
}

impl Default for ObservableState {
    fn default() -> Self {
        Self::new()
    }
}
