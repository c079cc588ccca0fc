use std::collections::BTreeMap;
use std::fmt;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::device::Reading;

/// Body POSTed to the collector
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncPayload {
    /// ISO-8601, second precision
    pub timestamp: String,
    /// Device name to its reading; `null` when the device had nothing to report
    pub results: BTreeMap<String, Option<Reading>>,
}

impl SyncPayload {
    pub fn now() -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            results: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, device: &str, reading: Option<Reading>) {
        self.results.insert(device.to_string(), reading);
    }

    pub fn reported_count(&self) -> usize {
        self.results.values().filter(|r| r.is_some()).count()
    }

    pub fn absent_count(&self) -> usize {
        self.results.values().filter(|r| r.is_none()).count()
    }
}

/// How a sync attempt ended, as shown to the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// Collector answered 2xx
    Delivered(u16),
    /// Collector answered with any other status
    Rejected(u16),
    /// Request never got an HTTP answer
    TransportFailed(String),
}

impl SyncStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, SyncStatus::Delivered(_))
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Delivered(code) | SyncStatus::Rejected(code) => write!(f, "Sync: {}", code),
            SyncStatus::TransportFailed(message) => write!(f, "HTTP error: {}", message),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Collector returned status {0}")]
    Status(u16),
}

pub type SyncResult<T> = Result<T, SyncError>;
