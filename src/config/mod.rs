//! Station configuration: the device list, collector endpoint and timing bounds.
//!
//! Loaded from TOML. Every field has a default, so a missing file or a
//! partial file yields a usable configuration.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device::{DeviceIdentity, OrchestratorConfig, WorkerConfig};
use crate::serial::LinkTimeouts;
use crate::sync::CollectorClient;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StationConfig {
    /// Instruments in display order
    #[serde(default = "default_devices")]
    pub devices: Vec<DeviceIdentity>,

    #[serde(default)]
    pub collector: CollectorConfig,

    #[serde(default)]
    pub timing: TimingConfig,

    /// SQLite file receiving one row per exchange
    #[serde(default = "default_log_db")]
    pub log_db: String,

    /// Log filter used when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectorConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_collector_timeout_ms")]
    pub timeout_ms: u64,
}

/// All bounds in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimingConfig {
    pub probe_timeout_ms: u64,
    pub line_timeout_ms: u64,
    pub measure_lines: usize,
    pub queue_poll_ms: u64,
    /// Probe idle devices at all
    pub idle_probes: bool,
    /// Spacing of idle probes; 0 probes on every empty queue poll
    pub heartbeat_ms: u64,
    pub check_ceiling_ms: u64,
    pub sync_ceiling_ms: u64,
    pub probe_ceiling_ms: u64,
    pub result_poll_ms: u64,
    pub inter_device_delay_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 1000,
            line_timeout_ms: 1000,
            measure_lines: 3,
            queue_poll_ms: 100,
            idle_probes: true,
            heartbeat_ms: 5000,
            check_ceiling_ms: 2200,
            sync_ceiling_ms: 3000,
            probe_ceiling_ms: 1500,
            result_poll_ms: 200,
            inter_device_delay_ms: 100,
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            timeout_ms: default_collector_timeout_ms(),
        }
    }
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            devices: default_devices(),
            collector: CollectorConfig::default(),
            timing: TimingConfig::default(),
            log_db: default_log_db(),
            log_level: default_log_level(),
        }
    }
}

fn default_devices() -> Vec<DeviceIdentity> {
    vec![
        DeviceIdentity::new("Weighing", "/dev/ttyUSB0", 9600),
        DeviceIdentity::new("Conductivity", "/dev/ttyUSB1", 115200),
        DeviceIdentity::new("Magnetic", "/dev/ttyUSB2", 19200),
        DeviceIdentity::new("XRF", "/dev/ttyUSB3", 57600),
        DeviceIdentity::new("AI Vision", "/dev/ttyUSB4", 115200),
    ]
}

fn default_endpoint() -> String {
    "http://your-server/endpoint".to_string()
}

fn default_collector_timeout_ms() -> u64 {
    5000
}

fn default_log_db() -> String {
    "machine_results.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl StationConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: StationConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&text)?;
        log::info!(
            "Loaded {} device(s) from {}",
            config.devices.len(),
            path.as_ref().display()
        );
        Ok(config)
    }

    /// Like [`load`](Self::load), but a missing file falls back to the defaults
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        match Self::load(path.as_ref()) {
            Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                log::warn!("{} not found, using default station", path.as_ref().display());
                Ok(Self::default())
            }
            other => other,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.devices.is_empty() {
            return Err(ConfigError::Invalid("no devices configured".to_string()));
        }

        let mut names = HashSet::new();
        for device in &self.devices {
            if device.name.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("device on {} has no name", device.port)));
            }
            if !names.insert(device.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate device name: {}", device.name)));
            }
            if device.baud_rate == 0 {
                return Err(ConfigError::Invalid(format!("{}: baud rate must be positive", device.name)));
            }
        }

        if self.collector.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("collector endpoint is empty".to_string()));
        }
        if self.timing.measure_lines == 0 {
            return Err(ConfigError::Invalid("measure_lines must be at least 1".to_string()));
        }
        if self.timing.queue_poll_ms == 0 {
            return Err(ConfigError::Invalid("queue_poll_ms must be positive".to_string()));
        }
        if self.timing.result_poll_ms == 0 {
            return Err(ConfigError::Invalid("result_poll_ms must be positive".to_string()));
        }

        Ok(())
    }

    pub fn worker_config(&self) -> WorkerConfig {
        let t = &self.timing;
        WorkerConfig {
            timeouts: LinkTimeouts {
                probe: Duration::from_millis(t.probe_timeout_ms),
                line: Duration::from_millis(t.line_timeout_ms),
                measure_lines: t.measure_lines,
            },
            poll_interval: Duration::from_millis(t.queue_poll_ms),
            heartbeat_interval: t.idle_probes.then(|| Duration::from_millis(t.heartbeat_ms)),
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let t = &self.timing;
        OrchestratorConfig {
            check_ceiling: Duration::from_millis(t.check_ceiling_ms),
            sync_ceiling: Duration::from_millis(t.sync_ceiling_ms),
            probe_ceiling: Duration::from_millis(t.probe_ceiling_ms),
            poll_interval: Duration::from_millis(t.result_poll_ms),
            inter_device_delay: Duration::from_millis(t.inter_device_delay_ms),
        }
    }

    pub fn collector_client(&self) -> CollectorClient {
        CollectorClient::new(
            self.collector.endpoint.clone(),
            Duration::from_millis(self.collector.timeout_ms),
        )
    }
}
