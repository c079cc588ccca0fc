use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::interface::{SerialInterface, SerialPortIO};
use super::parser::{classify_measure_lines, decode_snapshot_line, NO_RESPONSE};
use super::{Result, SerialError};
use crate::device::{Command, DeviceIdentity, Reading};
use crate::logsink::{LogEntry, LogSink};

/// Read bounds for one exchange
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkTimeouts {
    /// Wait for the probe answer
    pub probe: Duration,
    /// Wait for each measure/snapshot line
    pub line: Duration,
    /// Lines read before a measure gives up looking for a weight
    pub measure_lines: usize,
}

impl Default for LinkTimeouts {
    fn default() -> Self {
        Self {
            probe: Duration::from_millis(1000),
            line: Duration::from_millis(1000),
            measure_lines: 3,
        }
    }
}

/// Result of a liveness probe
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    /// Device answered with a non-empty line
    Responded(String),
    /// Nothing (or only whitespace) arrived before the timeout
    Silent,
    /// The channel itself failed
    Failed(String),
}

impl ProbeOutcome {
    pub fn is_available(&self) -> bool {
        matches!(self, ProbeOutcome::Responded(_))
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ProbeOutcome::Failed(message) => Some(message),
            _ => None,
        }
    }
}

/// Line-oriented request/response protocol over one serial channel.
///
/// Every exchange discards stale input, writes one command, reads within a
/// bound and writes exactly one entry to the attempt log. Faults are turned
/// into [`ProbeOutcome`] / [`Reading`] values, never returned as errors.
pub struct DeviceLink {
    identity: DeviceIdentity,
    io: Box<dyn SerialPortIO>,
    sink: Arc<dyn LogSink>,
    timeouts: LinkTimeouts,
    pending: Vec<u8>,
}

impl DeviceLink {
    /// Open the identity's port. Not retried on failure.
    pub fn open(identity: DeviceIdentity, sink: Arc<dyn LogSink>, timeouts: LinkTimeouts) -> Result<Self> {
        let interface = SerialInterface::open(&identity.port, identity.baud_rate)?;
        Ok(Self::with_io(identity, Box::new(interface), sink, timeouts))
    }

    pub fn with_io(
        identity: DeviceIdentity,
        io: Box<dyn SerialPortIO>,
        sink: Arc<dyn LogSink>,
        timeouts: LinkTimeouts,
    ) -> Self {
        Self {
            identity,
            io,
            sink,
            timeouts,
            pending: Vec::new(),
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Release the port
    pub fn close(self) {
        log::debug!("[{}] Closing link on {}", self.identity.name, self.identity.port);
    }

    pub async fn probe(&mut self) -> ProbeOutcome {
        let timeout = self.timeouts.probe;
        let outcome = match self.request(Command::Probe).await {
            Ok(()) => match self.read_line(timeout).await {
                Ok(Some(line)) if !line.is_empty() => ProbeOutcome::Responded(line),
                Ok(_) => ProbeOutcome::Silent,
                Err(e) => ProbeOutcome::Failed(e.to_string()),
            },
            Err(e) => ProbeOutcome::Failed(e.to_string()),
        };

        match &outcome {
            ProbeOutcome::Responded(line) => self.record(Command::Probe, Some(line.clone()), None),
            ProbeOutcome::Silent => self.record(Command::Probe, None, None),
            ProbeOutcome::Failed(e) => self.record(Command::Probe, None, Some(e.clone())),
        }
        outcome
    }

    pub async fn measure(&mut self) -> Reading {
        let reading = match self.request(Command::Measure).await {
            Ok(()) => match self.collect_measure_lines().await {
                Ok(lines) => classify_measure_lines(&lines),
                Err(e) => Reading::error(e.to_string()),
            },
            Err(e) => Reading::error(e.to_string()),
        };
        self.record_reading(Command::Measure, &reading);
        reading
    }

    pub async fn snapshot(&mut self) -> Reading {
        let timeout = self.timeouts.line;
        let reading = match self.request(Command::Snapshot).await {
            Ok(()) => match self.read_line(timeout).await {
                Ok(Some(line)) => decode_snapshot_line(&line),
                Ok(None) => Reading::error(NO_RESPONSE),
                Err(e) => Reading::error(e.to_string()),
            },
            Err(e) => Reading::error(e.to_string()),
        };
        self.record_reading(Command::Snapshot, &reading);
        reading
    }

    /// Stop at the first weight line or after `measure_lines` reads; a silent read ends the call.
    async fn collect_measure_lines(&mut self) -> Result<Vec<String>> {
        let timeout = self.timeouts.line;
        let mut lines = Vec::new();
        for _ in 0..self.timeouts.measure_lines {
            match self.read_line(timeout).await? {
                Some(line) if line.is_empty() => continue,
                Some(line) => {
                    let matched = super::parser::parse_weight_line(&line).is_some();
                    lines.push(line);
                    if matched {
                        break;
                    }
                }
                None => break,
            }
        }
        Ok(lines)
    }

    async fn request(&mut self, command: Command) -> Result<()> {
        self.pending.clear();
        self.io.clear_input().await?;
        let frame = format!("{}\n", command.wire());
        self.io.send_data(frame.as_bytes()).await?;
        log::debug!("[{}] Sent {}", self.identity.name, command.wire());
        Ok(())
    }

    /// Read one newline-terminated line, trimmed.
    /// On timeout a partial line is returned as-is, or `None` if nothing arrived.
    /// Bytes are decoded per complete line, so characters split across reads survive.
    async fn read_line(&mut self, timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        let mut buffer = [0u8; 256];

        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                let raw: Vec<u8> = self.pending.drain(..=pos).collect();
                let line = decode_line(&raw);
                log::debug!("[{}] Received line: {}", self.identity.name, line);
                return Ok(Some(line));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(self.take_partial());
            }

            match self.io.read_data(&mut buffer, remaining.as_millis() as u64).await {
                Ok(n) => self.pending.extend_from_slice(&buffer[..n]),
                Err(SerialError::Timeout) => return Ok(self.take_partial()),
                Err(e) => return Err(e),
            }
        }
    }

    fn take_partial(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            let raw = std::mem::take(&mut self.pending);
            Some(decode_line(&raw))
        }
    }

    /// Log a command that was accepted but never reached the device
    pub fn record_skipped(&self, command: Command, reason: &str) {
        log::warn!("[{}] {} dropped: {}", self.identity.name, command.wire(), reason);
        self.record(command, None, Some(reason.to_string()));
    }

    fn record_reading(&self, command: Command, reading: &Reading) {
        if let Some(error) = reading.log_error() {
            log::warn!("[{}] {} failed: {}", self.identity.name, command.wire(), error);
        }
        self.record(command, reading.log_text(), reading.log_error());
    }

    fn record(&self, command: Command, result: Option<String>, error: Option<String>) {
        let entry = LogEntry::new(self.identity.name.as_str(), command.wire(), result, error);
        if let Err(e) = self.sink.record(&entry) {
            log::warn!("[{}] Failed to record {} attempt: {}", self.identity.name, command.wire(), e);
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).trim().to_string()
}
