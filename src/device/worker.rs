use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};

use super::{Command, ConnectionState, DeviceIdentity, ObservableState, Reading};
use crate::logsink::{LogEntry, LogSink};
use crate::serial::{DeviceLink, LinkTimeouts, SerialPortIO};

pub const NOT_SENT: &str = "not sent: device not connected";
pub const NOT_RUN: &str = "not sent: worker stopped";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkerConfig {
    pub timeouts: LinkTimeouts,
    /// How long one queue wait lasts before the loop looks at the heartbeat
    pub poll_interval: Duration,
    /// Minimum spacing of idle probes; zero probes on every empty poll, `None` disables them
    pub heartbeat_interval: Option<Duration>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            timeouts: LinkTimeouts::default(),
            poll_interval: Duration::from_millis(100),
            heartbeat_interval: Some(Duration::from_secs(5)),
        }
    }
}

/// Sequential executor for one device.
///
/// Owns the device's link inside a single tokio task that drains a FIFO
/// command queue, so at most one exchange is ever in flight on the port.
/// The task is the only writer of the device's [`ObservableState`]; readers
/// get `Arc` snapshots that are swapped wholesale.
pub struct DeviceWorker {
    identity: DeviceIdentity,
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<Arc<ObservableState>>,
    shutdown_tx: watch::Sender<bool>,
    sink: Arc<dyn LogSink>,
    /// Commands accepted so far; held while sending so tickets follow queue order
    submitted: Mutex<u64>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceWorker {
    /// Open the device's port and start its loop. An open failure leaves the
    /// worker in `ConnectionState::Error` with every command rejected.
    pub fn spawn(identity: DeviceIdentity, sink: Arc<dyn LogSink>, config: WorkerConfig) -> Self {
        let (state_tx, state_rx) = watch::channel(Arc::new(
            ObservableState::new().with_status(ConnectionState::Connecting),
        ));

        match DeviceLink::open(identity.clone(), sink.clone(), config.timeouts) {
            Ok(link) => Self::start(identity, link, sink, config, state_tx, state_rx),
            Err(e) => {
                let message = format!("Connection failed: {}", e);
                log::error!("[{}] {}", identity.name, message);
                let mut failed = state_tx.borrow().with_status(ConnectionState::Error(message.clone()));
                failed.last_error = Some(message);
                state_tx.send_replace(Arc::new(failed));
                Self::idle(identity, sink, state_rx)
            }
        }
    }

    /// Start a worker over an already open channel
    pub fn spawn_with_io(
        identity: DeviceIdentity,
        io: Box<dyn SerialPortIO>,
        sink: Arc<dyn LogSink>,
        config: WorkerConfig,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(Arc::new(
            ObservableState::new().with_status(ConnectionState::Connecting),
        ));
        let link = DeviceLink::with_io(identity.clone(), io, sink.clone(), config.timeouts);
        Self::start(identity, link, sink, config, state_tx, state_rx)
    }

    fn start(
        identity: DeviceIdentity,
        link: DeviceLink,
        sink: Arc<dyn LogSink>,
        config: WorkerConfig,
        state_tx: watch::Sender<Arc<ObservableState>>,
        state_rx: watch::Receiver<Arc<ObservableState>>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let connected = state_tx.borrow().with_status(ConnectionState::Connected);
        state_tx.send_replace(Arc::new(connected));
        log::info!("[{}] Connected on {}", identity.name, identity.port);

        let task = tokio::spawn(worker_loop(link, cmd_rx, state_tx, shutdown_rx, config));

        Self {
            identity,
            cmd_tx,
            state_rx,
            shutdown_tx,
            sink,
            submitted: Mutex::new(0),
            task: Mutex::new(Some(task)),
        }
    }

    fn idle(
        identity: DeviceIdentity,
        sink: Arc<dyn LogSink>,
        state_rx: watch::Receiver<Arc<ObservableState>>,
    ) -> Self {
        let (cmd_tx, _cmd_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            identity,
            cmd_tx,
            state_rx,
            shutdown_tx,
            sink,
            submitted: Mutex::new(0),
            task: Mutex::new(None),
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    /// Latest published state
    pub fn state(&self) -> Arc<ObservableState> {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<ObservableState>> {
        self.state_rx.clone()
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Queue a command without waiting for it. Returns false if it was not queued:
    /// after shutdown nothing happens; without an open port a "not sent" attempt is logged.
    pub fn enqueue(&self, command: Command) -> bool {
        self.submit(command).is_some()
    }

    /// Like [`enqueue`](Self::enqueue), but returns a ticket: the command has
    /// finished once the published `command_seq` reaches it.
    pub fn submit(&self, command: Command) -> Option<u64> {
        if self.is_shut_down() {
            log::debug!("[{}] Ignoring {} after shutdown", self.identity.name, command);
            return None;
        }

        if !self.state().is_connected() {
            log::warn!("[{}] {} not sent, device not connected", self.identity.name, command);
            let entry = LogEntry::new(
                self.identity.name.as_str(),
                command.wire(),
                None,
                Some(NOT_SENT.to_string()),
            );
            if let Err(e) = self.sink.record(&entry) {
                log::warn!("[{}] Failed to record rejected {}: {}", self.identity.name, command, e);
            }
            return None;
        }

        let mut submitted = self.submitted.lock().unwrap_or_else(PoisonError::into_inner);
        self.cmd_tx.send(command).ok()?;
        *submitted += 1;
        Some(*submitted)
    }

    /// Stop the loop; the port closes when the loop exits. Safe to call repeatedly.
    pub fn shutdown(&self) {
        if self.shutdown_tx.send_replace(true) {
            return;
        }
        log::info!("[{}] Shutting down worker", self.identity.name);
    }

    /// Wait for the loop to exit. Returns immediately if it never started or was already joined.
    pub async fn join(&self) {
        let task = self.task.lock().ok().and_then(|mut guard| guard.take());
        if let Some(task) = task {
            if let Err(e) = task.await {
                log::error!("[{}] Worker task failed: {}", self.identity.name, e);
            }
        }
    }
}

impl Drop for DeviceWorker {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

async fn worker_loop(
    mut link: DeviceLink,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<Arc<ObservableState>>,
    shutdown_rx: watch::Receiver<bool>,
    config: WorkerConfig,
) {
    let mut last_probe = Instant::now();

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        match timeout(config.poll_interval, cmd_rx.recv()).await {
            Ok(Some(command)) => {
                execute(&mut link, command, true, &state_tx).await;
                if command == Command::Probe {
                    last_probe = Instant::now();
                }
            }
            Ok(None) => break,
            Err(_) => {
                let due = config
                    .heartbeat_interval
                    .map_or(false, |interval| last_probe.elapsed() >= interval);
                if due {
                    execute(&mut link, Command::Probe, false, &state_tx).await;
                    last_probe = Instant::now();
                }
            }
        }
    }

    cmd_rx.close();
    while let Ok(command) = cmd_rx.try_recv() {
        link.record_skipped(command, NOT_RUN);
    }

    let name = link.identity().name.clone();
    link.close();

    let mut closed = state_tx.borrow().with_status(ConnectionState::Disconnected);
    closed.available = false;
    state_tx.send_replace(Arc::new(closed));
    log::info!("[{}] Worker stopped, port closed", name);
}

async fn execute(
    link: &mut DeviceLink,
    command: Command,
    queued: bool,
    state_tx: &watch::Sender<Arc<ObservableState>>,
) {
    let mut next = ObservableState::clone(&state_tx.borrow());

    match command {
        Command::Probe => {
            let outcome = link.probe().await;
            next.available = outcome.is_available();
            next.last_error = outcome.error().map(str::to_string);
            next.probe_seq += 1;
        }
        Command::Measure => apply_reading(&mut next, link.measure().await),
        Command::Snapshot => apply_reading(&mut next, link.snapshot().await),
    }

    if queued {
        next.command_seq += 1;
    }
    next.last_command = Some(command);
    next.updated_at = Utc::now();
    state_tx.send_replace(Arc::new(next));
}

fn apply_reading(state: &mut ObservableState, reading: Reading) {
    state.last_error = reading.log_error();
    state.last_result = Some(reading);
    state.result_seq += 1;
}
