use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

use super::{Command, DeviceError, DeviceIdentity, DeviceWorker, ObservableState, Reading, Result, WorkerConfig};
use crate::logsink::LogSink;
use crate::sync::{CollectorClient, SyncPayload, SyncStatus};

/// Wait ceilings for the fan-out operations
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrchestratorConfig {
    pub check_ceiling: Duration,
    pub sync_ceiling: Duration,
    pub probe_ceiling: Duration,
    /// Spacing between state polls while waiting for results
    pub poll_interval: Duration,
    /// Pause between devices during the startup probe sweep
    pub inter_device_delay: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            check_ceiling: Duration::from_millis(2200),
            sync_ceiling: Duration::from_millis(3000),
            probe_ceiling: Duration::from_millis(1500),
            poll_interval: Duration::from_millis(200),
            inter_device_delay: Duration::from_millis(100),
        }
    }
}

/// Per-device outcome of a check
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceCheck {
    pub name: String,
    /// A Measure was queued for this device
    pub dispatched: bool,
    /// A fresh result arrived before the ceiling
    pub resolved: bool,
    pub reading: Option<Reading>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckReport {
    pub devices: Vec<DeviceCheck>,
}

impl CheckReport {
    pub fn resolved_count(&self) -> usize {
        self.devices.iter().filter(|d| d.resolved).count()
    }
}

#[derive(Debug, Clone)]
pub struct SyncReport {
    pub payload: SyncPayload,
    pub status: SyncStatus,
}

/// Central coordination across all device workers.
/// Fans commands out, waits a bounded time for results and ships them to the collector.
pub struct DeviceManager {
    workers: Vec<Arc<DeviceWorker>>,
    collector: CollectorClient,
    config: OrchestratorConfig,
    sync_status: watch::Sender<Option<String>>,
}

impl DeviceManager {
    pub fn new(workers: Vec<DeviceWorker>, collector: CollectorClient, config: OrchestratorConfig) -> Self {
        let (sync_status, _) = watch::channel(None);
        Self {
            workers: workers.into_iter().map(Arc::new).collect(),
            collector,
            config,
            sync_status,
        }
    }

    /// Spawn one worker per identity, in configuration order
    pub fn spawn(
        identities: Vec<DeviceIdentity>,
        sink: Arc<dyn LogSink>,
        worker_config: WorkerConfig,
        collector: CollectorClient,
        config: OrchestratorConfig,
    ) -> Self {
        let workers = identities
            .into_iter()
            .map(|identity| DeviceWorker::spawn(identity, sink.clone(), worker_config))
            .collect();
        Self::new(workers, collector, config)
    }

    pub fn devices(&self) -> &[Arc<DeviceWorker>] {
        &self.workers
    }

    pub fn device(&self, name: &str) -> Result<&Arc<DeviceWorker>> {
        self.workers
            .iter()
            .find(|w| w.name() == name)
            .ok_or_else(|| DeviceError::NotFound(name.to_string()))
    }

    /// Current state of every device, in configuration order
    pub fn states(&self) -> Vec<(String, Arc<ObservableState>)> {
        self.workers
            .iter()
            .map(|w| (w.name().to_string(), w.state()))
            .collect()
    }

    /// Status text of the most recent sync, if any
    pub fn last_sync_status(&self) -> Option<String> {
        self.sync_status.borrow().clone()
    }

    /// Measure every available device and wait up to the check ceiling.
    /// Devices that do not answer in time keep their previous reading.
    pub async fn check_all(&self) -> CheckReport {
        let dispatched = self.dispatch(Command::Measure);
        let resolved = self.await_results(&dispatched, self.config.check_ceiling).await;

        let devices = self
            .workers
            .iter()
            .zip(dispatched.iter().zip(resolved))
            .map(|(worker, (sent, resolved))| DeviceCheck {
                name: worker.name().to_string(),
                dispatched: sent.is_some(),
                resolved,
                reading: worker.state().last_result.clone(),
            })
            .collect::<Vec<_>>();

        let report = CheckReport { devices };
        log::info!(
            "Check finished: {}/{} devices resolved",
            report.resolved_count(),
            self.workers.len()
        );
        report
    }

    /// Snapshot every available device, then POST whatever is known to the collector.
    /// Unavailable devices are sent as null. Transport failures end up in the status, never as errors.
    pub async fn sync_all(&self) -> SyncReport {
        let dispatched = self.dispatch(Command::Snapshot);
        let resolved = self.await_results(&dispatched, self.config.sync_ceiling).await;

        let mut payload = SyncPayload::now();
        for ((worker, sent), resolved) in self.workers.iter().zip(&dispatched).zip(resolved) {
            let reading = match sent {
                Some(_) => {
                    if !resolved {
                        log::warn!("[{}] No fresh snapshot before sync ceiling", worker.name());
                    }
                    worker.state().last_result.clone()
                }
                None => None,
            };
            payload.insert(worker.name(), reading);
        }

        let status = self.collector.post(&payload).await;
        log::info!("{}", status);
        self.sync_status.send_replace(Some(status.to_string()));

        SyncReport { payload, status }
    }

    /// Startup sweep: probe each device in turn, then measure the ones that answered
    pub async fn initial_check(&self) -> CheckReport {
        for (index, worker) in self.workers.iter().enumerate() {
            if index > 0 {
                sleep(self.config.inter_device_delay).await;
            }
            if let Some(ticket) = worker.submit(Command::Probe) {
                let answered = self
                    .wait_until(worker, self.config.probe_ceiling, |s| s.command_seq >= ticket)
                    .await;
                log::info!(
                    "[{}] Startup probe {}",
                    worker.name(),
                    if answered && worker.state().available { "answered" } else { "got no answer" }
                );
            }
        }
        self.check_all().await
    }

    pub fn trigger_check_all(self: &Arc<Self>) -> JoinHandle<CheckReport> {
        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.check_all().await })
    }

    pub fn trigger_sync_all(self: &Arc<Self>) -> JoinHandle<SyncReport> {
        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.sync_all().await })
    }

    pub fn trigger_initial_check(self: &Arc<Self>) -> JoinHandle<CheckReport> {
        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.initial_check().await })
    }

    /// Stop every worker and wait for their ports to close
    pub async fn shutdown(&self) {
        for worker in &self.workers {
            worker.shutdown();
        }
        join_all(self.workers.iter().map(|w| w.join())).await;
    }

    /// Queue `command` on each available device.
    /// Returns, per worker, the ticket of the queued command.
    fn dispatch(&self, command: Command) -> Vec<Option<u64>> {
        self.workers
            .iter()
            .map(|worker| {
                if !worker.state().available {
                    log::debug!("[{}] Skipping {}, device unavailable", worker.name(), command);
                    return None;
                }
                worker.submit(command)
            })
            .collect()
    }

    async fn await_results(&self, dispatched: &[Option<u64>], ceiling: Duration) -> Vec<bool> {
        let waits = self.workers.iter().zip(dispatched).map(|(worker, ticket)| async move {
            match *ticket {
                Some(ticket) => self.wait_until(worker, ceiling, |s| s.command_seq >= ticket).await,
                None => false,
            }
        });
        join_all(waits).await
    }

    /// Poll `worker`'s state until `done` holds or `ceiling` elapses
    async fn wait_until<F>(&self, worker: &DeviceWorker, ceiling: Duration, done: F) -> bool
    where
        F: Fn(&ObservableState) -> bool,
    {
        let deadline = Instant::now() + ceiling;
        loop {
            if done(&worker.state()) {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            sleep(remaining.min(self.config.poll_interval)).await;
        }
    }
}
