#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use labstation::device::{
    DeviceIdentity, DeviceWorker, ObservableState, OrchestratorConfig, WorkerConfig,
};
use labstation::logsink::MemoryLogSink;
use labstation::serial::{LinkTimeouts, SerialError, SerialPortIO};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

/// What the fake device does after receiving a command
#[derive(Debug, Clone)]
pub enum Reply {
    Lines(Vec<String>),
    Silence,
    /// Channel error on the next read
    Fail(String),
    /// Lines that only arrive after a pause
    Delayed(Duration, Vec<String>),
}

impl Reply {
    pub fn lines(lines: &[&str]) -> Self {
        Reply::Lines(lines.iter().map(|l| format!("{}\n", l)).collect())
    }

    pub fn line(line: &str) -> Self {
        Self::lines(&[line])
    }

    pub fn delayed(delay: Duration, lines: &[&str]) -> Self {
        Reply::Delayed(delay, lines.iter().map(|l| format!("{}\n", l)).collect())
    }
}

#[derive(Default)]
struct ScriptState {
    queued: HashMap<String, VecDeque<Reply>>,
    always: HashMap<String, Reply>,
    written: Vec<String>,
    chunk: Option<usize>,
}

/// Shared script for a fake serial port; clones see the same state
#[derive(Clone, Default)]
pub struct PortScript {
    state: Arc<Mutex<ScriptState>>,
}

impl PortScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// One-shot reply for the next `command`
    pub fn reply(&self, command: &str, reply: Reply) -> &Self {
        self.state
            .lock()
            .unwrap()
            .queued
            .entry(command.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Reply used whenever no one-shot reply is queued
    pub fn always(&self, command: &str, reply: Reply) -> &Self {
        self.state.lock().unwrap().always.insert(command.to_string(), reply);
        self
    }

    /// Hand out at most `size` bytes per read
    pub fn chunked(&self, size: usize) -> &Self {
        self.state.lock().unwrap().chunk = Some(size);
        self
    }

    /// Command tokens in the order they were written
    pub fn written(&self) -> Vec<String> {
        self.state.lock().unwrap().written.clone()
    }

    pub fn port(&self) -> Box<dyn SerialPortIO> {
        Box::new(ScriptedPort {
            script: self.clone(),
            rx: VecDeque::new(),
            fail: None,
            delay: None,
        })
    }

    fn chunk(&self) -> Option<usize> {
        self.state.lock().unwrap().chunk
    }

    fn next_reply(&self, command: &str) -> Reply {
        let mut state = self.state.lock().unwrap();
        state.written.push(command.to_string());
        if let Some(reply) = state.queued.get_mut(command).and_then(|q| q.pop_front()) {
            return reply;
        }
        state.always.get(command).cloned().unwrap_or(Reply::Silence)
    }
}

struct ScriptedPort {
    script: PortScript,
    rx: VecDeque<u8>,
    fail: Option<String>,
    delay: Option<Duration>,
}

#[async_trait::async_trait]
impl SerialPortIO for ScriptedPort {
    async fn clear_input(&mut self) -> Result<(), SerialError> {
        self.rx.clear();
        self.fail = None;
        self.delay = None;
        Ok(())
    }

    async fn send_data(&mut self, data: &[u8]) -> Result<usize, SerialError> {
        let command = String::from_utf8_lossy(data).trim().to_string();
        match self.script.next_reply(&command) {
            Reply::Lines(lines) => lines.iter().for_each(|l| self.rx.extend(l.bytes())),
            Reply::Silence => {}
            Reply::Fail(message) => self.fail = Some(message),
            Reply::Delayed(delay, lines) => {
                self.delay = Some(delay);
                lines.iter().for_each(|l| self.rx.extend(l.bytes()));
            }
        }
        Ok(data.len())
    }

    async fn read_data(&mut self, buffer: &mut [u8], timeout_ms: u64) -> Result<usize, SerialError> {
        if let Some(message) = self.fail.take() {
            return Err(SerialError::IoError(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                message,
            )));
        }
        if let Some(delay) = self.delay.take() {
            if delay > Duration::from_millis(timeout_ms) {
                sleep(Duration::from_millis(timeout_ms)).await;
                self.delay = Some(delay - Duration::from_millis(timeout_ms));
                return Err(SerialError::Timeout);
            }
            sleep(delay).await;
        }
        if self.rx.is_empty() {
            return Err(SerialError::Timeout);
        }
        let limit = self.script.chunk().unwrap_or(usize::MAX);
        let n = self.rx.len().min(buffer.len()).min(limit);
        for (slot, byte) in buffer.iter_mut().zip(self.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    async fn flush(&mut self) -> Result<(), SerialError> {
        Ok(())
    }
}

pub fn test_timeouts() -> LinkTimeouts {
    LinkTimeouts {
        probe: Duration::from_millis(200),
        line: Duration::from_millis(200),
        measure_lines: 3,
    }
}

/// Worker settings without idle probes, so the attempt log only holds what a test asked for
pub fn quiet_worker_config() -> WorkerConfig {
    WorkerConfig {
        timeouts: test_timeouts(),
        poll_interval: Duration::from_millis(10),
        heartbeat_interval: None,
    }
}

pub fn fast_orchestrator_config() -> OrchestratorConfig {
    OrchestratorConfig {
        check_ceiling: Duration::from_millis(1000),
        sync_ceiling: Duration::from_millis(1000),
        probe_ceiling: Duration::from_millis(500),
        poll_interval: Duration::from_millis(10),
        inter_device_delay: Duration::from_millis(5),
    }
}

pub fn identity(name: &str) -> DeviceIdentity {
    DeviceIdentity::new(name, format!("/dev/fake-{}", name.to_lowercase()), 9600)
}

/// Line reads long enough for a deliberately slow reply
pub fn patient_worker_config() -> WorkerConfig {
    WorkerConfig {
        timeouts: LinkTimeouts {
            probe: Duration::from_millis(200),
            line: Duration::from_secs(2),
            measure_lines: 3,
        },
        ..quiet_worker_config()
    }
}

/// Worker over a fake port that answers probes with `OK`
pub fn responsive_worker(name: &str, sink: &Arc<MemoryLogSink>) -> (DeviceWorker, PortScript) {
    let script = PortScript::new();
    script.always("B", Reply::line("OK"));
    let worker = DeviceWorker::spawn_with_io(identity(name), script.port(), sink.clone(), quiet_worker_config());
    (worker, script)
}

/// Worker whose port could not be opened
pub fn disconnected_worker(name: &str, sink: &Arc<MemoryLogSink>) -> DeviceWorker {
    let identity = DeviceIdentity::new(name, "/dev/labstation-missing-port", 9600);
    DeviceWorker::spawn(identity, sink.clone(), quiet_worker_config())
}

/// Poll the worker's state until `done` holds; false after `ceiling`
pub async fn wait_for<F>(worker: &DeviceWorker, ceiling: Duration, done: F) -> bool
where
    F: Fn(&ObservableState) -> bool,
{
    let deadline = Instant::now() + ceiling;
    while Instant::now() < deadline {
        if done(&worker.state()) {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    done(&worker.state())
}

/// Accept one HTTP request, answer with `status` and hand back the request body
pub async fn one_shot_collector(status: u16) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut data = Vec::new();
        let mut buf = [0u8; 4096];

        loop {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                return String::new();
            }
            data.extend_from_slice(&buf[..n]);

            let Some(header_end) = data.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let headers = String::from_utf8_lossy(&data[..header_end]).to_ascii_lowercase();
            let length = headers
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            let body_start = header_end + 4;
            if data.len() < body_start + length {
                continue;
            }

            let body = String::from_utf8_lossy(&data[body_start..body_start + length]).to_string();
            let response = format!(
                "HTTP/1.1 {} Test\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                status
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.ok();
            return body;
        }
    });

    (format!("http://{}/collect", addr), handle)
}

/// Endpoint on a port nothing listens on
pub async fn closed_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}/collect", addr)
}
