mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{disconnected_worker, identity, quiet_worker_config, responsive_worker, wait_for, PortScript, Reply};
use labstation::device::{Command, ConnectionState, DeviceWorker, Reading, WorkerConfig, NOT_RUN, NOT_SENT};
use labstation::logsink::MemoryLogSink;

const CEILING: Duration = Duration::from_secs(2);

#[tokio::test]
async fn commands_reach_the_port_in_submission_order() {
    let sink = Arc::new(MemoryLogSink::new());
    let (worker, script) = responsive_worker("Weighing", &sink);
    script.reply("S", Reply::line("S S 1.182 g"));
    script.reply("P", Reply::line(r#"{"x":1}"#));
    script.reply("S", Reply::line("S S 2.500 g"));

    for command in [Command::Measure, Command::Snapshot, Command::Probe, Command::Measure] {
        assert!(worker.enqueue(command));
    }

    assert!(wait_for(&worker, CEILING, |s| s.result_seq == 3 && s.probe_seq == 1).await);
    assert_eq!(script.written(), vec!["S", "P", "B", "S"]);

    let state = worker.state();
    assert_eq!(state.last_result, Some(Reading::Weight { value: 2.5, unit: "g".to_string() }));
    assert_eq!(state.last_command, Some(Command::Measure));
    assert_eq!(state.last_error, None);

    let commands: Vec<String> = sink.entries().into_iter().map(|e| e.command).collect();
    assert_eq!(commands, vec!["S", "P", "B", "S"]);
}

#[tokio::test]
async fn availability_follows_the_latest_probe() {
    let sink = Arc::new(MemoryLogSink::new());
    let script = PortScript::new();
    script.reply("B", Reply::line("OK"));
    script.reply("B", Reply::Silence);
    let worker = DeviceWorker::spawn_with_io(identity("XRF"), script.port(), sink.clone(), quiet_worker_config());

    assert!(worker.state().is_connected());
    assert!(!worker.state().available);

    worker.enqueue(Command::Probe);
    assert!(wait_for(&worker, CEILING, |s| s.probe_seq == 1).await);
    assert!(worker.state().available);

    worker.enqueue(Command::Probe);
    assert!(wait_for(&worker, CEILING, |s| s.probe_seq == 2).await);
    let state = worker.state();
    assert!(!state.available);
    assert_eq!(state.last_error, None);
    assert!(state.is_connected());
}

#[tokio::test]
async fn failed_measure_keeps_the_error_visible() {
    let sink = Arc::new(MemoryLogSink::new());
    let (worker, script) = responsive_worker("Magnetic", &sink);
    script.reply("S", Reply::lines(&["ES"]));
    script.reply("S", Reply::Silence);

    worker.enqueue(Command::Measure);
    worker.enqueue(Command::Measure);
    assert!(wait_for(&worker, CEILING, |s| s.result_seq == 2).await);

    let state = worker.state();
    assert_eq!(state.last_result, Some(Reading::error("could not parse value")));
    assert_eq!(state.last_error.as_deref(), Some("could not parse value"));
    assert_eq!(sink.entries()[0].result.as_deref(), Some("ES"));
}

#[tokio::test]
async fn disconnected_worker_logs_not_sent_once_per_command() {
    let sink = Arc::new(MemoryLogSink::new());
    let worker = disconnected_worker("Conductivity", &sink);

    let state = worker.state();
    assert!(matches!(state.status, ConnectionState::Error(_)));
    assert!(!state.available);
    assert!(state.last_error.is_some());

    assert!(!worker.enqueue(Command::Measure));

    let entries = sink.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].device, "Conductivity");
    assert_eq!(entries[0].command, "S");
    assert_eq!(entries[0].result, None);
    assert_eq!(entries[0].error.as_deref(), Some(NOT_SENT));

    // no loop runs, so the state never changes
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(worker.state().probe_seq, 0);
    worker.join().await;
}

#[tokio::test]
async fn shutdown_is_idempotent_and_closes_the_port() {
    let sink = Arc::new(MemoryLogSink::new());
    let (worker, _script) = responsive_worker("AI Vision", &sink);

    worker.enqueue(Command::Probe);
    assert!(wait_for(&worker, CEILING, |s| s.available).await);

    worker.shutdown();
    worker.shutdown();
    worker.join().await;
    worker.join().await;

    let state = worker.state();
    assert_eq!(state.status, ConnectionState::Disconnected);
    assert!(!state.available);

    let before = sink.len();
    assert!(!worker.enqueue(Command::Measure));
    assert_eq!(sink.len(), before);
}

#[tokio::test]
async fn idle_worker_probes_on_heartbeat() {
    let sink = Arc::new(MemoryLogSink::new());
    let script = PortScript::new();
    script.always("B", Reply::line("OK"));
    let config = WorkerConfig {
        heartbeat_interval: Some(Duration::ZERO),
        ..quiet_worker_config()
    };
    let worker = DeviceWorker::spawn_with_io(identity("Weighing"), script.port(), sink.clone(), config);

    assert!(wait_for(&worker, CEILING, |s| s.probe_seq >= 3).await);
    assert!(worker.state().available);
    assert!(script.written().iter().all(|c| c == "B"));

    worker.shutdown();
    worker.join().await;
}

#[tokio::test]
async fn idle_worker_without_heartbeat_stays_quiet() {
    let sink = Arc::new(MemoryLogSink::new());
    let (worker, script) = responsive_worker("Weighing", &sink);

    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(script.written().is_empty());
    assert!(sink.is_empty());
    worker.shutdown();
    worker.join().await;
}

#[tokio::test]
async fn tickets_follow_queue_order() {
    let sink = Arc::new(MemoryLogSink::new());
    let (worker, script) = responsive_worker("XRF", &sink);
    script.always("P", Reply::line(r#"{"Au":91.6}"#));

    assert_eq!(worker.submit(Command::Probe), Some(1));
    assert_eq!(worker.submit(Command::Snapshot), Some(2));
    assert_eq!(worker.submit(Command::Snapshot), Some(3));

    assert!(wait_for(&worker, CEILING, |s| s.command_seq >= 3).await);
    let state = worker.state();
    assert_eq!(state.probe_seq, 1);
    assert_eq!(state.result_seq, 2);
    worker.shutdown();
    worker.join().await;
}

#[tokio::test]
async fn heartbeat_probes_do_not_advance_command_seq() {
    let sink = Arc::new(MemoryLogSink::new());
    let script = PortScript::new();
    script.always("B", Reply::line("OK"));
    let config = WorkerConfig {
        heartbeat_interval: Some(Duration::ZERO),
        ..quiet_worker_config()
    };
    let worker = DeviceWorker::spawn_with_io(identity("Weighing"), script.port(), sink.clone(), config);

    assert!(wait_for(&worker, CEILING, |s| s.probe_seq >= 2).await);
    assert_eq!(worker.state().command_seq, 0);
    worker.shutdown();
    worker.join().await;
}

#[tokio::test]
async fn queued_commands_left_at_shutdown_are_logged() {
    let sink = Arc::new(MemoryLogSink::new());
    let (worker, script) = responsive_worker("Magnetic", &sink);

    // the loop has not run yet, so all three are still queued when the flag is set
    assert!(worker.enqueue(Command::Measure));
    assert!(worker.enqueue(Command::Snapshot));
    assert!(worker.enqueue(Command::Probe));
    worker.shutdown();
    worker.join().await;

    assert!(script.written().is_empty());
    let entries = sink.entries();
    let commands: Vec<&str> = entries.iter().map(|e| e.command.as_str()).collect();
    assert_eq!(commands, vec!["S", "P", "B"]);
    assert!(entries.iter().all(|e| e.result.is_none() && e.error.as_deref() == Some(NOT_RUN)));
    assert_eq!(worker.state().status, ConnectionState::Disconnected);
}
