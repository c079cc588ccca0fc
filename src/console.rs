//! Line commands read from stdin: a headless stand-in for the station's buttons.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::device::{CheckReport, ConnectionState, DeviceManager, ObservableState};
use crate::logsink::{LogEntry, SqliteLogSink};

const LOG_LINES: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Check,
    Sync,
    Status,
    Logs(Option<String>),
    Help,
    Quit,
}

pub fn parse_command(line: &str) -> Option<ConsoleCommand> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    match word.to_ascii_lowercase().as_str() {
        "check" => Some(ConsoleCommand::Check),
        "sync" => Some(ConsoleCommand::Sync),
        "status" => Some(ConsoleCommand::Status),
        "logs" if rest.is_empty() => Some(ConsoleCommand::Logs(None)),
        "logs" => Some(ConsoleCommand::Logs(Some(rest.to_string()))),
        "help" | "?" => Some(ConsoleCommand::Help),
        "quit" | "exit" => Some(ConsoleCommand::Quit),
        _ => None,
    }
}

/// Serve commands until `quit` or end of input.
/// Check and sync run in the background so the prompt never waits on devices.
pub async fn serve<R>(manager: Arc<DeviceManager>, sink: Arc<SqliteLogSink>, input: R) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(input).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match parse_command(&line) {
            Some(ConsoleCommand::Check) => {
                let handle = manager.trigger_check_all();
                tokio::spawn(async move {
                    if let Ok(report) = handle.await {
                        print_check(&report);
                    }
                });
            }
            Some(ConsoleCommand::Sync) => {
                let handle = manager.trigger_sync_all();
                tokio::spawn(async move {
                    if let Ok(report) = handle.await {
                        println!(
                            "{} ({} reported, {} absent)",
                            report.status,
                            report.payload.reported_count(),
                            report.payload.absent_count()
                        );
                    }
                });
            }
            Some(ConsoleCommand::Status) => {
                for (name, state) in manager.states() {
                    println!("{}", format_state(&name, &state));
                }
                if let Some(status) = manager.last_sync_status() {
                    println!("last sync: {}", status);
                }
            }
            Some(ConsoleCommand::Logs(device)) => {
                let entries = match &device {
                    Some(name) => sink.entries_for_device(name),
                    None => sink.all_entries(),
                };
                match entries {
                    Ok(entries) => entries.iter().take(LOG_LINES).for_each(|e| println!("{}", format_entry(e))),
                    Err(e) => println!("could not read attempt log: {}", e),
                }
            }
            Some(ConsoleCommand::Help) => {
                println!("commands: check | sync | status | logs [device] | quit");
            }
            Some(ConsoleCommand::Quit) => break,
            None => println!("unknown command: {} (try help)", line.trim()),
        }
    }

    Ok(())
}

fn print_check(report: &CheckReport) {
    for device in &report.devices {
        let reading = device
            .reading
            .as_ref()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "-".to_string());
        let note = match (device.dispatched, device.resolved) {
            (false, _) => " (unavailable)",
            (true, false) => " (no fresh reading)",
            (true, true) => "",
        };
        println!("{:<14} {}{}", device.name, reading, note);
    }
}

pub fn format_state(name: &str, state: &ObservableState) -> String {
    let status = match &state.status {
        ConnectionState::Disconnected => "disconnected".to_string(),
        ConnectionState::Connecting => "connecting".to_string(),
        ConnectionState::Connected if state.available => "available".to_string(),
        ConnectionState::Connected => "connected, not answering".to_string(),
        ConnectionState::Error(e) => format!("error: {}", e),
    };
    let mut text = format!("{:<14} {}", name, status);
    if let Some(result) = &state.last_result {
        text.push_str(&format!(" | {}", result));
    }
    if let Some(error) = &state.last_error {
        text.push_str(&format!(" | last error: {}", error));
    }
    text
}

fn format_entry(entry: &LogEntry) -> String {
    format!(
        "{} | {} | {} | {} | {}",
        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
        entry.device,
        entry.command,
        entry.result.as_deref().unwrap_or("-"),
        entry.error.as_deref().unwrap_or("-")
    )
}
