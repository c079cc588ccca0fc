pub mod config;
pub mod console;
pub mod device;
pub mod logging;
pub mod logsink;
pub mod serial;
pub mod sync;

use std::sync::Arc;

use config::StationConfig;
use device::DeviceManager;
use logsink::{LogSink, SqliteLogSink};

/// Start every device worker, run the startup sweep, then serve console
/// commands from stdin until `quit` or end of input.
pub async fn run(config: StationConfig) -> anyhow::Result<()> {
    let sink = Arc::new(SqliteLogSink::open(&config.log_db)?);
    let log_sink: Arc<dyn LogSink> = sink.clone();

    let manager = Arc::new(DeviceManager::spawn(
        config.devices.clone(),
        log_sink,
        config.worker_config(),
        config.collector_client(),
        config.orchestrator_config(),
    ));

    log::info!("Lab station started with {} device(s)", manager.devices().len());
    let startup = manager.trigger_initial_check();

    console::serve(manager.clone(), sink, tokio::io::stdin()).await?;

    startup.abort();
    manager.shutdown().await;
    log::info!("Lab station stopped");
    Ok(())
}
