use anyhow::Context;

use labstation::config::StationConfig;

const DEFAULT_CONFIG: &str = "labstation.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let config = StationConfig::load_or_default(&path)
        .with_context(|| format!("failed to load configuration from {}", path))?;

    labstation::logging::init(&config.log_level)
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

    labstation::run(config).await
}
