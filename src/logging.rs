use tracing_subscriber::EnvFilter;

/// Install the process-wide subscriber. `log` records are bridged into it.
/// `RUST_LOG` overrides `default_filter`.
pub fn init(default_filter: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
}
