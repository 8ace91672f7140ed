//! Tracing initialization

use tracing_subscriber::EnvFilter;

/// Initialize the global subscriber. `RUST_LOG` wins over the CLI level.
pub fn init(log_level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;
    Ok(())
}
