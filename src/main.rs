mod classifier;
mod config;
mod core;
mod daemon;
mod jobs;
mod pipeline;
mod providers;
mod records;
mod router;
mod schema;
mod sentiment;
mod state;
mod traits;
pub mod utils;

#[cfg(test)]
mod integration_tests;

use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = PathBuf::from(
        std::env::var("PMDAEMON_CONFIG").unwrap_or_else(|_| "config.toml".to_string()),
    );
    let config = config::AppConfig::load(&config_path)?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(core::run(config))
}
