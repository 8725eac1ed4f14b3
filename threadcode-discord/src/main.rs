//! threadcode - Main entry point.

use anyhow::Result;
use threadcode_common::config::Config;
use threadcode_common::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration; a missing bot token aborts here
    let config = Config::load_with_env()?;

    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );

    tracing::info!("threadcode v{}", env!("CARGO_PKG_VERSION"));

    threadcode_discord::run(&config).await
}
