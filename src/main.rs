use anyhow::Context;
use clap::Parser;
use tiered_cache::cli::{self, Cli};
use tiered_cache::config::AppConfig;
use tiered_cache::infrastructure::logging::init_logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = AppConfig::load().context("failed to load configuration")?;
    init_logging(&config.logging)?;

    cli::run(cli, config).await
}
