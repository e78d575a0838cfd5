use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use registrar::cli::{Cli, CliHandler};
use registrar::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::from_env()?;
    let handler = CliHandler::new(config).await?;
    handler.handle_command(cli.command).await
}
