// Switchboard dialogue router
// Main entry point for the switchboard binary

use clap::Parser;
use switchboard_engine::cli::{Cli, Command};
use switchboard_engine::config::Config;
use switchboard_engine::handlers::{handle_ask, handle_check, handle_serve, OutputFormat};
use switchboard_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration (or use custom path if provided)
    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log wins over the config file; RUST_LOG wins over both
    let level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(level);

    tracing::info!(
        "Switchboard v{} ({} - {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_COMMIT_HASH"),
        env!("BUILD_TIMESTAMP")
    );

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    match cli.command {
        Command::Serve { bind } => handle_serve(&config, bind).await,
        Command::Ask {
            text,
            filter,
            value,
            context,
        } => handle_ask(&config, text, filter, value, context, format).await,
        Command::Check => handle_check(&config, format).await,
    }
}
