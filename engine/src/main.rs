// Sentinel Agent Engine
// Main entry point for the sentinel binary

use clap::Parser;
use sentinel_engine::cli::{Cli, Command, SessionAction};
use sentinel_engine::config::Config;
use sentinel_engine::handlers::{
    handle_doctor, handle_run, handle_sessions_clear, handle_sessions_list, OutputFormat,
};
use sentinel_engine::telemetry::{init_telemetry, init_telemetry_with_level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize basic telemetry first (before config is loaded)
    init_telemetry();

    tracing::info!("Sentinel Engine v{}", env!("CARGO_PKG_VERSION"));

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Load configuration (or use custom path if provided)
    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // Re-initialize telemetry with config-driven log level
    // (only takes effect if RUST_LOG env var is not set)
    init_telemetry_with_level(&config.core.log_level);

    // Handle commands
    match cli.command {
        Command::Run {
            query,
            conversation,
            context,
        } => handle_run(query, conversation, context, &config, format).await,

        Command::Sessions { action } => match action {
            SessionAction::List => handle_sessions_list(&config, format),
            SessionAction::Clear => handle_sessions_clear(&config),
        },

        Command::Doctor => handle_doctor(&config, format).await,
    }
}
