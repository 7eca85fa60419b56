use anyhow::{Result, anyhow};
use clap::Parser;

use viewreload::Settings;
use viewreload::cli::commands::{init, watch};
use viewreload::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
    .map_err(|e| anyhow!("Failed to load settings: {e}"))?;

    if let Some(level) = &cli.log_level {
        settings.logging.default = level.clone();
    }
    viewreload::logging::init_with_config(&settings.logging);

    match cli.command {
        Commands::Init { force } => init::run_init(force),
        Commands::Config => init::run_config(&settings),
        Commands::Watch {
            dirs,
            interval_ms,
            backend,
            once,
        } => {
            let args = watch::WatchArgs {
                dirs,
                interval_ms,
                backend,
                once,
            };
            watch::run(args, settings).await
        }
    }
}
