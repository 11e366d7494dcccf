//! Grab - concurrent-safe dependency artifact cache
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use grab::cli::{Cli, Commands};
use grab::config::{Config, ConfigManager};
use grab::error::GrabResult;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> GrabResult<()> {
    let cli = Cli::parse();

    // Completions need neither config nor logging
    if let Commands::Completions(args) = cli.command {
        grab::cli::commands::completions(args);
        return Ok(());
    }

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };

    let mut config = config_manager.load().await?;
    if let Some(ref root) = cli.root {
        config.cache.root = Some(root.clone());
    }

    init_logging(cli.verbose, &config);
    debug!("Using config {}", config_manager.path().display());

    match cli.command {
        Commands::Completions(_) => unreachable!("Completions handled above"),
        Commands::Resolve(args) => grab::cli::commands::resolve(args, &config).await,
        Commands::Cache(args) => grab::cli::commands::cache(args, &config).await,
        Commands::Config(args) => {
            grab::cli::commands::config(args, &config, &config_manager).await
        }
    }
}

/// 0 = warn (spinners only), 1 = info, 2+ = debug
fn init_logging(verbose: u8, config: &Config) {
    let filter = match verbose {
        0 => EnvFilter::new("grab=warn"),
        1 => EnvFilter::new("grab=info"),
        _ => EnvFilter::new("grab=debug"),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if config.general.log_format == "json" {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}
