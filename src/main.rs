//! aclsync - access-control cache sync
//!
//! CLI entry point that dispatches to subcommands.

use aclsync::cli::args::{ConfigAction, ConfigArgs};
use aclsync::cli::{Cli, Commands};
use aclsync::config::{Config, ConfigManager};
use aclsync::error::AclResult;
use clap::Parser;
use console::style;
use std::process::ExitCode;
use tracing::{debug, warn};
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

async fn run() -> AclResult<()> {
    let cli = Cli::parse();

    let manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let loaded = manager.load().await;

    let json_logs = matches!(&loaded, Ok(c) if c.general.log_format == "json");
    init_logging(cli.verbose, json_logs);

    // A broken file must not block `config init --force`
    let config = match (&cli.command, loaded) {
        (
            Commands::Config(ConfigArgs {
                action: Some(ConfigAction::Init { .. }),
            }),
            Err(e),
        ) => {
            warn!("Ignoring unreadable config: {}", e);
            Config::default()
        }
        (_, loaded) => loaded?,
    };
    debug!("Using config {}", manager.path().display());

    match cli.command {
        Commands::Consume(args) => aclsync::cli::commands::consume(args, &config).await,
        Commands::Publish(args) => aclsync::cli::commands::publish(args, &config).await,
        Commands::Status(args) => aclsync::cli::commands::status(args, &config).await,
        Commands::Inspect(args) => aclsync::cli::commands::inspect(args, &config).await,
        Commands::Config(args) => aclsync::cli::commands::config(args, &config, &manager).await,
    }
}

/// 0 = warn, 1 = info, 2+ = debug
fn init_logging(verbose: u8, json: bool) {
    let filter = match verbose {
        0 => EnvFilter::new("aclsync=warn"),
        1 => EnvFilter::new("aclsync=info"),
        _ => EnvFilter::new("aclsync=debug"),
    };

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .without_time()
            .with_writer(std::io::stderr)
            .init();
    }
}
