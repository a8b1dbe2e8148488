//! Harvest CLI - Main entry point

use clap::Parser;
use harvest_cli::{Cli, Commands, TaskCommand};
use harvest_common::logging::{init_logging, LogConfig, LogLevel};
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Verbose mode raises the console level; environment overrides both.
    let log_config = if cli.verbose {
        LogConfig::default().with_level(LogLevel::Debug)
    } else {
        LogConfig::default().with_level(LogLevel::Warn)
    };
    let log_config = LogConfig::from_env().unwrap_or(log_config);

    // The CLI still works if logging cannot initialize.
    let _ = init_logging(&log_config);

    if let Err(e) = execute_command(&cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Execute the CLI command
async fn execute_command(cli: &Cli) -> harvest_cli::Result<()> {
    match &cli.command {
        Commands::Register {
            url,
            source_type,
            metadata,
        } => harvest_cli::commands::register::run(url, *source_type, metadata).await,

        Commands::Resume {
            source_id,
            batch_size,
        } => harvest_cli::commands::resume::run(*source_id, *batch_size).await,

        Commands::Pull { batch_size } => harvest_cli::commands::resume::pull(*batch_size).await,

        Commands::Verify { source_id } => harvest_cli::commands::verify::run(*source_id).await,

        Commands::Detect { source_id } => harvest_cli::commands::detect::run(*source_id).await,

        Commands::Task { command } => match command {
            TaskCommand::Run { name } => harvest_cli::commands::task::run_now(name).await,
            TaskCommand::Status => harvest_cli::commands::task::status().await,
        },

        Commands::Schedule => harvest_cli::commands::task::schedule().await,

        Commands::Status => harvest_cli::commands::status::run().await,

        Commands::Changes { source_id, hours } => {
            harvest_cli::commands::changes::run(*source_id, *hours).await
        }
    }
}
