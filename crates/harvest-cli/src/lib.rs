//! Harvest CLI library
//!
//! Operational surface over the harvest core. Every command prints a
//! structured JSON result, never a raw backtrace:
//!
//! - **Source management**: register sources (`harvest register`)
//! - **Downloading**: resume one source or all pending ones
//!   (`harvest resume`, `harvest pull`)
//! - **Verification**: integrity checks (`harvest verify`)
//! - **Change detection**: incremental diffs (`harvest detect`)
//! - **Scheduling**: on-demand task runs and the recurring loop
//!   (`harvest task`, `harvest schedule`)
//! - **Inspection**: source status and the change log
//!   (`harvest status`, `harvest changes`)

pub mod commands;

pub use harvest_common::{HarvestError, Result};

use clap::{Parser, Subcommand};
use harvest_common::types::SourceType;

/// Harvest - registry ingestion, verification and change tracking
#[derive(Parser, Debug)]
#[command(name = "harvest")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Register a new source
    Register {
        /// Source URL
        url: String,

        /// Source type: api, file, web or rss
        #[arg(short = 't', long = "type")]
        source_type: SourceType,

        /// Free-form metadata JSON (auth, pagination parameter names, ...)
        #[arg(short, long, default_value = "{}")]
        metadata: String,
    },

    /// Resume (or start) downloading one source
    Resume {
        /// Source id
        source_id: i64,

        /// Records per page
        #[arg(short, long)]
        batch_size: Option<usize>,
    },

    /// Resume every pending, partial or interrupted source
    Pull {
        /// Records per page
        #[arg(short, long)]
        batch_size: Option<usize>,
    },

    /// Verify content integrity
    Verify {
        /// Source id; omit to sweep all sources
        source_id: Option<i64>,
    },

    /// Detect changes since the last run
    Detect {
        /// Source id; omit to sweep all sources
        source_id: Option<i64>,
    },

    /// Scheduled task operations
    Task {
        #[command(subcommand)]
        command: TaskCommand,
    },

    /// Run the recurring scheduler until interrupted
    Schedule,

    /// Show all registered sources and their progress
    Status,

    /// Show recent change events
    Changes {
        /// Restrict to one source
        #[arg(short, long)]
        source_id: Option<i64>,

        /// Look this many hours back
        #[arg(long, default_value_t = 24)]
        hours: i64,
    },
}

/// `harvest task` subcommands
#[derive(Subcommand, Debug)]
pub enum TaskCommand {
    /// Run a task immediately, bypassing its interval
    Run {
        /// Task name (integrity_verification, change_detection, ...)
        name: String,
    },
    /// Show the task table
    Status,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_args_parse() {
        let cli = Cli::try_parse_from([
            "harvest",
            "register",
            "https://data.gov.ua/api/datasets",
            "--type",
            "api",
            "--metadata",
            r#"{"auth": {"token": "t"}}"#,
        ])
        .unwrap();
        match cli.command {
            Commands::Register {
                url, source_type, ..
            } => {
                assert_eq!(url, "https://data.gov.ua/api/datasets");
                assert_eq!(source_type, SourceType::Api);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_source_type_is_rejected() {
        let result = Cli::try_parse_from(["harvest", "register", "https://x.example", "--type", "ftp"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_task_run_parses() {
        let cli = Cli::try_parse_from(["harvest", "task", "run", "change_detection"]).unwrap();
        match cli.command {
            Commands::Task {
                command: TaskCommand::Run { name },
            } => assert_eq!(name, "change_detection"),
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
