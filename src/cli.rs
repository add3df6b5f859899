//! Command-line interface built on clap.
//!
//! Defines [`Cli`] with the [`Command`] subcommands (demo, config) and the
//! global flags (--config, --default-queue, --verbose, --json-logs).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// qroute: background-job dispatch with per-job queue routing.
#[derive(Debug, Parser)]
#[command(name = "qroute", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to the configuration file.
    #[arg(long, global = true, default_value = qroute::config::CONFIG_FILE)]
    pub config: PathBuf,

    /// Queue used when a job names none (overrides the config file).
    #[arg(long, global = true)]
    pub default_queue: Option<String>,

    /// Log at debug level.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true, default_value_t = false)]
    pub json_logs: bool,
}

/// Subcommands of `qroute`.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Walks sample jobs through enqueue, schedule, continuation and retry.
    Demo {
        /// Delay of the scheduled sample job, in seconds.
        #[arg(long, default_value_t = 5)]
        delay_secs: u64,
    },

    /// Prints the effective configuration.
    Config,
}
