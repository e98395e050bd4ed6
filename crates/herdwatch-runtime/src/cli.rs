//! CLI definition using clap derive.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "herdwatch", about = "behavioral event aggregation and notification daemon")]
pub struct Cli {
    /// Path to the TOML configuration file
    #[arg(
        long,
        short = 'c',
        global = true,
        env = "HERDWATCH_CONFIG",
        default_value = "herdwatch.toml"
    )]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the daemon: frame scores in on stdin (NDJSON), events out to sinks
    Daemon,
    /// Validate the configuration file and print the resolved snapshot
    CheckConfig,
}
