//! herdwatch: behavioral event aggregation and notification daemon.
//!
//! Reads per-frame confidence scores from an external vision scorer
//! (NDJSON on stdin), aggregates them into discrete events per source,
//! and fans finalized events out to the configured sinks.

use clap::Parser;

mod cli;
mod daemon;
mod frame_queue;
mod ingest;
mod pipeline;
mod reload;
mod stats;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    match args.command {
        cli::Command::Daemon => {
            let filter = std::env::var("HERDWATCH_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string());
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
                .init();

            tracing::info!("herdwatch daemon starting");
            daemon::run_daemon(args.config).await
        }
        cli::Command::CheckConfig => {
            let config = herdwatch_core::config::load(&args.config)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            eprintln!("configuration valid");
            Ok(())
        }
    }
}
