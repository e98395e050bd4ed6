//! Daemon lifecycle: sink construction, pipelines, ingestion, shutdown.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use herdwatch_core::config::{self, Config, SinkKind};
use herdwatch_sinks::{DiskSink, Sink, TelegramSink};

use crate::pipeline::PipelineSet;
use crate::stats::{RunStats, StatsSnapshot};
use crate::{ingest, reload};

pub async fn run_daemon(config_path: PathBuf) -> anyhow::Result<()> {
    let config = Arc::new(config::load(&config_path)?);
    log_startup(&config);

    let sinks = build_sinks(&config).await;
    let start_text = start_message(&config);
    for sink in sinks.iter() {
        if let Err(e) = sink.announce(&start_text).await {
            warn!(sink = %sink.id(), "startup announce failed: {e}");
        }
    }

    let cancel = CancellationToken::new();
    let (cfg_tx, cfg_rx) = watch::channel(Arc::clone(&config));
    let reload_handle = reload::spawn(
        config_path,
        Duration::from_secs(config.runtime.reload_interval_secs.max(1)),
        cfg_tx,
        cancel.clone(),
    );

    let stats = Arc::new(RunStats::new());
    let mut pipelines = PipelineSet::new();
    for source in &config.sources {
        pipelines.spawn_source(
            source.clone(),
            cfg_rx.clone(),
            Arc::clone(&sinks),
            Arc::clone(&stats),
            &cancel,
        );
    }

    let ingest_handle = {
        let routes = pipelines.routes();
        let stats = Arc::clone(&stats);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            ingest::run_ingest(stdin, routes, stats, cancel).await;
        })
    };

    shutdown_signal().await;
    info!("shutting down");
    cancel.cancel();
    pipelines.shutdown_all().await;
    let _ = ingest_handle.await;
    let _ = reload_handle.await;

    let snapshot = stats.snapshot();
    info!("final run statistics: {snapshot}");
    let stop_text = stop_message(&snapshot);
    for sink in sinks.iter() {
        if let Err(e) = sink.announce(&stop_text).await {
            warn!(sink = %sink.id(), "shutdown announce failed: {e}");
        }
    }
    info!("daemon stopped");
    Ok(())
}

/// Instantiate configured sinks. Telegram connectivity is verified up
/// front; a failing check is logged and the sink kept — delivery may
/// recover once the network or bot config does.
async fn build_sinks(config: &Config) -> Arc<Vec<Arc<dyn Sink>>> {
    let mut sinks: Vec<Arc<dyn Sink>> = Vec::with_capacity(config.sinks.len());
    for def in &config.sinks {
        match def.kind {
            SinkKind::Disk => {
                let directory = def
                    .directory
                    .clone()
                    .unwrap_or_else(|| PathBuf::from("./data/detections"));
                sinks.push(Arc::new(DiskSink::new(
                    def.id.as_str(),
                    directory,
                    def.max_keep,
                )));
            }
            SinkKind::Telegram => {
                let sink = TelegramSink::new(
                    def.id.as_str(),
                    def.bot_token.clone(),
                    def.chat_ids.clone(),
                );
                match sink.verify().await {
                    Ok(()) => info!(sink = %def.id, "telegram sink verified"),
                    Err(e) => {
                        warn!(sink = %def.id, "telegram verification failed, continuing: {e}")
                    }
                }
                sinks.push(Arc::new(sink));
            }
        }
    }
    Arc::new(sinks)
}

fn log_startup(config: &Config) {
    let d = &config.detection;
    info!(
        sources = config.sources.len(),
        sinks = config.sinks.len(),
        "herdwatch daemon configured"
    );
    info!(
        save = d.save_threshold,
        notify = d.notify_threshold,
        peak = d.peak_threshold,
        "confidence thresholds"
    );
    info!(
        min_secs = d.min_collection_secs,
        max_secs = d.max_collection_secs,
        inactivity_secs = d.inactivity_timeout_secs,
        cooldown_secs = d.cooldown_secs,
        "collection timing"
    );
    info!(
        min_high_frames = d.min_high_confidence_frames,
        max_screenshots = d.max_screenshots,
        alert_every_n = d.alert_every_n,
        "notification policy"
    );
}

fn start_message(config: &Config) -> String {
    let sources: Vec<&str> = config.sources.iter().map(|s| s.display_name()).collect();
    format!(
        "herdwatch started\nSources: {}\nTime: {}",
        sources.join(", "),
        Utc::now().format("%Y-%m-%d %H:%M:%S"),
    )
}

fn stop_message(snapshot: &StatsSnapshot) -> String {
    format!(
        "herdwatch stopped\nTime: {}\n{snapshot}",
        Utc::now().format("%Y-%m-%d %H:%M:%S"),
    )
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(s) => s,
            Err(e) => {
                warn!("failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => info!("received ctrl-c"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("received ctrl-c");
    }
}

// ─── Tests ────────────────────────────────────────────────────────
