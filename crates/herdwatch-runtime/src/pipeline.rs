//! Per-source pipelines: aggregation loop and dispatch workers.
//!
//! Each monitored source gets one consumer task that owns its aggregator
//! and dispatch policy — every state mutation happens on that single path,
//! so the machines need no locking of their own. Deliveries are spawned as
//! independent workers so a slow or failing sink can never stall frame
//! ingestion; the per-sink counters they update sit behind a mutex shared
//! with the planner.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use herdwatch_core::aggregator::{Aggregator, FrameDisposition};
use herdwatch_core::config::{Config, SourceDef};
use herdwatch_core::dispatch::{DispatchPolicy, SinkGate};
use herdwatch_core::selector::select_frames;
use herdwatch_core::types::{Event, EventStage};
use herdwatch_sinks::{Notification, Sink};

use crate::frame_queue::FrameQueue;
use crate::stats::RunStats;

/// How many delivery attempts before a notification is abandoned.
const MAX_DELIVERY_ATTEMPTS: u32 = 2;

struct PipelineHandle {
    queue: Arc<FrameQueue>,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

/// Owns all per-source pipelines; sources tear down independently.
#[derive(Default)]
pub struct PipelineSet {
    pipelines: HashMap<String, PipelineHandle>,
}

impl PipelineSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a pipeline for `source` and return its ingestion queue.
    pub fn spawn_source(
        &mut self,
        source: SourceDef,
        cfg_rx: watch::Receiver<Arc<Config>>,
        sinks: Arc<Vec<Arc<dyn Sink>>>,
        stats: Arc<RunStats>,
        parent: &CancellationToken,
    ) -> Arc<FrameQueue> {
        let capacity = cfg_rx.borrow().runtime.queue_capacity;
        let queue = Arc::new(FrameQueue::new(capacity));
        let cancel = parent.child_token();
        let join = tokio::spawn(run_source(
            source.clone(),
            Arc::clone(&queue),
            cfg_rx,
            sinks,
            stats,
            cancel.clone(),
        ));
        self.pipelines.insert(
            source.id,
            PipelineHandle {
                queue: Arc::clone(&queue),
                cancel,
                join,
            },
        );
        queue
    }

    /// Ingestion routes for all running pipelines.
    pub fn routes(&self) -> HashMap<String, Arc<FrameQueue>> {
        self.pipelines
            .iter()
            .map(|(id, handle)| (id.clone(), Arc::clone(&handle.queue)))
            .collect()
    }

    /// Tear down one source: cancel its consumer and in-flight dispatch
    /// workers. Other sources are untouched.
    pub async fn shutdown_source(&mut self, source_id: &str) -> bool {
        let Some(handle) = self.pipelines.remove(source_id) else {
            return false;
        };
        handle.cancel.cancel();
        handle.queue.close();
        if handle.join.await.is_err() {
            warn!(source = source_id, "pipeline task panicked during shutdown");
        }
        true
    }

    pub async fn shutdown_all(&mut self) {
        let ids: Vec<String> = self.pipelines.keys().cloned().collect();
        for id in ids {
            self.shutdown_source(&id).await;
        }
    }
}

async fn run_source(
    source: SourceDef,
    queue: Arc<FrameQueue>,
    cfg_rx: watch::Receiver<Arc<Config>>,
    sinks: Arc<Vec<Arc<dyn Sink>>>,
    stats: Arc<RunStats>,
    cancel: CancellationToken,
) {
    info!(source = %source.id, "pipeline started");
    let mut aggregator = Aggregator::new(source.id.as_str());
    let policy = Arc::new(Mutex::new(DispatchPolicy::new()));

    let tick_ms = cfg_rx.borrow().runtime.tick_interval_ms.max(10);
    let mut ticker = tokio::time::interval(Duration::from_millis(tick_ms));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Some(event) = aggregator.tick(Utc::now()) {
                    let cfg: Arc<Config> = cfg_rx.borrow().clone();
                    handle_closed(
                        &source, event, &cfg, &mut aggregator, &policy, &sinks, &stats, &cancel,
                    )
                    .await;
                }
            }
            frame = queue.recv() => {
                let Some(frame) = frame else { break };
                let total = stats.record_frame();
                if total % 100 == 0 {
                    info!(source = %source.id, "{}", stats.snapshot());
                }

                let cfg: Arc<Config> = cfg_rx.borrow().clone();
                let out = aggregator.observe(frame, Utc::now(), &cfg.detection);
                match out.disposition {
                    FrameDisposition::Opened => info!(source = %source.id, "event opened"),
                    FrameDisposition::OutOfOrder => {
                        warn!(source = %source.id, "out-of-order frame dropped")
                    }
                    FrameDisposition::CoolingDown => {
                        debug!(source = %source.id, "frame suppressed by cooldown")
                    }
                    FrameDisposition::Collected | FrameDisposition::Ignored => {}
                }
                if out.peak_flagged {
                    info!(source = %source.id, "possible peak detected");
                }
                if let Some(event) = out.closed {
                    handle_closed(
                        &source, event, &cfg, &mut aggregator, &policy, &sinks, &stats, &cancel,
                    )
                    .await;
                }
            }
        }
    }
    info!(source = %source.id, "pipeline stopped");
}

/// Route a closed event: discard, or select + plan + dispatch.
#[allow(clippy::too_many_arguments)]
async fn handle_closed(
    source: &SourceDef,
    event: Event,
    cfg: &Config,
    aggregator: &mut Aggregator,
    policy: &Arc<Mutex<DispatchPolicy>>,
    sinks: &Arc<Vec<Arc<dyn Sink>>>,
    stats: &Arc<RunStats>,
    cancel: &CancellationToken,
) {
    match event.stage {
        EventStage::Discarded => {
            stats.record_discarded();
            info!(
                source = %source.id,
                frames = event.frames.len(),
                high = event.high_confidence_count,
                "event discarded below high-confidence minimum"
            );
            return;
        }
        EventStage::Finalized => stats.record_finalized(),
        // close() only yields terminal stages.
        EventStage::Collecting => return,
    }

    let summary = event.summary();
    info!(
        source = %source.id,
        frames = event.frames.len(),
        high = event.high_confidence_count,
        peak = event.peak_confidence,
        duration_secs = summary.duration_secs,
        "event finalized"
    );

    let det = &cfg.detection;
    let selected = select_frames(&event.frames, det.max_screenshots.max(1));
    let gates: Vec<SinkGate> = cfg
        .sinks
        .iter()
        .map(|sink| SinkGate {
            sink_id: sink.id.clone(),
            confidence_gate: sink.confidence_gate,
        })
        .collect();

    let plan = policy.lock().await.plan(
        event.peak_confidence,
        &gates,
        det.notify_threshold,
        det.alert_every_n,
    );
    if plan.is_empty() {
        info!(source = %source.id, "no sink gate met, event dropped without cooldown");
        return;
    }

    // One qualifying sink is enough to arm cooldown; armed on attempt so a
    // slow delivery cannot let duplicate events through meanwhile.
    aggregator.arm_cooldown(Utc::now());

    let timeout = Duration::from_secs(cfg.runtime.deliver_timeout_secs.max(1));
    let cooldown = det.cooldown();
    for planned in plan {
        let Some(sink) = sinks
            .iter()
            .find(|sink| sink.id() == planned.sink_id)
            .cloned()
        else {
            warn!(sink = %planned.sink_id, "planned sink not configured, skipping");
            continue;
        };
        let notification = Notification {
            source_id: source.id.clone(),
            source_name: source.display_name().to_owned(),
            summary: summary.clone(),
            frames: selected.clone(),
            is_audible: planned.is_audible,
        };
        tokio::spawn(deliver(
            sink,
            notification,
            Arc::clone(policy),
            Arc::clone(stats),
            timeout,
            cooldown,
            cancel.clone(),
        ));
    }
}

/// One delivery worker: bounded timeout, one retry, outcome recorded.
async fn deliver(
    sink: Arc<dyn Sink>,
    notification: Notification,
    policy: Arc<Mutex<DispatchPolicy>>,
    stats: Arc<RunStats>,
    timeout: Duration,
    cooldown: chrono::TimeDelta,
    cancel: CancellationToken,
) {
    for attempt in 1..=MAX_DELIVERY_ATTEMPTS {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(sink = %sink.id(), "delivery cancelled");
                return;
            }
            outcome = tokio::time::timeout(timeout, sink.deliver(&notification)) => outcome,
        };
        match outcome {
            Ok(Ok(())) => {
                policy
                    .lock()
                    .await
                    .record_success(sink.id(), Utc::now(), cooldown);
                stats.record_sent();
                return;
            }
            Ok(Err(e)) => warn!(sink = %sink.id(), attempt, "delivery failed: {e}"),
            Err(_) => warn!(sink = %sink.id(), attempt, "delivery timed out"),
        }
    }
    stats.record_failed();
    error!(sink = %sink.id(), "delivery abandoned after retry");
}

// ─── Tests ────────────────────────────────────────────────────────
