//! Frame-score ingestion: NDJSON records, one per line.
//!
//! This is the scorer boundary. An external vision process writes one
//! record per scored frame to our stdin; records are routed to the
//! owning source's queue. Malformed lines and unknown sources are
//! logged and dropped without touching aggregator state.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use herdwatch_core::types::{FrameScore, ImageRef};

use crate::frame_queue::FrameQueue;
use crate::stats::RunStats;

/// One scored frame on the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct FrameRecord {
    pub source: String,
    pub ts: DateTime<Utc>,
    #[serde(deserialize_with = "unit_interval")]
    pub confidence: f64,
    pub image: String,
}

fn unit_interval<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    let v = f64::deserialize(d)?;
    if (0.0..=1.0).contains(&v) {
        Ok(v)
    } else {
        Err(serde::de::Error::custom(format!(
            "confidence {v} outside [0, 1]"
        )))
    }
}

impl FrameRecord {
    pub fn into_frame(self) -> (String, FrameScore) {
        (
            self.source,
            FrameScore {
                capture_time: self.ts,
                confidence: self.confidence,
                image_ref: ImageRef::new(self.image),
            },
        )
    }
}

pub fn parse_line(line: &str) -> Result<FrameRecord, serde_json::Error> {
    serde_json::from_str(line)
}

/// Read records until EOF or cancellation, routing each to its source queue.
///
/// EOF does not close the queues: open events still need their idle ticks
/// to close, so pipelines keep running until the daemon shuts down.
pub async fn run_ingest<R>(
    reader: R,
    routes: HashMap<String, Arc<FrameQueue>>,
    stats: Arc<RunStats>,
    cancel: CancellationToken,
) where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match parse_line(line) {
                        Ok(record) => {
                            let (source, frame) = record.into_frame();
                            match routes.get(&source) {
                                Some(queue) => {
                                    if queue.push(frame).is_some() {
                                        stats.record_dropped();
                                        debug!(source, "queue full, oldest frame dropped");
                                    }
                                }
                                None => warn!(source, "frame for unknown source dropped"),
                            }
                        }
                        Err(e) => warn!("malformed frame record dropped: {e}"),
                    }
                }
                Ok(None) => {
                    debug!("frame input reached EOF");
                    break;
                }
                Err(e) => {
                    warn!("frame input read error: {e}");
                    break;
                }
            }
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────
