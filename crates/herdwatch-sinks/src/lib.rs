//! Delivery sinks for finalized behavior events.
//!
//! Sinks are polymorphic over a single `deliver` capability; concrete
//! variants (disk, telegram, future webhooks) implement it independently
//! and know nothing about each other. Delivery is best-effort: the
//! dispatcher wraps calls in a timeout and a bounded retry, and a failing
//! sink never affects other sinks or frame ingestion.

pub mod disk;
pub mod telegram;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use herdwatch_core::types::{EventSummary, FrameScore};

pub use disk::DiskSink;
pub use telegram::TelegramSink;

/// Error type for sink deliveries.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sink transport error: {0}")]
    Transport(String),

    #[error("remote api rejected request: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for SinkError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// A finalized, selected event ready for delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub source_id: String,
    /// Human-readable source name for message text.
    pub source_name: String,
    pub summary: EventSummary,
    /// Selected frames, best evidence first.
    pub frames: Vec<FrameScore>,
    /// Whether this delivery should alert loudly. Silent deliveries still
    /// carry the full payload; only the alert modality differs.
    pub is_audible: bool,
}

/// Delivery target for finalized events.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Stable identifier, used as the key for per-sink dispatch state.
    fn id(&self) -> &str;

    /// Deliver one notification. Success means the side effect completed
    /// (file written, remote API acknowledged).
    async fn deliver(&self, notification: &Notification) -> Result<(), SinkError>;

    /// Out-of-band operational message (startup/shutdown). Sinks without a
    /// messaging surface ignore it.
    async fn announce(&self, _text: &str) -> Result<(), SinkError> {
        Ok(())
    }
}
