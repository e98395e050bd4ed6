use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ─── Frames ───────────────────────────────────────────────────────

/// Opaque handle to a frame image owned by the external scorer.
///
/// In practice a filesystem path or URI. The core never decodes it;
/// sinks decide whether and how to resolve it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRef(String);

impl ImageRef {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ImageRef {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for ImageRef {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A single scored video frame, as produced by the external scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameScore {
    /// Capture timestamp. The scorer emits frames in non-decreasing order.
    pub capture_time: DateTime<Utc>,
    /// Model confidence in `[0, 1]`.
    pub confidence: f64,
    /// Handle to the frame image.
    pub image_ref: ImageRef,
}

// ─── Events ───────────────────────────────────────────────────────

/// Lifecycle stage of an [`Event`].
///
/// `Collecting` is the only non-terminal stage. An event transitions to
/// exactly one of `Finalized` or `Discarded` and is immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStage {
    Collecting,
    Finalized,
    Discarded,
}

impl EventStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Collecting => "collecting",
            Self::Finalized => "finalized",
            Self::Discarded => "discarded",
        }
    }

    /// Whether this stage is terminal (no further mutation allowed).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finalized | Self::Discarded)
    }
}

impl fmt::Display for EventStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One continuous bout of qualifying behavior on a single source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Source this event was observed on.
    pub source_id: String,
    /// Capture time of the frame that opened the event.
    pub start_time: DateTime<Utc>,
    /// Capture time of the most recent frame at/above the save threshold.
    pub last_qualifying_time: DateTime<Utc>,
    /// Highest qualifying-frame confidence seen while open.
    pub peak_confidence: f64,
    /// Count of frames at/above the notify threshold.
    pub high_confidence_count: u32,
    /// Every frame received while the event was open, in capture order.
    pub frames: Vec<FrameScore>,
    /// Current lifecycle stage.
    pub stage: EventStage,
    /// When the event was closed. `Some` iff the stage is terminal.
    pub closed_at: Option<DateTime<Utc>>,
}

impl Event {
    /// Wire-facing digest handed to sinks.
    pub fn summary(&self) -> EventSummary {
        let end = self.closed_at.unwrap_or(self.last_qualifying_time);
        let duration_secs =
            (end - self.start_time).num_milliseconds().max(0) as f64 / 1000.0;
        EventSummary {
            start_time: self.start_time,
            duration_secs,
            peak_confidence: self.peak_confidence,
            high_confidence_count: self.high_confidence_count,
        }
    }
}

/// Compact event digest carried in notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSummary {
    pub start_time: DateTime<Utc>,
    pub duration_secs: f64,
    pub peak_confidence: f64,
    pub high_confidence_count: u32,
}

// ─── Tests ────────────────────────────────────────────────────────
