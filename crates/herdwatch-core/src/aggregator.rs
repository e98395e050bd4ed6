//! Event aggregation state machine.
//!
//! One aggregator per monitored source, states `Idle`, `Collecting`,
//! `Cooldown`. Frames drive most transitions; a periodic tick drives
//! closure during silence so an event cannot be starved open. Pure and
//! deterministic: all time values are passed in, nothing reads a clock.
//!
//! Closure is tiered:
//!
//! - inactivity: `now - last_qualifying_time >= inactivity_timeout`,
//!   gated by `now - start_time >= min_collection` so a single spike
//!   cannot close an event prematurely;
//! - max age: `now - start_time >= max_collection`, unconditional.
//!
//! Inactivity is measured from the last *qualifying* frame, not the last
//! frame received — a brief dip below the save threshold must not end
//! the event.

use chrono::{DateTime, TimeDelta, Utc};

use crate::config::DetectionConfig;
use crate::types::{Event, EventStage, FrameScore};

// ─── Observe output ───────────────────────────────────────────────

/// What the aggregator did with one incoming frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDisposition {
    /// Frame opened a new event.
    Opened,
    /// Frame was appended to the open event.
    Collected,
    /// No event open and the frame is below the save threshold.
    Ignored,
    /// Frame arrived during cooldown and was suppressed.
    CoolingDown,
    /// Frame arrived out of capture order and was dropped.
    OutOfOrder,
}

/// Output of [`Aggregator::observe`].
#[derive(Debug, Clone, PartialEq)]
pub struct ObserveOutput {
    pub disposition: FrameDisposition,
    /// The event closed by this frame, if any. May be `Finalized` or
    /// `Discarded`; the caller routes accordingly.
    pub closed: Option<Event>,
    /// True on the first frame of an event at/above the peak threshold.
    /// Informational only — surfaced so the caller can log it.
    pub peak_flagged: bool,
}

impl ObserveOutput {
    fn plain(disposition: FrameDisposition) -> Self {
        Self {
            disposition,
            closed: None,
            peak_flagged: false,
        }
    }
}

// ─── State ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Collecting {
    event: Event,
    /// Detection config snapshot taken when the event opened. A config
    /// change during collection applies to the next event, not this one.
    cfg: DetectionConfig,
    peak_flagged: bool,
}

impl Collecting {
    fn should_close(&self, now: DateTime<Utc>) -> bool {
        let age = now - self.event.start_time;
        if age >= self.cfg.max_collection() {
            return true;
        }
        let idle = now - self.event.last_qualifying_time;
        idle >= self.cfg.inactivity_timeout() && age >= self.cfg.min_collection()
    }
}

#[derive(Debug, Clone)]
enum State {
    Idle,
    Collecting(Box<Collecting>),
    Cooldown { until: DateTime<Utc> },
}

/// Per-source event aggregation state machine.
#[derive(Debug, Clone)]
pub struct Aggregator {
    source_id: String,
    state: State,
    /// Capture time of the last accepted frame, for out-of-order detection.
    last_capture: Option<DateTime<Utc>>,
    /// Cooldown length staged by the most recent `Finalized` close. Consumed
    /// by `arm_cooldown` — only a real dispatch starts cooldown, so the
    /// aggregator cannot arm it on its own.
    pending_cooldown: Option<TimeDelta>,
}

impl Aggregator {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            state: State::Idle,
            last_capture: None,
            pending_cooldown: None,
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn is_collecting(&self) -> bool {
        matches!(self.state, State::Collecting(_))
    }

    /// Whether the source is suppressed by cooldown at `now`.
    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        matches!(self.state, State::Cooldown { until } if now < until)
    }

    /// Feed one frame through the state machine.
    ///
    /// `cfg` is the current detection config; it is snapshotted if this
    /// frame opens an event and ignored otherwise while one is open.
    pub fn observe(
        &mut self,
        frame: FrameScore,
        now: DateTime<Utc>,
        cfg: &DetectionConfig,
    ) -> ObserveOutput {
        if let Some(last) = self.last_capture {
            if frame.capture_time < last {
                return ObserveOutput::plain(FrameDisposition::OutOfOrder);
            }
        }
        self.last_capture = Some(frame.capture_time);

        if let State::Cooldown { until } = self.state {
            if now < until {
                return ObserveOutput::plain(FrameDisposition::CoolingDown);
            }
            self.state = State::Idle;
        }

        let (close_now, peak_edge) = match &mut self.state {
            State::Idle => {
                let cfg = cfg.clamped();
                if frame.confidence < cfg.save_threshold {
                    return ObserveOutput::plain(FrameDisposition::Ignored);
                }
                self.pending_cooldown = None;
                let peak_flagged = frame.confidence >= cfg.peak_threshold;
                let high = frame.confidence >= cfg.notify_threshold;
                let event = Event {
                    source_id: self.source_id.clone(),
                    start_time: frame.capture_time,
                    last_qualifying_time: frame.capture_time,
                    peak_confidence: frame.confidence,
                    high_confidence_count: u32::from(high),
                    frames: vec![frame],
                    stage: EventStage::Collecting,
                    closed_at: None,
                };
                self.state = State::Collecting(Box::new(Collecting {
                    event,
                    cfg,
                    peak_flagged,
                }));
                return ObserveOutput {
                    disposition: FrameDisposition::Opened,
                    closed: None,
                    peak_flagged,
                };
            }
            State::Collecting(c) => {
                let mut peak_edge = false;
                if frame.confidence >= c.cfg.save_threshold {
                    c.event.last_qualifying_time = frame.capture_time;
                    if frame.confidence > c.event.peak_confidence {
                        c.event.peak_confidence = frame.confidence;
                    }
                    if frame.confidence >= c.cfg.peak_threshold && !c.peak_flagged {
                        c.peak_flagged = true;
                        peak_edge = true;
                    }
                }
                if frame.confidence >= c.cfg.notify_threshold {
                    c.event.high_confidence_count += 1;
                }
                c.event.frames.push(frame);
                (c.should_close(now), peak_edge)
            }
            // Unreachable: cooldown was resolved above. Kept total.
            State::Cooldown { .. } => {
                return ObserveOutput::plain(FrameDisposition::CoolingDown);
            }
        };

        ObserveOutput {
            disposition: FrameDisposition::Collected,
            closed: if close_now { self.close(now) } else { None },
            peak_flagged: peak_edge,
        }
    }

    /// Periodic re-evaluation so closure is not starved by silence.
    ///
    /// Also retires an expired cooldown so the next qualifying frame can
    /// open an event immediately.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<Event> {
        if let State::Cooldown { until } = self.state {
            if now >= until {
                self.state = State::Idle;
            }
            return None;
        }
        let due = matches!(&self.state, State::Collecting(c) if c.should_close(now));
        if due { self.close(now) } else { None }
    }

    /// Arm cooldown after a dispatch on this source.
    ///
    /// Consumes the cooldown length staged by the last `Finalized` close.
    /// No-op unless the machine is idle with a staged cooldown, so a
    /// discarded event or a double call cannot suppress the source.
    pub fn arm_cooldown(&mut self, now: DateTime<Utc>) {
        if !matches!(self.state, State::Idle) {
            return;
        }
        if let Some(cooldown) = self.pending_cooldown.take() {
            self.state = State::Cooldown {
                until: now + cooldown,
            };
        }
    }

    fn close(&mut self, now: DateTime<Utc>) -> Option<Event> {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Collecting(c) => {
                let Collecting { mut event, cfg, .. } = *c;
                event.stage = if event.high_confidence_count >= cfg.min_high_confidence_frames {
                    EventStage::Finalized
                } else {
                    EventStage::Discarded
                };
                event.closed_at = Some(now);
                self.pending_cooldown = if event.stage == EventStage::Finalized {
                    Some(cfg.cooldown())
                } else {
                    None
                };
                Some(event)
            }
            other => {
                self.state = other;
                None
            }
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────
