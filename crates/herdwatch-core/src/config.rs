//! Configuration loading, validation, and defensive clamping.
//!
//! Settings are read from a TOML file. The runtime re-reads the file
//! periodically; a snapshot is captured when an event opens, so changes
//! apply to the next event rather than an in-flight one.

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

// ─── Detection ────────────────────────────────────────────────────

/// Thresholds and timing for the event aggregation state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// A frame at/above this confidence opens or extends an event.
    pub save_threshold: f64,
    /// A frame at/above this confidence counts toward the high-confidence
    /// tally; also the default per-sink dispatch gate.
    pub notify_threshold: f64,
    /// Informational peak marker; logged, never a close condition.
    pub peak_threshold: f64,
    /// Minimum high-confidence frames for a closed event to be dispatched.
    pub min_high_confidence_frames: u32,
    /// An event may not close on inactivity before this age.
    pub min_collection_secs: u64,
    /// An event is force-closed at this age regardless of activity.
    pub max_collection_secs: u64,
    /// Silence after the last qualifying frame that closes an event.
    pub inactivity_timeout_secs: u64,
    /// Suppression window after a dispatch on the same source.
    pub cooldown_secs: u64,
    /// Cap on frames attached to a notification.
    pub max_screenshots: usize,
    /// Every Nth dispatch per sink is audible; the rest are silent.
    pub alert_every_n: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            save_threshold: 0.75,
            notify_threshold: 0.86,
            peak_threshold: 0.89,
            min_high_confidence_frames: 3,
            min_collection_secs: 4,
            max_collection_secs: 50,
            inactivity_timeout_secs: 6,
            cooldown_secs: 40,
            max_screenshots: 2,
            alert_every_n: 5,
        }
    }
}

impl DetectionConfig {
    pub fn min_collection(&self) -> TimeDelta {
        TimeDelta::seconds(self.min_collection_secs as i64)
    }

    pub fn max_collection(&self) -> TimeDelta {
        TimeDelta::seconds(self.max_collection_secs as i64)
    }

    pub fn inactivity_timeout(&self) -> TimeDelta {
        TimeDelta::seconds(self.inactivity_timeout_secs as i64)
    }

    pub fn cooldown(&self) -> TimeDelta {
        TimeDelta::seconds(self.cooldown_secs as i64)
    }

    /// Return a copy with out-of-range values forced into a usable range.
    ///
    /// The loader rejects invalid files outright; this is the last line of
    /// defense for runtime-updated values, so a bad update can never wedge
    /// the state machine (e.g. `min_collection > max_collection` would make
    /// the inactivity close rule unreachable until max-age).
    pub fn clamped(&self) -> Self {
        let mut c = self.clone();
        c.save_threshold = c.save_threshold.clamp(0.0, 1.0);
        c.notify_threshold = c.notify_threshold.clamp(0.0, 1.0);
        c.peak_threshold = c.peak_threshold.clamp(0.0, 1.0);
        c.min_collection_secs = c.min_collection_secs.min(c.max_collection_secs);
        c.max_screenshots = c.max_screenshots.max(1);
        c.alert_every_n = c.alert_every_n.max(1);
        c
    }
}

// ─── Sources & sinks ──────────────────────────────────────────────

/// One monitored source (camera / video feed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDef {
    pub id: String,
    /// Human-readable name used in notifications. Defaults to the id.
    #[serde(default)]
    pub name: String,
}

impl SourceDef {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() { &self.id } else { &self.name }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Disk,
    Telegram,
}

/// One configured delivery sink.
///
/// Flat shape: kind-specific fields are optional and checked by
/// [`Config::validate`], so a config file stays a plain table per sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkDef {
    pub id: String,
    pub kind: SinkKind,
    /// Per-sink override of the global notify threshold gate.
    #[serde(default)]
    pub confidence_gate: Option<f64>,
    /// Disk: target directory for event records and frame images.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    /// Disk: prune oldest files beyond this count after each delivery.
    #[serde(default = "default_max_keep")]
    pub max_keep: usize,
    /// Telegram: bot API token.
    #[serde(default)]
    pub bot_token: String,
    /// Telegram: recipient chat ids.
    #[serde(default)]
    pub chat_ids: Vec<String>,
}

fn default_max_keep() -> usize {
    500
}

// ─── Runtime ──────────────────────────────────────────────────────

/// Knobs for the runtime shell (queues, timers), not the state machines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Per-source bounded frame queue capacity (drop-oldest on overflow).
    pub queue_capacity: usize,
    /// Idle re-evaluation period for timer-driven event closure.
    pub tick_interval_ms: u64,
    /// Per-sink delivery timeout.
    pub deliver_timeout_secs: u64,
    /// Config file re-read cadence.
    pub reload_interval_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            tick_interval_ms: 1_000,
            deliver_timeout_secs: 30,
            reload_interval_secs: 30,
        }
    }
}

// ─── Top level ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub sources: Vec<SourceDef>,
    #[serde(default)]
    pub sinks: Vec<SinkDef>,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// Load and validate a config file.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let raw = std::fs::read_to_string(path)?;
    from_toml_str(&raw)
}

/// Parse and validate config from a TOML string.
pub fn from_toml_str(raw: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(raw)?;
    config.validate()?;
    Ok(config)
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn unit(name: &str, v: f64) -> Result<(), ConfigError> {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(ConfigError::Invalid(format!(
                    "{name} must be within [0, 1], got {v}"
                )))
            }
        }

        let d = &self.detection;
        unit("save_threshold", d.save_threshold)?;
        unit("notify_threshold", d.notify_threshold)?;
        unit("peak_threshold", d.peak_threshold)?;
        if d.min_collection_secs > d.max_collection_secs {
            return Err(ConfigError::Invalid(format!(
                "min_collection_secs ({}) exceeds max_collection_secs ({})",
                d.min_collection_secs, d.max_collection_secs
            )));
        }
        if d.alert_every_n == 0 {
            return Err(ConfigError::Invalid("alert_every_n must be >= 1".into()));
        }
        if d.max_screenshots == 0 {
            return Err(ConfigError::Invalid("max_screenshots must be >= 1".into()));
        }

        if self.sources.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one [[sources]] entry is required".into(),
            ));
        }
        let mut source_ids: Vec<&str> = self.sources.iter().map(|s| s.id.as_str()).collect();
        source_ids.sort_unstable();
        source_ids.dedup();
        if source_ids.len() != self.sources.len() {
            return Err(ConfigError::Invalid("duplicate source id".into()));
        }

        let mut sink_ids: Vec<&str> = self.sinks.iter().map(|s| s.id.as_str()).collect();
        sink_ids.sort_unstable();
        sink_ids.dedup();
        if sink_ids.len() != self.sinks.len() {
            return Err(ConfigError::Invalid("duplicate sink id".into()));
        }

        for sink in &self.sinks {
            if let Some(gate) = sink.confidence_gate {
                unit(&format!("sink {} confidence_gate", sink.id), gate)?;
            }
            match sink.kind {
                SinkKind::Disk => {
                    if sink.directory.is_none() {
                        return Err(ConfigError::Invalid(format!(
                            "disk sink {} requires a directory",
                            sink.id
                        )));
                    }
                }
                SinkKind::Telegram => {
                    if sink.bot_token.is_empty() || sink.chat_ids.is_empty() {
                        return Err(ConfigError::Invalid(format!(
                            "telegram sink {} requires bot_token and chat_ids",
                            sink.id
                        )));
                    }
                }
            }
        }

        if self.runtime.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be >= 1".into()));
        }

        Ok(())
    }
}

// ─── Tests ────────────────────────────────────────────────────────
