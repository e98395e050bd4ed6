//! Multi-sink dispatch policy: confidence gates, audible cadence, and
//! per-sink delivery state.
//!
//! One policy instance per source — `SinkState` is never shared across
//! sources. The policy is pure: it decides which sinks receive a
//! finalized event and whether each delivery is audible; the runtime
//! performs the actual deliveries and reports outcomes back.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ─── Sink state ───────────────────────────────────────────────────

/// Delivery bookkeeping for one (source, sink) pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SinkState {
    /// Completion time of the last successful delivery.
    pub last_dispatch_time: Option<DateTime<Utc>>,
    /// Total deliveries planned for this sink; drives the audible cadence.
    pub dispatch_counter: u64,
    /// Informational mirror of the source cooldown horizon set at the last
    /// successful delivery. The aggregator's cooldown state is authoritative.
    pub suppressed_until: Option<DateTime<Utc>>,
}

/// Gate description for one configured sink.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkGate {
    pub sink_id: String,
    /// Per-sink override of the global notify threshold.
    pub confidence_gate: Option<f64>,
}

/// One delivery the runtime should perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedDelivery {
    pub sink_id: String,
    /// Every Nth delivery per sink is audible; the rest are silent.
    /// Both variants carry the full notification — only the alert
    /// modality differs.
    pub is_audible: bool,
    /// This sink's dispatch counter after planning (1-based).
    pub dispatch_seq: u64,
}

// ─── Policy ───────────────────────────────────────────────────────

/// Plans deliveries for one source's finalized events.
#[derive(Debug, Clone, Default)]
pub struct DispatchPolicy {
    states: HashMap<String, SinkState>,
}

impl DispatchPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide which sinks receive an event with the given peak confidence.
    ///
    /// Sinks whose effective gate (override, else `notify_threshold`) is
    /// not met are skipped with no state mutated. Each admitted sink's
    /// counter is incremented and its audible flag computed. An empty plan
    /// means the event is dropped post hoc and no cooldown should be armed.
    pub fn plan(
        &mut self,
        peak_confidence: f64,
        gates: &[SinkGate],
        notify_threshold: f64,
        alert_every_n: u64,
    ) -> Vec<PlannedDelivery> {
        let every_n = alert_every_n.max(1);
        gates
            .iter()
            .filter_map(|gate| {
                let effective = gate.confidence_gate.unwrap_or(notify_threshold);
                if peak_confidence < effective {
                    return None;
                }
                let state = self.states.entry(gate.sink_id.clone()).or_default();
                state.dispatch_counter += 1;
                Some(PlannedDelivery {
                    sink_id: gate.sink_id.clone(),
                    is_audible: state.dispatch_counter % every_n == 0,
                    dispatch_seq: state.dispatch_counter,
                })
            })
            .collect()
    }

    /// Record a completed delivery for a sink.
    ///
    /// `cooldown` is the source's suppression window, mirrored onto the
    /// sink state as `suppressed_until`.
    pub fn record_success(&mut self, sink_id: &str, now: DateTime<Utc>, cooldown: TimeDelta) {
        let state = self.states.entry(sink_id.to_owned()).or_default();
        state.last_dispatch_time = Some(now);
        state.suppressed_until = Some(now + cooldown);
    }

    /// Current state for a sink, if it has ever been planned or recorded.
    pub fn state(&self, sink_id: &str) -> Option<&SinkState> {
        self.states.get(sink_id)
    }
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T08:00:00Z")
            .expect("valid RFC3339")
            .with_timezone(&Utc)
    }

    fn gate(id: &str, confidence_gate: Option<f64>) -> SinkGate {
        SinkGate {
            sink_id: id.to_owned(),
            confidence_gate,
        }
    }

    const NOTIFY: f64 = 0.86;

    #[test]
    fn default_gate_is_notify_threshold() {
        let mut policy = DispatchPolicy::new();
        let plan = policy.plan(0.86, &[gate("disk", None)], NOTIFY, 5);
        assert_eq!(plan.len(), 1, "peak at exactly the gate passes");

        let plan = policy.plan(0.85, &[gate("disk", None)], NOTIFY, 5);
        assert!(plan.is_empty());
    }

    #[test]
    fn scenario_c_every_fifth_dispatch_audible() {
        let mut policy = DispatchPolicy::new();
        let mut audible = Vec::new();
        for _ in 0..10 {
            let plan = policy.plan(0.9, &[gate("telegram", None)], NOTIFY, 5);
            audible.push(plan[0].is_audible);
        }
        assert_eq!(
            audible,
            vec![false, false, false, false, true, false, false, false, false, true]
        );
    }

    #[test]
    fn scenario_d_gated_sink_skipped_others_evaluated() {
        let mut policy = DispatchPolicy::new();
        let gates = [gate("strict", Some(0.95)), gate("disk", None)];
        let plan = policy.plan(0.9, &gates, NOTIFY, 5);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].sink_id, "disk");
        // The skipped sink's state is untouched — it was never planned.
        assert!(policy.state("strict").is_none());
        assert_eq!(policy.state("disk").map(|s| s.dispatch_counter), Some(1));
    }

    #[test]
    fn counters_are_independent_per_sink() {
        let mut policy = DispatchPolicy::new();
        let gates = [gate("strict", Some(0.95)), gate("lax", None)];
        // Two events under the strict gate, one over it.
        policy.plan(0.9, &gates, NOTIFY, 5);
        policy.plan(0.9, &gates, NOTIFY, 5);
        policy.plan(0.97, &gates, NOTIFY, 5);
        assert_eq!(policy.state("lax").map(|s| s.dispatch_counter), Some(3));
        assert_eq!(policy.state("strict").map(|s| s.dispatch_counter), Some(1));
    }

    #[test]
    fn cadence_of_one_is_always_audible() {
        let mut policy = DispatchPolicy::new();
        for _ in 0..3 {
            let plan = policy.plan(0.9, &[gate("disk", None)], NOTIFY, 1);
            assert!(plan[0].is_audible);
        }
    }

    #[test]
    fn zero_cadence_clamped_to_one() {
        let mut policy = DispatchPolicy::new();
        let plan = policy.plan(0.9, &[gate("disk", None)], NOTIFY, 0);
        assert!(plan[0].is_audible, "degenerate cadence treated as 1");
    }

    #[test]
    fn empty_plan_when_no_gate_met() {
        let mut policy = DispatchPolicy::new();
        let gates = [gate("a", Some(0.95)), gate("b", Some(0.99))];
        let plan = policy.plan(0.9, &gates, NOTIFY, 5);
        assert!(plan.is_empty());
        assert!(policy.state("a").is_none());
        assert!(policy.state("b").is_none());
    }

    #[test]
    fn record_success_sets_times() {
        let mut policy = DispatchPolicy::new();
        policy.plan(0.9, &[gate("disk", None)], NOTIFY, 5);
        policy.record_success("disk", t0(), TimeDelta::seconds(40));
        let state = policy.state("disk").expect("state exists");
        assert_eq!(state.last_dispatch_time, Some(t0()));
        assert_eq!(state.suppressed_until, Some(t0() + TimeDelta::seconds(40)));
    }

    #[test]
    fn dispatch_seq_matches_counter() {
        let mut policy = DispatchPolicy::new();
        for expected in 1..=4u64 {
            let plan = policy.plan(0.9, &[gate("disk", None)], NOTIFY, 5);
            assert_eq!(plan[0].dispatch_seq, expected);
        }
    }
}
