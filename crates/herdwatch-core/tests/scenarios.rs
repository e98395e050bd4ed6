//! End-to-end replays through aggregator → selector → dispatch policy.
//!
//! Frames are fed as a pure sequence with explicit timestamps, mirroring
//! how the runtime drives the core on its single per-source path.

use chrono::{DateTime, TimeDelta, Utc};

use herdwatch_core::aggregator::{Aggregator, FrameDisposition};
use herdwatch_core::config::DetectionConfig;
use herdwatch_core::dispatch::{DispatchPolicy, PlannedDelivery, SinkGate};
use herdwatch_core::selector::select_frames;
use herdwatch_core::types::{Event, EventStage, FrameScore, ImageRef};

fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-01T08:00:00Z")
        .expect("valid RFC3339")
        .with_timezone(&Utc)
}

fn at(secs: f64) -> DateTime<Utc> {
    t0() + TimeDelta::milliseconds((secs * 1000.0) as i64)
}

fn frame(secs: f64, confidence: f64) -> FrameScore {
    FrameScore {
        capture_time: at(secs),
        confidence,
        image_ref: ImageRef::new(format!("frame-{secs}.jpg")),
    }
}

fn scenario_cfg() -> DetectionConfig {
    DetectionConfig {
        save_threshold: 0.75,
        notify_threshold: 0.86,
        peak_threshold: 0.89,
        min_high_confidence_frames: 1,
        min_collection_secs: 1,
        max_collection_secs: 50,
        inactivity_timeout_secs: 2,
        cooldown_secs: 40,
        max_screenshots: 2,
        alert_every_n: 5,
    }
}

/// Replay timestamped (secs, confidence) pairs; collect closed events.
fn replay(
    agg: &mut Aggregator,
    cfg: &DetectionConfig,
    frames: &[(f64, f64)],
) -> Vec<Event> {
    let mut closed = Vec::new();
    for (secs, conf) in frames {
        if let Some(event) = agg.observe(frame(*secs, *conf), at(*secs), cfg).closed {
            closed.push(event);
        }
    }
    closed
}

/// Drive one finalized event through selection and planning; arm cooldown
/// when the plan is non-empty, exactly as the runtime dispatcher does.
fn dispatch(
    agg: &mut Aggregator,
    policy: &mut DispatchPolicy,
    cfg: &DetectionConfig,
    gates: &[SinkGate],
    event: &Event,
    now: DateTime<Utc>,
) -> (Vec<FrameScore>, Vec<PlannedDelivery>) {
    let selected = select_frames(&event.frames, cfg.max_screenshots);
    let plan = policy.plan(
        event.peak_confidence,
        gates,
        cfg.notify_threshold,
        cfg.alert_every_n,
    );
    if !plan.is_empty() {
        agg.arm_cooldown(now);
    }
    (selected, plan)
}

fn single_gate() -> Vec<SinkGate> {
    vec![SinkGate {
        sink_id: "disk".to_owned(),
        confidence_gate: None,
    }]
}

#[test]
fn scenario_a_full_pipeline_dispatches_silently() {
    let cfg = scenario_cfg();
    let mut agg = Aggregator::new("camera-1");
    let mut policy = DispatchPolicy::new();

    let closed = replay(
        &mut agg,
        &cfg,
        &[(0.0, 0.8), (1.0, 0.9), (2.0, 0.82), (3.0, 0.4), (4.0, 0.3)],
    );
    assert_eq!(closed.len(), 1);
    let event = &closed[0];
    assert_eq!(event.stage, EventStage::Finalized);
    assert_eq!(event.high_confidence_count, 1);

    let (selected, plan) = dispatch(
        &mut agg,
        &mut policy,
        &cfg,
        &single_gate(),
        event,
        at(4.0),
    );
    assert_eq!(plan.len(), 1, "dispatch occurs");
    assert!(!plan[0].is_audible, "first of every 5 dispatches is silent");
    assert_eq!(selected.len(), 2);
    // Best evidence first: 0.9 then 0.82.
    assert!((selected[0].confidence - 0.9).abs() < f64::EPSILON);
    assert!((selected[1].confidence - 0.82).abs() < f64::EPSILON);

    // Cooldown armed: a strong frame right after is suppressed.
    let out = agg.observe(frame(5.0, 0.95), at(5.0), &cfg);
    assert_eq!(out.disposition, FrameDisposition::CoolingDown);
}

#[test]
fn scenario_b_discarded_event_arms_no_cooldown() {
    let cfg = DetectionConfig {
        notify_threshold: 0.95,
        ..scenario_cfg()
    };
    let mut agg = Aggregator::new("camera-1");
    let mut policy = DispatchPolicy::new();

    let closed = replay(
        &mut agg,
        &cfg,
        &[(0.0, 0.8), (1.0, 0.9), (2.0, 0.82), (3.0, 0.4), (4.0, 0.3)],
    );
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].stage, EventStage::Discarded);
    assert_eq!(closed[0].high_confidence_count, 0);
    assert!(policy.state("disk").is_none(), "nothing planned");

    // No cooldown: collection resumes immediately.
    let out = agg.observe(frame(5.0, 0.9), at(5.0), &cfg);
    assert_eq!(out.disposition, FrameDisposition::Opened);
}

#[test]
fn no_sink_gate_met_is_discarded_post_hoc() {
    let cfg = scenario_cfg();
    let gates = vec![SinkGate {
        sink_id: "strict".to_owned(),
        confidence_gate: Some(0.95),
    }];
    let mut agg = Aggregator::new("camera-1");
    let mut policy = DispatchPolicy::new();

    let closed = replay(&mut agg, &cfg, &[(0.0, 0.9), (4.0, 0.2)]);
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].stage, EventStage::Finalized);

    let (_, plan) = dispatch(&mut agg, &mut policy, &cfg, &gates, &closed[0], at(4.0));
    assert!(plan.is_empty());

    // No cooldown armed: immediate re-collection is allowed.
    let out = agg.observe(frame(5.0, 0.9), at(5.0), &cfg);
    assert_eq!(out.disposition, FrameDisposition::Opened);
}

#[test]
fn cooldown_expires_then_next_event_flows() {
    let cfg = scenario_cfg();
    let mut agg = Aggregator::new("camera-1");
    let mut policy = DispatchPolicy::new();

    let closed = replay(&mut agg, &cfg, &[(0.0, 0.9), (4.0, 0.2)]);
    let (_, plan) = dispatch(
        &mut agg,
        &mut policy,
        &cfg,
        &single_gate(),
        &closed[0],
        at(4.0),
    );
    assert_eq!(plan.len(), 1);

    // Inside the 40s window nothing opens; at expiry a new event opens.
    assert_eq!(
        agg.observe(frame(20.0, 0.9), at(20.0), &cfg).disposition,
        FrameDisposition::CoolingDown
    );
    assert_eq!(
        agg.observe(frame(44.1, 0.9), at(44.1), &cfg).disposition,
        FrameDisposition::Opened
    );

    // Second dispatch advances the sink counter.
    let second = replay(&mut agg, &cfg, &[(48.0, 0.2), (49.0, 0.2)]);
    assert_eq!(second.len(), 1);
    let (_, plan) = dispatch(
        &mut agg,
        &mut policy,
        &cfg,
        &single_gate(),
        &second[0],
        at(49.0),
    );
    assert_eq!(plan[0].dispatch_seq, 2);
}

#[test]
fn multi_sink_gates_evaluated_independently() {
    let cfg = scenario_cfg();
    let gates = vec![
        SinkGate {
            sink_id: "strict".to_owned(),
            confidence_gate: Some(0.95),
        },
        SinkGate {
            sink_id: "disk".to_owned(),
            confidence_gate: None,
        },
    ];
    let mut agg = Aggregator::new("camera-1");
    let mut policy = DispatchPolicy::new();

    let closed = replay(&mut agg, &cfg, &[(0.0, 0.9), (4.0, 0.2)]);
    let (_, plan) = dispatch(&mut agg, &mut policy, &cfg, &gates, &closed[0], at(4.0));
    assert_eq!(plan.len(), 1);
    assert_eq!(plan[0].sink_id, "disk");
    assert!(policy.state("strict").is_none());

    // One qualifying sink was attempted, so cooldown is armed for the source.
    assert!(agg.in_cooldown(at(5.0)));
}

#[test]
fn liveness_under_continuous_activity() {
    // A stream that never dips below the save threshold still closes at
    // max age, and closes again after cooldown — no starvation.
    let cfg = DetectionConfig {
        max_collection_secs: 5,
        inactivity_timeout_secs: 100,
        cooldown_secs: 3,
        min_high_confidence_frames: 1,
        ..scenario_cfg()
    };
    let mut agg = Aggregator::new("camera-1");
    let mut policy = DispatchPolicy::new();

    let mut dispatched = 0;
    let mut t = 0.0;
    while t < 30.0 {
        if let Some(event) = agg.observe(frame(t, 0.9), at(t), &cfg).closed {
            assert_eq!(event.stage, EventStage::Finalized);
            let (_, plan) = dispatch(
                &mut agg,
                &mut policy,
                &cfg,
                &single_gate(),
                &event,
                at(t),
            );
            dispatched += plan.len();
        }
        t += 1.0;
    }
    // 5s collection + 3s cooldown per cycle over 30s of stream.
    assert!(dispatched >= 3, "got {dispatched} dispatch cycles");
}
