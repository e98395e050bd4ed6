//! Frame selection for outgoing notifications.
//!
//! A finalized event carries every frame collected while it was open;
//! notifications attach at most `max_screenshots` of them. Selection is
//! ranked by confidence (highest first, ties broken by earliest capture
//! time), so the strongest image evidence is always sent — high-confidence
//! frames are exhausted before any lower-confidence padding.

use crate::types::FrameScore;

/// Pick at most `max_screenshots` frames, best evidence first.
///
/// Deterministic: equal inputs produce equal outputs. The result keeps
/// ranked order; callers wanting chronological display re-sort themselves.
pub fn select_frames(frames: &[FrameScore], max_screenshots: usize) -> Vec<FrameScore> {
    let mut ranked: Vec<&FrameScore> = frames.iter().collect();
    ranked.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.capture_time.cmp(&b.capture_time))
    });
    ranked
        .into_iter()
        .take(max_screenshots)
        .cloned()
        .collect()
}

// ─── Tests ────────────────────────────────────────────────────────
