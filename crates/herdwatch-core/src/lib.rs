//! herdwatch-core: event aggregation, frame selection, and dispatch policy.
//!
//! Pure, deterministic state machines with no IO or async dependencies.
//! The runtime crate owns clocks, queues, and sinks; everything here takes
//! `now` as a parameter and can be replayed in tests.

pub mod aggregator;
pub mod config;
pub mod dispatch;
pub mod selector;
pub mod types;
