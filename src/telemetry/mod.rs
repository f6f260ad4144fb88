//! Tick performance telemetry.
//!
//! - [`ring`]: fixed-capacity buffers of recent tick durations and timelines.
//! - [`collector`]: per-tick span collection and batched, non-blocking
//!   delivery to subscribers.

pub mod collector;
pub mod ring;

pub use collector::{Batch, Collector, Subscribers, Subscription, SubscriptionId, TickSpan, TickTimeline};
pub use ring::{Ring, SpanRing, TickRing, TickSample};
