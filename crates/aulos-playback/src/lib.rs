#![forbid(unsafe_code)]

//! Clock stream and stall detection.
//!
//! The playback device is sampled into a shared stream of immutable
//! [`ClockTick`] snapshots. The [`StallDetector`] consumes that stream,
//! classifies the live position into playing/stalled states and performs
//! corrective seeks for positions the device cannot get out of on its own.

mod clock;
mod device;
mod stall;
mod tick;

pub use clock::{Clock, ClockOptions, ClockReceiver};
pub use device::PlaybackHandle;
pub use stall::{
    AnnotatedTick, Stall, StallDetector, StallOptions, StallReason, StallThresholds,
    resilient_buffer_gap,
};
pub use tick::{ClockTick, TickTrigger};
