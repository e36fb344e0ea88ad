#![forbid(unsafe_code)]

//! Shared primitives for the aulos playback engine.
//!
//! Small, dependency-free building blocks used by every other crate:
//! media-type identifiers, device readiness levels and buffered-range math.

mod media;
mod ranges;

pub use media::{MediaType, ReadyState};
pub use ranges::{
    TimeRange, left_size_of_range, next_range_after, next_range_gap, range_at,
};
