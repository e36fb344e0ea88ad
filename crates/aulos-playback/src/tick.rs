#![forbid(unsafe_code)]

use aulos_core::{ReadyState, TimeRange, left_size_of_range, range_at};

use crate::device::PlaybackHandle;

/// What caused a clock tick to be produced.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TickTrigger {
    /// First snapshot taken when the clock starts.
    Init,
    /// Device reported it can start or resume decoding.
    CanPlay,
    /// Playback started.
    Play,
    /// New data was buffered.
    Progress,
    /// A seek started.
    Seeking,
    /// A seek completed.
    Seeked,
    /// Metadata became available.
    MetadataLoaded,
    /// Playback rate changed.
    RateChange,
    /// Periodic sampling timer.
    TimeUpdate,
}

/// Immutable snapshot of the playback device state.
///
/// Produced at a bounded rate by the [`Clock`](crate::Clock); no two ticks
/// share storage.
#[derive(Clone, Debug)]
pub struct ClockTick {
    /// Current position, in seconds.
    pub position: f64,
    /// Seconds of contiguous buffered data ahead of `position`.
    ///
    /// Infinite when the position is not inside any buffered range.
    pub buffer_gap: f64,
    /// All buffered ranges reported by the device.
    pub buffered: Vec<TimeRange>,
    /// The buffered range containing `position`, if any.
    pub current_range: Option<TimeRange>,
    /// Total media duration, in seconds.
    pub duration: f64,
    pub ended: bool,
    pub paused: bool,
    pub playback_rate: f64,
    pub ready_state: ReadyState,
    pub seeking: bool,
    /// What caused this tick.
    pub trigger: TickTrigger,
}

impl ClockTick {
    /// Snapshot the given device.
    pub fn capture(device: &dyn PlaybackHandle, trigger: TickTrigger) -> Self {
        let buffered = device.buffered();
        let position = device.position();
        Self {
            position,
            buffer_gap: left_size_of_range(&buffered, position),
            current_range: range_at(&buffered, position),
            buffered,
            duration: device.duration(),
            ended: device.ended(),
            paused: device.paused(),
            playback_rate: device.playback_rate(),
            ready_state: device.ready_state(),
            seeking: device.seeking(),
            trigger,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_computes_gap_from_ranges() {
        let device = crate::device::tests::FakeDevice::new();
        device.set_position(2.0);
        device.set_buffered(vec![TimeRange::new(0.0, 10.0)]);

        let tick = ClockTick::capture(&device, TickTrigger::TimeUpdate);
        assert!((tick.buffer_gap - 8.0).abs() < 1e-9);
        assert_eq!(tick.current_range, Some(TimeRange::new(0.0, 10.0)));
        assert_eq!(tick.trigger, TickTrigger::TimeUpdate);
    }

    #[test]
    fn capture_outside_ranges_reports_infinite_gap() {
        let device = crate::device::tests::FakeDevice::new();
        device.set_position(42.0);
        device.set_buffered(vec![TimeRange::new(0.0, 10.0)]);

        let tick = ClockTick::capture(&device, TickTrigger::Seeking);
        assert!(tick.buffer_gap.is_infinite());
        assert!(tick.current_range.is_none());
    }
}
