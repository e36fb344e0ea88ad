#![forbid(unsafe_code)]

//! Stall classification and recovery.
//!
//! Classification is a pure function of the previous annotated tick and the
//! current one: no hidden timers. Corrective seeks are the one side effect,
//! applied through the [`PlaybackHandle`] when the position is stuck or
//! facing a small, safely skippable discontinuity.

use std::time::Instant;

use aulos_core::{TimeRange, next_range_after, next_range_gap};
use tracing::{debug, warn};

use crate::device::PlaybackHandle;
use crate::tick::{ClockTick, TickTrigger};

/// Duration of one frame at 60fps, used to land just past a discontinuity.
const ONE_FRAME: f64 = 1.0 / 60.0;

/// Why playback cannot currently advance.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StallReason {
    /// Rebuilding buffer after a seek.
    Seeking,
    /// Rebuilding buffer after a low device readiness.
    NotReady,
    /// Ran out of buffered data.
    Buffering,
}

/// A recorded stall. `None` means "playing normally".
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Stall {
    pub reason: StallReason,
    /// When the stall was first entered. Preserved across ticks while the
    /// reason is unchanged.
    pub since: Instant,
}

/// A clock tick annotated with its stall classification.
#[derive(Clone, Debug)]
pub struct AnnotatedTick {
    pub tick: ClockTick,
    pub stall: Option<Stall>,
}

/// Gap thresholds steering stall entry and recovery, in seconds.
#[derive(Clone, Copy, Debug)]
pub struct StallThresholds {
    /// Gap at or below which playback is considered stalled.
    pub stall_gap: f64,
    /// Buffer required ahead before resuming after a seek.
    pub resume_after_seeking: f64,
    /// Buffer required ahead before resuming after low readiness.
    pub resume_after_not_ready: f64,
    /// Buffer required ahead before resuming after plain rebuffering.
    pub resume_after_buffering: f64,
    /// Discontinuities at most this long are bridged when computing the
    /// resilient buffer gap.
    pub ignorable_discontinuity: f64,
    /// Discontinuities smaller than this are skipped over with a seek.
    pub skippable_discontinuity: f64,
    /// Buffer remaining in the current range above which a stalled position
    /// is judged frozen (decoder quirk) rather than starved.
    pub freeze_gap: f64,
}

impl StallThresholds {
    /// Default thresholds.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            stall_gap: 0.5,
            resume_after_seeking: 1.5,
            resume_after_not_ready: 0.5,
            resume_after_buffering: 5.0,
            ignorable_discontinuity: 0.2,
            skippable_discontinuity: 1.0,
            freeze_gap: 0.6,
        }
    }

    /// Tighter thresholds for low-latency playback.
    #[must_use]
    pub fn low_latency() -> Self {
        Self {
            stall_gap: 0.3,
            resume_after_seeking: 0.5,
            resume_after_not_ready: 0.3,
            resume_after_buffering: 0.5,
            ignorable_discontinuity: 0.2,
            skippable_discontinuity: 1.0,
            freeze_gap: 0.6,
        }
    }

    fn resume_gap(&self, reason: StallReason) -> f64 {
        match reason {
            StallReason::Seeking => self.resume_after_seeking,
            StallReason::NotReady => self.resume_after_not_ready,
            StallReason::Buffering => self.resume_after_buffering,
        }
    }
}

/// Stall-detection options.
#[derive(Clone, Copy, Debug)]
pub struct StallOptions {
    /// Whether the engine manages buffering itself (segment playback) as
    /// opposed to handing the device a direct file.
    pub uses_managed_buffering: bool,
    /// Low-latency mode: tighter stall and resume thresholds.
    pub low_latency: bool,
}

impl Default for StallOptions {
    fn default() -> Self {
        Self {
            uses_managed_buffering: true,
            low_latency: false,
        }
    }
}

/// Buffer gap computed while bridging small, safely skippable
/// discontinuities between consecutive buffered ranges.
///
/// Returns the raw gap unchanged when there is no next range or the first
/// gap already exceeds `ignorable`; otherwise the result is the raw gap
/// extended by every range reachable through gaps of at most `ignorable`
/// seconds. Always at least the raw gap; each step strictly advances the
/// scanned position, so the walk terminates.
#[must_use]
pub fn resilient_buffer_gap(
    position: f64,
    raw_gap: f64,
    buffered: &[TimeRange],
    ignorable: f64,
) -> f64 {
    let mut total = 0.0;
    let mut scanned = position;
    let mut bridged = false;
    if raw_gap.is_finite() {
        total = raw_gap;
        scanned += raw_gap;
    }
    loop {
        let Some(next) = next_range_after(buffered, scanned) else {
            return if bridged { total } else { raw_gap };
        };
        if next.start - scanned > ignorable {
            return if bridged { total } else { raw_gap };
        }
        total += next.end - next.start;
        scanned = next.end;
        bridged = true;
    }
}

/// Classifies clock ticks into playing/stalled states and tries to recover
/// from stuck positions.
#[derive(Debug)]
pub struct StallDetector {
    options: StallOptions,
    thresholds: StallThresholds,
    prev: Option<AnnotatedTick>,
}

impl StallDetector {
    #[must_use]
    pub fn new(options: StallOptions) -> Self {
        let thresholds = if options.low_latency {
            StallThresholds::low_latency()
        } else {
            StallThresholds::standard()
        };
        Self {
            options,
            thresholds,
            prev: None,
        }
    }

    #[must_use]
    pub fn thresholds(&self) -> &StallThresholds {
        &self.thresholds
    }

    /// Process one tick: classify it, attempt recovery seeks if stalled,
    /// and remember it as the previous tick for the next call.
    pub fn process(&mut self, tick: ClockTick, device: &dyn PlaybackHandle) -> AnnotatedTick {
        let Some(prev) = self.prev.take() else {
            let first = AnnotatedTick { tick, stall: None };
            self.prev = Some(first.clone());
            return first;
        };

        let stall = self.classify(&prev, &tick);
        let annotated = AnnotatedTick { tick, stall };
        self.prev = Some(annotated.clone());

        if annotated.stall.is_some() {
            self.try_recover(&annotated.tick, device);
        }
        annotated
    }

    /// Pure stall classification: previous annotated tick and current tick in,
    /// stall state out.
    #[must_use]
    pub fn classify(&self, prev: &AnnotatedTick, tick: &ClockTick) -> Option<Stall> {
        let fully_loaded = self.has_loaded_until_the_end(tick);

        let can_stall = tick.ready_state.has_metadata()
            && tick.trigger != TickTrigger::MetadataLoaded
            && prev.stall.is_none()
            && !(fully_loaded || tick.ended);

        let (should_stall, should_unstall) = if self.options.uses_managed_buffering {
            self.managed_transitions(prev, tick, can_stall, fully_loaded)
        } else {
            self.direct_transitions(prev, tick, can_stall, fully_loaded)
        };

        if should_unstall {
            return None;
        }
        if !should_stall && prev.stall.is_none() {
            return None;
        }

        let reason = if tick.trigger == TickTrigger::Seeking || tick.seeking {
            StallReason::Seeking
        } else if tick.ready_state.is_minimal() {
            StallReason::NotReady
        } else {
            StallReason::Buffering
        };

        // Keep the original timestamp while stuck for the same cause.
        match prev.stall {
            Some(stall) if stall.reason == reason => Some(stall),
            _ => Some(Stall {
                reason,
                since: Instant::now(),
            }),
        }
    }

    fn managed_transitions(
        &self,
        prev: &AnnotatedTick,
        tick: &ClockTick,
        can_stall: bool,
        fully_loaded: bool,
    ) -> (bool, bool) {
        let t = &self.thresholds;
        if can_stall
            && (tick.buffer_gap <= t.stall_gap
                || tick.buffer_gap.is_infinite()
                || tick.ready_state.is_minimal())
        {
            // Very small discontinuities present in the stream must not
            // trigger an indefinite rebuffering phase.
            let resilient = resilient_buffer_gap(
                tick.position,
                tick.buffer_gap,
                &tick.buffered,
                t.ignorable_discontinuity,
            );
            if resilient.is_infinite() || resilient <= t.stall_gap {
                debug!(
                    buffer_gap = tick.buffer_gap,
                    ready_state = ?tick.ready_state,
                    "stall: entering stalled state"
                );
                return (true, false);
            }
            debug!("stall: small discontinuity ahead, not stalling");
            return (false, false);
        }

        let Some(stall) = prev.stall else {
            return (false, false);
        };
        if !tick.ready_state.has_current_data() || tick.buffer_gap.is_infinite() {
            return (false, false);
        }
        if fully_loaded || tick.ended {
            debug!(fully_loaded, ended = tick.ended, "stall: content finished, un-stall");
            return (false, true);
        }
        let resume_gap = t.resume_gap(stall.reason);
        if tick.buffer_gap >= resume_gap {
            debug!(
                buffer_gap = tick.buffer_gap,
                resume_gap, "stall: resume gap reached, un-stall"
            );
            return (false, true);
        }
        // We may needlessly still be rebuffering because of a very small
        // discontinuity later in the stream.
        let resilient = resilient_buffer_gap(
            tick.position,
            tick.buffer_gap,
            &tick.buffered,
            t.ignorable_discontinuity,
        );
        if resilient > resume_gap {
            debug!(
                position = tick.position,
                resilient, "stall: un-stall despite small discontinuities"
            );
            return (false, true);
        }
        (false, false)
    }

    /// Direct-file playback: the device stalls and unstalls on its own, so
    /// only detect an unchanged position between consecutive samples.
    fn direct_transitions(
        &self,
        prev: &AnnotatedTick,
        tick: &ClockTick,
        can_stall: bool,
        fully_loaded: bool,
    ) -> (bool, bool) {
        let position_frozen = !tick.paused
            && tick.trigger == TickTrigger::TimeUpdate
            && prev.tick.trigger == TickTrigger::TimeUpdate
            && tick.position == prev.tick.position;
        let seek_into_void =
            tick.trigger == TickTrigger::Seeking && tick.buffer_gap.is_infinite();
        if can_stall && (position_frozen || seek_into_void) {
            return (true, false);
        }

        let Some(stall) = prev.stall else {
            return (false, false);
        };
        let moved = tick.trigger != TickTrigger::Seeking && tick.position != prev.tick.position;
        let gap_recovered = tick.buffer_gap.is_finite()
            && (tick.buffer_gap > self.thresholds.resume_gap(stall.reason)
                || fully_loaded
                || tick.ended);
        if moved || tick.trigger == TickTrigger::CanPlay || gap_recovered {
            return (false, true);
        }
        (false, false)
    }

    fn has_loaded_until_the_end(&self, tick: &ClockTick) -> bool {
        tick.current_range
            .is_some_and(|range| tick.duration - range.end <= self.thresholds.stall_gap)
    }

    /// Attempt to get out of a stalled state. Frozen-position check takes
    /// priority over discontinuity skipping; at most one seek per tick.
    fn try_recover(&self, tick: &ClockTick, device: &dyn PlaybackHandle) {
        if self.is_playback_frozen(tick) {
            // A no-op seek kicks the decoder on devices that freeze with
            // buffered data still ahead.
            warn!(position = tick.position, "stall: freeze detected, kick seek");
            device.seek_to(tick.position);
            return;
        }
        let gap = next_range_gap(&tick.buffered, tick.position);
        if gap < self.thresholds.skippable_discontinuity {
            let target = tick.position + gap + ONE_FRAME;
            warn!(
                position = tick.position,
                gap, target, "stall: skipping discontinuity"
            );
            device.seek_to(target);
        }
    }

    /// Known device quirk: the position stops advancing even though buffered
    /// data remains ahead in the current range.
    fn is_playback_frozen(&self, tick: &ClockTick) -> bool {
        tick.trigger == TickTrigger::TimeUpdate
            && tick
                .current_range
                .is_some_and(|range| range.end - tick.position > self.thresholds.freeze_gap)
    }
}
