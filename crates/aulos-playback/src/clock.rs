#![forbid(unsafe_code)]

//! Shared clock stream.
//!
//! One set of device listeners regardless of observer count: the clock owns a
//! single `watch` cell holding the most recent [`ClockTick`]. Late
//! subscribers immediately observe the last emitted tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::device::PlaybackHandle;
use crate::tick::{ClockTick, TickTrigger};

/// Receiver side of the shared clock stream.
///
/// `borrow()` yields the latest tick; `changed().await` waits for the next.
pub type ClockReceiver = watch::Receiver<ClockTick>;

/// Clock configuration.
#[derive(Clone, Copy, Debug)]
pub struct ClockOptions {
    /// Maximum interval between two ticks when no device event fires.
    pub update_interval: Duration,
}

impl Default for ClockOptions {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_millis(1000),
        }
    }
}

/// Samples the playback device into a broadcast of [`ClockTick`] snapshots.
///
/// Device events are pushed in by the host through [`Clock::notify`];
/// periodic sampling runs in a background task started by
/// [`Clock::spawn_sampler`].
pub struct Clock {
    device: Arc<dyn PlaybackHandle>,
    options: ClockOptions,
    tx: watch::Sender<ClockTick>,
}

impl Clock {
    /// Create the clock and capture the initial snapshot.
    #[must_use]
    pub fn new(device: Arc<dyn PlaybackHandle>, options: ClockOptions) -> Self {
        let initial = ClockTick::capture(device.as_ref(), TickTrigger::Init);
        let (tx, _) = watch::channel(initial);
        Self {
            device,
            options,
            tx,
        }
    }

    /// Subscribe to the stream. The current tick is observable immediately.
    #[must_use]
    pub fn subscribe(&self) -> ClockReceiver {
        self.tx.subscribe()
    }

    /// Sample the device now, attributing the tick to a device event.
    pub fn notify(&self, trigger: TickTrigger) {
        let tick = ClockTick::capture(self.device.as_ref(), trigger);
        trace!(?trigger, position = tick.position, "clock tick");
        let _ = self.tx.send(tick);
    }

    /// Run the periodic sampler until cancelled.
    pub fn spawn_sampler(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let clock = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(clock.options.update_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => clock.notify(TickTrigger::TimeUpdate),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::tests::FakeDevice;

    fn clock_with_device() -> (Arc<Clock>, Arc<FakeDevice>) {
        let device = Arc::new(FakeDevice::new());
        let clock = Arc::new(Clock::new(
            Arc::clone(&device) as Arc<dyn PlaybackHandle>,
            ClockOptions::default(),
        ));
        (clock, device)
    }

    #[tokio::test]
    async fn late_subscriber_sees_last_tick() {
        let (clock, device) = clock_with_device();
        device.set_position(12.5);
        clock.notify(TickTrigger::Seeked);

        let rx = clock.subscribe();
        let tick = rx.borrow();
        assert!((tick.position - 12.5).abs() < 1e-9);
        assert_eq!(tick.trigger, TickTrigger::Seeked);
    }

    #[tokio::test]
    async fn notify_wakes_waiting_subscribers() {
        let (clock, device) = clock_with_device();
        let mut rx = clock.subscribe();
        rx.mark_unchanged();

        device.set_position(3.0);
        clock.notify(TickTrigger::Play);
        rx.changed().await.expect("clock alive");
        assert!((rx.borrow().position - 3.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn sampler_emits_periodic_ticks_until_cancelled() {
        let (clock, device) = clock_with_device();
        device.set_position(1.0);

        let cancel = CancellationToken::new();
        let handle = clock.spawn_sampler(cancel.clone());

        let mut rx = clock.subscribe();
        rx.mark_unchanged();
        rx.changed().await.expect("sampler tick");
        assert_eq!(rx.borrow().trigger, TickTrigger::TimeUpdate);

        cancel.cancel();
        handle.await.expect("sampler task");
    }
}
