#![forbid(unsafe_code)]

use std::sync::Arc;

use aulos_events::{EventBus, PlaybackEvent};
use aulos_playback::{AnnotatedTick, PlaybackHandle};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Keep the device playback rate in sync with the wanted speed.
///
/// While playback is stalled the rate is forced to zero so the position
/// does not creep into unbuffered territory; the wanted speed is restored
/// on recovery. Every effective change is published as
/// [`PlaybackEvent::SpeedChanged`].
pub(crate) async fn run_speed_sync(
    device: Arc<dyn PlaybackHandle>,
    mut ticks: watch::Receiver<AnnotatedTick>,
    mut speed: watch::Receiver<f64>,
    bus: EventBus,
    cancel: CancellationToken,
) {
    let mut forced_zero = false;
    loop {
        let stalled = ticks.borrow_and_update().stall.is_some();
        let wanted = *speed.borrow_and_update();
        if stalled && !forced_zero {
            debug!("pausing playback rate while stalled");
            device.set_playback_rate(0.0);
            bus.publish(PlaybackEvent::SpeedChanged(0.0));
            forced_zero = true;
        } else if !stalled
            && (forced_zero || (device.playback_rate() - wanted).abs() > f64::EPSILON)
        {
            device.set_playback_rate(wanted);
            bus.publish(PlaybackEvent::SpeedChanged(wanted));
            forced_zero = false;
        }
        tokio::select! {
            () = cancel.cancelled() => return,
            changed = ticks.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            changed = speed.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    use aulos_core::{ReadyState, TimeRange};
    use aulos_events::Event;
    use aulos_playback::{ClockTick, Stall, StallReason, TickTrigger};

    use super::*;

    struct RateDevice {
        rate: Mutex<f64>,
    }

    impl PlaybackHandle for RateDevice {
        fn position(&self) -> f64 {
            0.0
        }
        fn buffered(&self) -> Vec<TimeRange> {
            Vec::new()
        }
        fn duration(&self) -> f64 {
            0.0
        }
        fn ended(&self) -> bool {
            false
        }
        fn paused(&self) -> bool {
            false
        }
        fn playback_rate(&self) -> f64 {
            *self.rate.lock().unwrap()
        }
        fn ready_state(&self) -> ReadyState {
            ReadyState::EnoughData
        }
        fn seeking(&self) -> bool {
            false
        }
        fn seek_to(&self, _position: f64) {}
        fn set_playback_rate(&self, rate: f64) {
            *self.rate.lock().unwrap() = rate;
        }
        fn request_play(&self) -> bool {
            true
        }
        fn request_pause(&self) {}
    }

    fn annotated(stalled: bool) -> AnnotatedTick {
        AnnotatedTick {
            tick: ClockTick {
                position: 0.0,
                buffer_gap: 0.0,
                buffered: Vec::new(),
                current_range: None,
                duration: 0.0,
                ended: false,
                paused: false,
                playback_rate: 1.0,
                ready_state: ReadyState::EnoughData,
                seeking: false,
                trigger: TickTrigger::TimeUpdate,
            },
            stall: stalled.then(|| Stall {
                reason: StallReason::Buffering,
                since: Instant::now(),
            }),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stall_forces_zero_rate_and_recovery_restores_the_wish() {
        let device = Arc::new(RateDevice {
            rate: Mutex::new(1.0),
        });
        let (tick_tx, tick_rx) = watch::channel(annotated(false));
        let (speed_tx, speed_rx) = watch::channel(2.0);
        let bus = EventBus::new(16);
        let mut events = bus.subscribe();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_speed_sync(
            device.clone() as Arc<dyn PlaybackHandle>,
            tick_rx,
            speed_rx,
            bus,
            cancel.clone(),
        ));

        // The wish differs from the device rate: synced immediately.
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, Event::Playback(PlaybackEvent::SpeedChanged(s)) if s == 2.0));
        assert!((device.playback_rate() - 2.0).abs() < 1e-9);

        tick_tx.send(annotated(true)).unwrap();
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, Event::Playback(PlaybackEvent::SpeedChanged(s)) if s == 0.0));
        assert!(device.playback_rate().abs() < 1e-9);

        tick_tx.send(annotated(false)).unwrap();
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, Event::Playback(PlaybackEvent::SpeedChanged(s)) if s == 2.0));

        drop(speed_tx);
        cancel.cancel();
        task.await.unwrap();
    }
}
