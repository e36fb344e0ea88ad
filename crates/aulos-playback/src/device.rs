#![forbid(unsafe_code)]

use aulos_core::{ReadyState, TimeRange};

/// Control surface of the playback device.
///
/// Implemented by the host embedding the engine. All reads are cheap,
/// synchronous snapshots of the device state; `seek_to` and
/// `set_playback_rate` are fire-and-forget commands.
pub trait PlaybackHandle: Send + Sync {
    fn position(&self) -> f64;
    fn buffered(&self) -> Vec<TimeRange>;
    fn duration(&self) -> f64;
    fn ended(&self) -> bool;
    fn paused(&self) -> bool;
    fn playback_rate(&self) -> f64;
    fn ready_state(&self) -> ReadyState;
    fn seeking(&self) -> bool;

    fn seek_to(&self, position: f64);
    fn set_playback_rate(&self, rate: f64);

    /// Ask the device to start playing. Returns `false` when the host
    /// refuses, e.g. an autoplay policy blocking unmuted playback.
    fn request_play(&self) -> bool;
    fn request_pause(&self);
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Scriptable in-memory device for unit tests.
    pub(crate) struct FakeDevice {
        state: Mutex<FakeState>,
    }

    struct FakeState {
        position: f64,
        buffered: Vec<TimeRange>,
        duration: f64,
        ended: bool,
        paused: bool,
        rate: f64,
        ready_state: ReadyState,
        seeking: bool,
        seeks: Vec<f64>,
    }

    impl FakeDevice {
        pub(crate) fn new() -> Self {
            Self {
                state: Mutex::new(FakeState {
                    position: 0.0,
                    buffered: Vec::new(),
                    duration: 0.0,
                    ended: false,
                    paused: true,
                    rate: 1.0,
                    ready_state: ReadyState::Nothing,
                    seeking: false,
                    seeks: Vec::new(),
                }),
            }
        }

        pub(crate) fn set_position(&self, position: f64) {
            self.state.lock().unwrap().position = position;
        }

        pub(crate) fn set_buffered(&self, buffered: Vec<TimeRange>) {
            self.state.lock().unwrap().buffered = buffered;
        }

        pub(crate) fn set_duration(&self, duration: f64) {
            self.state.lock().unwrap().duration = duration;
        }

        pub(crate) fn set_ready_state(&self, ready_state: ReadyState) {
            self.state.lock().unwrap().ready_state = ready_state;
        }

        pub(crate) fn recorded_seeks(&self) -> Vec<f64> {
            self.state.lock().unwrap().seeks.clone()
        }
    }

    impl PlaybackHandle for FakeDevice {
        fn position(&self) -> f64 {
            self.state.lock().unwrap().position
        }

        fn buffered(&self) -> Vec<TimeRange> {
            self.state.lock().unwrap().buffered.clone()
        }

        fn duration(&self) -> f64 {
            self.state.lock().unwrap().duration
        }

        fn ended(&self) -> bool {
            self.state.lock().unwrap().ended
        }

        fn paused(&self) -> bool {
            self.state.lock().unwrap().paused
        }

        fn playback_rate(&self) -> f64 {
            self.state.lock().unwrap().rate
        }

        fn ready_state(&self) -> ReadyState {
            self.state.lock().unwrap().ready_state
        }

        fn seeking(&self) -> bool {
            self.state.lock().unwrap().seeking
        }

        fn seek_to(&self, position: f64) {
            let mut state = self.state.lock().unwrap();
            state.position = position;
            state.seeks.push(position);
        }

        fn set_playback_rate(&self, rate: f64) {
            self.state.lock().unwrap().rate = rate;
        }

        fn request_play(&self) -> bool {
            self.state.lock().unwrap().paused = false;
            true
        }

        fn request_pause(&self) {
            self.state.lock().unwrap().paused = true;
        }
    }
}
