#![forbid(unsafe_code)]

use crate::session::{BufferEvent, PlaybackEvent, SessionEvent};

/// Unified event for the full playback engine.
///
/// Hierarchical: each subsystem has its own variant with a sub-enum.
#[derive(Clone, Debug)]
pub enum Event {
    /// Session lifecycle event.
    Session(SessionEvent),
    /// Playback health event.
    Playback(PlaybackEvent),
    /// Buffer-loop event.
    Buffer(BufferEvent),
}

impl From<SessionEvent> for Event {
    fn from(e: SessionEvent) -> Self {
        Self::Session(e)
    }
}

impl From<PlaybackEvent> for Event {
    fn from(e: PlaybackEvent) -> Self {
        Self::Playback(e)
    }
}

impl From<BufferEvent> for Event {
    fn from(e: BufferEvent) -> Self {
        Self::Buffer(e)
    }
}
