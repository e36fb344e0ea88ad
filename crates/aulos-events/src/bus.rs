#![forbid(unsafe_code)]

use tokio::sync::broadcast;

use crate::Event;

/// Queue depth used by [`EventBus::default`].
const DEFAULT_CAPACITY: usize = 64;

/// Broadcast channel shared by every component of a playback session.
///
/// The bus is cheap to clone and every clone feeds the same subscribers,
/// so the orchestrator, the stall annotator and the fill loops all hold
/// their own copy. Publishing is synchronous and never waits: an event
/// published while nobody listens is simply gone, and a subscriber that
/// falls behind by more than the capacity observes `RecvError::Lagged`
/// and continues from the oldest retained event.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    /// A bus retaining at most `capacity` undelivered events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish one event.
    ///
    /// Sub-enum values convert on the way in, so components write
    /// `bus.publish(SessionEvent::Loaded)` without wrapping.
    pub fn publish(&self, event: impl Into<Event>) {
        let _ = self.tx.send(event.into());
    }

    /// A fresh receiver observing every event published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}
