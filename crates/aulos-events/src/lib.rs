#![forbid(unsafe_code)]

//! Typed event bus for the aulos playback engine.
//!
//! One dispatcher per session: every component receives a cloned
//! [`EventBus`] and publishes typed events directly; the presentation layer
//! subscribes to all of them.

mod bus;
mod event;
mod session;

pub use bus::EventBus;
pub use event::Event;
pub use session::{BufferEvent, PlaybackEvent, PlaybackWarning, SessionEvent};
