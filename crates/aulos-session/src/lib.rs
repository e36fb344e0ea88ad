#![forbid(unsafe_code)]

//! Playback orchestration.
//!
//! A [`Session`] ties the whole engine together: it opens the media source,
//! fetches and keeps refreshing the manifest, negotiates content
//! protection, runs one buffer-filling loop per media type and reacts to
//! their signals. The host plugs in through the traits of [`hosts`]; the
//! session reports progress on the shared event bus.

mod error;
mod eos;
mod fill;
pub mod hosts;
mod scheduler;
mod session;
mod signal;
mod speed;
mod start;

pub use error::{SessionError, SessionResult};
pub use scheduler::{ManifestScheduler, OUT_OF_SYNC_REFRESH_DELAY, RefreshRequester};
pub use session::{
    ProtectionConfig, Session, SessionController, SessionDeps, SessionOptions,
};
pub use signal::BufferSignal;
pub use start::{StartPosition, initial_position};
