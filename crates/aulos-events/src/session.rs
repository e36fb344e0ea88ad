#![forbid(unsafe_code)]

use aulos_core::MediaType;
use aulos_playback::Stall;
use thiserror::Error;

/// Recoverable conditions surfaced to the presentation layer.
///
/// Warnings never interrupt the orchestration state machine.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum PlaybackWarning {
    /// The host refused to start playback automatically; playback stays
    /// paused until an external user gesture.
    #[error("autoplay blocked by the host")]
    AutoplayBlocked,
    /// The host announced loaded metadata but the content is not actually
    /// loadable yet.
    #[error("host falsely announced loaded metadata")]
    NotLoadedMetadata,
}

/// Session lifecycle events.
#[derive(Clone, Debug)]
pub enum SessionEvent {
    /// The manifest has been fetched and parsed for the first time.
    ManifestReady,
    /// The content is loaded and ready to play.
    Loaded,
    /// The media source is being reloaded at a preserved position.
    ReloadingMediaSource,
    /// A minor, recoverable problem happened.
    Warning(PlaybackWarning),
}

/// Playback health events.
#[derive(Clone, Debug)]
pub enum PlaybackEvent {
    /// Stall classification changed or was re-emitted; `None` means playing.
    Stalled(Option<Stall>),
    /// Effective playback rate changed (user wish or an automatic pause
    /// while the buffer is rebuilt).
    SpeedChanged(f64),
}

/// Buffer-loop events passed through to observers.
#[derive(Clone, Debug)]
pub enum BufferEvent {
    /// A buffer switched to another representation.
    RepresentationChanged {
        media_type: MediaType,
        representation_id: String,
    },
    /// Decipherability of some representations changed after blacklisting.
    DecipherabilityUpdate,
}
