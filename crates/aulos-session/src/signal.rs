#![forbid(unsafe_code)]

use aulos_core::MediaType;
use bytes::Bytes;

/// Control signals emitted by the buffer-filling loops and consumed by the
/// orchestrator.
///
/// Signals from one loop arrive in emission order; signals from different
/// loops interleave arbitrarily.
#[derive(Clone, Debug)]
pub enum BufferSignal {
    /// A loop reached the end of the known segments of a still-growing
    /// stream: refresh the manifest as soon as possible.
    NeedsManifestRefresh,
    /// A resource the manifest announced turned out to be gone; the
    /// manifest is probably stale and should be refreshed shortly.
    ManifestMightBeOutOfSync,
    /// The current media source cannot carry the wanted representation;
    /// tear it down and rebuild at the given position.
    NeedsMediaSourceReload { position: f64, is_paused: bool },
    /// Protection initialization data was found inside a segment.
    ProtectedSegment { system_id: String, data: Bytes },
    /// Playback is stuck right before a hole the segment index explains.
    DiscontinuityEncountered {
        media_type: MediaType,
        /// First position with data after the hole.
        next_position: f64,
    },
    /// This loop reached the true end of its content. The orchestrator
    /// announces end-of-stream to the host only once every loop did.
    EndOfStream { media_type: MediaType },
    /// New segments appeared after this loop's end-of-stream announcement.
    ResumeStream { media_type: MediaType },
    /// A loop switched to another representation.
    RepresentationChanged {
        media_type: MediaType,
        representation_id: String,
    },
}
