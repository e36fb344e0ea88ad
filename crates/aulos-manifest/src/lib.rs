#![forbid(unsafe_code)]

//! Content description data model.
//!
//! A [`SharedManifest`] is the one shared mutable object of a playback
//! session: refresh merges new data into the existing aggregate so that
//! references held by the orchestration loop stay valid, and narrow
//! append-only mutators (protection data, decipherability flags, segment
//! insertion) are safe to call from any component.

mod model;
mod shared;

pub use model::{
    Adaptation, KeyId, ManifestData, Period, ProtectionRecord, Representation,
    RepresentationRef, SegmentIndex, SegmentRecord,
};
pub use shared::SharedManifest;
