#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use aulos_core::MediaType;
use bytes::Bytes;
use tracing::warn;
use url::Url;

/// Raw key identifier carried by protected representations.
pub type KeyId = Bytes;

/// One media segment entry of a representation's index, in seconds.
#[derive(Clone, Debug, PartialEq)]
pub struct SegmentRecord {
    pub start: f64,
    pub duration: f64,
    /// Resource location, when already known.
    pub url: Option<Url>,
}

/// Ordered list of the segments known for one representation.
///
/// Appended to as init-segment parsing discovers more segments.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SegmentIndex {
    segments: Vec<SegmentRecord>,
}

impl SegmentIndex {
    #[must_use]
    pub fn new(segments: Vec<SegmentRecord>) -> Self {
        Self { segments }
    }

    #[must_use]
    pub fn segments(&self) -> &[SegmentRecord] {
        &self.segments
    }

    /// Append newly discovered segments after the last known one.
    ///
    /// Entries starting at or before the current index end are dropped, so
    /// repeated insertion of an overlapping window is harmless.
    pub fn add_segments(&mut self, new_segments: impl IntoIterator<Item = SegmentRecord>) {
        let known_end = self.end();
        for segment in new_segments {
            if known_end.is_none_or(|end| segment.start > end - 1e-9) {
                self.segments.push(segment);
            }
        }
    }

    /// End time of the last known segment.
    #[must_use]
    pub fn end(&self) -> Option<f64> {
        self.segments.last().map(|s| s.start + s.duration)
    }
}

/// A content-protection record attached to a representation.
#[derive(Clone, Debug, PartialEq)]
pub struct ProtectionRecord {
    /// Protection system identifier (e.g. a reverse-domain name).
    pub system_id: String,
    /// Raw initialization data for that system.
    pub data: Bytes,
}

/// One quality/bitrate variant of an adaptation.
#[derive(Clone, Debug)]
pub struct Representation {
    pub id: String,
    pub bitrate: u32,
    pub codec: Option<String>,
    pub index: SegmentIndex,
    /// Protection records, deduplicated by system id.
    pub protection: Vec<ProtectionRecord>,
    /// Key ids this representation is encrypted with, when known.
    pub key_ids: Vec<KeyId>,
    /// `Some(false)` once blacklisted as undecipherable.
    pub decipherable: Option<bool>,
}

impl Representation {
    /// Register protection init data for a system id.
    ///
    /// A second registration for the same system id is deduplicated; when the
    /// bytes differ this is a non-fatal anomaly, logged and ignored.
    ///
    /// Returns whether the record was added.
    pub fn add_protection_data(&mut self, system_id: &str, data: Bytes) -> bool {
        if let Some(existing) = self.protection.iter().find(|p| p.system_id == system_id) {
            if existing.data != data {
                warn!(
                    representation = %self.id,
                    system_id,
                    "conflicting protection init data for already-registered system id"
                );
            }
            return false;
        }
        self.protection.push(ProtectionRecord {
            system_id: system_id.to_owned(),
            data,
        });
        true
    }
}

/// A selectable media track composed of interchangeable representations.
#[derive(Clone, Debug)]
pub struct Adaptation {
    pub id: String,
    pub media_type: MediaType,
    pub language: Option<String>,
    /// Ordered representations (typically by bitrate).
    pub representations: Vec<Representation>,
}

/// A time-bounded part of the timeline offering a fixed set of adaptations.
#[derive(Clone, Debug)]
pub struct Period {
    pub id: String,
    /// Start time, in seconds.
    pub start: f64,
    /// End time; `None` for the still-growing last period of a live stream.
    pub end: Option<f64>,
    /// Adaptations keyed by media type.
    pub adaptations: BTreeMap<MediaType, Vec<Adaptation>>,
}

impl Period {
    /// Whether `time` falls inside this period.
    #[must_use]
    pub fn contains(&self, time: f64) -> bool {
        time >= self.start && self.end.is_none_or(|end| time < end)
    }

    /// Media types offered by this period.
    #[must_use]
    pub fn media_types(&self) -> Vec<MediaType> {
        self.adaptations.keys().copied().collect()
    }
}

/// Parsed manifest payload, as produced by a fetch.
///
/// This is the value a refresh merges into the live [`SharedManifest`]; it
/// never becomes the manifest identity itself.
#[derive(Clone, Debug, Default)]
pub struct ManifestData {
    /// Periods ordered by start time, non-overlapping.
    pub periods: Vec<Period>,
    /// Suggested refresh interval, in seconds. Non-positive or absent
    /// disables automatic refresh.
    pub lifetime: Option<f64>,
    /// Whether the content is still evolving (live).
    pub is_dynamic: bool,
}

/// Locates one representation inside the manifest.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RepresentationRef {
    pub period_id: String,
    pub media_type: MediaType,
    pub adaptation_id: String,
    pub representation_id: String,
}
