#![forbid(unsafe_code)]

/// Kind of media carried by a track or buffer.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub enum MediaType {
    Audio,
    Video,
    Text,
}

impl MediaType {
    /// Whether this type is appended into a host-mandated (native) buffer
    /// container.
    ///
    /// Native containers must be created once, up front, per loading
    /// generation; text buffers are managed entirely by the engine and can be
    /// created at will.
    #[must_use]
    pub fn is_native(self) -> bool {
        matches!(self, Self::Audio | Self::Video)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Text => "text",
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Readiness level reported by the playback device.
///
/// Mirrors the conventional 0..=4 media readiness ladder.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub enum ReadyState {
    /// No information about the media is available.
    Nothing,
    /// Duration and dimensions are known, no decodable data yet.
    Metadata,
    /// Data for the current position only.
    CurrentData,
    /// Enough data to advance at least a little.
    FutureData,
    /// Enough data to play through without rebuffering.
    EnoughData,
}

impl ReadyState {
    /// Metadata (or more) has been loaded.
    #[must_use]
    pub fn has_metadata(self) -> bool {
        self >= Self::Metadata
    }

    /// Only metadata is available: the device cannot decode anything yet.
    #[must_use]
    pub fn is_minimal(self) -> bool {
        self == Self::Metadata
    }

    /// More than metadata is available.
    #[must_use]
    pub fn has_current_data(self) -> bool {
        self > Self::Metadata
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(MediaType::Audio, true)]
    #[case(MediaType::Video, true)]
    #[case(MediaType::Text, false)]
    fn native_types(#[case] media_type: MediaType, #[case] native: bool) {
        assert_eq!(media_type.is_native(), native);
    }

    #[test]
    fn ready_state_ordering() {
        assert!(ReadyState::Nothing < ReadyState::Metadata);
        assert!(ReadyState::Metadata.is_minimal());
        assert!(!ReadyState::Metadata.has_current_data());
        assert!(ReadyState::FutureData.has_current_data());
        assert!(ReadyState::EnoughData.has_metadata());
    }
}
