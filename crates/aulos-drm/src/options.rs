#![forbid(unsafe_code)]

//! Protection configuration candidates and capability descriptors.

/// Canonical key-system family names mapped to the concrete system ids a
/// host may know them by. A configured family expands to every historical
/// identifier, attempted in order.
const KEY_SYSTEM_FAMILIES: &[(&str, &[&str])] = &[
    ("widevine", &["com.widevine.alpha"]),
    (
        "playready",
        &[
            "com.microsoft.playready",
            "com.chromecast.playready",
            "com.youtube.playready",
        ],
    ),
    ("clearkey", &["webkit-org.w3.clearkey", "org.w3.clearkey"]),
    ("fairplay", &["com.apple.fps.1_0"]),
];

/// Robustness ladder submitted for widevine when the caller specifies none,
/// strongest first so the host picks the best level it supports.
const DEFAULT_WIDEVINE_ROBUSTNESSES: &[&str] = &[
    "HW_SECURE_ALL",
    "HW_SECURE_DECODE",
    "HW_SECURE_CRYPTO",
    "SW_SECURE_DECODE",
    "SW_SECURE_CRYPTO",
];

/// Session kinds a capability descriptor may request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionType {
    Temporary,
    PersistentLicense,
}

/// Whether a host feature is needed or merely tolerated.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Requirement {
    Optional,
    Required,
}

/// One requested robustness level for a track type.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TrackCapability {
    pub content_type: String,
    /// `None` submits an unspecified robustness.
    pub robustness: Option<String>,
}

/// Capability descriptor handed to the protection host.
#[derive(Clone, Debug, PartialEq)]
pub struct AccessConfiguration {
    pub init_data_types: Vec<String>,
    pub audio_capabilities: Vec<TrackCapability>,
    pub video_capabilities: Vec<TrackCapability>,
    pub distinctive_identifier: Requirement,
    pub persistent_state: Requirement,
    pub session_types: Vec<SessionType>,
}

/// One ranked candidate protection configuration.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KeySystemOption {
    /// Family name (e.g. `"widevine"`) or a concrete system id.
    pub key_type: String,
    /// Request persistent-license sessions.
    pub persistent_license: bool,
    /// Require persistent state even without persistent licenses.
    pub persistent_state_required: bool,
    /// Require a distinctive identifier.
    pub distinctive_identifier_required: bool,
    /// Acceptable video robustness levels, in preference order.
    pub video_robustnesses: Vec<String>,
    /// Acceptable audio robustness levels, in preference order.
    pub audio_robustnesses: Vec<String>,
}

impl KeySystemOption {
    #[must_use]
    pub fn new(key_type: impl Into<String>) -> Self {
        Self {
            key_type: key_type.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_persistent_license(mut self) -> Self {
        self.persistent_license = true;
        self
    }

    #[must_use]
    pub fn with_distinctive_identifier_required(mut self) -> Self {
        self.distinctive_identifier_required = true;
        self
    }
}

/// A concrete query derived from a candidate: one system id plus the
/// capability descriptor to submit for it.
#[derive(Clone, Debug)]
pub struct ProtectionQuery {
    /// Canonical family name, when known.
    pub family: Option<String>,
    /// Concrete system id submitted to the host.
    pub system_id: String,
    /// Index of the originating candidate.
    pub candidate_index: usize,
}

/// Canonical family name for a concrete system id, if any family lists it.
#[must_use]
fn family_of(system_id: &str) -> Option<&'static str> {
    KEY_SYSTEM_FAMILIES
        .iter()
        .find(|(_, ids)| ids.contains(&system_id))
        .map(|(name, _)| *name)
}

/// Expand ranked candidates into the ordered list of concrete queries.
///
/// A family name maps to every underlying system id; a raw system id maps
/// to itself. Candidate rank dominates: all queries of candidate 0 precede
/// all queries of candidate 1.
#[must_use]
pub fn expand_candidates(candidates: &[KeySystemOption]) -> Vec<ProtectionQuery> {
    let mut queries = Vec::new();
    for (index, option) in candidates.iter().enumerate() {
        let family = KEY_SYSTEM_FAMILIES
            .iter()
            .find(|(name, _)| *name == option.key_type);
        if let Some((name, system_ids)) = family {
            for system_id in *system_ids {
                queries.push(ProtectionQuery {
                    family: Some((*name).to_owned()),
                    system_id: (*system_id).to_owned(),
                    candidate_index: index,
                });
            }
        } else {
            queries.push(ProtectionQuery {
                family: family_of(&option.key_type).map(str::to_owned),
                system_id: option.key_type.clone(),
                candidate_index: index,
            });
        }
    }
    queries
}

/// Build the capability descriptor for one query.
///
/// Robustness levels are enumerated in the order the caller supplied so the
/// host can pick the strongest it supports; with none specified, widevine
/// gets the default ladder and anything else a single unspecified entry.
#[must_use]
pub fn build_configuration(
    family: Option<&str>,
    option: &KeySystemOption,
) -> AccessConfiguration {
    let mut session_types = vec![SessionType::Temporary];
    let mut persistent_state = Requirement::Optional;
    if option.persistent_license {
        persistent_state = Requirement::Required;
        session_types.push(SessionType::PersistentLicense);
    }
    if option.persistent_state_required {
        persistent_state = Requirement::Required;
    }
    let distinctive_identifier = if option.distinctive_identifier_required {
        Requirement::Required
    } else {
        Requirement::Optional
    };

    let defaults: Vec<String> = if family == Some("widevine") {
        DEFAULT_WIDEVINE_ROBUSTNESSES
            .iter()
            .map(|s| (*s).to_owned())
            .collect()
    } else {
        Vec::new()
    };
    let video = robustness_capabilities(
        "video/mp4;codecs=\"avc1.4d401e\"",
        &option.video_robustnesses,
        &defaults,
    );
    let audio = robustness_capabilities(
        "audio/mp4;codecs=\"mp4a.40.2\"",
        &option.audio_robustnesses,
        &defaults,
    );

    AccessConfiguration {
        init_data_types: vec!["cenc".to_owned()],
        audio_capabilities: audio,
        video_capabilities: video,
        distinctive_identifier,
        persistent_state,
        session_types,
    }
}

fn robustness_capabilities(
    content_type: &str,
    requested: &[String],
    defaults: &[String],
) -> Vec<TrackCapability> {
    let levels = if requested.is_empty() {
        defaults
    } else {
        requested
    };
    if levels.is_empty() {
        return vec![TrackCapability {
            content_type: content_type.to_owned(),
            robustness: None,
        }];
    }
    levels
        .iter()
        .map(|level| TrackCapability {
            content_type: content_type.to_owned(),
            robustness: Some(level.clone()),
        })
        .collect()
}
