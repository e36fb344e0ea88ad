#![forbid(unsafe_code)]

use aulos_manifest::SharedManifest;
use tracing::debug;

use crate::error::{SessionError, SessionResult};

/// Distance kept from the live edge when no starting position is given.
const DEFAULT_LIVE_GAP: f64 = 10.0;
const LOW_LATENCY_LIVE_GAP: f64 = 3.5;

/// Where playback should begin.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StartPosition {
    /// Absolute position on the media timeline, in seconds.
    Absolute(f64),
    /// Offset from the earliest reachable position.
    FromBeginning(f64),
    /// Offset back from the latest reachable position.
    FromEnd(f64),
    /// Percentage of the reachable window, 0 to 100.
    Percentage(f64),
}

/// Resolve the initial playback position against the manifest's reachable
/// window.
///
/// Wishes outside the window clamp to it. With no wish, static content
/// starts at the beginning and live content a safety gap behind the edge.
pub fn initial_position(
    manifest: &SharedManifest,
    low_latency: bool,
    start_at: Option<&StartPosition>,
) -> SessionResult<f64> {
    let minimum = manifest
        .minimum_position()
        .ok_or(SessionError::StartingTimeNotFound)?;
    let maximum = manifest.maximum_position().unwrap_or(minimum).max(minimum);

    let wanted = match start_at {
        Some(StartPosition::Absolute(position)) => *position,
        Some(StartPosition::FromBeginning(offset)) => minimum + offset,
        Some(StartPosition::FromEnd(offset)) => maximum - offset,
        Some(StartPosition::Percentage(percentage)) => {
            minimum + (maximum - minimum) * (percentage.clamp(0.0, 100.0) / 100.0)
        }
        None if manifest.is_dynamic() => {
            let gap = if low_latency {
                LOW_LATENCY_LIVE_GAP
            } else {
                DEFAULT_LIVE_GAP
            };
            maximum - gap
        }
        None => minimum,
    };

    let resolved = wanted.clamp(minimum, maximum);
    debug!(resolved, minimum, maximum, "initial position resolved");
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use aulos_manifest::{ManifestData, Period};
    use rstest::rstest;

    use super::*;

    fn manifest(start: f64, end: f64, is_dynamic: bool) -> SharedManifest {
        SharedManifest::new(ManifestData {
            periods: vec![Period {
                id: "p1".into(),
                start,
                end: Some(end),
                adaptations: std::collections::BTreeMap::new(),
            }],
            lifetime: None,
            is_dynamic,
        })
    }

    #[rstest]
    #[case(Some(StartPosition::Absolute(42.0)), 42.0)]
    #[case(Some(StartPosition::Absolute(900.0)), 100.0)]
    #[case(Some(StartPosition::FromBeginning(5.0)), 15.0)]
    #[case(Some(StartPosition::FromEnd(20.0)), 80.0)]
    #[case(Some(StartPosition::Percentage(50.0)), 55.0)]
    #[case(None, 10.0)]
    fn static_window_resolution(
        #[case] start_at: Option<StartPosition>,
        #[case] expected: f64,
    ) {
        let manifest = manifest(10.0, 100.0, false);
        let resolved = initial_position(&manifest, false, start_at.as_ref()).unwrap();
        assert!((resolved - expected).abs() < 1e-9);
    }

    #[rstest]
    #[case(StartPosition::Absolute(900.0))]
    #[case(StartPosition::FromEnd(0.0))]
    fn clamped_start_resolves_inside_the_last_period(#[case] start_at: StartPosition) {
        let manifest = manifest(10.0, 100.0, false);
        let resolved = initial_position(&manifest, false, Some(&start_at)).unwrap();
        assert!((resolved - 100.0).abs() < 1e-9);
        // The clamp must land on a playable position, not a fatal lookup miss.
        assert_eq!(manifest.period_for_time(resolved).unwrap().id, "p1");
    }

    #[test]
    fn live_default_keeps_a_gap_from_the_edge() {
        let manifest = manifest(0.0, 600.0, true);
        let resolved = initial_position(&manifest, false, None).unwrap();
        assert!((resolved - 590.0).abs() < 1e-9);
        let resolved = initial_position(&manifest, true, None).unwrap();
        assert!((resolved - 596.5).abs() < 1e-9);
    }

    #[test]
    fn empty_manifest_is_an_error() {
        let manifest = SharedManifest::new(ManifestData::default());
        assert!(matches!(
            initial_position(&manifest, false, None),
            Err(SessionError::StartingTimeNotFound)
        ));
    }
}
