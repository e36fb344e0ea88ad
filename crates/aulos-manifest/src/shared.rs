#![forbid(unsafe_code)]

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::debug;

use crate::model::{
    KeyId, ManifestData, Period, Representation, RepresentationRef, SegmentRecord,
};

/// The single live manifest of a playback session.
///
/// Cloning shares identity: a refresh merges new data into the same
/// aggregate, so clones held by the orchestration loop observe updates.
/// Writer discipline: only the manifest scheduler calls [`merge_update`];
/// every other component reads, or calls the narrow append-only mutators,
/// which never remove or reorder existing data.
///
/// [`merge_update`]: SharedManifest::merge_update
#[derive(Clone, Debug)]
pub struct SharedManifest {
    inner: Arc<RwLock<ManifestData>>,
}

impl SharedManifest {
    #[must_use]
    pub fn new(data: ManifestData) -> Self {
        Self {
            inner: Arc::new(RwLock::new(data)),
        }
    }

    /// Run a closure over the current manifest state.
    pub fn read<R>(&self, f: impl FnOnce(&ManifestData) -> R) -> R {
        f(&self.inner.read())
    }

    /// The period containing `time`, if any.
    ///
    /// Period containment is end-exclusive, but the reachable window is
    /// closed at its upper edge: a position clamped to the very end of the
    /// content still plays from the last period.
    #[must_use]
    pub fn period_for_time(&self, time: f64) -> Option<Period> {
        self.read(|m| {
            if let Some(period) = m.periods.iter().find(|p| p.contains(time)) {
                return Some(period.clone());
            }
            m.periods
                .last()
                .filter(|p| time >= p.start && p.end.is_some_and(|end| time <= end))
                .cloned()
        })
    }

    /// First period of the timeline.
    #[must_use]
    pub fn first_period(&self) -> Option<Period> {
        self.read(|m| m.periods.first().cloned())
    }

    /// The period following the one with the given id.
    #[must_use]
    pub fn period_after(&self, period_id: &str) -> Option<Period> {
        self.read(|m| {
            let idx = m.periods.iter().position(|p| p.id == period_id)?;
            m.periods.get(idx + 1).cloned()
        })
    }

    /// Earliest reachable position.
    #[must_use]
    pub fn minimum_position(&self) -> Option<f64> {
        self.read(|m| m.periods.first().map(|p| p.start))
    }

    /// Latest reachable position: the end of the last period, or of its
    /// segment indexes while the last period is still open-ended.
    #[must_use]
    pub fn maximum_position(&self) -> Option<f64> {
        self.read(|m| {
            let last = m.periods.last()?;
            if let Some(end) = last.end {
                return Some(end);
            }
            last.adaptations
                .values()
                .flatten()
                .flat_map(|a| &a.representations)
                .filter_map(|r| r.index.end())
                .fold(None, |acc: Option<f64>, end| {
                    Some(acc.map_or(end, |a| a.max(end)))
                })
        })
    }

    /// Total duration; `None` while the content is still growing.
    #[must_use]
    pub fn duration(&self) -> Option<f64> {
        self.read(|m| {
            if m.is_dynamic {
                None
            } else {
                m.periods.last().and_then(|p| p.end)
            }
        })
    }

    #[must_use]
    pub fn lifetime(&self) -> Option<f64> {
        self.read(|m| m.lifetime)
    }

    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        self.read(|m| m.is_dynamic)
    }

    /// Merge a freshly fetched manifest into the live aggregate.
    ///
    /// The period list is replaced by the new one, but per-representation
    /// state that only this session accumulates — segment indexes, protection
    /// records, decipherability flags — is carried over for representations
    /// that survive the refresh.
    pub fn merge_update(&self, update: ManifestData) {
        let mut state = self.inner.write();
        let mut merged = update;
        for new_period in &mut merged.periods {
            let Some(old_period) = state.periods.iter().find(|p| p.id == new_period.id) else {
                continue;
            };
            for (media_type, new_adaptations) in &mut new_period.adaptations {
                let Some(old_adaptations) = old_period.adaptations.get(media_type) else {
                    continue;
                };
                for new_adaptation in new_adaptations {
                    let Some(old_adaptation) =
                        old_adaptations.iter().find(|a| a.id == new_adaptation.id)
                    else {
                        continue;
                    };
                    for new_rep in &mut new_adaptation.representations {
                        if let Some(old_rep) = old_adaptation
                            .representations
                            .iter()
                            .find(|r| r.id == new_rep.id)
                        {
                            carry_over_session_state(old_rep, new_rep);
                        }
                    }
                }
            }
        }
        debug!(
            periods = merged.periods.len(),
            lifetime = ?merged.lifetime,
            "manifest refreshed in place"
        );
        *state = merged;
    }

    /// Append newly discovered segments to one representation's index.
    ///
    /// Returns whether the representation was found.
    pub fn add_segments(
        &self,
        locator: &RepresentationRef,
        segments: Vec<SegmentRecord>,
    ) -> bool {
        let mut state = self.inner.write();
        let Some(rep) = find_representation(&mut state, locator) else {
            return false;
        };
        rep.index.add_segments(segments);
        true
    }

    /// Register protection init data on one representation.
    ///
    /// Returns whether a new record was added.
    pub fn add_protection_data(
        &self,
        locator: &RepresentationRef,
        system_id: &str,
        data: Bytes,
    ) -> bool {
        let mut state = self.inner.write();
        find_representation(&mut state, locator)
            .is_some_and(|rep| rep.add_protection_data(system_id, data))
    }

    /// Blacklist every representation encrypted with one of the given keys.
    ///
    /// Returns whether any decipherability flag changed.
    pub fn mark_undecipherable_keys(&self, key_ids: &[KeyId]) -> bool {
        self.mark_undecipherable(|rep| rep.key_ids.iter().any(|k| key_ids.contains(k)))
    }

    /// Blacklist every representation carrying the given protection init
    /// data. Returns whether any decipherability flag changed.
    pub fn mark_undecipherable_protection_data(&self, data: &Bytes) -> bool {
        self.mark_undecipherable(|rep| rep.protection.iter().any(|p| &p.data == data))
    }

    fn mark_undecipherable(&self, matches: impl Fn(&Representation) -> bool) -> bool {
        let mut state = self.inner.write();
        let mut changed = false;
        for rep in all_representations(&mut state) {
            if rep.decipherable != Some(false) && matches(rep) {
                rep.decipherable = Some(false);
                changed = true;
            }
        }
        changed
    }
}

fn carry_over_session_state(old: &Representation, new: &mut Representation) {
    let mut index = old.index.clone();
    index.add_segments(new.index.segments().to_vec());
    new.index = index;
    for record in &old.protection {
        new.add_protection_data(&record.system_id, record.data.clone());
    }
    if new.decipherable.is_none() {
        new.decipherable = old.decipherable;
    }
}

fn find_representation<'a>(
    state: &'a mut ManifestData,
    locator: &RepresentationRef,
) -> Option<&'a mut Representation> {
    state
        .periods
        .iter_mut()
        .find(|p| p.id == locator.period_id)?
        .adaptations
        .get_mut(&locator.media_type)?
        .iter_mut()
        .find(|a| a.id == locator.adaptation_id)?
        .representations
        .iter_mut()
        .find(|r| r.id == locator.representation_id)
}

fn all_representations(state: &mut ManifestData) -> impl Iterator<Item = &mut Representation> {
    state
        .periods
        .iter_mut()
        .flat_map(|p| p.adaptations.values_mut())
        .flatten()
        .flat_map(|a| &mut a.representations)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use aulos_core::MediaType;

    use super::*;
    use crate::model::{Adaptation, SegmentIndex};

    fn representation(id: &str, key_id: Option<&'static [u8]>) -> Representation {
        Representation {
            id: id.into(),
            bitrate: 800_000,
            codec: Some("avc1.4d401e".into()),
            index: SegmentIndex::new(vec![SegmentRecord {
                start: 0.0,
                duration: 4.0,
                url: None,
            }]),
            protection: Vec::new(),
            key_ids: key_id.map(Bytes::from_static).into_iter().collect(),
            decipherable: None,
        }
    }

    fn manifest() -> SharedManifest {
        let mut adaptations = BTreeMap::new();
        adaptations.insert(
            MediaType::Video,
            vec![Adaptation {
                id: "video-main".into(),
                media_type: MediaType::Video,
                language: None,
                representations: vec![
                    representation("video-lo", Some(b"kid-1")),
                    representation("video-hi", Some(b"kid-2")),
                ],
            }],
        );
        SharedManifest::new(ManifestData {
            periods: vec![Period {
                id: "p1".into(),
                start: 0.0,
                end: Some(60.0),
                adaptations,
            }],
            lifetime: Some(10.0),
            is_dynamic: true,
        })
    }

    fn video_rep(id: &str) -> RepresentationRef {
        RepresentationRef {
            period_id: "p1".into(),
            media_type: MediaType::Video,
            adaptation_id: "video-main".into(),
            representation_id: id.into(),
        }
    }

    #[test]
    fn clones_share_identity() {
        let manifest = manifest();
        let observer = manifest.clone();
        manifest.merge_update(ManifestData {
            periods: Vec::new(),
            lifetime: Some(30.0),
            is_dynamic: true,
        });
        assert_eq!(observer.lifetime(), Some(30.0));
        assert!(observer.first_period().is_none());
    }

    #[test]
    fn merge_carries_session_state_for_surviving_representations() {
        let manifest = manifest();
        let rep = video_rep("video-lo");
        assert!(manifest.add_protection_data(
            &rep,
            "com.widevine.alpha",
            Bytes::from_static(b"init"),
        ));
        assert!(manifest.add_segments(
            &rep,
            vec![SegmentRecord {
                start: 4.0,
                duration: 4.0,
                url: None,
            }],
        ));
        assert!(manifest.mark_undecipherable_keys(&[Bytes::from_static(b"kid-2")]));

        // Refresh with the same period shape but fresh (empty-state) reps.
        let update = manifest.read(|m| ManifestData {
            periods: m
                .periods
                .iter()
                .map(|p| {
                    let mut p = p.clone();
                    for reps in p.adaptations.values_mut().flatten() {
                        for r in &mut reps.representations {
                            r.protection.clear();
                            r.decipherable = None;
                            r.index = SegmentIndex::default();
                        }
                    }
                    p
                })
                .collect(),
            lifetime: Some(10.0),
            is_dynamic: true,
        });
        manifest.merge_update(update);

        manifest.read(|m| {
            let reps = &m.periods[0].adaptations[&MediaType::Video][0].representations;
            let lo = reps.iter().find(|r| r.id == "video-lo").unwrap();
            assert_eq!(lo.protection.len(), 1);
            assert_eq!(lo.index.segments().len(), 2);
            let hi = reps.iter().find(|r| r.id == "video-hi").unwrap();
            assert_eq!(hi.decipherable, Some(false));
        });
    }

    #[test]
    fn blacklist_by_key_reports_changes_once() {
        let manifest = manifest();
        let kid = Bytes::from_static(b"kid-1");
        assert!(manifest.mark_undecipherable_keys(std::slice::from_ref(&kid)));
        // Already blacklisted: nothing changes the second time.
        assert!(!manifest.mark_undecipherable_keys(std::slice::from_ref(&kid)));
    }

    #[test]
    fn blacklist_by_protection_data() {
        let manifest = manifest();
        let rep = video_rep("video-hi");
        let data = Bytes::from_static(b"psshbox");
        assert!(manifest.add_protection_data(&rep, "com.widevine.alpha", data.clone()));
        assert!(manifest.mark_undecipherable_protection_data(&data));
        manifest.read(|m| {
            let reps = &m.periods[0].adaptations[&MediaType::Video][0].representations;
            assert_eq!(
                reps.iter().find(|r| r.id == "video-hi").unwrap().decipherable,
                Some(false)
            );
            assert_eq!(
                reps.iter().find(|r| r.id == "video-lo").unwrap().decipherable,
                None
            );
        });
    }

    #[test]
    fn period_lookup_and_window() {
        let manifest = manifest();
        assert_eq!(manifest.period_for_time(30.0).unwrap().id, "p1");
        // The exact window end belongs to the last period.
        assert_eq!(manifest.period_for_time(60.0).unwrap().id, "p1");
        assert!(manifest.period_for_time(61.0).is_none());
        assert_eq!(manifest.minimum_position(), Some(0.0));
        assert_eq!(manifest.maximum_position(), Some(60.0));
        // Dynamic manifests report no fixed duration.
        assert_eq!(manifest.duration(), None);
    }
}
