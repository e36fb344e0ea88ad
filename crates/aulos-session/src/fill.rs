#![forbid(unsafe_code)]

//! Per-media-type buffer filling.
//!
//! One [`FillLoop`] runs per media type of a generation. It walks the
//! segment index of the representation the ABR policy picks, keeps the
//! container filled up to the buffer goal ahead of the playback position,
//! and reports everything it cannot handle itself as a [`BufferSignal`].

use std::sync::Arc;

use aulos_core::MediaType;
use aulos_manifest::{Period, Representation, RepresentationRef, SharedManifest};
use aulos_playback::AnnotatedTick;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::SessionResult;
use crate::hosts::{AbrPolicy, BufferContainer, SegmentFetch, SegmentPipeline};
use crate::signal::BufferSignal;

/// Tolerance when comparing segment boundaries, in seconds.
const TIME_EPSILON: f64 = 1e-3;

pub(crate) struct FillLoop {
    pub(crate) media_type: MediaType,
    pub(crate) manifest: SharedManifest,
    pub(crate) container: Arc<dyn BufferContainer>,
    /// Codec the container was created with. A representation with another
    /// codec cannot be appended and forces a media-source reload.
    pub(crate) container_codec: Option<String>,
    pub(crate) abr: Arc<dyn AbrPolicy>,
    pub(crate) pipeline: Arc<dyn SegmentPipeline>,
    pub(crate) ticks: watch::Receiver<AnnotatedTick>,
    pub(crate) signals: mpsc::Sender<BufferSignal>,
    /// Buffer goal ahead of the playback position, in seconds.
    pub(crate) wanted_ahead: f64,
    /// Period the loop is currently filling from.
    pub(crate) period_id: String,
}

impl FillLoop {
    pub(crate) async fn run(mut self, cancel: CancellationToken) -> SessionResult<()> {
        let mut current_rep: Option<String> = None;
        // End of the data appended so far; loading resumes from here.
        let mut loaded_until: Option<f64> = None;
        let mut refresh_demanded = false;
        let mut ended = false;
        let mut skip_hint: Option<f64> = None;

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let annotated = self.ticks.borrow_and_update().clone();
            let tick = annotated.tick;

            // Refreshes rewrite the period list; always act on the current
            // manifest state.
            let Some(period) = self.period() else {
                match self.manifest.period_for_time(tick.position) {
                    Some(found) => {
                        self.period_id = found.id;
                        current_rep = None;
                        loaded_until = None;
                    }
                    None => {
                        if !self.wait(&cancel).await {
                            return Ok(());
                        }
                    }
                }
                continue;
            };

            // Track selection is out of scope: first adaptation of the type.
            let Some(adaptation) = period
                .adaptations
                .get(&self.media_type)
                .and_then(|list| list.first())
                .cloned()
            else {
                if let Some(next_period) = self.manifest.period_after(&period.id) {
                    self.period_id = next_period.id;
                    current_rep = None;
                    continue;
                }
                if !ended && !self.manifest.is_dynamic() {
                    let signal = BufferSignal::EndOfStream {
                        media_type: self.media_type,
                    };
                    if !self.emit(signal).await {
                        return Ok(());
                    }
                    ended = true;
                }
                if !self.wait(&cancel).await {
                    return Ok(());
                }
                continue;
            };

            let candidates: Vec<Representation> = adaptation
                .representations
                .iter()
                .filter(|r| r.decipherable != Some(false))
                .cloned()
                .collect();
            let Some(rep) = self
                .abr
                .pick_representation(self.media_type, &candidates)
                .cloned()
            else {
                // Nothing decipherable or selectable right now.
                if !self.wait(&cancel).await {
                    return Ok(());
                }
                continue;
            };

            if current_rep.as_deref() != Some(rep.id.as_str()) {
                debug!(
                    media_type = ?self.media_type,
                    representation = %rep.id,
                    "representation picked"
                );
                let changed = BufferSignal::RepresentationChanged {
                    media_type: self.media_type,
                    representation_id: rep.id.clone(),
                };
                if !self.emit(changed).await {
                    return Ok(());
                }
                // A created container is stuck with its codec; switching to
                // an incompatible representation needs a fresh media source.
                if let (Some(have), Some(want)) =
                    (self.container_codec.as_deref(), rep.codec.as_deref())
                {
                    if have != want {
                        let _ = self
                            .emit(BufferSignal::NeedsMediaSourceReload {
                                position: tick.position,
                                is_paused: tick.paused,
                            })
                            .await;
                        return Ok(());
                    }
                }
                current_rep = Some(rep.id.clone());
            }

            let until = match loaded_until {
                Some(value) => value,
                None => {
                    let value = tick.position.max(period.start);
                    loaded_until = Some(value);
                    value
                }
            };

            // Enough buffered ahead of the position: idle until something
            // changes.
            if until - tick.position >= self.wanted_ahead {
                if !self.wait(&cancel).await {
                    return Ok(());
                }
                continue;
            }

            let next = rep
                .index
                .segments()
                .iter()
                .find(|s| s.start + s.duration > until + TIME_EPSILON)
                .cloned();
            let Some(segment) = next else {
                let index_end = rep.index.end().unwrap_or(period.start);
                let period_done = period
                    .end
                    .is_some_and(|end| index_end >= end - TIME_EPSILON);
                if period_done {
                    if let Some(next_period) = self.manifest.period_after(&period.id) {
                        loaded_until = Some(until.max(next_period.start));
                        self.period_id = next_period.id;
                        current_rep = None;
                        continue;
                    }
                }
                if self.manifest.is_dynamic() {
                    if !refresh_demanded {
                        debug!(
                            media_type = ?self.media_type,
                            "known segments exhausted, demanding a manifest refresh"
                        );
                        if !self.emit(BufferSignal::NeedsManifestRefresh).await {
                            return Ok(());
                        }
                        refresh_demanded = true;
                    }
                } else if !ended {
                    let signal = BufferSignal::EndOfStream {
                        media_type: self.media_type,
                    };
                    if !self.emit(signal).await {
                        return Ok(());
                    }
                    ended = true;
                }
                if !self.wait(&cancel).await {
                    return Ok(());
                }
                continue;
            };

            refresh_demanded = false;
            if ended {
                // Segments appeared again after an end-of-stream
                // announcement.
                let signal = BufferSignal::ResumeStream {
                    media_type: self.media_type,
                };
                if !self.emit(signal).await {
                    return Ok(());
                }
                ended = false;
            }

            // Playback stuck outside buffered data right before this
            // segment: ask the orchestrator for a corrective seek.
            if annotated.stall.is_some()
                && tick.buffer_gap.is_infinite()
                && segment.start > tick.position
                && skip_hint != Some(segment.start)
            {
                let signal = BufferSignal::DiscontinuityEncountered {
                    media_type: self.media_type,
                    next_position: segment.start,
                };
                if !self.emit(signal).await {
                    return Ok(());
                }
                skip_hint = Some(segment.start);
            }

            let locator = RepresentationRef {
                period_id: period.id.clone(),
                media_type: self.media_type,
                adaptation_id: adaptation.id.clone(),
                representation_id: rep.id.clone(),
            };
            let fetched = tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                result = self.pipeline.fetch_segment(&locator, &segment) => result?,
            };
            match fetched {
                SegmentFetch::Chunk(chunk) => {
                    for (system_id, data) in &chunk.protection {
                        self.manifest
                            .add_protection_data(&locator, system_id, data.clone());
                        let signal = BufferSignal::ProtectedSegment {
                            system_id: system_id.clone(),
                            data: data.clone(),
                        };
                        if !self.emit(signal).await {
                            return Ok(());
                        }
                    }
                    tokio::select! {
                        () = cancel.cancelled() => return Ok(()),
                        result = self.container.append(chunk.payload) => result?,
                    }
                    loaded_until = Some(segment.start + segment.duration);
                    trace!(
                        media_type = ?self.media_type,
                        start = segment.start,
                        "segment appended"
                    );
                }
                SegmentFetch::OutOfSync => {
                    if !self.emit(BufferSignal::ManifestMightBeOutOfSync).await {
                        return Ok(());
                    }
                    if !self.wait(&cancel).await {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn period(&self) -> Option<Period> {
        self.manifest
            .read(|m| m.periods.iter().find(|p| p.id == self.period_id).cloned())
    }

    /// `false` means the loop should stop: cancelled, or the clock is gone.
    async fn wait(&mut self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            () = cancel.cancelled() => false,
            changed = self.ticks.changed() => changed.is_ok(),
        }
    }

    /// `false` when the orchestrator stopped listening.
    async fn emit(&self, signal: BufferSignal) -> bool {
        self.signals.send(signal).await.is_ok()
    }
}
