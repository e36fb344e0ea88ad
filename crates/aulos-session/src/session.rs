#![forbid(unsafe_code)]

//! The playback session orchestrator.
//!
//! One [`Session`] owns the whole pipeline of a playback: it opens the
//! media source, fetches the manifest, negotiates content protection,
//! starts the buffer-filling loops and reacts to their signals until
//! stopped. A media-source reload rebuilds the source subtree while the
//! manifest, the negotiated key system and the clock survive untouched.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use aulos_core::MediaType;
use aulos_drm::{DrmError, KeySystemOption, ProtectionHost, ResolvedProtection, negotiate};
use aulos_events::{BufferEvent, EventBus, PlaybackEvent, PlaybackWarning, SessionEvent};
use aulos_manifest::{KeyId, SharedManifest};
use bytes::Bytes;
use aulos_playback::{
    AnnotatedTick, Clock, PlaybackHandle, Stall, StallDetector, StallOptions, TickTrigger,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{SessionError, SessionResult};
use crate::eos::spawn_end_of_stream;
use crate::fill::FillLoop;
use crate::hosts::{
    AbrPolicy, ManifestFetchError, ManifestFetcher, MediaSourceHost, ProtectionSessionManager,
    SegmentPipeline, SourceHandle,
};
use crate::scheduler::{ManifestScheduler, OUT_OF_SYNC_REFRESH_DELAY, RefreshRequester};
use crate::signal::BufferSignal;
use crate::speed::run_speed_sync;
use crate::start::{StartPosition, initial_position};

/// Content-protection wiring for one session.
pub struct ProtectionConfig {
    pub host: Arc<dyn ProtectionHost>,
    /// License acquisition for init data found inside segments; `None`
    /// drops that data after registering it on the manifest.
    pub sessions: Option<Arc<dyn ProtectionSessionManager>>,
    /// Acceptable key systems, in preference order.
    pub candidates: Vec<KeySystemOption>,
}

/// Session tuning knobs.
#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub autoplay: bool,
    pub start_at: Option<StartPosition>,
    pub low_latency: bool,
    /// Buffer goal ahead of the position, in seconds.
    pub wanted_buffer_ahead: f64,
    /// Refresh delay applied when the manifest looks out of sync.
    pub out_of_sync_refresh_delay: Duration,
    pub initial_speed: f64,
    pub stall: StallOptions,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            autoplay: false,
            start_at: None,
            low_latency: false,
            wanted_buffer_ahead: 30.0,
            out_of_sync_refresh_delay: OUT_OF_SYNC_REFRESH_DELAY,
            initial_speed: 1.0,
            stall: StallOptions::default(),
        }
    }
}

impl SessionOptions {
    #[must_use]
    pub fn with_autoplay(mut self) -> Self {
        self.autoplay = true;
        self
    }

    #[must_use]
    pub fn with_start_at(mut self, start_at: StartPosition) -> Self {
        self.start_at = Some(start_at);
        self
    }

    #[must_use]
    pub fn with_low_latency(mut self) -> Self {
        self.low_latency = true;
        self.stall.low_latency = true;
        self
    }

    #[must_use]
    pub fn with_wanted_buffer_ahead(mut self, seconds: f64) -> Self {
        self.wanted_buffer_ahead = seconds;
        self
    }
}

/// Everything a session drives, injected by the host.
pub struct SessionDeps {
    pub device: Arc<dyn PlaybackHandle>,
    pub clock: Arc<Clock>,
    pub media_source: Arc<dyn MediaSourceHost>,
    pub fetcher: Arc<dyn ManifestFetcher>,
    pub pipeline: Arc<dyn SegmentPipeline>,
    pub abr: Arc<dyn AbrPolicy>,
    pub protection: Option<ProtectionConfig>,
    pub bus: EventBus,
}

/// External control over a running session.
#[derive(Clone, Debug)]
pub struct SessionController {
    speed: watch::Sender<f64>,
    cancel: CancellationToken,
    bus: EventBus,
    manifest: watch::Receiver<Option<SharedManifest>>,
}

impl SessionController {
    /// Change the wanted playback speed.
    pub fn set_speed(&self, speed: f64) {
        let _ = self.speed.send(speed);
    }

    /// Blacklist every representation encrypted with one of the given keys.
    ///
    /// Fill loops drop blacklisted representations on their next pass. When
    /// anything actually changed, a decipherability update is published on
    /// the bus. Does nothing before the manifest is ready.
    pub fn mark_undecipherable_keys(&self, key_ids: &[KeyId]) {
        let Some(manifest) = self.manifest.borrow().clone() else {
            return;
        };
        if manifest.mark_undecipherable_keys(key_ids) {
            self.bus.publish(BufferEvent::DecipherabilityUpdate);
        }
    }

    /// Same blacklisting, keyed by protection init data instead of key ids.
    pub fn mark_undecipherable_protection_data(&self, data: &Bytes) {
        let Some(manifest) = self.manifest.borrow().clone() else {
            return;
        };
        if manifest.mark_undecipherable_protection_data(data) {
            self.bus.publish(BufferEvent::DecipherabilityUpdate);
        }
    }

    /// Stop the session. [`Session::run`] then returns `Ok`.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

struct Generation {
    source: Arc<dyn SourceHandle>,
    position: f64,
    autoplay: bool,
}

enum GenerationOutcome {
    Reload { position: f64, autoplay: bool },
    Stopped,
}

pub struct Session {
    deps: SessionDeps,
    options: SessionOptions,
    cancel: CancellationToken,
    speed_rx: watch::Receiver<f64>,
    manifest_slot: watch::Sender<Option<SharedManifest>>,
}

impl Session {
    #[must_use]
    pub fn new(deps: SessionDeps, options: SessionOptions) -> (Self, SessionController) {
        let cancel = CancellationToken::new();
        let (speed_tx, speed_rx) = watch::channel(options.initial_speed);
        let (manifest_slot, manifest_rx) = watch::channel(None);
        let controller = SessionController {
            speed: speed_tx,
            cancel: cancel.clone(),
            bus: deps.bus.clone(),
            manifest: manifest_rx,
        };
        (
            Self {
                deps,
                options,
                cancel,
                speed_rx,
                manifest_slot,
            },
            controller,
        )
    }

    /// Run the session until it is stopped or fails.
    pub async fn run(self) -> SessionResult<()> {
        let cancel = self.cancel.clone();
        match self.run_inner().await {
            Ok(()) => {
                info!("session ended");
                Ok(())
            }
            // A stop request can surface as a cancelled negotiation.
            Err(SessionError::Protection(DrmError::Cancelled)) if cancel.is_cancelled() => {
                info!("session ended");
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "session failed");
                Err(err)
            }
        }
    }

    async fn run_inner(&self) -> SessionResult<()> {
        // The opened source, the first manifest and a usable key system are
        // all needed before anything can load.
        let source = self.deps.media_source.open_source().await?;
        let (manifest_data, protection) = tokio::join!(
            async { self.deps.fetcher.fetch().await.map_err(SessionError::from) },
            self.negotiate_protection(None),
        );
        let manifest = SharedManifest::new(manifest_data?);
        let mut protection = protection?;
        let _ = self.manifest_slot.send(Some(manifest.clone()));
        self.deps.bus.publish(SessionEvent::ManifestReady);
        info!(dynamic = manifest.is_dynamic(), "manifest ready");

        let (scheduler, refresher) =
            ManifestScheduler::new(manifest.clone(), Arc::clone(&self.deps.fetcher));
        let mut scheduler_task = tokio::spawn(scheduler.run(self.cancel.child_token()));

        let annotated = self.spawn_stall_annotator();
        tokio::spawn(run_speed_sync(
            Arc::clone(&self.deps.device),
            annotated.clone(),
            self.speed_rx.clone(),
            self.deps.bus.clone(),
            self.cancel.child_token(),
        ));

        let position = initial_position(
            &manifest,
            self.options.low_latency,
            self.options.start_at.as_ref(),
        )?;
        let mut generation = Generation {
            source,
            position,
            autoplay: self.options.autoplay,
        };

        loop {
            let outcome = self
                .run_generation(&manifest, &refresher, annotated.clone(), &mut scheduler_task, &generation)
                .await?;
            match outcome {
                GenerationOutcome::Reload { position, autoplay } => {
                    info!(position, "reloading media source");
                    self.deps.bus.publish(SessionEvent::ReloadingMediaSource);
                    // Key-system state survives the reload: the cached
                    // access is revalidated and reused when compatible.
                    protection = self.negotiate_protection(protection.as_ref()).await?;
                    let source = self.deps.media_source.open_source().await?;
                    generation = Generation {
                        source,
                        position,
                        autoplay,
                    };
                }
                GenerationOutcome::Stopped => return Ok(()),
            }
        }
    }

    async fn negotiate_protection(
        &self,
        cached: Option<&ResolvedProtection>,
    ) -> SessionResult<Option<ResolvedProtection>> {
        let Some(config) = &self.deps.protection else {
            return Ok(None);
        };
        let resolved = negotiate(
            config.host.as_ref(),
            &config.candidates,
            cached,
            &self.cancel,
        )
        .await?;
        Ok(Some(resolved))
    }

    /// Annotate clock ticks with stall classification, publishing state
    /// changes on the bus. The annotator outlives media-source reloads.
    fn spawn_stall_annotator(&self) -> watch::Receiver<AnnotatedTick> {
        let mut detector = StallDetector::new(self.options.stall);
        let mut clock_rx = self.deps.clock.subscribe();
        let device = Arc::clone(&self.deps.device);
        let bus = self.deps.bus.clone();
        let cancel = self.cancel.child_token();
        let initial = AnnotatedTick {
            tick: clock_rx.borrow().clone(),
            stall: None,
        };
        let (tx, rx) = watch::channel(initial);
        tokio::spawn(async move {
            let mut last_stall: Option<Stall> = None;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    changed = clock_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
                let tick = clock_rx.borrow_and_update().clone();
                let annotated = detector.process(tick, device.as_ref());
                let stall_changed = match (&last_stall, &annotated.stall) {
                    (None, None) => false,
                    (Some(previous), Some(current)) => previous.reason != current.reason,
                    _ => true,
                };
                if stall_changed {
                    debug!(stall = ?annotated.stall, "stall state changed");
                    bus.publish(PlaybackEvent::Stalled(annotated.stall));
                    last_stall = annotated.stall;
                }
                if tx.send(annotated).is_err() {
                    return;
                }
            }
        });
        rx
    }

    /// Run one media-source generation to its end: a reload demand or a
    /// stop. All generation-scoped tasks die with its cancel scope.
    async fn run_generation(
        &self,
        manifest: &SharedManifest,
        refresher: &RefreshRequester,
        mut annotated: watch::Receiver<AnnotatedTick>,
        scheduler_task: &mut JoinHandle<Result<(), ManifestFetchError>>,
        generation: &Generation,
    ) -> SessionResult<GenerationOutcome> {
        let scope = self.cancel.child_token();
        let _scope_guard = scope.clone().drop_guard();

        match manifest.duration() {
            Some(duration) => generation.source.set_duration(duration),
            None => generation.source.set_duration(f64::INFINITY),
        }

        let period = manifest
            .period_for_time(generation.position)
            .ok_or(SessionError::StartingTimeNotFound)?;

        // Native containers cannot be added once any of them received data:
        // create every container of the starting period before loading.
        let mut planned = Vec::new();
        for media_type in period.media_types() {
            let codec = period
                .adaptations
                .get(&media_type)
                .and_then(|list| list.first())
                .and_then(|adaptation| adaptation.representations.first())
                .and_then(|rep| rep.codec.clone());
            let container = generation
                .source
                .create_container(media_type, codec.as_deref())?;
            planned.push((media_type, codec, container));
        }

        self.seek_and_load(&mut annotated, generation).await?;
        if self.cancel.is_cancelled() {
            generation.source.release();
            return Ok(GenerationOutcome::Stopped);
        }

        let (signal_tx, mut signals) = mpsc::channel::<BufferSignal>(32);
        let (error_tx, mut errors) = mpsc::channel::<SessionError>(4);
        let fill_count = planned.len();
        for (media_type, codec, container) in planned {
            let fill = FillLoop {
                media_type,
                manifest: manifest.clone(),
                container,
                container_codec: codec,
                abr: Arc::clone(&self.deps.abr),
                pipeline: Arc::clone(&self.deps.pipeline),
                ticks: annotated.clone(),
                signals: signal_tx.clone(),
                wanted_ahead: self.options.wanted_buffer_ahead,
                period_id: period.id.clone(),
            };
            let fill_cancel = scope.child_token();
            let error_tx = error_tx.clone();
            tokio::spawn(async move {
                if let Err(err) = fill.run(fill_cancel).await {
                    let _ = error_tx.send(err).await;
                }
            });
        }
        drop(signal_tx);
        drop(error_tx);

        let mut eos_guard: Option<CancellationToken> = None;
        let mut ended_types: BTreeSet<MediaType> = BTreeSet::new();
        let outcome = loop {
            tokio::select! {
                () = self.cancel.cancelled() => break GenerationOutcome::Stopped,
                joined = &mut *scheduler_task => {
                    match joined {
                        Ok(Ok(())) => break GenerationOutcome::Stopped,
                        Ok(Err(err)) => return Err(err.into()),
                        Err(join_err) => {
                            return Err(SessionError::TaskFailed(join_err.to_string()));
                        }
                    }
                }
                Some(err) = errors.recv() => return Err(err),
                maybe = signals.recv() => {
                    let Some(signal) = maybe else {
                        // Every loop ended by itself. A loop failure may
                        // still be queued; it wins over a quiet stop.
                        if let Ok(err) = errors.try_recv() {
                            return Err(err);
                        }
                        break GenerationOutcome::Stopped;
                    };
                    if let Some(outcome) = self
                        .handle_signal(
                            signal,
                            refresher,
                            generation,
                            &scope,
                            &mut eos_guard,
                            &mut ended_types,
                            fill_count,
                        )
                        .await?
                    {
                        break outcome;
                    }
                }
            }
        };

        if let Some(token) = eos_guard.take() {
            token.cancel();
        }
        scope.cancel();
        generation.source.release();
        Ok(outcome)
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_signal(
        &self,
        signal: BufferSignal,
        refresher: &RefreshRequester,
        generation: &Generation,
        scope: &CancellationToken,
        eos_guard: &mut Option<CancellationToken>,
        ended_types: &mut BTreeSet<MediaType>,
        fill_count: usize,
    ) -> SessionResult<Option<GenerationOutcome>> {
        match signal {
            BufferSignal::NeedsManifestRefresh => refresher.request(Duration::ZERO),
            BufferSignal::ManifestMightBeOutOfSync => {
                warn!("manifest looks out of sync, scheduling a short refresh");
                refresher.request(self.options.out_of_sync_refresh_delay);
            }
            BufferSignal::NeedsMediaSourceReload { position, is_paused } => {
                return Ok(Some(GenerationOutcome::Reload {
                    position,
                    autoplay: !is_paused,
                }));
            }
            BufferSignal::ProtectedSegment { system_id, data } => {
                let sessions = self
                    .deps
                    .protection
                    .as_ref()
                    .and_then(|config| config.sessions.as_ref());
                if let Some(sessions) = sessions {
                    sessions.handle_init_data(&system_id, data).await?;
                }
            }
            BufferSignal::DiscontinuityEncountered {
                media_type,
                next_position,
            } => {
                if media_type.is_native() {
                    debug!(
                        ?media_type,
                        next_position, "seeking over an announced discontinuity"
                    );
                    self.deps.device.seek_to(next_position);
                }
            }
            BufferSignal::EndOfStream { media_type } => {
                ended_types.insert(media_type);
                // The host learns about the end only once every loop
                // reached it; a lone exhausted track must not cut the
                // others short.
                if ended_types.len() == fill_count && eos_guard.is_none() {
                    let token = scope.child_token();
                    drop(spawn_end_of_stream(
                        Arc::clone(&generation.source),
                        token.clone(),
                    ));
                    *eos_guard = Some(token);
                }
            }
            BufferSignal::ResumeStream { media_type } => {
                ended_types.remove(&media_type);
                if let Some(token) = eos_guard.take() {
                    token.cancel();
                }
            }
            BufferSignal::RepresentationChanged {
                media_type,
                representation_id,
            } => {
                self.deps.bus.publish(BufferEvent::RepresentationChanged {
                    media_type,
                    representation_id,
                });
            }
        }
        Ok(None)
    }

    /// Wait for metadata, seek to the generation position and honor the
    /// autoplay wish, then announce the content as loaded.
    async fn seek_and_load(
        &self,
        ticks: &mut watch::Receiver<AnnotatedTick>,
        generation: &Generation,
    ) -> SessionResult<()> {
        let mut warned = false;
        loop {
            let tick = ticks.borrow_and_update().tick.clone();
            if tick.ready_state.has_metadata() {
                break;
            }
            if tick.trigger == TickTrigger::MetadataLoaded && !warned {
                // The host announced metadata it does not actually have.
                self.deps
                    .bus
                    .publish(SessionEvent::Warning(PlaybackWarning::NotLoadedMetadata));
                warned = true;
            }
            tokio::select! {
                () = self.cancel.cancelled() => return Ok(()),
                changed = ticks.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
            }
        }

        self.deps.device.seek_to(generation.position);
        if generation.autoplay && !self.deps.device.request_play() {
            warn!("autoplay blocked by the host, staying paused");
            self.deps
                .bus
                .publish(SessionEvent::Warning(PlaybackWarning::AutoplayBlocked));
        }
        self.deps.bus.publish(SessionEvent::Loaded);
        debug!(
            position = generation.position,
            autoplay = generation.autoplay,
            "generation loaded"
        );
        Ok(())
    }
}
