#![forbid(unsafe_code)]

//! Manifest refresh scheduling.
//!
//! One task owns every refresh of the session. Refreshes fire for two
//! reasons: the manifest's own lifetime elapsing, and explicit demands from
//! the orchestration loop. Demands are expressed as a delay counted from
//! the previous fetch, so a demand whose delay already elapsed fires
//! immediately. At most one fetch is in flight; demands arriving while one
//! runs are satisfied by that very fetch and dropped.

use std::sync::Arc;
use std::time::Duration;

use aulos_manifest::SharedManifest;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::hosts::{ManifestFetchError, ManifestFetcher};

/// Refresh delay used when the manifest looks out of sync with the server.
pub const OUT_OF_SYNC_REFRESH_DELAY: Duration = Duration::from_secs(3);

/// Handle through which the orchestrator demands refreshes.
#[derive(Clone, Debug)]
pub struct RefreshRequester {
    tx: mpsc::Sender<Duration>,
}

impl RefreshRequester {
    /// Demand a refresh at most `delay` after the previous fetch.
    ///
    /// Fire-and-forget: a demand that cannot be queued is one the scheduler
    /// is already going to satisfy.
    pub fn request(&self, delay: Duration) {
        let _ = self.tx.try_send(delay);
    }
}

/// Single-writer refresh loop over one [`SharedManifest`].
pub struct ManifestScheduler {
    manifest: SharedManifest,
    fetcher: Arc<dyn ManifestFetcher>,
    rx: mpsc::Receiver<Duration>,
    last_fetched: Instant,
}

impl ManifestScheduler {
    /// Build the scheduler right after the initial fetch, so lifetime and
    /// demanded delays count from it.
    #[must_use]
    pub fn new(
        manifest: SharedManifest,
        fetcher: Arc<dyn ManifestFetcher>,
    ) -> (Self, RefreshRequester) {
        let (tx, rx) = mpsc::channel(8);
        (
            Self {
                manifest,
                fetcher,
                rx,
                last_fetched: Instant::now(),
            },
            RefreshRequester { tx },
        )
    }

    /// Run until cancelled. A fetch failure is terminal.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), ManifestFetchError> {
        let mut demanded: Option<Instant> = None;
        loop {
            let deadline = earliest(demanded, self.auto_deadline());
            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                maybe = self.rx.recv() => {
                    let Some(delay) = maybe else { return Ok(()) };
                    // Delays count from the previous fetch, never in the past.
                    let fire_at = (self.last_fetched + delay).max(Instant::now());
                    demanded = Some(demanded.map_or(fire_at, |d| d.min(fire_at)));
                }
                () = sleep_until_deadline(deadline) => {
                    self.refresh().await?;
                    demanded = None;
                }
            }
        }
    }

    /// When the manifest's own lifetime next elapses, if it has one.
    fn auto_deadline(&self) -> Option<Instant> {
        let lifetime = self.manifest.lifetime().filter(|l| *l > 0.0)?;
        Some(self.last_fetched + Duration::from_secs_f64(lifetime))
    }

    async fn refresh(&mut self) -> Result<(), ManifestFetchError> {
        debug!("refreshing manifest");
        let update = self.fetcher.fetch().await?;
        self.manifest.merge_update(update);
        self.last_fetched = Instant::now();
        // Demands that arrived while the fetch ran are satisfied by it.
        while self.rx.try_recv().is_ok() {}
        Ok(())
    }
}

fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
