#![forbid(unsafe_code)]

//! Seams between the orchestration loop and the host embedding it.
//!
//! The engine never touches media APIs, the network or a DRM module
//! directly. It drives these traits and reacts to what they return.

use std::sync::Arc;

use async_trait::async_trait;
use aulos_core::MediaType;
use aulos_drm::DrmError;
use aulos_manifest::{ManifestData, Representation, RepresentationRef, SegmentRecord};
use bytes::Bytes;
use thiserror::Error;

/// Failure reported by the media-source side of the host.
#[derive(Clone, Debug, Error)]
#[error("media source failure: {reason}")]
pub struct MediaSourceError {
    pub reason: String,
}

impl MediaSourceError {
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Opens media sources on the playback device.
#[async_trait]
pub trait MediaSourceHost: Send + Sync {
    /// Open a fresh media source, invalidating any previously opened one.
    async fn open_source(&self) -> Result<Arc<dyn SourceHandle>, MediaSourceError>;
}

/// One opened media source and its buffer containers.
#[async_trait]
pub trait SourceHandle: Send + Sync {
    /// Create the container for one media type.
    ///
    /// Native (audio/video) containers must all exist before the first
    /// append on any of them; the orchestrator creates them up front.
    fn create_container(
        &self,
        media_type: MediaType,
        codec: Option<&str>,
    ) -> Result<Arc<dyn BufferContainer>, MediaSourceError>;

    fn set_duration(&self, duration: f64);

    /// Mark the stream complete once every pending append has settled.
    async fn mark_end_of_stream(&self) -> Result<(), MediaSourceError>;

    /// Drop every container and detach from the device.
    fn release(&self);
}

/// A per-media-type append target on the source.
#[async_trait]
pub trait BufferContainer: Send + Sync {
    fn media_type(&self) -> MediaType;

    /// Append one parsed media chunk. Resolves when the device accepted it.
    async fn append(&self, payload: Bytes) -> Result<(), MediaSourceError>;

    /// Remove buffered data in `[start, end)`.
    async fn remove(&self, start: f64, end: f64) -> Result<(), MediaSourceError>;
}

/// One fetched and parsed media chunk.
#[derive(Clone, Debug)]
pub struct SegmentChunk {
    pub start: f64,
    pub duration: f64,
    pub payload: Bytes,
    /// Protection init data discovered while parsing, per system id.
    pub protection: Vec<(String, Bytes)>,
}

/// Outcome of one segment fetch.
#[derive(Clone, Debug)]
pub enum SegmentFetch {
    Chunk(SegmentChunk),
    /// The resource the manifest announced is gone; the manifest is
    /// probably out of sync with the server.
    OutOfSync,
}

/// Failure reported by the segment pipeline after its own retries.
#[derive(Clone, Debug, Error)]
#[error("segment pipeline failure: {reason}")]
pub struct PipelineError {
    pub reason: String,
}

impl PipelineError {
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Fetches and parses media segments. Transient retry is the pipeline's own
/// concern; an error here is terminal for the session.
#[async_trait]
pub trait SegmentPipeline: Send + Sync {
    async fn fetch_segment(
        &self,
        locator: &RepresentationRef,
        segment: &SegmentRecord,
    ) -> Result<SegmentFetch, PipelineError>;
}

/// Picks the representation a buffer loop should load next.
///
/// Candidates are pre-filtered: blacklisted (undecipherable)
/// representations never reach the policy.
pub trait AbrPolicy: Send + Sync {
    fn pick_representation<'a>(
        &self,
        media_type: MediaType,
        candidates: &'a [Representation],
    ) -> Option<&'a Representation>;
}

/// Failure reported by the manifest fetcher after its own retries.
#[derive(Clone, Debug, Error)]
#[error("manifest fetch failure: {reason}")]
pub struct ManifestFetchError {
    pub reason: String,
}

impl ManifestFetchError {
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Fetches and parses the manifest document.
#[async_trait]
pub trait ManifestFetcher: Send + Sync {
    async fn fetch(&self) -> Result<ManifestData, ManifestFetchError>;
}

/// License-acquisition side of the protection module.
#[async_trait]
pub trait ProtectionSessionManager: Send + Sync {
    /// Feed protection init data found inside a segment into license
    /// acquisition for the already-negotiated key system.
    async fn handle_init_data(&self, system_id: &str, data: Bytes) -> Result<(), DrmError>;
}
