#![forbid(unsafe_code)]

use thiserror::Error;

use crate::hosts::{ManifestFetchError, MediaSourceError, PipelineError};

/// Fatal orchestration failures. Any of these tears the session down.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The wanted starting position falls inside no period of the manifest.
    #[error("no playable period at the wanted starting position")]
    StartingTimeNotFound,
    #[error(transparent)]
    Protection(#[from] aulos_drm::DrmError),
    #[error(transparent)]
    ManifestFetch(#[from] ManifestFetchError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    MediaSource(#[from] MediaSourceError),
    /// A background task panicked or was aborted out from under us.
    #[error("background task failed: {0}")]
    TaskFailed(String),
}

pub type SessionResult<T> = Result<T, SessionError>;
