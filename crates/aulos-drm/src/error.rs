#![forbid(unsafe_code)]

use thiserror::Error;

/// Key-system negotiation errors.
#[derive(Debug, Error)]
pub enum DrmError {
    /// Every candidate configuration was rejected by the host.
    #[error("no key system compatible with the host was found")]
    IncompatibleKeySystems,

    /// The caller lost interest before negotiation completed.
    #[error("key-system negotiation cancelled")]
    Cancelled,
}

pub type DrmResult<T> = Result<T, DrmError>;
