#![forbid(unsafe_code)]

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::options::AccessConfiguration;

/// The host rejected an access request for one system id.
#[derive(Clone, Debug, Error)]
#[error("access denied for key system {system_id}")]
pub struct AccessDenied {
    pub system_id: String,
}

/// A granted key-system access.
pub trait AccessHandle: Send + Sync {
    /// System id the access was granted for.
    fn system_id(&self) -> &str;

    /// The configuration the host actually granted.
    fn configuration(&self) -> AccessConfiguration;
}

/// Content-protection capability of the host (EME-like surface).
#[async_trait]
pub trait ProtectionHost: Send + Sync {
    /// Request access for one system id with the given ranked capability
    /// descriptors.
    async fn request_access(
        &self,
        system_id: &str,
        configurations: &[AccessConfiguration],
    ) -> Result<Arc<dyn AccessHandle>, AccessDenied>;
}
