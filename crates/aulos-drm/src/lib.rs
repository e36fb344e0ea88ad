#![forbid(unsafe_code)]

//! Key-system negotiation.
//!
//! Given a ranked list of acceptable protection configurations and an
//! optional previously resolved access, [`negotiate`] resolves exactly one
//! usable `(option, access)` pair for the session lifetime, or fails with
//! [`DrmError::IncompatibleKeySystems`].

mod error;
mod host;
mod negotiate;
mod options;

pub use error::{DrmError, DrmResult};
pub use host::{AccessDenied, AccessHandle, ProtectionHost};
pub use negotiate::{ResolvedProtection, negotiate};
pub use options::{
    AccessConfiguration, KeySystemOption, ProtectionQuery, Requirement, SessionType,
    TrackCapability, build_configuration, expand_candidates,
};
