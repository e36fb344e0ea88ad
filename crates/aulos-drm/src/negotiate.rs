#![forbid(unsafe_code)]

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{DrmError, DrmResult};
use crate::host::{AccessHandle, ProtectionHost};
use crate::options::{
    KeySystemOption, Requirement, build_configuration, expand_candidates,
};

/// The negotiation outcome: exactly one usable configuration per session.
#[derive(Clone)]
pub struct ResolvedProtection {
    pub option: KeySystemOption,
    pub access: Arc<dyn AccessHandle>,
}

impl std::fmt::Debug for ResolvedProtection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedProtection")
            .field("option", &self.option)
            .field("access", &self.access.system_id())
            .finish()
    }
}

/// Resolve one usable protection configuration from ranked candidates.
///
/// A previously resolved access is reused without any host round-trip when
/// some candidate has the same system type and its persistence and
/// distinctive-identifier requirements are already satisfied by the granted
/// configuration. Otherwise candidates expand into concrete system-id
/// queries attempted strictly in order; the first grant wins, exhaustion is
/// terminal. Cancellation aborts the loop before the next query starts.
pub async fn negotiate(
    host: &dyn ProtectionHost,
    candidates: &[KeySystemOption],
    cached: Option<&ResolvedProtection>,
    cancel: &CancellationToken,
) -> DrmResult<ResolvedProtection> {
    if let Some(cached) = cached {
        if let Some(option) = compatible_cached_candidate(candidates, cached) {
            debug!(
                system_id = cached.access.system_id(),
                "reusing cached key-system access"
            );
            return Ok(ResolvedProtection {
                option: option.clone(),
                access: Arc::clone(&cached.access),
            });
        }
    }

    let queries = expand_candidates(candidates);
    for query in &queries {
        if cancel.is_cancelled() {
            return Err(DrmError::Cancelled);
        }
        let option = &candidates[query.candidate_index];
        let configuration = build_configuration(query.family.as_deref(), option);
        debug!(
            system_id = %query.system_id,
            rank = query.candidate_index,
            "requesting key-system access"
        );
        let granted = tokio::select! {
            () = cancel.cancelled() => return Err(DrmError::Cancelled),
            granted = host.request_access(&query.system_id, std::slice::from_ref(&configuration)) => granted,
        };
        match granted {
            Ok(access) => {
                info!(system_id = %query.system_id, "compatible key system found");
                return Ok(ResolvedProtection {
                    option: option.clone(),
                    access,
                });
            }
            Err(denied) => {
                debug!(system_id = %denied.system_id, "key-system access rejected");
            }
        }
    }
    Err(DrmError::IncompatibleKeySystems)
}

/// First candidate whose requirements the cached access already satisfies.
fn compatible_cached_candidate<'a>(
    candidates: &'a [KeySystemOption],
    cached: &ResolvedProtection,
) -> Option<&'a KeySystemOption> {
    let granted = cached.access.configuration();
    candidates.iter().find(|candidate| {
        if candidate.key_type != cached.option.key_type {
            return false;
        }
        if candidate.persistent_license && granted.persistent_state != Requirement::Required {
            return false;
        }
        if candidate.distinctive_identifier_required
            && granted.distinctive_identifier != Requirement::Required
        {
            return false;
        }
        true
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::host::AccessDenied;
    use crate::options::{AccessConfiguration, SessionType, TrackCapability};

    /// Host scripted with the set of system ids it will grant.
    struct ScriptedHost {
        grants: Vec<String>,
        granted_state: Requirement,
        queries: Mutex<Vec<String>>,
    }

    impl ScriptedHost {
        fn granting(grants: &[&str]) -> Self {
            Self {
                grants: grants.iter().map(|s| (*s).to_owned()).collect(),
                granted_state: Requirement::Optional,
                queries: Mutex::new(Vec::new()),
            }
        }

        fn rejecting_all() -> Self {
            Self::granting(&[])
        }

        fn recorded_queries(&self) -> Vec<String> {
            self.queries.lock().unwrap().clone()
        }
    }

    struct ScriptedAccess {
        system_id: String,
        configuration: AccessConfiguration,
    }

    impl AccessHandle for ScriptedAccess {
        fn system_id(&self) -> &str {
            &self.system_id
        }

        fn configuration(&self) -> AccessConfiguration {
            self.configuration.clone()
        }
    }

    #[async_trait]
    impl ProtectionHost for ScriptedHost {
        async fn request_access(
            &self,
            system_id: &str,
            configurations: &[AccessConfiguration],
        ) -> Result<Arc<dyn AccessHandle>, AccessDenied> {
            self.queries.lock().unwrap().push(system_id.to_owned());
            if self.grants.iter().any(|g| g == system_id) {
                let mut granted = configurations[0].clone();
                granted.persistent_state = self.granted_state;
                Ok(Arc::new(ScriptedAccess {
                    system_id: system_id.to_owned(),
                    configuration: granted,
                }))
            } else {
                Err(AccessDenied {
                    system_id: system_id.to_owned(),
                })
            }
        }
    }

    fn granted_access(system_id: &str, persistent_state: Requirement) -> Arc<dyn AccessHandle> {
        Arc::new(ScriptedAccess {
            system_id: system_id.to_owned(),
            configuration: AccessConfiguration {
                init_data_types: vec!["cenc".into()],
                audio_capabilities: vec![TrackCapability {
                    content_type: "audio/mp4".into(),
                    robustness: None,
                }],
                video_capabilities: vec![TrackCapability {
                    content_type: "video/mp4".into(),
                    robustness: None,
                }],
                distinctive_identifier: Requirement::Optional,
                persistent_state,
                session_types: vec![SessionType::Temporary],
            },
        })
    }

    #[tokio::test]
    async fn first_grant_wins_and_stops_the_loop() {
        let host = ScriptedHost::granting(&["com.chromecast.playready"]);
        let candidates = vec![
            KeySystemOption::new("playready"),
            KeySystemOption::new("widevine"),
        ];
        let cancel = CancellationToken::new();
        let resolved = negotiate(&host, &candidates, None, &cancel).await.unwrap();
        assert_eq!(resolved.access.system_id(), "com.chromecast.playready");
        assert_eq!(resolved.option.key_type, "playready");
        // Stopped right after the grant: the widevine query never happened.
        assert_eq!(
            host.recorded_queries(),
            ["com.microsoft.playready", "com.chromecast.playready"]
        );
    }

    #[tokio::test]
    async fn all_rejected_fails_after_exactly_each_query_in_order() {
        let host = ScriptedHost::rejecting_all();
        let candidates = vec![
            KeySystemOption::new("widevine"),
            KeySystemOption::new("clearkey"),
            KeySystemOption::new("com.example.custom"),
        ];
        let cancel = CancellationToken::new();
        let err = negotiate(&host, &candidates, None, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DrmError::IncompatibleKeySystems));
        assert_eq!(
            host.recorded_queries(),
            [
                "com.widevine.alpha",
                "webkit-org.w3.clearkey",
                "org.w3.clearkey",
                "com.example.custom",
            ]
        );
    }

    #[tokio::test]
    async fn cached_access_is_reused_without_host_round_trip() {
        let host = ScriptedHost::rejecting_all();
        let candidates = vec![KeySystemOption::new("widevine")];
        let cached = ResolvedProtection {
            option: KeySystemOption::new("widevine"),
            access: granted_access("com.widevine.alpha", Requirement::Optional),
        };
        let cancel = CancellationToken::new();
        let resolved = negotiate(&host, &candidates, Some(&cached), &cancel)
            .await
            .unwrap();
        assert_eq!(resolved.access.system_id(), "com.widevine.alpha");
        assert!(host.recorded_queries().is_empty());
    }

    #[tokio::test]
    async fn cached_access_missing_persistence_is_not_reused() {
        let mut host = ScriptedHost::granting(&["com.widevine.alpha"]);
        host.granted_state = Requirement::Required;
        let candidates = vec![KeySystemOption::new("widevine").with_persistent_license()];
        // Cached access was granted without persistent state: requirements
        // are no longer a superset of what is asked, so renegotiate.
        let cached = ResolvedProtection {
            option: KeySystemOption::new("widevine"),
            access: granted_access("com.widevine.alpha", Requirement::Optional),
        };
        let cancel = CancellationToken::new();
        let resolved = negotiate(&host, &candidates, Some(&cached), &cancel)
            .await
            .unwrap();
        assert!(resolved.option.persistent_license);
        assert_eq!(host.recorded_queries(), ["com.widevine.alpha"]);
    }

    #[tokio::test]
    async fn cancellation_aborts_before_next_query() {
        let host = ScriptedHost::rejecting_all();
        let candidates = vec![KeySystemOption::new("widevine")];
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = negotiate(&host, &candidates, None, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DrmError::Cancelled));
        assert!(host.recorded_queries().is_empty());
    }
}
