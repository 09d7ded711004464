//! The lookup service: a lifecycle around a participant directory.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;

use super::directory::{MockDirectory, ParticipantDirectory};
use super::endpoint::{LookupResult, ParticipantKey, PeppolEndpoint};
use crate::error::HarnessError;
use crate::service::ManagedService;

/// Where answers come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupMode {
    /// An in-memory table filled with [`LookupService::set_mock_response`].
    Mock,
    /// An externally supplied directory.
    Real,
}

#[derive(Debug)]
enum Backend {
    Mock(MockDirectory),
    Real(Arc<dyn ParticipantDirectory>),
}

/// Serializable view of a lookup service.
#[derive(Debug, Clone, Serialize)]
pub struct LookupInfo {
    /// Mock or real.
    pub mode: LookupMode,
    /// Whether the service is running.
    pub is_running: bool,
    /// Registered mock participants; `None` in real mode.
    pub mock_entries: Option<usize>,
}

/// Resolves participants for routing, in mock or real mode.
///
/// Callers use [`lookup`](Self::lookup) the same way in both modes; only
/// the mock-registry methods are mode specific.
#[derive(Debug)]
pub struct LookupService {
    name: String,
    backend: Backend,
    running: watch::Sender<bool>,
}

impl LookupService {
    fn with_backend(backend: Backend) -> Self {
        let (running, _) = watch::channel(false);
        Self {
            name: "lookup".to_string(),
            backend,
            running,
        }
    }

    /// A service answering from an empty mock registry.
    #[must_use]
    pub fn mock() -> Self {
        Self::with_backend(Backend::Mock(MockDirectory::new()))
    }

    /// A service delegating to `directory`.
    #[must_use]
    pub fn real(directory: Arc<dyn ParticipantDirectory>) -> Self {
        Self::with_backend(Backend::Real(directory))
    }

    /// Current mode.
    #[must_use]
    pub const fn mode(&self) -> LookupMode {
        match self.backend {
            Backend::Mock(_) => LookupMode::Mock,
            Backend::Real(_) => LookupMode::Real,
        }
    }

    fn mock_directory(&self) -> Result<&MockDirectory, HarnessError> {
        match &self.backend {
            Backend::Mock(dir) => Ok(dir),
            Backend::Real(_) => Err(HarnessError::Validation(
                "mock responses are only available in mock mode".to_string(),
            )),
        }
    }

    /// Registers the endpoint returned for `(scheme_id, participant_id)`.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Validation`] in real mode or for a blank key.
    pub async fn set_mock_response(
        &self,
        scheme_id: &str,
        participant_id: &str,
        endpoint: PeppolEndpoint,
    ) -> Result<(), HarnessError> {
        let key = ParticipantKey::new(scheme_id, participant_id)?;
        let directory = self.mock_directory()?;
        tracing::debug!(%key, address = %endpoint.address, "mock lookup response registered");
        directory.insert(key, endpoint).await;
        Ok(())
    }

    /// Forgets every mock response.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Validation`] in real mode.
    pub async fn clear_mock_responses(&self) -> Result<(), HarnessError> {
        self.mock_directory()?.clear().await;
        Ok(())
    }

    /// Resolves a participant.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::NotStarted`] if the service is not running,
    /// [`HarnessError::Validation`] for a blank key, and whatever the real
    /// directory fails with.
    pub async fn lookup(
        &self,
        scheme_id: &str,
        participant_id: &str,
    ) -> Result<LookupResult, HarnessError> {
        if !self.is_running() {
            return Err(HarnessError::NotStarted(self.name.clone()));
        }
        let key = ParticipantKey::new(scheme_id, participant_id)?;
        let result = match &self.backend {
            Backend::Mock(dir) => dir.lookup(&key).await?,
            Backend::Real(dir) => dir.lookup(&key).await?,
        };
        tracing::debug!(%key, found = result.is_found(), "participant lookup");
        Ok(result)
    }

    /// Resolves a SIREN number (scheme `0009`).
    ///
    /// # Errors
    ///
    /// Same as [`LookupService::lookup`].
    pub async fn lookup_by_siren(&self, siren: &str) -> Result<LookupResult, HarnessError> {
        self.lookup(super::endpoint::SIREN_SCHEME, siren).await
    }

    /// Read-only snapshot.
    pub async fn info(&self) -> LookupInfo {
        let mock_entries = match &self.backend {
            Backend::Mock(dir) => Some(dir.len().await),
            Backend::Real(_) => None,
        };
        LookupInfo {
            mode: self.mode(),
            is_running: self.is_running(),
            mock_entries,
        }
    }
}

#[async_trait]
impl ManagedService for LookupService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<(), HarnessError> {
        let started = self.running.send_if_modified(|running| {
            if *running {
                false
            } else {
                *running = true;
                true
            }
        });
        if !started {
            return Err(HarnessError::AlreadyRunning(self.name.clone()));
        }
        tracing::info!(service = %self.name, mode = ?self.mode(), "lookup service started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), HarnessError> {
        if self.running.send_replace(false) {
            tracing::info!(service = %self.name, "lookup service stopped");
        }
        Ok(())
    }

    fn endpoint(&self) -> Option<String> {
        match &self.backend {
            Backend::Mock(_) => None,
            Backend::Real(dir) => dir.endpoint(),
        }
    }

    fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    fn is_local(&self) -> bool {
        matches!(self.backend, Backend::Mock(_))
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<(), HarnessError> {
        let mut rx = self.running.subscribe();
        match tokio::time::timeout(timeout, rx.wait_for(|running| *running)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) | Err(_) => Err(HarnessError::ReadyTimeout {
                name: self.name.clone(),
                timeout,
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::lookup::endpoint::LookupErrorCode;

    fn endpoint() -> PeppolEndpoint {
        PeppolEndpoint::new(
            "https://ap.test.fr/as4",
            "MOCK_CERT",
            "peppol-transport-as4-v2_0",
        )
    }

    async fn running_mock() -> LookupService {
        let svc = LookupService::mock();
        let Ok(()) = svc.start().await else {
            panic!("start failed");
        };
        svc
    }

    #[tokio::test]
    async fn default_is_mock_and_local() {
        let svc = LookupService::mock();
        assert_eq!(svc.mode(), LookupMode::Mock);
        assert!(svc.is_local());
        assert!(!svc.is_running());
        assert!(svc.start().await.is_ok());
        assert!(svc.is_running());
        assert!(svc.wait_ready(Duration::ZERO).await.is_ok());
        assert!(svc.stop().await.is_ok());
        assert!(!svc.is_running());
        assert!(svc.stop().await.is_ok());
    }

    #[tokio::test]
    async fn mock_round_trip_and_clear() {
        let svc = running_mock().await;
        assert!(
            svc.set_mock_response("0009", "123456789", endpoint())
                .await
                .is_ok()
        );

        let Ok(LookupResult::Found(found)) = svc.lookup("0009", "123456789").await else {
            panic!("expected a mock hit");
        };
        assert_eq!(found, endpoint());
        let Ok(by_siren) = svc.lookup_by_siren("123456789").await else {
            panic!("siren lookup failed");
        };
        assert_eq!(by_siren.endpoint().map(|e| e.address.as_str()), Some("https://ap.test.fr/as4"));

        assert!(svc.clear_mock_responses().await.is_ok());
        let Ok(result) = svc.lookup("0009", "123456789").await else {
            panic!("lookup failed");
        };
        assert_eq!(result.error_code(), Some(LookupErrorCode::ParticipantNotFound));
    }

    #[tokio::test]
    async fn unknown_participant_is_not_found() {
        let svc = running_mock().await;
        let Ok(result) = svc.lookup_by_siren("999999999").await else {
            panic!("lookup failed");
        };
        assert_eq!(result, LookupResult::not_found());
    }

    #[tokio::test]
    async fn lookup_requires_running_service() {
        let svc = LookupService::mock();
        assert!(matches!(
            svc.lookup_by_siren("123").await,
            Err(HarnessError::NotStarted(_))
        ));
    }

    #[derive(Debug)]
    struct FixedDirectory;

    #[async_trait]
    impl ParticipantDirectory for FixedDirectory {
        async fn lookup(&self, key: &ParticipantKey) -> Result<LookupResult, HarnessError> {
            if key.participant_id == "111" {
                Ok(LookupResult::Found(endpoint()))
            } else {
                Ok(LookupResult::not_found())
            }
        }

        fn endpoint(&self) -> Option<String> {
            Some("https://smp.example".to_string())
        }
    }

    #[tokio::test]
    async fn real_mode_keeps_the_same_contract() {
        let svc = LookupService::real(Arc::new(FixedDirectory));
        assert_eq!(svc.mode(), LookupMode::Real);
        assert!(!svc.is_local());
        assert_eq!(ManagedService::endpoint(&svc).as_deref(), Some("https://smp.example"));
        assert!(svc.start().await.is_ok());

        assert!(matches!(svc.lookup_by_siren("111").await, Ok(LookupResult::Found(_))));
        assert!(matches!(
            svc.lookup_by_siren("222").await,
            Ok(LookupResult::NotFound { .. })
        ));
        assert!(matches!(
            svc.set_mock_response("0009", "1", endpoint()).await,
            Err(HarnessError::Validation(_))
        ));
        assert!(svc.info().await.mock_entries.is_none());
    }
}
