//! Transport service: one broker endpoint, owned or borrowed.
//!
//! An embedded [`TransportService`] owns a [`BrokerServer`] it binds on
//! `start` and releases on `stop`. A service built from an explicit
//! external endpoint is [`Ownership::Borrowed`]: it never binds and never
//! stops anything, it only hands the endpoint to whoever connects.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::net::TcpStream;

use super::server::{BrokerOptions, BrokerServer};
use crate::config::TransportConfig;
use crate::domain::TransportEndpoint;
use crate::error::HarnessError;
use crate::service::ManagedService;

/// Interval between connection probes in [`TransportService::wait_ready`].
const PROBE_INTERVAL: Duration = Duration::from_millis(20);

/// Who is responsible for the broker resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Ownership {
    /// The service binds and releases the broker itself.
    Owned,
    /// The broker lives elsewhere; this service must never stop it.
    Borrowed,
}

#[derive(Debug)]
enum Mode {
    Embedded(BrokerOptions),
    External(TransportEndpoint),
}

#[derive(Debug, Default)]
struct State {
    endpoint: Option<TransportEndpoint>,
    running: bool,
}

/// Serializable view of a transport service.
#[derive(Debug, Clone, Serialize)]
pub struct TransportInfo {
    /// `nats://host:port`, once known.
    pub url: Option<String>,
    /// Bound port, once known.
    pub port: Option<u16>,
    /// Owned or borrowed.
    pub ownership: Ownership,
    /// Whether the service is running.
    pub is_running: bool,
}

/// One message-broker endpoint the harness can hand to PAs.
///
/// Share it between PAs with `Arc<TransportService>`; only the holder that
/// created it should call [`ManagedService::stop`].
#[derive(Debug)]
pub struct TransportService {
    name: String,
    mode: Mode,
    state: Mutex<State>,
    server: tokio::sync::Mutex<Option<BrokerServer>>,
}

impl TransportService {
    /// An embedded broker bound on `start` according to `options`.
    #[must_use]
    pub fn embedded(options: BrokerOptions) -> Self {
        Self {
            name: "transport".to_string(),
            mode: Mode::Embedded(options),
            state: Mutex::new(State::default()),
            server: tokio::sync::Mutex::new(None),
        }
    }

    /// A borrowed reference to a broker that someone else runs.
    #[must_use]
    pub fn external(endpoint: TransportEndpoint) -> Self {
        Self {
            name: "transport".to_string(),
            mode: Mode::External(endpoint.clone()),
            state: Mutex::new(State {
                endpoint: Some(endpoint),
                running: false,
            }),
            server: tokio::sync::Mutex::new(None),
        }
    }

    /// Builds the service described by `config`.
    #[must_use]
    pub fn from_config(config: &TransportConfig) -> Self {
        match &config.external {
            Some(endpoint) => Self::external(endpoint.clone()),
            None => Self::embedded(BrokerOptions {
                host: config.host.clone(),
                port: config.port,
                max_payload: config.max_payload,
                ..BrokerOptions::default()
            }),
        }
    }

    /// Renames the service in logs and errors.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Owned for embedded brokers, borrowed for external endpoints.
    #[must_use]
    pub const fn ownership(&self) -> Ownership {
        match self.mode {
            Mode::Embedded(_) => Ownership::Owned,
            Mode::External(_) => Ownership::Borrowed,
        }
    }

    /// The broker endpoint; `None` until an embedded broker has been bound.
    #[must_use]
    pub fn address(&self) -> Option<TransportEndpoint> {
        self.state().endpoint.clone()
    }

    /// The broker endpoint, or [`HarnessError::NotStarted`].
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::NotStarted`] if the service is not running.
    pub fn require_endpoint(&self) -> Result<TransportEndpoint, HarnessError> {
        let state = self.state();
        match (&state.endpoint, state.running) {
            (Some(endpoint), true) => Ok(endpoint.clone()),
            _ => Err(HarnessError::NotStarted(self.name.clone())),
        }
    }

    /// Bound port, once known.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.state().endpoint.as_ref().map(|e| e.port)
    }

    /// Read-only snapshot.
    #[must_use]
    pub fn info(&self) -> TransportInfo {
        let state = self.state();
        TransportInfo {
            url: state.endpoint.as_ref().map(TransportEndpoint::url),
            port: state.endpoint.as_ref().map(|e| e.port),
            ownership: self.ownership(),
            is_running: state.running,
        }
    }
}

#[async_trait]
impl ManagedService for TransportService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<(), HarnessError> {
        if self.is_running() {
            return Err(HarnessError::AlreadyRunning(self.name.clone()));
        }
        match &self.mode {
            Mode::Embedded(options) => {
                let mut slot = self.server.lock().await;
                let server = BrokerServer::bind(options.clone()).await?;
                let endpoint = server.endpoint();
                *slot = Some(server);
                let mut state = self.state();
                state.endpoint = Some(endpoint.clone());
                state.running = true;
                tracing::info!(service = %self.name, endpoint = %endpoint, "transport started");
            }
            Mode::External(endpoint) => {
                self.state().running = true;
                tracing::info!(service = %self.name, endpoint = %endpoint, "transport attached");
            }
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), HarnessError> {
        if matches!(self.mode, Mode::External(_)) {
            tracing::debug!(service = %self.name, "borrowed transport left running");
            return Ok(());
        }
        let server = self.server.lock().await.take();
        if let Some(mut server) = server {
            server.shutdown().await;
            tracing::info!(service = %self.name, "transport stopped");
        }
        self.state().running = false;
        Ok(())
    }

    fn endpoint(&self) -> Option<String> {
        self.address().map(|e| e.url())
    }

    fn is_running(&self) -> bool {
        self.state().running
    }

    fn is_local(&self) -> bool {
        matches!(self.mode, Mode::Embedded(_))
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<(), HarnessError> {
        let probe = async {
            loop {
                if let Ok(endpoint) = self.require_endpoint()
                    && TcpStream::connect(endpoint.authority()).await.is_ok()
                {
                    return;
                }
                tokio::time::sleep(PROBE_INTERVAL).await;
            }
        };
        tokio::time::timeout(timeout, probe)
            .await
            .map_err(|_| HarnessError::ReadyTimeout {
                name: self.name.clone(),
                timeout,
            })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embedded_lifecycle() {
        let svc = TransportService::embedded(BrokerOptions::default());
        assert!(svc.is_local());
        assert_eq!(svc.ownership(), Ownership::Owned);
        assert!(svc.address().is_none());
        assert!(!svc.is_running());

        let Ok(()) = svc.start().await else {
            panic!("start failed");
        };
        assert!(svc.is_running());
        let Some(port) = svc.port() else {
            panic!("port should be known");
        };
        assert!(port > 0);
        let Some(url) = ManagedService::endpoint(&svc) else {
            panic!("endpoint should be known");
        };
        assert!(url.starts_with("nats://"));
        assert!(url.contains(&port.to_string()));
        assert!(svc.wait_ready(Duration::from_secs(1)).await.is_ok());

        assert!(svc.stop().await.is_ok());
        assert!(!svc.is_running());
        assert!(svc.stop().await.is_ok(), "stop is idempotent");
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let svc = TransportService::embedded(BrokerOptions::default());
        assert!(svc.start().await.is_ok());
        assert!(matches!(
            svc.start().await,
            Err(HarnessError::AlreadyRunning(_))
        ));
        let _ = svc.stop().await;
    }

    #[tokio::test]
    async fn external_endpoint_is_borrowed_and_never_stopped() {
        let owner = TransportService::embedded(BrokerOptions::default());
        assert!(owner.start().await.is_ok());
        let Some(endpoint) = owner.address() else {
            panic!("owner endpoint");
        };

        let borrowed = TransportService::external(endpoint.clone());
        assert!(!borrowed.is_local());
        assert_eq!(borrowed.ownership(), Ownership::Borrowed);
        assert!(borrowed.start().await.is_ok());
        assert!(borrowed.is_running());
        assert_eq!(borrowed.address(), Some(endpoint));
        assert!(borrowed.wait_ready(Duration::from_secs(1)).await.is_ok());

        assert!(borrowed.stop().await.is_ok());
        assert!(owner.is_running());
        assert!(owner.wait_ready(Duration::from_secs(1)).await.is_ok());
        let _ = owner.stop().await;
    }

    #[tokio::test]
    async fn wait_ready_times_out_when_never_started() {
        let svc = TransportService::embedded(BrokerOptions::default());
        let started = tokio::time::Instant::now();
        let result = svc.wait_ready(Duration::from_millis(100)).await;
        assert!(matches!(result, Err(HarnessError::ReadyTimeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn require_endpoint_before_start_fails() {
        let svc = TransportService::embedded(BrokerOptions::default());
        assert!(matches!(
            svc.require_endpoint(),
            Err(HarnessError::NotStarted(_))
        ));
    }
}
