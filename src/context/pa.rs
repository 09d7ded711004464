//! Instance context: one fully wired PA.
//!
//! Start order: transport (owned or borrowed), broker connection,
//! wildcard observer, runners (all awaited with one shared deadline),
//! gateway. [`PaContext::shutdown`] unwinds in exactly the reverse order
//! and stops the transport only if this PA owns it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::info::{PaInfo, PaState};
use super::teardown::TeardownReport;
use crate::broker::{BrokerConnection, ConnectOptions, Subscription};
use crate::config::{DEFAULT_SUBSCRIPTION_CAPACITY, TransportConfig};
use crate::domain::PaId;
use crate::error::HarnessError;
use crate::gateway::{Gateway, GatewayOptions, GatewayState};
use crate::lookup::LookupService;
use crate::service::{ManagedService, ServicePool, ServiceRunner, WorkerDefinition};
use crate::transport::TransportService;
use crate::workers::platform_workers;

/// Upper bound for the broker handshake and flushes.
const MAX_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// How to build one PA.
#[derive(Debug, Clone)]
pub struct PaConfig {
    /// Display name; derived from the id when unset.
    pub name: Option<String>,
    /// Deadline shared by every runner's readiness wait.
    pub ready_timeout: Duration,
    /// Rank reported by `/healthcheck`.
    pub rank: String,
    /// Transport to create when none is supplied.
    pub transport: TransportConfig,
    /// Gateway settings.
    pub gateway: GatewayOptions,
    /// Workers to run; the platform workers when unset.
    pub workers: Option<Vec<WorkerDefinition>>,
    /// Buffered messages per subscription.
    pub subscription_capacity: usize,
}

impl PaConfig {
    /// A configuration with the given readiness deadline.
    ///
    /// The harness has no global readiness default; every call site picks
    /// its own.
    #[must_use]
    pub fn new(ready_timeout: Duration) -> Self {
        Self {
            name: None,
            ready_timeout,
            rank: "dev".to_string(),
            transport: TransportConfig::default(),
            gateway: GatewayOptions::default(),
            workers: None,
            subscription_capacity: DEFAULT_SUBSCRIPTION_CAPACITY,
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the rank reported by `/healthcheck`.
    #[must_use]
    pub fn with_rank(mut self, rank: impl Into<String>) -> Self {
        self.rank = rank.into();
        self
    }

    /// Sets the transport created when none is supplied.
    #[must_use]
    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Sets the gateway options.
    #[must_use]
    pub fn with_gateway(mut self, gateway: GatewayOptions) -> Self {
        self.gateway = gateway;
        self
    }

    /// Replaces the platform workers.
    #[must_use]
    pub fn with_workers(mut self, workers: Vec<WorkerDefinition>) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Sets the per-subscription buffer.
    #[must_use]
    pub fn with_subscription_capacity(mut self, capacity: usize) -> Self {
        self.subscription_capacity = capacity.max(1);
        self
    }
}

/// One isolated platform instance: transport, connection, workers and
/// gateway.
#[derive(Debug)]
pub struct PaContext {
    id: PaId,
    name: String,
    config: PaConfig,
    transport: Arc<TransportService>,
    owns_transport: bool,
    lookup: Option<Arc<LookupService>>,
    connection: Option<Arc<BrokerConnection>>,
    observer: Option<Subscription>,
    pool: Option<ServicePool>,
    gateway: Option<Gateway>,
    state: PaState,
    started_at: Option<DateTime<Utc>>,
}

impl PaContext {
    /// A PA that creates and owns its transport.
    #[must_use]
    pub fn new(config: PaConfig) -> Self {
        let transport = Arc::new(TransportService::from_config(&config.transport));
        Self::build(config, transport, true)
    }

    /// A PA borrowing `transport`; it never stops it.
    #[must_use]
    pub fn with_transport(config: PaConfig, transport: Arc<TransportService>) -> Self {
        Self::build(config, transport, false)
    }

    fn build(config: PaConfig, transport: Arc<TransportService>, owns_transport: bool) -> Self {
        let id = PaId::new();
        let name = config
            .name
            .clone()
            .unwrap_or_else(|| format!("pa-{}", id.short()));
        Self {
            id,
            name,
            config,
            transport,
            owns_transport,
            lookup: None,
            connection: None,
            observer: None,
            pool: None,
            gateway: None,
            state: PaState::Created,
            started_at: None,
        }
    }

    /// Routes invoices through `lookup`; enables the routing worker.
    #[must_use]
    pub fn with_lookup(mut self, lookup: Arc<LookupService>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    /// Identifier.
    #[must_use]
    pub const fn id(&self) -> PaId {
        self.id
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lifecycle state.
    #[must_use]
    pub const fn state(&self) -> PaState {
        self.state
    }

    /// Returns `true` between a successful `start` and `shutdown`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == PaState::Running
    }

    /// The transport this PA uses (shared with other PAs when borrowed).
    #[must_use]
    pub const fn transport(&self) -> &Arc<TransportService> {
        &self.transport
    }

    /// Whether shutting down this PA stops its transport.
    #[must_use]
    pub const fn owns_transport(&self) -> bool {
        self.owns_transport
    }

    /// The lookup service, if any.
    #[must_use]
    pub const fn lookup(&self) -> Option<&Arc<LookupService>> {
        self.lookup.as_ref()
    }

    /// The broker connection, while running.
    #[must_use]
    pub const fn connection(&self) -> Option<&Arc<BrokerConnection>> {
        self.connection.as_ref()
    }

    /// The wildcard observer, which sees every subject published on the
    /// transport after the PA started.
    pub fn observer_mut(&mut self) -> Option<&mut Subscription> {
        self.observer.as_mut()
    }

    /// The gateway, while running.
    #[must_use]
    pub const fn gateway(&self) -> Option<&Gateway> {
        self.gateway.as_ref()
    }

    /// The runners, in worker order.
    #[must_use]
    pub fn runners(&self) -> &[ServiceRunner] {
        self.pool.as_ref().map_or(&[][..], ServicePool::runners)
    }

    /// Transport port.
    #[must_use]
    pub fn transport_port(&self) -> Option<u16> {
        self.transport.port()
    }

    /// Gateway base URL, while running.
    #[must_use]
    pub fn api_base_url(&self) -> Option<String> {
        self.gateway.as_ref().and_then(Gateway::base_url)
    }

    /// Gateway port, while running.
    #[must_use]
    pub fn api_port(&self) -> Option<u16> {
        self.gateway.as_ref().and_then(Gateway::port)
    }

    /// Read-only snapshot.
    #[must_use]
    pub fn info(&self) -> PaInfo {
        PaInfo {
            id: *self.id.as_uuid(),
            name: self.name.clone(),
            state: self.state,
            transport_url: self.transport.address().map(|e| e.url()),
            transport_port: self.transport_port(),
            api_base_url: self.api_base_url(),
            api_port: self.api_port(),
            is_running: self.is_running(),
            owns_transport: self.owns_transport,
            runners: self.pool.as_ref().map(ServicePool::info).unwrap_or_default(),
            started_at: self.started_at,
        }
    }

    /// Starts every child in order.
    ///
    /// On failure, everything already started is torn down before the
    /// error is returned, so no port or task is left behind.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::AlreadyRunning`] if the PA was started
    /// before, [`HarnessError::NotStarted`] if a borrowed transport is not
    /// running, and any bind, connect or readiness failure.
    pub async fn start(&mut self) -> Result<(), HarnessError> {
        if self.state != PaState::Created {
            return Err(HarnessError::AlreadyRunning(self.name.clone()));
        }
        self.state = PaState::Starting;
        tracing::info!(pa = %self.name, id = %self.id, owns_transport = self.owns_transport, "starting PA");

        match self.start_children().await {
            Ok(()) => {
                self.state = PaState::Running;
                self.started_at = Some(Utc::now());
                tracing::info!(
                    pa = %self.name,
                    transport = ?self.transport.address().map(|e| e.url()),
                    api = ?self.api_base_url(),
                    "PA running"
                );
                Ok(())
            }
            Err(e) => {
                tracing::warn!(pa = %self.name, error = %e, "PA startup failed, tearing down");
                self.state = PaState::Stopping;
                let report = self.teardown().await;
                if !report.is_clean() {
                    tracing::warn!(pa = %self.name, %report, "teardown after failed startup");
                }
                self.state = PaState::Stopped;
                Err(e)
            }
        }
    }

    async fn start_children(&mut self) -> Result<(), HarnessError> {
        if self.owns_transport {
            self.transport.start().await?;
        } else if !self.transport.is_running() {
            return Err(HarnessError::NotStarted(format!(
                "{} (borrowed by {})",
                self.transport.name(),
                self.name
            )));
        }
        let endpoint = self.transport.require_endpoint()?;

        let options = ConnectOptions {
            name: self.name.clone(),
            subscription_capacity: self.config.subscription_capacity,
            request_timeout: self.config.ready_timeout.min(MAX_REQUEST_TIMEOUT),
        };
        let connection = BrokerConnection::connect(&endpoint, options).await?;
        self.connection = Some(Arc::clone(&connection));
        self.observer = Some(connection.observe().await?);

        let workers = self
            .config
            .workers
            .clone()
            .unwrap_or_else(|| platform_workers(self.lookup.as_ref()));
        let pool = self.pool.insert(ServicePool::new(workers, &connection));
        pool.start_all().await?;
        pool.wait_ready(self.config.ready_timeout).await?;

        let state = GatewayState {
            pa: self.id,
            rank: self.config.rank.clone(),
            broker: connection,
        };
        let gateway = self
            .gateway
            .insert(Gateway::new(state, self.config.gateway.clone()));
        gateway.start().await?;
        Ok(())
    }

    /// Releases every child in reverse start order.
    ///
    /// Every release is attempted even if an earlier one fails; failures
    /// are collected in the report. Calling it on a PA that is not running
    /// does nothing.
    pub async fn shutdown(&mut self) -> TeardownReport {
        if matches!(self.state, PaState::Created | PaState::Stopped) {
            return TeardownReport::new();
        }
        self.state = PaState::Stopping;
        let report = self.teardown().await;
        self.state = PaState::Stopped;
        tracing::info!(pa = %self.name, clean = report.is_clean(), "PA stopped");
        report
    }

    async fn teardown(&mut self) -> TeardownReport {
        let mut report = TeardownReport::new();

        if let Some(gateway) = self.gateway.take() {
            report.record(format!("{}/gateway", self.name), gateway.stop().await);
        }
        if let Some(pool) = self.pool.take() {
            report.record_all(&format!("{}/runners", self.name), pool.stop_all().await);
        }
        drop(self.observer.take());
        if let Some(connection) = self.connection.take() {
            report.record(format!("{}/connection", self.name), connection.close().await);
        }
        if self.owns_transport {
            report.record(format!("{}/transport", self.name), self.transport.stop().await);
        }
        report
    }
}

impl Drop for PaContext {
    fn drop(&mut self) {
        if matches!(self.state, PaState::Starting | PaState::Running | PaState::Stopping) {
            tracing::warn!(pa = %self.name, "PA dropped without shutdown, aborting its tasks");
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::service::{StartupHook, WorkerContext};
    use crate::transport::BrokerOptions;
    use async_trait::async_trait;

    const READY: Duration = Duration::from_secs(5);

    #[derive(Debug)]
    struct NeverReady;

    #[async_trait]
    impl StartupHook for NeverReady {
        async fn on_startup(&self, _ctx: &WorkerContext) -> Result<(), HarnessError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn standalone_pa_owns_its_transport() {
        let mut pa = PaContext::new(PaConfig::new(READY).with_name("solo"));
        assert_eq!(pa.state(), PaState::Created);
        let Ok(()) = pa.start().await else {
            panic!("start failed");
        };
        assert!(pa.is_running());
        assert!(pa.owns_transport());
        assert!(pa.transport().is_running());
        assert!(pa.runners().iter().all(ServiceRunner::is_ready));

        let info = pa.info();
        assert_eq!(info.name, "solo");
        assert!(info.transport_url.is_some_and(|u| u.starts_with("nats://")));
        assert!(info.api_base_url.is_some_and(|u| u.starts_with("http://")));
        assert_ne!(info.api_port, info.transport_port);

        let report = pa.shutdown().await;
        assert!(report.is_clean(), "{report}");
        assert!(!pa.is_running());
        assert!(!pa.transport().is_running());
        assert!(pa.api_base_url().is_none());
    }

    #[tokio::test]
    async fn borrowed_transport_survives_shutdown() {
        let shared = Arc::new(TransportService::embedded(BrokerOptions::default()));
        let Ok(()) = shared.start().await else {
            panic!("transport start failed");
        };
        let mut pa = PaContext::with_transport(PaConfig::new(READY), Arc::clone(&shared));
        let Ok(()) = pa.start().await else {
            panic!("start failed");
        };
        assert!(Arc::ptr_eq(pa.transport(), &shared));
        assert!(!pa.owns_transport());

        let report = pa.shutdown().await;
        assert!(report.is_clean(), "{report}");
        assert!(shared.is_running(), "borrowed transport must keep running");
        let _ = shared.stop().await;
    }

    #[tokio::test]
    async fn borrowed_transport_must_already_run() {
        let shared = Arc::new(TransportService::embedded(BrokerOptions::default()));
        let mut pa = PaContext::with_transport(PaConfig::new(READY), shared);
        assert!(matches!(pa.start().await, Err(HarnessError::NotStarted(_))));
        assert_eq!(pa.state(), PaState::Stopped);
    }

    #[tokio::test]
    async fn readiness_timeout_tears_everything_down() {
        let stuck = WorkerDefinition::new("stuck").on_startup(Arc::new(NeverReady));
        let config = PaConfig::new(Duration::from_millis(200)).with_workers(vec![stuck]);
        let mut pa = PaContext::new(config);

        let result = pa.start().await;
        assert!(result.is_err_and(|e| e.is_timeout()));
        assert_eq!(pa.state(), PaState::Stopped);
        assert!(!pa.transport().is_running());
        assert!(pa.connection().is_none());
        assert!(pa.gateway().is_none());
    }

    #[derive(Debug)]
    struct RefusingHook;

    #[async_trait]
    impl StartupHook for RefusingHook {
        async fn on_startup(&self, _ctx: &WorkerContext) -> Result<(), HarnessError> {
            Err(HarnessError::Handler("registry unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn failing_startup_hook_is_reported_without_waiting_for_the_deadline() {
        let bad = WorkerDefinition::new("bad").on_startup(Arc::new(RefusingHook));
        let config = PaConfig::new(Duration::from_secs(10)).with_workers(vec![bad]);
        let mut pa = PaContext::new(config);

        let started = tokio::time::Instant::now();
        let result = pa.start().await;
        assert!(
            matches!(&result, Err(HarnessError::WorkerFailed { name, message })
                if name == "bad" && message.contains("registry unavailable")),
            "got {result:?}"
        );
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(pa.state(), PaState::Stopped);
        assert!(!pa.transport().is_running());
    }

    #[tokio::test]
    async fn observer_sees_worker_traffic() {
        let mut pa = PaContext::new(PaConfig::new(READY));
        let Ok(()) = pa.start().await else {
            panic!("start failed");
        };
        let Some(conn) = pa.connection().map(Arc::clone) else {
            panic!("connection");
        };
        assert!(conn.publish("controle-formats-IN", "doc").is_ok());

        let Some(observer) = pa.observer_mut() else {
            panic!("observer");
        };
        let mut seen = Vec::new();
        while seen.len() < 2 {
            let Ok(Some(msg)) = tokio::time::timeout(Duration::from_secs(2), observer.recv()).await
            else {
                panic!("observer saw only {seen:?}");
            };
            seen.push(msg.subject);
        }
        assert_eq!(seen, vec!["controle-formats-IN", "controle-formats-OUT"]);
        let _ = pa.shutdown().await;
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let mut pa = PaContext::new(PaConfig::new(READY));
        assert!(pa.start().await.is_ok());
        assert!(matches!(pa.start().await, Err(HarnessError::AlreadyRunning(_))));
        let _ = pa.shutdown().await;
        let second = pa.shutdown().await;
        assert!(second.is_clean());
    }
}
